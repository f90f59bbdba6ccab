//! Domain error types.

/// A parse error with position information for script compilation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let line_start = input[..self.position.min(input.len())]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let line_end = input[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(input.len());
        let caret = " ".repeat(self.position - line_start) + "^";
        format!(
            "{line}\n{caret}\n{err}",
            line = &input[line_start..line_end],
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for barscript.
#[derive(Debug, thiserror::Error)]
pub enum BarscriptError {
    #[error(transparent)]
    ScriptParse(#[from] ParseError),

    #[error("unknown timeframe: {timeframe}")]
    InvalidTimeframe { timeframe: String },

    #[error("unknown function {namespace}.{name}")]
    UnknownFunction { namespace: String, name: String },

    #[error("script runtime error: {reason}")]
    Runtime { reason: String },

    #[error("data source error: {reason}")]
    Data { reason: String },

    #[error("no data for {symbol} on timeframe {timeframe}")]
    NoData { symbol: String, timeframe: String },

    #[error("cross-timeframe request requires a market data source")]
    NoProvider,

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&BarscriptError> for std::process::ExitCode {
    fn from(err: &BarscriptError) -> Self {
        let code: u8 = match err {
            BarscriptError::Io(_) => 1,
            BarscriptError::ConfigParse { .. } | BarscriptError::ConfigInvalid { .. } => 2,
            BarscriptError::Data { .. } | BarscriptError::NoProvider => 3,
            BarscriptError::ScriptParse(_)
            | BarscriptError::UnknownFunction { .. }
            | BarscriptError::Runtime { .. }
            | BarscriptError::InvalidTimeframe { .. } => 4,
            BarscriptError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_points_at_position() {
        let err = ParseError {
            message: "expected ')'".to_string(),
            position: 4,
        };
        let ctx = err.display_with_context("ta.x(close");
        let lines: Vec<&str> = ctx.lines().collect();
        assert_eq!(lines[0], "ta.x(close");
        assert_eq!(lines[1], "    ^");
    }

    #[test]
    fn caret_on_second_line() {
        let input = "let a = 1;\nlet b = ;";
        let err = ParseError {
            message: "expected expression".to_string(),
            position: 19,
        };
        let ctx = err.display_with_context(input);
        let lines: Vec<&str> = ctx.lines().collect();
        assert_eq!(lines[0], "let b = ;");
        assert_eq!(lines[1], "        ^");
    }
}
