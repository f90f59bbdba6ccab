//! Timeframe identifiers and ranking.
//!
//! Cross-timeframe requests compare the requested timeframe against the
//! primary run's timeframe; the comparison is by rank in a fixed ordered
//! table, not by millisecond duration (calendar timeframes have no fixed
//! duration).

use crate::domain::error::BarscriptError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    M45,
    H1,
    H2,
    H3,
    H4,
    D1,
    W1,
    Mo1,
}

impl Timeframe {
    /// Position in the ordered table; a higher rank means a longer bar.
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn parse(s: &str) -> Result<Timeframe, BarscriptError> {
        let tf = match s {
            "1" | "1m" => Timeframe::M1,
            "3" | "3m" => Timeframe::M3,
            "5" | "5m" => Timeframe::M5,
            "15" | "15m" => Timeframe::M15,
            "30" | "30m" => Timeframe::M30,
            "45" | "45m" => Timeframe::M45,
            "60" | "1H" | "1h" => Timeframe::H1,
            "120" | "2H" | "2h" => Timeframe::H2,
            "180" | "3H" | "3h" => Timeframe::H3,
            "240" | "4H" | "4h" => Timeframe::H4,
            "D" | "1D" | "1d" => Timeframe::D1,
            "W" | "1W" | "1w" => Timeframe::W1,
            "M" | "1M" => Timeframe::Mo1,
            _ => {
                return Err(BarscriptError::InvalidTimeframe {
                    timeframe: s.to_string(),
                });
            }
        };
        Ok(tf)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::M45 => "45m",
            Timeframe::H1 => "1H",
            Timeframe::H2 => "2H",
            Timeframe::H3 => "3H",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
            Timeframe::W1 => "1W",
            Timeframe::Mo1 => "1M",
        };
        write!(f, "{}", s)
    }
}
