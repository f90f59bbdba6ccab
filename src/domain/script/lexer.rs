//! Script lexer.
//!
//! Produces position-tagged tokens for the surface language. ASCII-oriented
//! for operators and keywords; identifiers are ASCII letters/underscore plus
//! digits after the first character. Skips whitespace, `//` line comments and
//! `/* */` block comments (non-nesting).

use crate::domain::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Num(f64),
    Str(String),

    // Keywords
    Const,
    Let,
    Var,
    Fn,
    Return,
    If,
    Else,
    For,
    While,
    True,
    False,
    Na,

    // Punctuation / operators
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Question,

    Assign,     // =
    PlusAssign, // +=
    MinusAssign,
    StarAssign,
    SlashAssign,
    PlusPlus,
    MinusMinus,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,    // ==
    EqEqEq,  // ===
    NotEq,   // !=
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,

    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub pos: usize,
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia()?;
            let pos = self.pos;
            if self.pos >= self.bytes.len() {
                out.push(SpannedToken {
                    token: Token::Eof,
                    pos,
                });
                return Ok(out);
            }
            let token = self.next_token()?;
            out.push(SpannedToken { token, pos });
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                Some(b'/') if self.peek2() == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek2() == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        if self.pos + 1 >= self.bytes.len() {
                            return Err(ParseError {
                                message: "unterminated block comment".to_string(),
                                position: start,
                            });
                        }
                        if self.bytes[self.pos] == b'*' && self.bytes[self.pos + 1] == b'/' {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let b = self.bytes[self.pos];

        if b.is_ascii_alphabetic() || b == b'_' {
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let word = &self.src[start..self.pos];
            return Ok(match word {
                "const" => Token::Const,
                "let" => Token::Let,
                "var" => Token::Var,
                "fn" | "function" => Token::Fn,
                "return" => Token::Return,
                "if" => Token::If,
                "else" => Token::Else,
                "for" => Token::For,
                "while" => Token::While,
                "true" => Token::True,
                "false" => Token::False,
                "na" => Token::Na,
                _ => Token::Ident(word.to_string()),
            });
        }

        if b.is_ascii_digit() {
            return self.lex_number(start);
        }

        if b == b'"' || b == b'\'' {
            return self.lex_string(b);
        }

        self.pos += 1;
        let tok = match b {
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b';' => Token::Semi,
            b':' => Token::Colon,
            b'.' => {
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos -= 1;
                    return self.lex_number(start);
                }
                Token::Dot
            }
            b'?' => Token::Question,
            b'%' => Token::Percent,
            b'+' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    Token::PlusAssign
                }
                Some(b'+') => {
                    self.pos += 1;
                    Token::PlusPlus
                }
                _ => Token::Plus,
            },
            b'-' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    Token::MinusAssign
                }
                Some(b'-') => {
                    self.pos += 1;
                    Token::MinusMinus
                }
                _ => Token::Minus,
            },
            b'*' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::StarAssign
                } else {
                    Token::Star
                }
            }
            b'/' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::SlashAssign
                } else {
                    Token::Slash
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    // tolerate !==
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                    }
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        Token::EqEqEq
                    } else {
                        Token::EqEq
                    }
                } else {
                    Token::Assign
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.pos += 1;
                    Token::AndAnd
                } else {
                    return Err(self.unexpected(start, b));
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.pos += 1;
                    Token::OrOr
                } else {
                    return Err(self.unexpected(start, b));
                }
            }
            _ => return Err(self.unexpected(start, b)),
        };
        Ok(tok)
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, ParseError> {
        let mut has_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == b'.' && !has_dot {
                has_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>().map(Token::Num).map_err(|_| ParseError {
            message: format!("invalid number: {}", text),
            position: start,
        })
    }

    fn lex_string(&mut self, quote: u8) -> Result<Token, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(ParseError {
                        message: "unterminated string literal".to_string(),
                        position: start,
                    });
                }
                Some(b) if b == quote => return Ok(Token::Str(s)),
                Some(b'\\') => match self.bump() {
                    Some(b'n') => s.push('\n'),
                    Some(b't') => s.push('\t'),
                    Some(b'\\') => s.push('\\'),
                    Some(c) if c == quote => s.push(c as char),
                    Some(c) => {
                        return Err(ParseError {
                            message: format!("invalid escape: \\{}", c as char),
                            position: self.pos - 1,
                        });
                    }
                    None => {
                        return Err(ParseError {
                            message: "unterminated string literal".to_string(),
                            position: start,
                        });
                    }
                },
                Some(b) => s.push(b as char),
            }
        }
    }

    fn unexpected(&self, pos: usize, b: u8) -> ParseError {
        ParseError {
            message: format!("unexpected character '{}'", b as char),
            position: pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn lex_declaration() {
        assert_eq!(
            toks("let val = 0;"),
            vec![
                Token::Let,
                Token::Ident("val".into()),
                Token::Assign,
                Token::Num(0.0),
                Token::Semi,
                Token::Eof
            ]
        );
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            toks("== === != <= >= && || ++ += ?"),
            vec![
                Token::EqEq,
                Token::EqEqEq,
                Token::NotEq,
                Token::Le,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
                Token::PlusPlus,
                Token::PlusAssign,
                Token::Question,
                Token::Eof
            ]
        );
    }

    #[test]
    fn lex_namespace_call() {
        assert_eq!(
            toks("ta.ema(close, 10)"),
            vec![
                Token::Ident("ta".into()),
                Token::Dot,
                Token::Ident("ema".into()),
                Token::LParen,
                Token::Ident("close".into()),
                Token::Comma,
                Token::Num(10.0),
                Token::RParen,
                Token::Eof
            ]
        );
    }

    #[test]
    fn lex_comments_and_strings() {
        assert_eq!(
            toks("// line\n/* block */ \"hi\" '4H'"),
            vec![Token::Str("hi".into()), Token::Str("4H".into()), Token::Eof]
        );
    }

    #[test]
    fn lex_float() {
        assert_eq!(toks("3.14"), vec![Token::Num(3.14), Token::Eof]);
    }

    #[test]
    fn lex_na_keyword() {
        assert_eq!(toks("na"), vec![Token::Na, Token::Eof]);
    }

    #[test]
    fn unterminated_string_is_error() {
        let err = Lexer::new("\"abc").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn unexpected_char_is_error() {
        let err = Lexer::new("let a = #;").tokenize().unwrap_err();
        assert!(err.message.contains("unexpected character"));
        assert_eq!(err.position, 8);
    }
}
