//! Script parser.
//!
//! Recursive descent with precedence climbing over the token stream.
//! Converts text to AST with meaningful error messages including character
//! offset and expected/found tokens. Any failure aborts compilation; no
//! partial unit is produced.

use crate::domain::error::ParseError;
use crate::domain::script::ast::*;
use crate::domain::script::lexer::{Lexer, SpannedToken, Token};

pub fn parse(input: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, i: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    i: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.i].token
    }

    fn peek_ahead(&self, n: usize) -> &Token {
        let idx = (self.i + n).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn pos(&self) -> usize {
        self.tokens[self.i].pos
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.i].token.clone();
        if self.i + 1 < self.tokens.len() {
            self.i += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == expected {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.bump();
                Ok(name)
            }
            other => Err(self.err(format!("expected identifier, found {}", describe(&other)))),
        }
    }

    fn err(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.pos(),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        while self.peek() != &Token::Eof {
            body.push(self.parse_stmt()?);
        }
        Ok(body)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while self.peek() != &Token::RBrace {
            if self.peek() == &Token::Eof {
                return Err(self.err("expected '}', found end of input".to_string()));
            }
            body.push(self.parse_stmt()?);
        }
        self.bump();
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Token::Const | Token::Let | Token::Var => self.parse_decl(),
            Token::Fn => self.parse_fn_decl(),
            Token::Return => self.parse_return(),
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::While => self.parse_while(),
            Token::Ident(_) if is_assign_op(self.peek_ahead(1)) => self.parse_assign(),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(&Token::Semi, "';'")?;
                Ok(Stmt::ExprStmt(expr))
            }
        }
    }

    fn parse_decl(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        let kind = match self.bump() {
            Token::Const => DeclKind::Const,
            Token::Let => DeclKind::Let,
            Token::Var => DeclKind::Var,
            _ => unreachable!(),
        };

        if self.peek() == &Token::LBracket {
            self.bump();
            let mut names = Vec::new();
            names.push(self.expect_ident()?);
            while self.peek() == &Token::Comma {
                self.bump();
                names.push(self.expect_ident()?);
            }
            self.expect(&Token::RBracket, "']'")?;
            self.expect(&Token::Assign, "'='")?;
            let init = self.parse_expr()?;
            self.expect(&Token::Semi, "';'")?;
            return Ok(Stmt::DeclTuple {
                kind,
                names,
                init,
                pos,
            });
        }

        let name = self.expect_ident()?;
        self.expect(&Token::Assign, "'='")?;
        let init = self.parse_expr()?;
        self.expect(&Token::Semi, "';'")?;
        Ok(Stmt::Decl {
            kind,
            name,
            init,
            pos,
        })
    }

    fn parse_assign(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        let target = self.expect_ident()?;
        let op = match self.bump() {
            Token::Assign => AssignOp::Assign,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::StarAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            other => {
                return Err(self.err(format!(
                    "expected assignment operator, found {}",
                    describe(&other)
                )));
            }
        };
        let value = self.parse_expr()?;
        self.expect(&Token::Semi, "';'")?;
        Ok(Stmt::Assign {
            target,
            op,
            value,
            pos,
        })
    }

    fn parse_fn_decl(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.pos();
        self.bump();
        let name = self.expect_ident()?;
        self.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek() != &Token::RParen {
            params.push(self.expect_ident()?);
            while self.peek() == &Token::Comma {
                self.bump();
                params.push(self.expect_ident()?);
            }
        }
        self.expect(&Token::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::FnDecl {
            name,
            params,
            body,
            pos,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        self.bump();
        if self.peek() == &Token::LBrace {
            self.bump();
            let mut fields = Vec::new();
            while self.peek() != &Token::RBrace {
                let key = self.expect_ident()?;
                let value = if self.peek() == &Token::Colon {
                    self.bump();
                    self.parse_expr()?
                } else {
                    // shorthand `{ val }`
                    Expr::Ident {
                        name: key.clone(),
                        pos: self.pos(),
                    }
                };
                fields.push((key, value));
                if self.peek() == &Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
            self.expect(&Token::RBrace, "'}'")?;
            self.expect(&Token::Semi, "';'")?;
            return Ok(Stmt::Return(ReturnValue::Record(fields)));
        }
        let expr = self.parse_expr()?;
        self.expect(&Token::Semi, "';'")?;
        Ok(Stmt::Return(ReturnValue::Expr(expr)))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.bump();
        self.expect(&Token::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')'")?;
        let then_body = self.parse_block()?;
        let else_body = if self.peek() == &Token::Else {
            self.bump();
            if self.peek() == &Token::If {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        self.bump();
        self.expect(&Token::LParen, "'('")?;
        // Loop counters are always `let`-declared and ephemeral.
        self.expect(&Token::Let, "'let'")?;
        let var = self.expect_ident()?;
        self.expect(&Token::Assign, "'='")?;
        let init = self.parse_expr()?;
        self.expect(&Token::Semi, "';'")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::Semi, "';'")?;
        let step = self.parse_for_step(&var)?;
        self.expect(&Token::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_for_step(&mut self, loop_var: &str) -> Result<ForStep, ParseError> {
        let target = self.expect_ident()?;
        if target != loop_var {
            return Err(self.err(format!(
                "for-loop step must update '{}', found '{}'",
                loop_var, target
            )));
        }
        match self.bump() {
            Token::PlusPlus => Ok(ForStep {
                target,
                op: AssignOp::Add,
                value: Expr::Num(1.0),
            }),
            Token::MinusMinus => Ok(ForStep {
                target,
                op: AssignOp::Sub,
                value: Expr::Num(1.0),
            }),
            Token::PlusAssign => Ok(ForStep {
                target,
                op: AssignOp::Add,
                value: self.parse_expr()?,
            }),
            Token::MinusAssign => Ok(ForStep {
                target,
                op: AssignOp::Sub,
                value: self.parse_expr()?,
            }),
            Token::Assign => Ok(ForStep {
                target,
                op: AssignOp::Assign,
                value: self.parse_expr()?,
            }),
            other => Err(self.err(format!(
                "expected for-loop step, found {}",
                describe(&other)
            ))),
        }
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        self.bump();
        self.expect(&Token::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_or()?;
        if self.peek() == &Token::Question {
            self.bump();
            let then = self.parse_ternary()?;
            self.expect(&Token::Colon, "':'")?;
            let other = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                other: Box::new(other),
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek() == &Token::OrOr {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.peek() == &Token::AndAnd {
            self.bump();
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq | Token::EqEqEq => BinOp::Eq,
                Token::NotEq => BinOp::Neq,
                _ => break,
            };
            self.bump();
            let right = self.parse_relational()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Token::Minus => {
                self.bump();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    expr: Box::new(expr),
                })
            }
            Token::Bang => {
                self.bump();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    expr: Box::new(expr),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.peek() == &Token::LBracket {
            self.bump();
            let index = self.parse_expr()?;
            self.expect(&Token::RBracket, "']'")?;
            expr = Expr::Index {
                object: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.pos();
        match self.peek().clone() {
            Token::Num(n) => {
                self.bump();
                Ok(Expr::Num(n))
            }
            Token::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            Token::True => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            Token::Na => {
                self.bump();
                // `na` doubles as the availability test when called.
                if self.peek() == &Token::LParen {
                    self.bump();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call {
                        callee: "na".to_string(),
                        args,
                        pos,
                    });
                }
                Ok(Expr::Na)
            }
            Token::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.bump();
                let mut items = Vec::new();
                if self.peek() != &Token::RBracket {
                    items.push(self.parse_expr()?);
                    while self.peek() == &Token::Comma {
                        self.bump();
                        items.push(self.parse_expr()?);
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::Tuple(items))
            }
            Token::Ident(name) => {
                self.bump();
                if self.peek() == &Token::Dot {
                    self.bump();
                    let func = self.expect_ident()?;
                    self.expect(&Token::LParen, "'('")?;
                    let args = self.parse_args()?;
                    return Ok(Expr::NsCall {
                        namespace: name,
                        func,
                        args,
                        pos,
                    });
                }
                if self.peek() == &Token::LParen {
                    self.bump();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call {
                        callee: name,
                        args,
                        pos,
                    });
                }
                Ok(Expr::Ident { name, pos })
            }
            other => Err(self.err(format!("expected expression, found {}", describe(&other)))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            args.push(self.parse_expr()?);
            while self.peek() == &Token::Comma {
                self.bump();
                args.push(self.parse_expr()?);
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(args)
    }
}

fn is_assign_op(t: &Token) -> bool {
    matches!(
        t,
        Token::Assign
            | Token::PlusAssign
            | Token::MinusAssign
            | Token::StarAssign
            | Token::SlashAssign
    )
}

fn describe(t: &Token) -> String {
    match t {
        Token::Ident(s) => format!("'{}'", s),
        Token::Num(n) => format!("number {}", n),
        Token::Str(s) => format!("string \"{}\"", s),
        Token::Eof => "end of input".to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_na_as_literal_and_call() {
        let prog = parse("let a = na; let b = na(close);").unwrap();
        match &prog[0] {
            Stmt::Decl { init, .. } => assert!(matches!(init, Expr::Na)),
            other => panic!("expected declaration, got {other:?}"),
        }
        match &prog[1] {
            Stmt::Decl { init, .. } => {
                assert!(matches!(init, Expr::Call { callee, .. } if callee == "na"))
            }
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn parse_declaration() {
        let prog = parse("let val = 0;").unwrap();
        assert!(matches!(
            &prog[0],
            Stmt::Decl {
                kind: DeclKind::Let,
                name,
                ..
            } if name == "val"
        ));
    }

    #[test]
    fn parse_self_referencing_counter() {
        let prog = parse("let val = 0; val = val[1] ? val[1] + 1 : 1; return val;").unwrap();
        assert_eq!(prog.len(), 3);
        assert!(matches!(&prog[1], Stmt::Assign { .. }));
        assert!(matches!(&prog[2], Stmt::Return(ReturnValue::Expr(_))));
    }

    #[test]
    fn parse_if_else() {
        let prog = parse("var x = 10; if (close > open) { x = 15; } else { x = 10; }").unwrap();
        match &prog[1] {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            _ => panic!("expected if statement"),
        }
    }

    #[test]
    fn parse_else_if_chain() {
        let prog = parse("if (a) { b = 1; } else if (c) { b = 2; } else { b = 3; }").unwrap();
        match &prog[0] {
            Stmt::If { else_body, .. } => {
                assert!(matches!(&else_body[0], Stmt::If { .. }));
            }
            _ => panic!("expected if statement"),
        }
    }

    #[test]
    fn parse_for_loop() {
        let prog = parse("for (let i = 1; i <= 3; i++) { acc += i; }").unwrap();
        match &prog[0] {
            Stmt::For { var, step, .. } => {
                assert_eq!(var, "i");
                assert_eq!(step.op, AssignOp::Add);
            }
            _ => panic!("expected for statement"),
        }
    }

    #[test]
    fn parse_fn_decl() {
        let prog =
            parse("fn avg(src, len) { let s = 0.0; return s / len; }").unwrap();
        match &prog[0] {
            Stmt::FnDecl { name, params, body, .. } => {
                assert_eq!(name, "avg");
                assert_eq!(params, &["src".to_string(), "len".to_string()]);
                assert_eq!(body.len(), 2);
            }
            _ => panic!("expected fn declaration"),
        }
    }

    #[test]
    fn parse_record_return() {
        let prog = parse("return { fast: a, slow };").unwrap();
        match &prog[0] {
            Stmt::Return(ReturnValue::Record(fields)) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0, "fast");
                assert_eq!(fields[1].0, "slow");
            }
            _ => panic!("expected record return"),
        }
    }

    #[test]
    fn parse_namespace_call() {
        let prog = parse("let e = ta.ema(close, 10);").unwrap();
        match &prog[0] {
            Stmt::Decl { init, .. } => match init {
                Expr::NsCall {
                    namespace, func, args, ..
                } => {
                    assert_eq!(namespace, "ta");
                    assert_eq!(func, "ema");
                    assert_eq!(args.len(), 2);
                }
                _ => panic!("expected namespace call"),
            },
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn parse_security_call() {
        let prog = parse("let w = request.security('BTCUSDC', 'W', close);").unwrap();
        match &prog[0] {
            Stmt::Decl { init, .. } => {
                assert!(matches!(init, Expr::NsCall { namespace, .. } if namespace == "request"));
            }
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn parse_tuple_destructuring() {
        let prog = parse("let [line, sig, hist] = ta.macd(close, 12, 26, 9);").unwrap();
        match &prog[0] {
            Stmt::DeclTuple { names, .. } => assert_eq!(names.len(), 3),
            _ => panic!("expected tuple declaration"),
        }
    }

    #[test]
    fn parse_nested_index() {
        let prog = parse("let a = x[y[1]];").unwrap();
        match &prog[0] {
            Stmt::Decl { init, .. } => match init {
                Expr::Index { index, .. } => assert!(matches!(**index, Expr::Index { .. })),
                _ => panic!("expected index expression"),
            },
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        let prog = parse("let a = 1 + 2 * 3;").unwrap();
        match &prog[0] {
            Stmt::Decl { init, .. } => match init {
                Expr::Binary { op: BinOp::Add, right, .. } => {
                    assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
                }
                _ => panic!("expected addition at root"),
            },
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn error_missing_close_paren() {
        let err = parse("let a = ta.ema(close, 10;").unwrap_err();
        assert!(err.message.contains("expected ')'"), "{}", err.message);
    }

    #[test]
    fn error_missing_semicolon() {
        let err = parse("let a = 1").unwrap_err();
        assert!(err.message.contains("expected ';'"));
    }

    #[test]
    fn error_incomplete_expression() {
        let err = parse("let a = ;").unwrap_err();
        assert!(err.message.contains("expected expression"));
    }

    #[test]
    fn error_position_is_reported() {
        let err = parse("let a = 1;\nlet b = ;").unwrap_err();
        assert_eq!(err.position, 19);
    }
}
