//! AST-to-IR rewriter.
//!
//! One pass over the surface AST with a scope stack. Declarations become
//! slot inits, bare reads become current-bar slot accesses, `x[n]` becomes a
//! history look-back, and every call argument is wrapped in a parameter node
//! with a unique name so callees see series, not scalars. `ta.*` call sites
//! get sequential identity numbers for their internal state. `==`/`===`
//! become NA-aware equality; `!=` keeps native float semantics.

use std::collections::HashMap;

use crate::domain::error::ParseError;
use crate::domain::script::ast::{
    AssignOp, BinOp, DeclKind, Expr, ForStep, ReturnValue, Stmt, UnOp,
};
use crate::domain::script::compiled::{
    CExpr, CFunction, CReturn, CStmt, CompiledScript, CoreFn, LogicalOp, MathFunc, Slot, TaFunc,
};
use crate::domain::script::scope::{Resolved, ScopeStack, ScopeTag};
use crate::domain::value::{BinaryOp, SlotKind, UnaryOp};

pub fn rewrite(program: &[Stmt]) -> Result<CompiledScript, ParseError> {
    let mut rw = Rewriter {
        scopes: ScopeStack::new(),
        params: 0,
        ta_calls: 0,
        functions: HashMap::new(),
    };
    let body = rw.rewrite_body(program)?;
    Ok(CompiledScript {
        body,
        functions: rw.functions,
    })
}

struct Rewriter {
    scopes: ScopeStack,
    params: u32,
    ta_calls: u32,
    functions: HashMap<String, CFunction>,
}

impl Rewriter {
    fn next_param(&mut self) -> String {
        let name = format!("p{}", self.params);
        self.params += 1;
        name
    }

    fn rewrite_body(&mut self, stmts: &[Stmt]) -> Result<Vec<CStmt>, ParseError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(lowered) = self.rewrite_stmt(stmt)? {
                out.push(lowered);
            }
        }
        Ok(out)
    }

    fn rewrite_stmt(&mut self, stmt: &Stmt) -> Result<Option<CStmt>, ParseError> {
        match stmt {
            Stmt::Decl {
                kind, name, init, ..
            } => {
                let init = self.rewrite_expr(init)?;
                let slot = self.scopes.declare(name, slot_kind(*kind));
                Ok(Some(CStmt::Init { slot, init }))
            }
            Stmt::DeclTuple {
                kind, names, init, ..
            } => {
                let init = self.rewrite_expr(init)?;
                let slots = names
                    .iter()
                    .map(|n| self.scopes.declare(n, slot_kind(*kind)))
                    .collect();
                Ok(Some(CStmt::InitTuple { slots, init }))
            }
            Stmt::Assign {
                target, op, value, ..
            } => {
                let rhs = self.rewrite_expr(value)?;
                match self.scopes.resolve(target) {
                    Resolved::Slot(slot) => {
                        let value = desugar_compound(*op, CExpr::Current(slot.clone()), rhs);
                        Ok(Some(CStmt::Assign { slot, value }))
                    }
                    Resolved::Local(name) => {
                        let value =
                            desugar_compound(*op, CExpr::Local(name.clone()), rhs);
                        Ok(Some(CStmt::LocalAssign { name, value }))
                    }
                }
            }
            Stmt::ExprStmt(expr) => Ok(Some(CStmt::Expr(self.rewrite_expr(expr)?))),
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.rewrite_expr(cond)?;
                self.scopes.push(ScopeTag::If);
                let then_body = self.rewrite_body(then_body)?;
                self.scopes.pop();
                self.scopes.push(ScopeTag::Else);
                let else_body = self.rewrite_body(else_body)?;
                self.scopes.pop();
                Ok(Some(CStmt::If {
                    cond,
                    then_body,
                    else_body,
                }))
            }
            Stmt::For {
                var,
                init,
                cond,
                step,
                body,
            } => {
                let init = self.rewrite_expr(init)?;
                self.scopes.push(ScopeTag::For);
                self.scopes.declare_local(var);
                let cond = self.rewrite_expr(cond)?;
                let step = self.rewrite_step(var, step)?;
                let body = self.rewrite_body(body)?;
                self.scopes.pop();
                Ok(Some(CStmt::For {
                    var: var.clone(),
                    init,
                    cond,
                    step,
                    body,
                }))
            }
            Stmt::While { cond, body } => {
                let cond = self.rewrite_expr(cond)?;
                self.scopes.push(ScopeTag::While);
                let body = self.rewrite_body(body)?;
                self.scopes.pop();
                Ok(Some(CStmt::While { cond, body }))
            }
            Stmt::FnDecl {
                name, params, body, ..
            } => {
                self.scopes.push(ScopeTag::Fn);
                for param in params {
                    self.scopes.declare_local(param);
                }
                let body = self.rewrite_body(body)?;
                self.scopes.pop();
                self.functions.insert(
                    name.clone(),
                    CFunction {
                        params: params.clone(),
                        body,
                    },
                );
                Ok(None)
            }
            Stmt::Return(value) => {
                let ret = match value {
                    ReturnValue::Expr(expr) => CReturn::Value(self.rewrite_result(expr)?),
                    ReturnValue::Record(fields) => {
                        let mut lowered = Vec::with_capacity(fields.len());
                        for (key, expr) in fields {
                            lowered.push((key.clone(), self.rewrite_result(expr)?));
                        }
                        CReturn::Record(lowered)
                    }
                };
                Ok(Some(CStmt::Return(ret)))
            }
        }
    }

    fn rewrite_step(&mut self, var: &str, step: &ForStep) -> Result<CExpr, ParseError> {
        let value = self.rewrite_expr(&step.value)?;
        Ok(desugar_compound(
            step.op,
            CExpr::Local(var.to_string()),
            value,
        ))
    }

    /// Result-position rewrite: a bare identifier yields its series handle so
    /// the result collector can read the whole history, not just the
    /// current bar.
    fn rewrite_result(&mut self, expr: &Expr) -> Result<CExpr, ParseError> {
        match expr {
            Expr::Ident { name, .. } => match self.scopes.resolve(name) {
                Resolved::Slot(slot) => Ok(CExpr::SeriesHandle(slot)),
                Resolved::Local(name) => Ok(CExpr::Local(name)),
            },
            Expr::Tuple(items) => {
                let mut lowered = Vec::with_capacity(items.len());
                for item in items {
                    lowered.push(self.rewrite_result(item)?);
                }
                Ok(CExpr::Tuple(lowered))
            }
            other => self.rewrite_expr(other),
        }
    }

    fn rewrite_expr(&mut self, expr: &Expr) -> Result<CExpr, ParseError> {
        match expr {
            Expr::Num(n) => Ok(CExpr::Num(*n)),
            Expr::Str(s) => Ok(CExpr::Str(s.clone())),
            Expr::Bool(b) => Ok(CExpr::Bool(*b)),
            Expr::Na => Ok(CExpr::Na),
            Expr::Ident { name, .. } => match self.scopes.resolve(name) {
                Resolved::Slot(slot) => Ok(CExpr::Current(slot)),
                Resolved::Local(name) => Ok(CExpr::Local(name)),
            },
            Expr::Index { object, index } => {
                let index = self.rewrite_expr(index)?;
                if let Expr::Ident { name, .. } = object.as_ref() {
                    match self.scopes.resolve(name) {
                        Resolved::Slot(slot) => {
                            return Ok(CExpr::History {
                                slot,
                                index: Box::new(index),
                            });
                        }
                        Resolved::Local(name) => {
                            return Ok(CExpr::Index {
                                object: Box::new(CExpr::Local(name)),
                                index: Box::new(index),
                            });
                        }
                    }
                }
                Ok(CExpr::Index {
                    object: Box::new(self.rewrite_expr(object)?),
                    index: Box::new(index),
                })
            }
            Expr::Unary { op, expr } => Ok(CExpr::Unary {
                op: match op {
                    UnOp::Neg => UnaryOp::Neg,
                    UnOp::Not => UnaryOp::Not,
                },
                expr: Box::new(self.rewrite_expr(expr)?),
            }),
            Expr::Binary { op, left, right } => {
                let left = Box::new(self.rewrite_expr(left)?);
                let right = Box::new(self.rewrite_expr(right)?);
                Ok(match op {
                    BinOp::Eq => CExpr::NaEq { left, right },
                    BinOp::And => CExpr::Logical {
                        op: LogicalOp::And,
                        left,
                        right,
                    },
                    BinOp::Or => CExpr::Logical {
                        op: LogicalOp::Or,
                        left,
                        right,
                    },
                    other => CExpr::Binary {
                        op: binary_op(*other),
                        left,
                        right,
                    },
                })
            }
            Expr::Ternary { cond, then, other } => Ok(CExpr::Ternary {
                cond: Box::new(self.rewrite_expr(cond)?),
                then: Box::new(self.rewrite_expr(then)?),
                other: Box::new(self.rewrite_expr(other)?),
            }),
            Expr::Tuple(items) => {
                let mut lowered = Vec::with_capacity(items.len());
                for item in items {
                    lowered.push(self.rewrite_result(item)?);
                }
                Ok(CExpr::Tuple(lowered))
            }
            Expr::NsCall {
                namespace,
                func,
                args,
                pos,
            } => self.rewrite_ns_call(namespace, func, args, *pos),
            Expr::Call { callee, args, pos } => self.rewrite_call(callee, args, *pos),
        }
    }

    fn rewrite_ns_call(
        &mut self,
        namespace: &str,
        func: &str,
        args: &[Expr],
        pos: usize,
    ) -> Result<CExpr, ParseError> {
        match namespace {
            "ta" => {
                let func = TaFunc::from_name(func).ok_or_else(|| ParseError {
                    message: format!("unknown function 'ta.{}'", func),
                    position: pos,
                })?;
                let args = self.wrap_args(args)?;
                let call_id = self.ta_calls;
                self.ta_calls += 1;
                Ok(CExpr::Ta {
                    func,
                    args,
                    call_id,
                })
            }
            "math" => {
                let func = MathFunc::from_name(func).ok_or_else(|| ParseError {
                    message: format!("unknown function 'math.{}'", func),
                    position: pos,
                })?;
                let args = self.wrap_args(args)?;
                Ok(CExpr::MathFn { func, args })
            }
            "request" => {
                if func != "security" {
                    return Err(ParseError {
                        message: format!("unknown function 'request.{}'", func),
                        position: pos,
                    });
                }
                let args = self.wrap_args(args)?;
                Ok(CExpr::Security { args })
            }
            other => Err(ParseError {
                message: format!("unknown namespace '{}'", other),
                position: pos,
            }),
        }
    }

    fn rewrite_call(&mut self, callee: &str, args: &[Expr], _pos: usize) -> Result<CExpr, ParseError> {
        if let Some(func) = CoreFn::from_name(callee) {
            // Core helpers act on current-bar values; no series wrapping.
            let mut lowered = Vec::with_capacity(args.len());
            for arg in args {
                lowered.push(self.rewrite_expr(arg)?);
            }
            return Ok(CExpr::Core {
                func,
                args: lowered,
            });
        }
        let args = self.wrap_args(args)?;
        Ok(CExpr::UserCall {
            name: callee.to_string(),
            args,
        })
    }

    fn wrap_args(&mut self, args: &[Expr]) -> Result<Vec<CExpr>, ParseError> {
        args.iter().map(|a| self.wrap_arg(a)).collect()
    }

    /// Normalize a call argument. Identifiers and look-backs pass the
    /// underlying series handle; anything else is evaluated per bar and
    /// accumulated into a dedicated parameter series.
    fn wrap_arg(&mut self, arg: &Expr) -> Result<CExpr, ParseError> {
        let name = self.next_param();
        match arg {
            Expr::Ident { name: id, .. } => {
                let arg = match self.scopes.resolve(id) {
                    Resolved::Slot(slot) => CExpr::SeriesHandle(slot),
                    Resolved::Local(local) => CExpr::Local(local),
                };
                Ok(CExpr::Param {
                    arg: Box::new(arg),
                    index: None,
                    name,
                })
            }
            Expr::Index { object, index } => {
                if let Expr::Ident { name: id, .. } = object.as_ref() {
                    if let Resolved::Slot(slot) = self.scopes.resolve(id) {
                        let index = self.rewrite_expr(index)?;
                        return Ok(CExpr::Param {
                            arg: Box::new(CExpr::SeriesHandle(slot)),
                            index: Some(Box::new(index)),
                            name,
                        });
                    }
                }
                Ok(CExpr::Param {
                    arg: Box::new(self.rewrite_expr(arg)?),
                    index: None,
                    name,
                })
            }
            other => Ok(CExpr::Param {
                arg: Box::new(self.rewrite_expr(other)?),
                index: None,
                name,
            }),
        }
    }
}

fn slot_kind(kind: DeclKind) -> SlotKind {
    match kind {
        DeclKind::Const => SlotKind::Const,
        DeclKind::Let => SlotKind::Let,
        DeclKind::Var => SlotKind::Var,
    }
}

fn binary_op(op: BinOp) -> BinaryOp {
    match op {
        BinOp::Add => BinaryOp::Add,
        BinOp::Sub => BinaryOp::Sub,
        BinOp::Mul => BinaryOp::Mul,
        BinOp::Div => BinaryOp::Div,
        BinOp::Mod => BinaryOp::Mod,
        BinOp::Neq => BinaryOp::Neq,
        BinOp::Lt => BinaryOp::Lt,
        BinOp::Le => BinaryOp::Le,
        BinOp::Gt => BinaryOp::Gt,
        BinOp::Ge => BinaryOp::Ge,
        BinOp::Eq | BinOp::And | BinOp::Or => unreachable!("handled before lowering"),
    }
}

fn desugar_compound(op: AssignOp, current: CExpr, rhs: CExpr) -> CExpr {
    let bin = match op {
        AssignOp::Assign => return rhs,
        AssignOp::Add => BinaryOp::Add,
        AssignOp::Sub => BinaryOp::Sub,
        AssignOp::Mul => BinaryOp::Mul,
        AssignOp::Div => BinaryOp::Div,
    };
    CExpr::Binary {
        op: bin,
        left: Box::new(current),
        right: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script::parser::parse;

    fn compile(src: &str) -> CompiledScript {
        rewrite(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn declaration_becomes_slot_init() {
        let unit = compile("let val = 0;");
        match &unit.body[0] {
            CStmt::Init { slot, .. } => {
                assert_eq!(slot.kind, SlotKind::Let);
                assert_eq!(slot.name, "val");
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn bare_read_becomes_current() {
        let unit = compile("let a = 1; let b = a;");
        match &unit.body[1] {
            CStmt::Init { init, .. } => {
                assert!(matches!(init, CExpr::Current(slot) if slot.name == "a"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn lookback_becomes_history() {
        let unit = compile("let a = 1; let b = a[1];");
        match &unit.body[1] {
            CStmt::Init { init, .. } => {
                assert!(matches!(init, CExpr::History { slot, .. } if slot.name == "a"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn builtin_reads_are_data_slots() {
        let unit = compile("let c = close;");
        match &unit.body[0] {
            CStmt::Init { init, .. } => {
                assert!(matches!(init, CExpr::Current(slot) if slot.kind == SlotKind::Data));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn nested_declaration_is_scope_qualified() {
        let unit = compile("if (close > open) { let x = 1; }");
        match &unit.body[0] {
            CStmt::If { then_body, .. } => match &then_body[0] {
                CStmt::Init { slot, .. } => assert_eq!(slot.name, "x__if1"),
                other => panic!("unexpected statement: {:?}", other),
            },
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn equality_becomes_na_aware() {
        let unit = compile("let a = close == na;");
        match &unit.body[0] {
            CStmt::Init { init, .. } => assert!(matches!(init, CExpr::NaEq { .. })),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn inequality_keeps_native_semantics() {
        let unit = compile("let a = close != na;");
        match &unit.body[0] {
            CStmt::Init { init, .. } => {
                assert!(matches!(init, CExpr::Binary { op: BinaryOp::Neq, .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn compound_assign_desugars() {
        let unit = compile("let a = 0; a += 2;");
        match &unit.body[1] {
            CStmt::Assign { value, .. } => {
                assert!(matches!(value, CExpr::Binary { op: BinaryOp::Add, .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn ta_call_sites_get_sequential_identity() {
        let unit = compile("let a = ta.ema(close, 5); let b = ta.ema(close, 5);");
        let ids: Vec<u32> = unit
            .body
            .iter()
            .filter_map(|s| match s {
                CStmt::Init { init: CExpr::Ta { call_id, .. }, .. } => Some(*call_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn identifier_argument_passes_series_handle() {
        let unit = compile("let a = ta.sma(close, 3);");
        match &unit.body[0] {
            CStmt::Init { init: CExpr::Ta { args, .. }, .. } => match &args[0] {
                CExpr::Param { arg, index, .. } => {
                    assert!(matches!(arg.as_ref(), CExpr::SeriesHandle(slot) if slot.name == "close"));
                    assert!(index.is_none());
                }
                other => panic!("unexpected argument: {:?}", other),
            },
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn lookback_argument_keeps_offset() {
        let unit = compile("let a = ta.sma(close[1], 3);");
        match &unit.body[0] {
            CStmt::Init { init: CExpr::Ta { args, .. }, .. } => match &args[0] {
                CExpr::Param { index, .. } => assert!(index.is_some()),
                other => panic!("unexpected argument: {:?}", other),
            },
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn param_names_are_unique_across_calls() {
        let unit = compile("let a = ta.sma(close, 3); let b = ta.sma(open, 3);");
        let mut names = Vec::new();
        for stmt in &unit.body {
            if let CStmt::Init { init: CExpr::Ta { args, .. }, .. } = stmt {
                for arg in args {
                    if let CExpr::Param { name, .. } = arg {
                        names.push(name.clone());
                    }
                }
            }
        }
        assert_eq!(names, vec!["p0", "p1", "p2", "p3"]);
    }

    #[test]
    fn record_return_fields_are_series_handles() {
        let unit = compile("let a = 1; return { fast: a };");
        match &unit.body[1] {
            CStmt::Return(CReturn::Record(fields)) => {
                assert!(matches!(&fields[0].1, CExpr::SeriesHandle(slot) if slot.name == "a"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn loop_counter_is_a_local() {
        let unit = compile("let acc = 0; for (let i = 0; i < 3; i++) { acc += i; }");
        match &unit.body[1] {
            CStmt::For { body, .. } => match &body[0] {
                CStmt::Assign { value, .. } => match value {
                    CExpr::Binary { right, .. } => {
                        assert!(matches!(right.as_ref(), CExpr::Local(name) if name == "i"));
                    }
                    other => panic!("unexpected value: {:?}", other),
                },
                other => panic!("unexpected statement: {:?}", other),
            },
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn fn_body_declarations_persist_with_fn_scope() {
        let unit = compile("fn f(x) { let s = 0; return s; }");
        let f = &unit.functions["f"];
        assert_eq!(f.params, vec!["x".to_string()]);
        match &f.body[0] {
            CStmt::Init { slot, .. } => assert_eq!(slot.name, "s__fn1"),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn security_call_is_lowered() {
        let unit = compile("let w = request.security('BTC', 'W', close);");
        match &unit.body[0] {
            CStmt::Init { init: CExpr::Security { args }, .. } => assert_eq!(args.len(), 3),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn unknown_ta_function_is_rejected() {
        let err = rewrite(&parse("let a = ta.zigzag(close, 3);").unwrap()).unwrap_err();
        assert!(err.message.contains("ta.zigzag"));
        assert_eq!(err.position, 8);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let err = rewrite(&parse("let a = str.format(close);").unwrap()).unwrap_err();
        assert!(err.message.contains("str"));
    }
}
