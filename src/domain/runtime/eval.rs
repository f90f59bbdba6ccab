//! Per-bar execution of a compiled unit.
//!
//! The evaluator walks the compiled statements once per bar against an
//! [`ExecutionContext`]. Slot values are stored as resolved scalars; series
//! handles only travel through expressions (call arguments, result
//! positions) until something needs a concrete value.

use std::collections::HashMap;

use crate::domain::error::BarscriptError;
use crate::domain::runtime::context::ExecutionContext;
use crate::domain::script::compiled::{
    CExpr, CFunction, CReturn, CStmt, CompiledScript, CoreFn, LogicalOp,
};
use crate::domain::value::{apply_binary, apply_unary, na_eq, SeriesRef, Value};
use crate::domain::{math_fns, ta};
use crate::ports::MarketDataPort;

/// What one bar's execution produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutput {
    None,
    Scalar(Value),
    Record(Vec<(String, Value)>),
}

enum Flow {
    Normal,
    Return(ScriptOutput),
}

pub struct Evaluator<'a> {
    pub(crate) script: &'a CompiledScript,
    pub(crate) provider: Option<&'a dyn MarketDataPort>,
    /// Local frames: one for the top level, one pushed per user function
    /// call. Loop counters live in the frame they appear in.
    locals: Vec<HashMap<String, Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(script: &'a CompiledScript, provider: Option<&'a dyn MarketDataPort>) -> Self {
        Evaluator {
            script,
            provider,
            locals: Vec::new(),
        }
    }

    /// Execute the unit once for the current bar.
    pub fn invoke(&mut self, ctx: &mut ExecutionContext) -> Result<ScriptOutput, BarscriptError> {
        self.locals.clear();
        self.locals.push(HashMap::new());
        let script = self.script;
        match self.exec_body(ctx, &script.body)? {
            Flow::Return(output) => Ok(output),
            Flow::Normal => Ok(ScriptOutput::None),
        }
    }

    fn exec_body(
        &mut self,
        ctx: &mut ExecutionContext,
        stmts: &'a [CStmt],
    ) -> Result<Flow, BarscriptError> {
        for stmt in stmts {
            if let Flow::Return(output) = self.exec_stmt(ctx, stmt)? {
                return Ok(Flow::Return(output));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(
        &mut self,
        ctx: &mut ExecutionContext,
        stmt: &'a CStmt,
    ) -> Result<Flow, BarscriptError> {
        match stmt {
            CStmt::Init { slot, init } => {
                let value = self.eval(ctx, init)?;
                let value = ctx.resolve(value);
                ctx.init(slot.kind, &slot.name, value);
                Ok(Flow::Normal)
            }
            CStmt::InitTuple { slots, init } => {
                let value = self.eval(ctx, init)?;
                let items = match ctx.resolve(value) {
                    Value::Tuple(items) => items,
                    other => {
                        return Err(BarscriptError::Runtime {
                            reason: format!(
                                "destructuring expects a tuple, got {}",
                                other
                            ),
                        });
                    }
                };
                for (i, slot) in slots.iter().enumerate() {
                    let item = items.get(i).cloned().unwrap_or(Value::Na);
                    ctx.init(slot.kind, &slot.name, item);
                }
                Ok(Flow::Normal)
            }
            CStmt::Assign { slot, value } => {
                let value = self.eval(ctx, value)?;
                let value = ctx.resolve(value);
                ctx.assign(slot.kind, &slot.name, value);
                Ok(Flow::Normal)
            }
            CStmt::LocalAssign { name, value } => {
                let value = self.eval(ctx, value)?;
                self.set_local(name, value);
                Ok(Flow::Normal)
            }
            CStmt::Expr(expr) => {
                self.eval(ctx, expr)?;
                Ok(Flow::Normal)
            }
            CStmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.eval(ctx, cond)?;
                if ctx.resolve(cond).truthy() {
                    self.exec_body(ctx, then_body)
                } else {
                    self.exec_body(ctx, else_body)
                }
            }
            CStmt::For {
                var,
                init,
                cond,
                step,
                body,
            } => {
                let init = self.eval(ctx, init)?;
                let init = ctx.resolve(init);
                self.set_local(var, init);
                loop {
                    let cond = self.eval(ctx, cond)?;
                    if !ctx.resolve(cond).truthy() {
                        break;
                    }
                    if let Flow::Return(output) = self.exec_body(ctx, body)? {
                        return Ok(Flow::Return(output));
                    }
                    let next = self.eval(ctx, step)?;
                    let next = ctx.resolve(next);
                    self.set_local(var, next);
                }
                Ok(Flow::Normal)
            }
            CStmt::While { cond, body } => {
                loop {
                    let cond = self.eval(ctx, cond)?;
                    if !ctx.resolve(cond).truthy() {
                        break;
                    }
                    if let Flow::Return(output) = self.exec_body(ctx, body)? {
                        return Ok(Flow::Return(output));
                    }
                }
                Ok(Flow::Normal)
            }
            CStmt::Return(ret) => {
                let output = match ret {
                    CReturn::Value(expr) => ScriptOutput::Scalar(self.eval(ctx, expr)?),
                    CReturn::Record(fields) => {
                        let mut out = Vec::with_capacity(fields.len());
                        for (key, expr) in fields {
                            out.push((key.clone(), self.eval(ctx, expr)?));
                        }
                        ScriptOutput::Record(out)
                    }
                };
                Ok(Flow::Return(output))
            }
        }
    }

    pub(crate) fn eval(
        &mut self,
        ctx: &mut ExecutionContext,
        expr: &'a CExpr,
    ) -> Result<Value, BarscriptError> {
        match expr {
            CExpr::Num(n) => Ok(Value::num(*n)),
            CExpr::Str(s) => Ok(Value::Str(s.clone())),
            CExpr::Bool(b) => Ok(Value::Bool(*b)),
            CExpr::Na => Ok(Value::Na),
            CExpr::SeriesHandle(slot) => Ok(Value::Series(SeriesRef {
                kind: slot.kind,
                name: slot.name.clone(),
                offset: 0,
            })),
            CExpr::Current(slot) => Ok(ctx.read(slot.kind, &slot.name, 0)),
            CExpr::History { slot, index } => {
                let k = match self.eval_offset(ctx, index)? {
                    Some(k) => k,
                    None => return Ok(Value::Na),
                };
                Ok(ctx.read(slot.kind, &slot.name, k))
            }
            CExpr::Local(name) => Ok(self.get_local(name)),
            CExpr::Index { object, index } => {
                let object = self.eval(ctx, object)?;
                let k = match self.eval_offset(ctx, index)? {
                    Some(k) => k,
                    None => return Ok(Value::Na),
                };
                Ok(match object {
                    Value::Tuple(items) => items.get(k).cloned().unwrap_or(Value::Na),
                    Value::Series(r) => ctx.read(r.kind, &r.name, r.offset + k),
                    _ => Value::Na,
                })
            }
            CExpr::Unary { op, expr } => {
                let v = self.eval(ctx, expr)?;
                Ok(apply_unary(*op, &ctx.resolve(v)))
            }
            CExpr::Binary { op, left, right } => {
                let l = self.eval(ctx, left)?;
                let l = ctx.resolve(l);
                let r = self.eval(ctx, right)?;
                let r = ctx.resolve(r);
                Ok(apply_binary(*op, &l, &r))
            }
            CExpr::Logical { op, left, right } => {
                let l = self.eval(ctx, left)?;
                let l = ctx.resolve(l);
                // Short-circuit and yield the deciding operand itself, so
                // `x[1] || fallback` selects a value rather than a boolean.
                match op {
                    LogicalOp::And => {
                        if !l.truthy() {
                            return Ok(l);
                        }
                        let r = self.eval(ctx, right)?;
                        Ok(ctx.resolve(r))
                    }
                    LogicalOp::Or => {
                        if l.truthy() {
                            return Ok(l);
                        }
                        let r = self.eval(ctx, right)?;
                        Ok(ctx.resolve(r))
                    }
                }
            }
            CExpr::Ternary { cond, then, other } => {
                let cond = self.eval(ctx, cond)?;
                if ctx.resolve(cond).truthy() {
                    self.eval(ctx, then)
                } else {
                    self.eval(ctx, other)
                }
            }
            CExpr::NaEq { left, right } => {
                let l = self.eval(ctx, left)?;
                let l = ctx.resolve(l);
                let r = self.eval(ctx, right)?;
                let r = ctx.resolve(r);
                Ok(na_eq(&l, &r))
            }
            CExpr::Param { arg, index, name } => {
                let value = self.eval(ctx, arg)?;
                let shift = match index {
                    Some(index) => self.eval_offset(ctx, index)?.unwrap_or(0),
                    None => 0,
                };
                Ok(ctx.param(value, shift, name))
            }
            CExpr::Ta {
                func,
                args,
                call_id,
            } => {
                let args = self.eval_args(ctx, args)?;
                ta::call(ctx, *func, &args, *call_id)
            }
            CExpr::MathFn { func, args } => {
                let mut resolved = Vec::with_capacity(args.len());
                for arg in args {
                    let v = self.eval(ctx, arg)?;
                    resolved.push(ctx.resolve(v));
                }
                math_fns::call(*func, &resolved)
            }
            CExpr::Security { args } => self.eval_security(ctx, args),
            CExpr::Core { func, args } => self.eval_core(ctx, *func, args),
            CExpr::UserCall { name, args } => {
                let function = self.script.functions.get(name).ok_or_else(|| {
                    BarscriptError::UnknownFunction {
                        namespace: String::new(),
                        name: name.clone(),
                    }
                })?;
                let args = self.eval_args(ctx, args)?;
                self.call_function(ctx, function, args)
            }
            CExpr::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(ctx, item)?);
                }
                Ok(Value::Tuple(out))
            }
        }
    }

    fn eval_args(
        &mut self,
        ctx: &mut ExecutionContext,
        args: &'a [CExpr],
    ) -> Result<Vec<Value>, BarscriptError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(ctx, arg)?);
        }
        Ok(out)
    }

    fn call_function(
        &mut self,
        ctx: &mut ExecutionContext,
        function: &'a CFunction,
        args: Vec<Value>,
    ) -> Result<Value, BarscriptError> {
        let mut frame = HashMap::new();
        for (i, param) in function.params.iter().enumerate() {
            frame.insert(
                param.clone(),
                args.get(i).cloned().unwrap_or(Value::Na),
            );
        }
        self.locals.push(frame);
        let flow = self.exec_body(ctx, &function.body);
        self.locals.pop();
        match flow? {
            Flow::Return(ScriptOutput::Scalar(value)) => Ok(value),
            Flow::Return(ScriptOutput::Record(fields)) => Err(BarscriptError::Runtime {
                reason: format!(
                    "record returns are only valid at the top level ({} fields)",
                    fields.len()
                ),
            }),
            _ => Ok(Value::Na),
        }
    }

    fn eval_core(
        &mut self,
        ctx: &mut ExecutionContext,
        func: CoreFn,
        args: &'a [CExpr],
    ) -> Result<Value, BarscriptError> {
        match func {
            CoreFn::Na => {
                let v = match args.first() {
                    Some(arg) => self.eval(ctx, arg)?,
                    None => Value::Na,
                };
                Ok(Value::Bool(ctx.resolve(v).is_na()))
            }
            CoreFn::Nz => {
                let v = match args.first() {
                    Some(arg) => self.eval(ctx, arg)?,
                    None => Value::Na,
                };
                let v = ctx.resolve(v);
                if !v.is_na() {
                    return Ok(v);
                }
                match args.get(1) {
                    Some(replacement) => {
                        let r = self.eval(ctx, replacement)?;
                        Ok(ctx.resolve(r))
                    }
                    None => Ok(Value::Num(0.0)),
                }
            }
            CoreFn::Plot | CoreFn::PlotChar => {
                let value = match args.first() {
                    Some(arg) => self.eval(ctx, arg)?,
                    None => Value::Na,
                };
                let value = ctx.resolve(value).with_precision();
                let name = match args.get(1) {
                    Some(arg) => match self.eval(ctx, arg)? {
                        Value::Str(s) => s,
                        _ => func.name().to_string(),
                    },
                    None => func.name().to_string(),
                };
                ctx.plot(&name, value);
                Ok(Value::Na)
            }
        }
    }

    /// Evaluate a look-back index. NA or negative indices read as NA.
    fn eval_offset(
        &mut self,
        ctx: &mut ExecutionContext,
        index: &'a CExpr,
    ) -> Result<Option<usize>, BarscriptError> {
        let v = self.eval(ctx, index)?;
        let n = ctx.resolve(v).as_num();
        if n.is_nan() || n < 0.0 {
            return Ok(None);
        }
        Ok(Some(n as usize))
    }

    fn get_local(&self, name: &str) -> Value {
        for frame in self.locals.iter().rev() {
            if let Some(v) = frame.get(name) {
                return v.clone();
            }
        }
        Value::Na
    }

    fn set_local(&mut self, name: &str, value: Value) {
        for frame in self.locals.iter_mut().rev() {
            if frame.contains_key(name) {
                frame.insert(name.to_string(), value);
                return;
            }
        }
        self.locals
            .last_mut()
            .expect("evaluator always has a frame")
            .insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::script::compile;
    use crate::domain::timeframe::Timeframe;

    fn candle(i: i64, close: f64) -> Candle {
        Candle {
            open_time: i * 60_000,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            close_time: i * 60_000 + 59_999,
        }
    }

    fn run_bars(src: &str, closes: &[f64]) -> Vec<Value> {
        let unit = compile(src).unwrap();
        let mut ctx = ExecutionContext::new("X", Timeframe::M1);
        let mut out = Vec::new();
        let mut eval = Evaluator::new(&unit, None);
        for (i, close) in closes.iter().enumerate() {
            ctx.push_data(&candle(i as i64, *close));
            match eval.invoke(&mut ctx).unwrap() {
                ScriptOutput::Scalar(v) => out.push(ctx.resolve(v)),
                other => panic!("unexpected output: {:?}", other),
            }
            ctx.shift_all();
        }
        out
    }

    #[test]
    fn counter_increments_across_bars() {
        let src = "let val = 0; val = val[1] ? val[1] + 1 : 1; return val;";
        let out = run_bars(src, &[1.0, 1.0, 1.0, 1.0]);
        let nums: Vec<f64> = out.iter().map(|v| v.as_num()).collect();
        assert_eq!(nums, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn ternary_only_evaluates_taken_branch() {
        let src = "let v = close > 1 ? close : close / 0; return v;";
        let out = run_bars(src, &[2.0]);
        assert_eq!(out[0], Value::Num(2.0));
    }

    #[test]
    fn branch_local_state_persists() {
        let src = "
            var x = 10;
            if (close > open) { x = 15; } else { x = 10; }
            return x;
        ";
        // candle() builds open = close - 0.5, so the then-branch always runs
        let out = run_bars(src, &[1.0, 2.0]);
        assert_eq!(out, vec![Value::Num(15.0), Value::Num(15.0)]);
    }

    #[test]
    fn for_loop_accumulates_locally() {
        let src = "
            let acc = 0;
            for (let i = 1; i <= 3; i++) { acc += i; }
            return acc;
        ";
        let out = run_bars(src, &[1.0, 1.0]);
        assert_eq!(out, vec![Value::Num(6.0), Value::Num(6.0)]);
    }

    #[test]
    fn while_loop_terminates_on_condition() {
        let src = "
            let n = 0;
            while (n < 5) { n = n + 1; }
            return n;
        ";
        let out = run_bars(src, &[1.0]);
        assert_eq!(out, vec![Value::Num(5.0)]);
    }

    #[test]
    fn user_function_reads_caller_series_history() {
        let src = "
            fn prev(src) { return src[1]; }
            let p = prev(close);
            return p;
        ";
        let out = run_bars(src, &[10.0, 20.0]);
        assert!(out[0].is_na());
        assert_eq!(out[1], Value::Num(10.0));
    }

    #[test]
    fn nz_substitutes_na() {
        let src = "let v = nz(close[5], -1); return v;";
        let out = run_bars(src, &[1.0]);
        assert_eq!(out[0], Value::Num(-1.0));
    }

    #[test]
    fn na_equality_is_na_aware() {
        let src = "let v = close[5] == na; return v;";
        let out = run_bars(src, &[1.0]);
        assert_eq!(out[0], Value::Bool(true));
    }

    #[test]
    fn unknown_user_function_fails() {
        let unit = compile("let v = mystery(close); return v;").unwrap();
        let mut ctx = ExecutionContext::new("X", Timeframe::M1);
        ctx.push_data(&candle(0, 1.0));
        let mut eval = Evaluator::new(&unit, None);
        let err = eval.invoke(&mut ctx).unwrap_err();
        assert!(matches!(err, BarscriptError::UnknownFunction { .. }));
    }

    #[test]
    fn plots_accumulate_per_bar() {
        let unit = compile("plot(close, 'c'); return close;").unwrap();
        let mut ctx = ExecutionContext::new("X", Timeframe::M1);
        let mut eval = Evaluator::new(&unit, None);
        for i in 0..3 {
            ctx.push_data(&candle(i, i as f64));
            eval.invoke(&mut ctx).unwrap();
            ctx.shift_all();
        }
        assert_eq!(ctx.plots.len(), 1);
        assert_eq!(ctx.plots[0].0, "c");
        assert_eq!(ctx.plots[0].1.len(), 3);
        // points carry the bar open time
        assert_eq!(ctx.plots[0].1[1].0, 60_000);
        assert_eq!(ctx.plots[0].1[1].1, Value::Num(1.0));
    }
}
