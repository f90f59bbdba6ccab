//! `request.security`: evaluate an expression on another symbol/timeframe
//! and align its values to the primary series.
//!
//! The first call per (symbol, timeframe, expression) spawns a secondary
//! context that replays the same compiled unit over the other history, with
//! the start widened by a buffer so indicators are warm where the primary
//! range begins. The secondary runs in degraded mode: a nested
//! `request.security` inside it evaluates its expression directly.
//!
//! Alignment against a higher timeframe picks the bar containing the
//! primary bar's open; while that bar is still open the previous one is
//! used, unless lookahead is on. With `gaps`, a value is only emitted on
//! the primary bar where the resolved higher-timeframe bar changes. Against
//! a lower timeframe the last sub-bar contained in the primary bar wins;
//! lookahead picks the first sub-bar on the bar still forming past the
//! run's end date, and with gaps as well it always picks the first.

use crate::domain::error::BarscriptError;
use crate::domain::runtime::context::ExecutionContext;
use crate::domain::runtime::eval::Evaluator;
use crate::domain::runtime::scheduler::Runner;
use crate::domain::script::compiled::CExpr;
use crate::domain::timeframe::Timeframe;
use crate::domain::value::{SlotKind, Value};

/// Secondary histories start this much earlier than the primary range so
/// warm-up does not eat into aligned values.
const START_BUFFER_MS: i64 = 30 * 24 * 60 * 60 * 1000;
/// Candle count for secondary runs when the primary has no date range.
const DEFAULT_SECONDARY_LIMIT: usize = 1000;

impl<'a> Evaluator<'a> {
    pub(crate) fn eval_security(
        &mut self,
        ctx: &mut ExecutionContext,
        args: &'a [CExpr],
    ) -> Result<Value, BarscriptError> {
        let expr = args.get(2).ok_or_else(|| BarscriptError::Runtime {
            reason: "request.security expects (symbol, timeframe, expression)".to_string(),
        })?;

        // Evaluating the expression argument keeps its parameter series
        // accumulating in this context; inside a secondary context that
        // accumulated series is also the value source for the caller.
        let direct = self.eval(ctx, expr)?;
        if ctx.is_secondary {
            return Ok(ctx.resolve(direct));
        }

        let symbol = self.string_arg(ctx, args, 0)?;
        let tf_text = self.string_arg(ctx, args, 1)?;
        let timeframe = Timeframe::parse(&tf_text)?;
        let gaps = self.flag_arg(ctx, args, 3)?;
        let lookahead = self.flag_arg(ctx, args, 4)?;

        // Same timeframe needs no alignment at all.
        if timeframe == ctx.timeframe {
            return Ok(ctx.resolve(direct));
        }

        let expr_name = match expr {
            CExpr::Param { name, .. } => name.clone(),
            _ => "expr".to_string(),
        };
        let key = format!("{}_{}_{}", symbol, timeframe, expr_name);

        if !ctx.cache.contains_key(&key) {
            let provider = self.provider.ok_or(BarscriptError::NoProvider)?;
            let start = ctx.start.map(|s| s - START_BUFFER_MS);
            let limit = if start.is_some() {
                None
            } else {
                Some(ctx.limit.unwrap_or(0).max(DEFAULT_SECONDARY_LIMIT))
            };
            tracing::debug!(%symbol, %timeframe, expr = %expr_name, "spawning secondary context");
            let secondary = Runner::from_provider(self.script, provider, symbol.clone(), timeframe)
                .with_limit(limit)
                .with_range(start, None)
                .into_secondary()
                .run(None)?;
            ctx.cache.insert(key.clone(), secondary);
        }

        let static_offset = match expr {
            CExpr::Param {
                index: Some(index), ..
            } => self.eval_offset_for_security(ctx, index)?,
            _ => 0,
        };

        let resolved = {
            let secondary = &ctx.cache[&key];
            let p_open = ctx.read(SlotKind::Data, "time", 0).as_num();
            let p_close = ctx.read(SlotKind::Data, "close_time", 0).as_num();
            if secondary.timeframe > ctx.timeframe {
                align_higher(secondary, p_open, p_close, lookahead)
            } else {
                align_lower(secondary, p_open, p_close, ctx.end, lookahead, gaps)
            }
        };

        let index = match resolved {
            Some(index) => index,
            None => return Ok(Value::Na),
        };

        if gaps && ctx.cache[&key].timeframe > ctx.timeframe {
            // Emit only when a new higher-timeframe bar resolves; the first
            // primary bar just records the index.
            let seen = ctx.gap_index.insert(key.clone(), index);
            if seen.is_none() || seen == Some(index) {
                return Ok(Value::Na);
            }
        }

        let secondary = &ctx.cache[&key];
        Ok(read_at(secondary, expr, &expr_name, index, static_offset))
    }

    fn string_arg(
        &mut self,
        ctx: &mut ExecutionContext,
        args: &'a [CExpr],
        i: usize,
    ) -> Result<String, BarscriptError> {
        let arg = args.get(i).ok_or_else(|| BarscriptError::Runtime {
            reason: "request.security expects (symbol, timeframe, expression)".to_string(),
        })?;
        match self.eval(ctx, arg)? {
            Value::Str(s) => Ok(s),
            other => Err(BarscriptError::Runtime {
                reason: format!("request.security argument {} must be a string, got {}", i + 1, other),
            }),
        }
    }

    fn flag_arg(
        &mut self,
        ctx: &mut ExecutionContext,
        args: &'a [CExpr],
        i: usize,
    ) -> Result<bool, BarscriptError> {
        match args.get(i) {
            Some(arg) => {
                let v = self.eval(ctx, arg)?;
                Ok(ctx.resolve(v).truthy())
            }
            None => Ok(false),
        }
    }

    fn eval_offset_for_security(
        &mut self,
        ctx: &mut ExecutionContext,
        index: &'a CExpr,
    ) -> Result<usize, BarscriptError> {
        let v = self.eval(ctx, index)?;
        let n = ctx.resolve(v).as_num();
        if n.is_nan() || n < 0.0 {
            return Ok(0);
        }
        Ok(n as usize)
    }
}

/// Pick the higher-timeframe bar for one primary bar. `p_open`/`p_close`
/// are the primary bar's open and close times.
fn align_higher(
    secondary: &ExecutionContext,
    p_open: f64,
    p_close: f64,
    lookahead: bool,
) -> Option<usize> {
    let times = secondary.series(SlotKind::Data, "time")?;
    let closes = secondary.series(SlotKind::Data, "close_time")?;
    for j in 0..times.len() {
        let s_open = times.at(j).as_num();
        let s_close = closes.at(j).as_num();
        // The whole primary bar must fit inside the secondary bar; a bar
        // straddling two higher-timeframe bars resolves to nothing.
        if s_open <= p_open && p_close <= s_close {
            if lookahead {
                return Some(j);
            }
            // The containing bar only becomes visible once it has closed
            // relative to the primary bar.
            if p_close >= s_close {
                return Some(j);
            }
            return if j > 0 { Some(j - 1) } else { None };
        }
    }
    None
}

/// Pick the lower-timeframe sub-bar for one primary bar: normally the last
/// sub-bar the primary bar contains.
fn align_lower(
    secondary: &ExecutionContext,
    p_open: f64,
    p_close: f64,
    end: Option<i64>,
    lookahead: bool,
    gaps: bool,
) -> Option<usize> {
    let times = secondary.series(SlotKind::Data, "time")?;
    let closes = secondary.series(SlotKind::Data, "close_time")?;
    // The primary bar is still forming only when the run has an end date
    // and the bar closes past it.
    let forming = end.is_some_and(|e| p_close > e as f64);

    let mut last_contained: Option<usize> = None;
    let mut first_contained: Option<usize> = None;
    for j in (0..times.len()).rev() {
        let s_open = times.at(j).as_num();
        let s_close = closes.at(j).as_num();
        if s_close < p_open {
            break;
        }
        if s_open >= p_open && s_close <= p_close {
            last_contained.get_or_insert(j);
            first_contained = Some(j);
        }
    }

    if lookahead && (gaps || forming) {
        first_contained
    } else {
        last_contained
    }
}

/// Read the expression's value at a chronological index of the secondary
/// run. A plain series argument reads the underlying slot; anything
/// computed reads the accumulated parameter series.
fn read_at(
    secondary: &ExecutionContext,
    expr: &CExpr,
    expr_name: &str,
    index: usize,
    static_offset: usize,
) -> Value {
    if let CExpr::Param { arg, .. } = expr {
        if let CExpr::SeriesHandle(slot) = arg.as_ref() {
            let series = match secondary.series(slot.kind, &slot.name) {
                Some(series) => series,
                None => return Value::Na,
            };
            if static_offset > index {
                return Value::Na;
            }
            return series.at(index - static_offset);
        }
    }
    match secondary.series(SlotKind::Param, expr_name) {
        Some(series) => {
            if static_offset > index {
                return Value::Na;
            }
            series.at(index - static_offset)
        }
        None => Value::Na,
    }
}
