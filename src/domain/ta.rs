//! `ta.*` namespace: technical analysis functions.
//!
//! Each call site carries a compile-time identity number; recursive
//! indicators (ema, rma, rsi, atr, cum, macd) keep their running state in
//! per-identity series under `ctx.ta_state`, which the scheduler shifts and
//! rewinds together with the variable storages. Incomplete warm-up windows
//! yield NA.

use crate::domain::error::BarscriptError;
use crate::domain::runtime::context::ExecutionContext;
use crate::domain::runtime::series::Series;
use crate::domain::script::compiled::TaFunc;
use crate::domain::value::{SlotKind, Value};

pub fn call(
    ctx: &mut ExecutionContext,
    func: TaFunc,
    args: &[Value],
    call_id: u32,
) -> Result<Value, BarscriptError> {
    match func {
        TaFunc::Sma => {
            let src = arg(args, 0, func)?;
            let len = len_arg(ctx, args, 1, func)?;
            Ok(sma(ctx, src, len))
        }
        TaFunc::Ema => {
            let src = arg(args, 0, func)?.clone();
            let len = len_arg(ctx, args, 1, func)?;
            let key = state_key(call_id, "v");
            Ok(smooth(ctx, &key, 2.0 / (len as f64 + 1.0), len, |ctx, k| {
                src_num(ctx, &src, k)
            }))
        }
        TaFunc::Rma => {
            let src = arg(args, 0, func)?.clone();
            let len = len_arg(ctx, args, 1, func)?;
            let key = state_key(call_id, "v");
            Ok(smooth(ctx, &key, 1.0 / len as f64, len, |ctx, k| {
                src_num(ctx, &src, k)
            }))
        }
        TaFunc::Wma => {
            let src = arg(args, 0, func)?;
            let len = len_arg(ctx, args, 1, func)?;
            match window(ctx, src, len) {
                Some(w) => {
                    let denom = (len * (len + 1)) as f64 / 2.0;
                    let weighted: f64 = w
                        .iter()
                        .enumerate()
                        .map(|(k, x)| x * (len - k) as f64)
                        .sum();
                    Ok(Value::num(weighted / denom))
                }
                None => Ok(Value::Na),
            }
        }
        TaFunc::Rsi => {
            let src = arg(args, 0, func)?.clone();
            let len = len_arg(ctx, args, 1, func)?;
            let up_key = state_key(call_id, "up");
            let down_key = state_key(call_id, "down");
            // The diff is NaN past the start of history; clamping must not
            // swallow that, or the warm-up window closes one bar early.
            let gains = src.clone();
            let avg_up = smooth(ctx, &up_key, 1.0 / len as f64, len, move |ctx, k| {
                let d = src_num(ctx, &gains, k) - src_num(ctx, &gains, k + 1);
                if d.is_nan() { d } else { d.max(0.0) }
            });
            let losses = src.clone();
            let avg_down = smooth(ctx, &down_key, 1.0 / len as f64, len, move |ctx, k| {
                let d = src_num(ctx, &losses, k + 1) - src_num(ctx, &losses, k);
                if d.is_nan() { d } else { d.max(0.0) }
            });
            if avg_up.is_na() || avg_down.is_na() {
                return Ok(Value::Na);
            }
            let (up, down) = (avg_up.as_num(), avg_down.as_num());
            if down == 0.0 {
                Ok(Value::Num(100.0))
            } else {
                Ok(Value::num(100.0 - 100.0 / (1.0 + up / down)))
            }
        }
        TaFunc::Atr => {
            let len = len_arg(ctx, args, 0, func)?;
            let key = state_key(call_id, "v");
            Ok(smooth(ctx, &key, 1.0 / len as f64, len, true_range))
        }
        TaFunc::Tr => {
            let handle_na = args
                .first()
                .map(|v| ctx.resolve(v.clone()).truthy())
                .unwrap_or(false);
            let prev_close = ctx.read(SlotKind::Data, "close", 1);
            // Without handle_na the first bar has no previous close to
            // measure against; with it the bar's own range stands in.
            if prev_close.is_na() && !handle_na {
                return Ok(Value::Na);
            }
            Ok(Value::num(true_range(ctx, 0)))
        }
        TaFunc::Change => {
            let src = arg(args, 0, func)?;
            let len = match args.get(1) {
                Some(v) => ctx.resolve(v.clone()).as_num() as usize,
                None => 1,
            };
            Ok(Value::num(src_num(ctx, src, 0) - src_num(ctx, src, len)))
        }
        TaFunc::Mom => {
            let src = arg(args, 0, func)?;
            let len = len_arg(ctx, args, 1, func)?;
            Ok(Value::num(src_num(ctx, src, 0) - src_num(ctx, src, len)))
        }
        TaFunc::Highest => {
            let src = arg(args, 0, func)?;
            let len = len_arg(ctx, args, 1, func)?;
            Ok(match window(ctx, src, len) {
                Some(w) => Value::num(w.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                None => Value::Na,
            })
        }
        TaFunc::Lowest => {
            let src = arg(args, 0, func)?;
            let len = len_arg(ctx, args, 1, func)?;
            Ok(match window(ctx, src, len) {
                Some(w) => Value::num(w.iter().copied().fold(f64::INFINITY, f64::min)),
                None => Value::Na,
            })
        }
        TaFunc::Stdev => {
            let src = arg(args, 0, func)?;
            let len = len_arg(ctx, args, 1, func)?;
            Ok(match window(ctx, src, len) {
                Some(w) => {
                    let mean = w.iter().sum::<f64>() / len as f64;
                    let var = w.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>()
                        / len as f64;
                    Value::num(var.sqrt())
                }
                None => Value::Na,
            })
        }
        TaFunc::Cum => {
            let src = arg(args, 0, func)?;
            let key = state_key(call_id, "v");
            let prev = state_get(ctx, &key, 1);
            let base = if prev.is_na() { 0.0 } else { prev.as_num() };
            let v = Value::num(base + src_num(ctx, src, 0));
            state_set(ctx, key, v.clone());
            Ok(v)
        }
        TaFunc::Crossover => {
            let a = arg(args, 0, func)?;
            let b = arg(args, 1, func)?;
            Ok(Value::Bool(
                src_num(ctx, a, 0) > src_num(ctx, b, 0)
                    && src_num(ctx, a, 1) <= src_num(ctx, b, 1),
            ))
        }
        TaFunc::Crossunder => {
            let a = arg(args, 0, func)?;
            let b = arg(args, 1, func)?;
            Ok(Value::Bool(
                src_num(ctx, a, 0) < src_num(ctx, b, 0)
                    && src_num(ctx, a, 1) >= src_num(ctx, b, 1),
            ))
        }
        TaFunc::Macd => {
            let src = arg(args, 0, func)?.clone();
            let fast = len_arg(ctx, args, 1, func)?;
            let slow = len_arg(ctx, args, 2, func)?;
            let sig = len_arg(ctx, args, 3, func)?;

            let fast_src = src.clone();
            let f = smooth(
                ctx,
                &state_key(call_id, "fast"),
                2.0 / (fast as f64 + 1.0),
                fast,
                move |ctx, k| src_num(ctx, &fast_src, k),
            );
            let slow_src = src.clone();
            let s = smooth(
                ctx,
                &state_key(call_id, "slow"),
                2.0 / (slow as f64 + 1.0),
                slow,
                move |ctx, k| src_num(ctx, &slow_src, k),
            );
            let line = Value::num(f.as_num() - s.as_num());
            let line_key = state_key(call_id, "line");
            state_set(ctx, line_key.clone(), line.clone());
            let signal = smooth(
                ctx,
                &state_key(call_id, "signal"),
                2.0 / (sig as f64 + 1.0),
                sig,
                move |ctx, k| state_get(ctx, &line_key, k).as_num(),
            );
            let hist = Value::num(line.as_num() - signal.as_num());
            Ok(Value::Tuple(vec![line, signal, hist]))
        }
    }
}

fn arg<'v>(args: &'v [Value], i: usize, func: TaFunc) -> Result<&'v Value, BarscriptError> {
    args.get(i).ok_or_else(|| BarscriptError::Runtime {
        reason: format!("ta.{} missing argument {}", func.name(), i + 1),
    })
}

fn len_arg(
    ctx: &ExecutionContext,
    args: &[Value],
    i: usize,
    func: TaFunc,
) -> Result<usize, BarscriptError> {
    let n = ctx.resolve(arg(args, i, func)?.clone()).as_num();
    if !n.is_finite() || n < 1.0 {
        return Err(BarscriptError::Runtime {
            reason: format!("ta.{} requires a positive length", func.name()),
        });
    }
    Ok(n as usize)
}

fn state_key(call_id: u32, slot: &str) -> String {
    format!("{}:{}", call_id, slot)
}

fn state_get(ctx: &ExecutionContext, key: &str, k: usize) -> Value {
    ctx.ta_state.get(key).map(|s| s.get(k)).unwrap_or(Value::Na)
}

fn state_set(ctx: &mut ExecutionContext, key: String, value: Value) {
    match ctx.ta_state.entry(key) {
        std::collections::hash_map::Entry::Occupied(mut e) => e.get_mut().set_current(value),
        std::collections::hash_map::Entry::Vacant(e) => {
            e.insert(Series::new()).push(value);
        }
    }
}

/// Read `k` bars back from a source argument. A scalar argument only has a
/// current value.
fn src_num(ctx: &ExecutionContext, src: &Value, k: usize) -> f64 {
    match src {
        Value::Series(r) => ctx.read(r.kind, &r.name, r.offset + k).as_num(),
        other if k == 0 => other.as_num(),
        _ => f64::NAN,
    }
}

/// Newest-first window of `len` source values, or None while any value in
/// the window is still NA.
fn window(ctx: &ExecutionContext, src: &Value, len: usize) -> Option<Vec<f64>> {
    let mut out = Vec::with_capacity(len);
    for k in 0..len {
        let x = src_num(ctx, src, k);
        if x.is_nan() {
            return None;
        }
        out.push(x);
    }
    Some(out)
}

fn sma(ctx: &ExecutionContext, src: &Value, len: usize) -> Value {
    match window(ctx, src, len) {
        Some(w) => Value::num(w.iter().sum::<f64>() / len as f64),
        None => Value::Na,
    }
}

/// Exponential smoothing step. Seeds with the simple average of the first
/// complete window, then applies `alpha * current + (1 - alpha) * previous`.
fn smooth(
    ctx: &mut ExecutionContext,
    key: &str,
    alpha: f64,
    len: usize,
    get: impl Fn(&ExecutionContext, usize) -> f64,
) -> Value {
    let prev = state_get(ctx, key, 1);
    let v = if prev.is_na() {
        let mut sum = 0.0;
        let mut complete = true;
        for k in 0..len {
            let x = get(ctx, k);
            if x.is_nan() {
                complete = false;
                break;
            }
            sum += x;
        }
        if complete {
            Value::num(sum / len as f64)
        } else {
            Value::Na
        }
    } else {
        Value::num(alpha * get(ctx, 0) + (1.0 - alpha) * prev.as_num())
    };
    state_set(ctx, key.to_string(), v.clone());
    v
}

fn true_range(ctx: &ExecutionContext, k: usize) -> f64 {
    let high = ctx.read(SlotKind::Data, "high", k).as_num();
    let low = ctx.read(SlotKind::Data, "low", k).as_num();
    let prev_close = ctx.read(SlotKind::Data, "close", k + 1).as_num();
    if prev_close.is_nan() {
        high - low
    } else {
        (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs())
    }
}
