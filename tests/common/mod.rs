#![allow(dead_code)]

use barscript::domain::candle::Candle;
use barscript::domain::runtime::{RunResult, Runner};
use barscript::domain::script::compile;
use barscript::domain::timeframe::Timeframe;
use barscript::domain::value::Value;
pub use barscript::adapters::MemoryAdapter;
pub use barscript::domain::error::BarscriptError;

pub const H4_MS: i64 = 4 * 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// One bar with explicit open/close; high/low padded outwards.
pub fn bar(open_time: i64, open: f64, close: f64, close_time: i64) -> Candle {
    Candle {
        open_time,
        open,
        high: open.max(close) + 1.0,
        low: open.min(close) - 1.0,
        close,
        volume: 1000.0,
        close_time,
    }
}

/// Consecutive 4-hour bars with the given closes; each opens at the
/// previous close (first opens at its own close).
pub fn bars_4h(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            bar(i as i64 * H4_MS, open, close, (i as i64 + 1) * H4_MS - 1)
        })
        .collect()
}

/// 4-hour bars where `ups[i]` decides whether bar i closes above its open.
pub fn directional_4h(ups: &[bool]) -> Vec<Candle> {
    ups.iter()
        .enumerate()
        .map(|(i, &up)| {
            let (open, close) = if up { (100.0, 110.0) } else { (110.0, 100.0) };
            bar(i as i64 * H4_MS, open, close, (i as i64 + 1) * H4_MS - 1)
        })
        .collect()
}

/// Daily bars starting at epoch zero; close of day i is `closes[i]`.
pub fn daily_bars(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| bar(i as i64 * DAY_MS, close, close, (i as i64 + 1) * DAY_MS - 1))
        .collect()
}

/// Calendar-aligned weekly bars starting at epoch zero.
pub fn weekly_bars(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| bar(i as i64 * WEEK_MS, close, close, (i as i64 + 1) * WEEK_MS - 1))
        .collect()
}

/// Compile and run a script over a fixed candle history.
pub fn run_script(source: &str, candles: Vec<Candle>) -> RunResult {
    let unit = compile(source).expect("script should compile");
    Runner::from_candles(&unit, "BTCUSDT", Timeframe::H4, candles)
        .run(None)
        .expect("run should succeed")
        .result
}

/// Compile and run against a data provider, for scripts using
/// `request.security`.
pub fn run_with_provider(
    source: &str,
    provider: &MemoryAdapter,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<RunResult, BarscriptError> {
    let unit = compile(source).expect("script should compile");
    Ok(Runner::from_provider(&unit, provider, symbol, timeframe)
        .run(None)?
        .result)
}

pub fn scalar(result: RunResult) -> Vec<Value> {
    match result {
        RunResult::Scalar(values) => values,
        other => panic!("expected scalar result, got {other:?}"),
    }
}

pub fn field(result: &RunResult, name: &str) -> Vec<Value> {
    match result {
        RunResult::Named(fields) => fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| panic!("no result field named {name}")),
        other => panic!("expected named result, got {other:?}"),
    }
}

pub fn nums(values: &[f64]) -> Vec<Value> {
    values.iter().map(|&n| Value::Num(n)).collect()
}

/// `Some(n)` becomes a number, `None` the not-available sentinel.
pub fn maybe_nums(values: &[Option<f64>]) -> Vec<Value> {
    values
        .iter()
        .map(|v| match v {
            Some(n) => Value::Num(*n),
            None => Value::Na,
        })
        .collect()
}
