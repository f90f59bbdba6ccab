//! Per-run execution state.
//!
//! One `ExecutionContext` holds every series a compiled unit touches while
//! replaying over a candle history: the built-in market data series, the
//! per-kind variable storages, normalized call parameters, indicator state,
//! collected results and plots, plus the cache of secondary contexts spawned
//! by `request.security`.

use std::collections::HashMap;

use crate::domain::candle::Candle;
use crate::domain::runtime::series::Series;
use crate::domain::timeframe::Timeframe;
use crate::domain::value::{round10, SeriesRef, SlotKind, Value};

/// Accumulated script output, one entry per processed bar.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Empty,
    Scalar(Vec<Value>),
    /// Named result series in declaration order.
    Named(Vec<(String, Vec<Value>)>),
}

impl RunResult {
    pub fn len(&self) -> usize {
        match self {
            RunResult::Empty => 0,
            RunResult::Scalar(values) => values.len(),
            RunResult::Named(fields) => fields.first().map(|(_, v)| v.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub limit: Option<usize>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub bar_index: usize,
    /// Degraded mode for contexts spawned by `request.security`: nested
    /// cross-timeframe requests evaluate their expression directly instead
    /// of spawning further contexts.
    pub is_secondary: bool,

    consts: HashMap<String, Series>,
    vars: HashMap<String, Series>,
    lets: HashMap<String, Series>,
    params: HashMap<String, Series>,
    data: HashMap<String, Series>,
    /// Indicator call-site state, keyed `"{call_id}:{slot}"`.
    pub ta_state: HashMap<String, Series>,

    pub result: RunResult,
    /// Plot points per title, one `(open_time, value)` entry per bar the
    /// plot call ran on.
    pub plots: Vec<(String, Vec<(i64, Value)>)>,
    /// Secondary contexts keyed `"{symbol}_{timeframe}_{expr}"`.
    pub cache: HashMap<String, ExecutionContext>,
    /// Last resolved source index per security call, for gap detection.
    pub gap_index: HashMap<String, usize>,
}

impl ExecutionContext {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        ExecutionContext {
            symbol: symbol.into(),
            timeframe,
            limit: None,
            start: None,
            end: None,
            bar_index: 0,
            is_secondary: false,
            consts: HashMap::new(),
            vars: HashMap::new(),
            lets: HashMap::new(),
            params: HashMap::new(),
            data: HashMap::new(),
            ta_state: HashMap::new(),
            result: RunResult::Empty,
            plots: Vec::new(),
            cache: HashMap::new(),
            gap_index: HashMap::new(),
        }
    }

    fn storage(&self, kind: SlotKind) -> &HashMap<String, Series> {
        match kind {
            SlotKind::Const => &self.consts,
            SlotKind::Var => &self.vars,
            SlotKind::Let => &self.lets,
            SlotKind::Param => &self.params,
            SlotKind::Data => &self.data,
        }
    }

    fn storage_mut(&mut self, kind: SlotKind) -> &mut HashMap<String, Series> {
        match kind {
            SlotKind::Const => &mut self.consts,
            SlotKind::Var => &mut self.vars,
            SlotKind::Let => &mut self.lets,
            SlotKind::Param => &mut self.params,
            SlotKind::Data => &mut self.data,
        }
    }

    /// Seed a slot for the current bar. Creates the series on first
    /// execution; afterwards every bar re-runs the initializer and
    /// overwrites the current value, whatever the declaration kind.
    pub fn init(&mut self, kind: SlotKind, name: &str, value: Value) {
        match self.storage_mut(kind).entry(name.to_string()) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                e.get_mut().set_current(value);
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(Series::new()).push(value);
            }
        }
    }

    pub fn assign(&mut self, kind: SlotKind, name: &str, value: Value) {
        self.storage_mut(kind)
            .entry(name.to_string())
            .or_default()
            .set_current(value);
    }

    /// Read `k` bars back from a slot.
    pub fn read(&self, kind: SlotKind, name: &str, k: usize) -> Value {
        self.storage(kind)
            .get(name)
            .map(|s| s.get(k))
            .unwrap_or(Value::Na)
    }

    pub fn series(&self, kind: SlotKind, name: &str) -> Option<&Series> {
        self.storage(kind).get(name)
    }

    pub fn series_len(&self, kind: SlotKind, name: &str) -> usize {
        self.storage(kind).get(name).map(|s| s.len()).unwrap_or(0)
    }

    /// Normalize a call argument. A series handle is shifted by the
    /// evaluated look-back; scalars are accumulated into a dedicated
    /// parameter series so callees can read their history; strings and
    /// tuples pass through.
    pub fn param(&mut self, value: Value, index: usize, name: &str) -> Value {
        match value {
            Value::Series(r) => Value::Series(SeriesRef {
                kind: r.kind,
                name: r.name,
                offset: r.offset + index,
            }),
            Value::Str(_) | Value::Tuple(_) => value,
            scalar => {
                self.init(SlotKind::Param, name, scalar);
                Value::Series(SeriesRef {
                    kind: SlotKind::Param,
                    name: name.to_string(),
                    offset: 0,
                })
            }
        }
    }

    /// Resolve a value to its current-bar scalar. Series handles read the
    /// slot at their offset; tuples resolve element-wise.
    pub fn resolve(&self, value: Value) -> Value {
        match value {
            Value::Series(r) => self.read(r.kind, &r.name, r.offset),
            Value::Tuple(items) => {
                Value::Tuple(items.into_iter().map(|v| self.resolve(v)).collect())
            }
            other => other,
        }
    }

    /// Append one candle to the built-in data series and advance the bar
    /// index.
    pub fn push_data(&mut self, candle: &Candle) {
        let rows: [(&str, Value); 10] = [
            ("open", Value::num(candle.open)),
            ("high", Value::num(candle.high)),
            ("low", Value::num(candle.low)),
            ("close", Value::num(candle.close)),
            ("volume", Value::num(candle.volume)),
            ("hl2", Value::num(round10(candle.hl2()))),
            ("hlc3", Value::num(round10(candle.hlc3()))),
            ("ohlc4", Value::num(round10(candle.ohlc4()))),
            ("time", Value::num(candle.open_time as f64)),
            ("close_time", Value::num(candle.close_time as f64)),
        ];
        for (name, value) in rows {
            self.data.entry(name.to_string()).or_default().push(value);
        }
        self.bar_index = self.data["close"].len() - 1;
    }

    /// Advance every persisted storage to the next bar, carrying current
    /// values forward. Market data is not shifted; it is pushed per candle.
    pub fn shift_all(&mut self) {
        for storage in [
            &mut self.consts,
            &mut self.vars,
            &mut self.lets,
            &mut self.params,
            &mut self.ta_state,
        ] {
            for series in storage.values_mut() {
                series.shift();
            }
        }
    }

    /// Undo the last bar entirely so a revised live candle can be
    /// reprocessed: rewind every persisted series to the value carried from
    /// the bar before, drop the last data values, and drop the last
    /// collected result row. A slot the revised replay does not reassign
    /// must read the carry, not the bar's first-pass value.
    pub fn rewind_bar(&mut self) {
        for storage in [
            &mut self.consts,
            &mut self.vars,
            &mut self.lets,
            &mut self.params,
            &mut self.ta_state,
        ] {
            for series in storage.values_mut() {
                series.rewind();
            }
        }
        let open_time = self.read(SlotKind::Data, "time", 0).as_num() as i64;
        for series in self.data.values_mut() {
            series.pop();
        }
        if let Some(len) = self.data.get("close").map(|s| s.len()) {
            self.bar_index = len.saturating_sub(1);
        }
        self.remove_last_result();
        // Only plots that emitted on the rewound bar lose a point.
        for (_, values) in self.plots.iter_mut() {
            if values.last().is_some_and(|(t, _)| *t == open_time) {
                values.pop();
            }
        }
    }

    pub fn collect_scalar(&mut self, value: Value) {
        let value = self.resolve(value).with_precision();
        match &mut self.result {
            RunResult::Scalar(values) => values.push(value),
            _ => self.result = RunResult::Scalar(vec![value]),
        }
    }

    pub fn collect_record(&mut self, fields: Vec<(String, Value)>) {
        let resolved: Vec<(String, Value)> = fields
            .into_iter()
            .map(|(k, v)| {
                let v = self.resolve(v).with_precision();
                (k, v)
            })
            .collect();
        if !matches!(self.result, RunResult::Named(_)) {
            self.result = RunResult::Named(Vec::new());
        }
        if let RunResult::Named(series) = &mut self.result {
            for (key, value) in resolved {
                match series.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, values)) => values.push(value),
                    None => series.push((key, vec![value])),
                }
            }
        }
    }

    pub fn remove_last_result(&mut self) {
        match &mut self.result {
            RunResult::Empty => {}
            RunResult::Scalar(values) => {
                values.pop();
            }
            RunResult::Named(fields) => {
                for (_, values) in fields.iter_mut() {
                    values.pop();
                }
            }
        }
    }

    pub fn plot(&mut self, name: &str, value: Value) {
        let time = self.read(SlotKind::Data, "time", 0).as_num() as i64;
        match self.plots.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push((time, value)),
            None => self.plots.push((name.to_string(), vec![(time, value)])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 100.0,
            close_time: open_time + 59_999,
        }
    }

    #[test]
    fn init_creates_then_reseeds() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.init(SlotKind::Let, "val", Value::Num(0.0));
        ctx.assign(SlotKind::Let, "val", Value::Num(7.0));
        ctx.shift_all();
        ctx.init(SlotKind::Let, "val", Value::Num(0.0));
        assert_eq!(ctx.read(SlotKind::Let, "val", 0), Value::Num(0.0));
        assert_eq!(ctx.read(SlotKind::Let, "val", 1), Value::Num(7.0));
    }

    #[test]
    fn var_slots_reseed_like_any_other() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.init(SlotKind::Var, "v", Value::Num(11.0));
        ctx.shift_all();
        ctx.init(SlotKind::Var, "v", Value::Num(11.0));
        assert_eq!(ctx.read(SlotKind::Var, "v", 0), Value::Num(11.0));
        assert_eq!(ctx.read(SlotKind::Var, "v", 1), Value::Num(11.0));
    }

    #[test]
    fn param_accumulates_scalars_into_series() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        let handle = ctx.param(Value::Num(3.0), 0, "p0");
        assert!(matches!(&handle, Value::Series(r) if r.kind == SlotKind::Param));
        assert_eq!(ctx.read(SlotKind::Param, "p0", 0), Value::Num(3.0));
    }

    #[test]
    fn param_shifts_series_handles() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        let handle = Value::Series(SeriesRef {
            kind: SlotKind::Data,
            name: "close".to_string(),
            offset: 0,
        });
        match ctx.param(handle, 2, "p0") {
            Value::Series(r) => assert_eq!(r.offset, 2),
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn push_data_exposes_builtin_series() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.push_data(&candle(0, 10.0));
        ctx.push_data(&candle(60_000, 12.0));
        assert_eq!(ctx.bar_index, 1);
        assert_eq!(ctx.read(SlotKind::Data, "close", 0), Value::Num(12.0));
        assert_eq!(ctx.read(SlotKind::Data, "close", 1), Value::Num(10.0));
    }

    #[test]
    fn rewind_undoes_one_bar() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.push_data(&candle(0, 10.0));
        ctx.init(SlotKind::Let, "v", Value::Num(1.0));
        ctx.collect_scalar(Value::Num(1.0));
        ctx.shift_all();
        ctx.push_data(&candle(60_000, 12.0));
        ctx.init(SlotKind::Let, "v", Value::Num(2.0));
        ctx.collect_scalar(Value::Num(2.0));
        ctx.shift_all();

        ctx.rewind_bar();
        assert_eq!(ctx.bar_index, 0);
        assert_eq!(ctx.result, RunResult::Scalar(vec![Value::Num(1.0)]));
        // Bar 0's value plus its carried copy, as right after the shift.
        assert_eq!(ctx.series_len(SlotKind::Let, "v"), 2);
        assert_eq!(ctx.read(SlotKind::Let, "v", 0), Value::Num(1.0));
        assert_eq!(ctx.read(SlotKind::Let, "v", 1), Value::Num(1.0));
    }

    #[test]
    fn rewind_restores_carried_slot_values() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.push_data(&candle(0, 10.0));
        ctx.init(SlotKind::Var, "c", Value::Num(1.0));
        ctx.shift_all();
        ctx.push_data(&candle(60_000, 12.0));
        ctx.assign(SlotKind::Var, "c", Value::Num(2.0));
        ctx.shift_all();

        // A replay of bar 1 that never reassigns `c` must see bar 0's value.
        ctx.rewind_bar();
        assert_eq!(ctx.read(SlotKind::Var, "c", 0), Value::Num(1.0));
    }

    #[test]
    fn rewind_keeps_plots_from_earlier_bars() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.push_data(&candle(0, 10.0));
        ctx.plot("hi", Value::Num(10.0));
        ctx.shift_all();
        ctx.push_data(&candle(60_000, 12.0));
        // Bar 1 only emits "lo".
        ctx.plot("lo", Value::Num(11.0));
        ctx.shift_all();

        ctx.rewind_bar();
        assert_eq!(ctx.plots[0].1, vec![(0, Value::Num(10.0))]);
        assert!(ctx.plots[1].1.is_empty());
    }

    #[test]
    fn record_results_keep_declaration_order() {
        let mut ctx = ExecutionContext::new("X", Timeframe::H1);
        ctx.collect_record(vec![
            ("fast".to_string(), Value::Num(1.0)),
            ("slow".to_string(), Value::Num(2.0)),
        ]);
        match &ctx.result {
            RunResult::Named(fields) => {
                assert_eq!(fields[0].0, "fast");
                assert_eq!(fields[1].0, "slow");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
