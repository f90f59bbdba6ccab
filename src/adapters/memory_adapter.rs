//! In-memory market data adapter.
//!
//! Holds candle histories per (symbol, timeframe). The interior mutability
//! lets a test or a feed handler append or revise candles between polls,
//! which is how live streaming is exercised without a network source.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::domain::candle::Candle;
use crate::domain::error::BarscriptError;
use crate::domain::timeframe::Timeframe;
use crate::ports::data_port::MarketDataPort;

#[derive(Default)]
pub struct MemoryAdapter {
    series: RefCell<HashMap<(String, Timeframe), Vec<Candle>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.series
            .borrow_mut()
            .insert((symbol.to_string(), timeframe), candles);
    }

    /// Append one candle, as a live feed would on bar open.
    pub fn push(&self, symbol: &str, timeframe: Timeframe, candle: Candle) {
        self.series
            .borrow_mut()
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .push(candle);
    }

    /// Replace the newest candle, as a live feed does while a bar forms.
    pub fn revise_last(&self, symbol: &str, timeframe: Timeframe, candle: Candle) {
        if let Some(candles) = self
            .series
            .borrow_mut()
            .get_mut(&(symbol.to_string(), timeframe))
        {
            if let Some(last) = candles.last_mut() {
                *last = candle;
            }
        }
    }
}

impl MarketDataPort for MemoryAdapter {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, BarscriptError> {
        let series = self.series.borrow();
        let candles = series
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default();
        let mut filtered: Vec<Candle> = candles
            .into_iter()
            .filter(|c| start.map(|s| c.open_time >= s).unwrap_or(true))
            .filter(|c| end.map(|e| c.open_time <= e).unwrap_or(true))
            .collect();
        if let Some(limit) = limit {
            if limit < filtered.len() {
                filtered.drain(..filtered.len() - limit);
            }
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            close_time: open_time + 59_999,
        }
    }

    #[test]
    fn filters_and_limits() {
        let adapter = MemoryAdapter::new();
        adapter.insert(
            "X",
            Timeframe::M1,
            vec![candle(0, 1.0), candle(60_000, 2.0), candle(120_000, 3.0)],
        );
        let out = adapter
            .fetch_candles("X", Timeframe::M1, Some(1), Some(0), Some(60_000))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close, 2.0);
    }

    #[test]
    fn revise_replaces_newest() {
        let adapter = MemoryAdapter::new();
        adapter.insert("X", Timeframe::M1, vec![candle(0, 1.0)]);
        adapter.revise_last("X", Timeframe::M1, candle(0, 9.0));
        let out = adapter
            .fetch_candles("X", Timeframe::M1, None, None, None)
            .unwrap();
        assert_eq!(out[0].close, 9.0);
    }
}
