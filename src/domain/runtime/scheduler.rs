//! Bar replay scheduler.
//!
//! A [`Runner`] drives a compiled unit over a candle history: push the bar's
//! data, invoke the unit, collect the output, shift every persisted series.
//! `run` processes the whole history in one go; `run_paginated` yields the
//! results page by page and, when no end date is set and a provider is
//! available, keeps polling for new candles. A revised live candle (same
//! open time as the last processed bar) rewinds exactly one bar and is
//! reprocessed.

use tracing::{debug, warn};

use crate::domain::candle::Candle;
use crate::domain::error::BarscriptError;
use crate::domain::runtime::context::{ExecutionContext, RunResult};
use crate::domain::runtime::eval::{Evaluator, ScriptOutput};
use crate::domain::script::compiled::CompiledScript;
use crate::domain::timeframe::Timeframe;
use crate::ports::MarketDataPort;

pub struct Runner<'a> {
    script: &'a CompiledScript,
    provider: Option<&'a dyn MarketDataPort>,
    candles: Option<Vec<Candle>>,
    symbol: String,
    timeframe: Timeframe,
    limit: Option<usize>,
    start: Option<i64>,
    end: Option<i64>,
    secondary: bool,
}

impl<'a> Runner<'a> {
    pub fn from_provider(
        script: &'a CompiledScript,
        provider: &'a dyn MarketDataPort,
        symbol: impl Into<String>,
        timeframe: Timeframe,
    ) -> Self {
        Runner {
            script,
            provider: Some(provider),
            candles: None,
            symbol: symbol.into(),
            timeframe,
            limit: None,
            start: None,
            end: None,
            secondary: false,
        }
    }

    /// Run over a fixed candle history, without any data source. Scripts
    /// using `request.security` need a provider and will fail at runtime.
    pub fn from_candles(
        script: &'a CompiledScript,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Self {
        Runner {
            script,
            provider: None,
            candles: Some(candles),
            symbol: symbol.into(),
            timeframe,
            limit: None,
            start: None,
            end: None,
            secondary: false,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_range(mut self, start: Option<i64>, end: Option<i64>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn into_secondary(mut self) -> Self {
        self.secondary = true;
        self
    }

    fn new_context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(self.symbol.clone(), self.timeframe);
        ctx.limit = self.limit;
        ctx.start = self.start;
        ctx.end = self.end;
        ctx.is_secondary = self.secondary;
        ctx
    }

    fn load(&self) -> Result<Vec<Candle>, BarscriptError> {
        let candles = match &self.candles {
            Some(candles) => candles.clone(),
            None => {
                let provider = self.provider.ok_or(BarscriptError::NoProvider)?;
                provider.fetch_candles(
                    &self.symbol,
                    self.timeframe,
                    self.limit,
                    self.start,
                    self.end,
                )?
            }
        };
        if candles.is_empty() {
            return Err(BarscriptError::NoData {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe.to_string(),
            });
        }
        Ok(candles)
    }

    /// Replay the unit over the history and return the finished context.
    /// `periods` limits processing to the newest N candles.
    pub fn run(self, periods: Option<usize>) -> Result<ExecutionContext, BarscriptError> {
        let candles = self.load()?;
        let skip = match periods {
            Some(p) if p < candles.len() => candles.len() - p,
            _ => 0,
        };
        debug!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            bars = candles.len() - skip,
            secondary = self.secondary,
            "running script"
        );
        let mut ctx = self.new_context();
        let mut eval = Evaluator::new(self.script, self.provider);
        for candle in &candles[skip..] {
            process_bar(&mut eval, &mut ctx, candle)?;
        }
        Ok(ctx)
    }

    /// Replay in pages of `page_size` bars. When the history is exhausted
    /// and no end date was set, each further `next()` polls the provider;
    /// a poll with nothing new yields [`PageEvent::Idle`].
    pub fn run_paginated(self, periods: Option<usize>, page_size: usize) -> Pages<'a> {
        let live = self.end.is_none() && self.provider.is_some() && self.candles.is_none();
        Pages {
            runner: self,
            periods,
            page_size: page_size.max(1),
            live,
            state: None,
            finished: false,
        }
    }
}

/// One page of freshly produced results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Bar index of the first row in `rows`.
    pub first_bar: usize,
    pub rows: RunResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Page(Page),
    /// Live mode poll found nothing new.
    Idle,
}

struct StreamState {
    ctx: ExecutionContext,
    candles: Vec<Candle>,
    cursor: usize,
}

pub struct Pages<'a> {
    runner: Runner<'a>,
    periods: Option<usize>,
    page_size: usize,
    live: bool,
    state: Option<StreamState>,
    finished: bool,
}

impl<'a> Pages<'a> {
    fn ensure_loaded(&mut self) -> Result<(), BarscriptError> {
        if self.state.is_some() {
            return Ok(());
        }
        let mut candles = self.runner.load()?;
        if let Some(p) = self.periods {
            if p < candles.len() {
                candles.drain(..candles.len() - p);
            }
        }
        self.state = Some(StreamState {
            ctx: self.runner.new_context(),
            candles,
            cursor: 0,
        });
        Ok(())
    }

    fn process_page(&mut self) -> Result<Option<Page>, BarscriptError> {
        let state = self.state.as_mut().expect("stream state is loaded");
        if state.cursor >= state.candles.len() {
            return Ok(None);
        }
        let first_bar = state.cursor;
        let before = state.ctx.result.len();
        let mut eval = Evaluator::new(self.runner.script, self.runner.provider);
        let upto = (state.cursor + self.page_size).min(state.candles.len());
        while state.cursor < upto {
            let candle = state.candles[state.cursor].clone();
            process_bar(&mut eval, &mut state.ctx, &candle)?;
            state.cursor += 1;
        }
        Ok(Some(Page {
            first_bar,
            rows: slice_result(&state.ctx.result, before),
        }))
    }

    /// Poll the provider for candles at or after the last processed open
    /// time. Returns whether anything new was queued.
    fn poll(&mut self) -> bool {
        let provider = match self.runner.provider {
            Some(p) => p,
            None => return false,
        };
        let state = self.state.as_mut().expect("stream state is loaded");
        let last = match state.candles.last() {
            Some(c) => c.clone(),
            None => return false,
        };
        let fetched = match provider.fetch_candles(
            &self.runner.symbol,
            self.runner.timeframe,
            None,
            Some(last.open_time),
            None,
        ) {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(error = %err, symbol = %self.runner.symbol, "live poll failed");
                return false;
            }
        };

        let mut queued = false;
        for candle in fetched {
            if candle.open_time < last.open_time {
                continue;
            }
            if candle.open_time == last.open_time {
                if candle == last {
                    continue;
                }
                // Revised live bar: undo it and queue the revision.
                debug!(open_time = candle.open_time, "reprocessing revised bar");
                if state.cursor == state.candles.len() && state.cursor > 0 {
                    state.ctx.rewind_bar();
                    state.cursor -= 1;
                }
                let idx = state.candles.len() - 1;
                state.candles[idx] = candle;
                queued = true;
            } else if candle.open_time > state.candles.last().map(|c| c.open_time).unwrap_or(i64::MIN) {
                state.candles.push(candle);
                queued = true;
            }
        }
        queued
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<PageEvent, BarscriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(err) = self.ensure_loaded() {
            self.finished = true;
            return Some(Err(err));
        }
        match self.process_page() {
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
            Ok(Some(page)) => Some(Ok(PageEvent::Page(page))),
            Ok(None) => {
                if !self.live {
                    self.finished = true;
                    return None;
                }
                if self.poll() {
                    match self.process_page() {
                        Err(err) => {
                            self.finished = true;
                            Some(Err(err))
                        }
                        Ok(Some(page)) => Some(Ok(PageEvent::Page(page))),
                        Ok(None) => Some(Ok(PageEvent::Idle)),
                    }
                } else {
                    Some(Ok(PageEvent::Idle))
                }
            }
        }
    }
}

fn process_bar(
    eval: &mut Evaluator<'_>,
    ctx: &mut ExecutionContext,
    candle: &Candle,
) -> Result<(), BarscriptError> {
    ctx.push_data(candle);
    match eval.invoke(ctx)? {
        ScriptOutput::Scalar(value) => ctx.collect_scalar(value),
        ScriptOutput::Record(fields) => ctx.collect_record(fields),
        ScriptOutput::None => {}
    }
    ctx.shift_all();
    Ok(())
}

fn slice_result(result: &RunResult, from: usize) -> RunResult {
    match result {
        RunResult::Empty => RunResult::Empty,
        RunResult::Scalar(values) => RunResult::Scalar(values[from.min(values.len())..].to_vec()),
        RunResult::Named(fields) => RunResult::Named(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), v[from.min(v.len())..].to_vec()))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script::compile;
    use crate::domain::value::Value;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Candle {
                open_time: i as i64 * 60_000,
                open: c - 0.5,
                high: c + 1.0,
                low: c - 1.0,
                close: *c,
                volume: 10.0,
                close_time: i as i64 * 60_000 + 59_999,
            })
            .collect()
    }

    #[test]
    fn run_collects_one_row_per_bar() {
        let unit = compile("let val = 0; val = val[1] ? val[1] + 1 : 1; return val;").unwrap();
        let ctx = Runner::from_candles(&unit, "X", Timeframe::M1, candles(&[1.0; 5]))
            .run(None)
            .unwrap();
        match ctx.result {
            RunResult::Scalar(values) => {
                let nums: Vec<f64> = values.iter().map(|v| v.as_num()).collect();
                assert_eq!(nums, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn periods_limits_to_newest_bars() {
        let unit = compile("return close;").unwrap();
        let ctx = Runner::from_candles(&unit, "X", Timeframe::M1, candles(&[1.0, 2.0, 3.0, 4.0]))
            .run(Some(2))
            .unwrap();
        match ctx.result {
            RunResult::Scalar(values) => {
                assert_eq!(values, vec![Value::Num(3.0), Value::Num(4.0)]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_history_is_an_error() {
        let unit = compile("return close;").unwrap();
        let err = Runner::from_candles(&unit, "X", Timeframe::M1, Vec::new())
            .run(None)
            .unwrap_err();
        assert!(matches!(err, BarscriptError::NoData { .. }));
    }

    #[test]
    fn pagination_slices_results() {
        let unit = compile("return close;").unwrap();
        let pages: Vec<PageEvent> =
            Runner::from_candles(&unit, "X", Timeframe::M1, candles(&[1.0, 2.0, 3.0, 4.0, 5.0]))
                .run_paginated(None, 2)
                .map(|p| p.unwrap())
                .collect();
        assert_eq!(pages.len(), 3);
        match &pages[2] {
            PageEvent::Page(page) => {
                assert_eq!(page.first_bar, 4);
                assert_eq!(page.rows, RunResult::Scalar(vec![Value::Num(5.0)]));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
