//! CSV file market data adapter.
//!
//! Candle files live under a base directory as `{symbol}_{timeframe}.csv`
//! with the columns `open_time,open,high,low,close,volume,close_time`,
//! timestamps in epoch milliseconds, rows in chronological order.

use std::fs;
use std::path::PathBuf;

use crate::domain::candle::Candle;
use crate::domain::error::BarscriptError;
use crate::domain::timeframe::Timeframe;
use crate::ports::data_port::MarketDataPort;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }
}

fn field_i64(record: &csv::StringRecord, i: usize, name: &str) -> Result<i64, BarscriptError> {
    record
        .get(i)
        .ok_or_else(|| BarscriptError::Data {
            reason: format!("missing {} column", name),
        })?
        .trim()
        .parse()
        .map_err(|e| BarscriptError::Data {
            reason: format!("invalid {} value: {}", name, e),
        })
}

fn field_f64(record: &csv::StringRecord, i: usize, name: &str) -> Result<f64, BarscriptError> {
    record
        .get(i)
        .ok_or_else(|| BarscriptError::Data {
            reason: format!("missing {} column", name),
        })?
        .trim()
        .parse()
        .map_err(|e| BarscriptError::Data {
            reason: format!("invalid {} value: {}", name, e),
        })
}

impl MarketDataPort for CsvAdapter {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, BarscriptError> {
        let path = self.csv_path(symbol, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| BarscriptError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| BarscriptError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;

            let open_time = field_i64(&record, 0, "open_time")?;
            if let Some(start) = start {
                if open_time < start {
                    continue;
                }
            }
            if let Some(end) = end {
                if open_time > end {
                    continue;
                }
            }

            candles.push(Candle {
                open_time,
                open: field_f64(&record, 1, "open")?,
                high: field_f64(&record, 2, "high")?,
                low: field_f64(&record, 3, "low")?,
                close: field_f64(&record, 4, "close")?,
                volume: field_f64(&record, 5, "volume")?,
                close_time: field_i64(&record, 6, "close_time")?,
            });
        }

        // The port contract is ascending and free of duplicate bars.
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);

        if let Some(limit) = limit {
            if limit < candles.len() {
                candles.drain(..candles.len() - limit);
            }
        }
        Ok(candles)
    }
}
