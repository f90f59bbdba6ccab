//! Market data access port trait.

use crate::domain::candle::Candle;
use crate::domain::error::BarscriptError;
use crate::domain::timeframe::Timeframe;

/// Source of candle history. Implementations must return candles in
/// chronological order. `start` and `end` are millisecond timestamps; a
/// `None` end means "up to the newest available candle", which is what
/// makes live streaming possible.
pub trait MarketDataPort {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, BarscriptError>;
}
