pub mod candle;
pub mod error;
pub mod math_fns;
pub mod runtime;
pub mod script;
pub mod ta;
pub mod timeframe;
pub mod value;
