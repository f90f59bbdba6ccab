pub mod config_port;
pub mod data_port;

pub use config_port::ConfigPort;
pub use data_port::MarketDataPort;
