//! barscript — bar-replay script engine.
//!
//! Compiles a small scripting language into a per-bar executable unit and
//! replays it over candle history with time-series variable semantics.
//! Hexagonal architecture: domain logic in [`domain`], port traits in
//! [`ports`], concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
