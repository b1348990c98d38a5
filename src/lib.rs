//! LadderBot Library
//!
//! Paper-trading position lifecycle engine: ATR-scaled take-profit ladders,
//! hard and trailing stops, and a durable CSV ledger.

pub mod config;
pub mod engine;
pub mod ledger;
pub mod market_data;
pub mod signal;
pub mod tracker;
pub mod types;
