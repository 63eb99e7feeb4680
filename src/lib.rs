//! # IV Spread Monitor
//!
//! Watches the implied-volatility spread between a domestic and a foreign
//! listing of the same commodity option and emits open/close signals.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading, validation and the instrument registry
//! - `market`: Volatility sources (chain page, options API, option board, historical vol) and the fallback acquirer
//! - `strategy`: Spread analysis, signals, throttling, hedge sizing and trade legs
//! - `risk`: Per-instrument position state machine
//! - `persistence`: JSON position store with atomic writes
//! - `notify`: Alert formatting and delivery (Telegram or log)
//! - `monitor`: Polling loop and trading-hour calendar
//! - `utils`: Shared decimal helpers

pub mod config;
pub mod error;
pub mod market;
pub mod monitor;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
