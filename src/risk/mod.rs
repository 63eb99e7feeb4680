//! Position lifecycle management.
//!
//! Holds at most one position per instrument and decides when it closes:
//! - Spread convergence
//! - Stop-loss on a widening spread
//! - Approaching option expiry
//! - Maximum holding period

mod position_tracker;

pub use position_tracker::{
    evaluate_close, Position, PositionStatus, PositionTracker, TrackerConfig,
};
