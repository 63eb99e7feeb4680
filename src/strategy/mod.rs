//! Signal generation.
//!
//! - `analyzer`: spread computation and OPEN classification
//! - `signal`: signal, direction and close-reason types
//! - `throttle`: minimum interval between alerts per instrument
//! - `sizing`: hedge lot counts across unit systems
//! - `recommend`: ATM straddle legs to trade on an OPEN

mod analyzer;
mod recommend;
mod signal;
mod sizing;
mod throttle;

pub use analyzer::{SpreadAnalyzer, SpreadObservation, STRONG_MULTIPLIER};
pub use signal::{ArbitrageSignal, CloseReason, Direction, SignalKind, SignalStrength};
pub use recommend::{atm_strike, option_codes, LegAction, StraddleLeg, TradeRecommendation};
pub use sizing::{calculate_lots, conversion_factor, minimal_lots, LotSizing};
pub use throttle::SignalThrottle;
