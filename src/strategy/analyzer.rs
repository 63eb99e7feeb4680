//! Spread computation and open-signal classification.

use crate::config::Thresholds;
use crate::market::{IvQuality, IvSnapshot};
use crate::strategy::signal::{ArbitrageSignal, Direction, SignalKind, SignalStrength};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// |diff| at or above this multiple of the open threshold is a strong signal.
pub const STRONG_MULTIPLIER: Decimal = dec!(1.5);

/// Paired domestic/foreign view of one instrument. Derived, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadObservation {
    pub instrument_id: String,
    pub domestic_iv: Option<Decimal>,
    pub foreign_iv: Option<Decimal>,
    /// `foreign - domestic`; absent when either side is unavailable
    pub diff: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    /// Worse of the two snapshot qualities
    pub data_quality: IvQuality,
    pub domestic_price: Option<Decimal>,
    pub foreign_price: Option<Decimal>,
}

impl SpreadObservation {
    pub fn from_snapshots(domestic: &IvSnapshot, foreign: &IvSnapshot) -> Self {
        let data_quality = domestic.quality.worse(foreign.quality);
        let diff = match (domestic.is_usable(), foreign.is_usable()) {
            (true, true) => domestic.value.zip(foreign.value).map(|(d, f)| f - d),
            _ => None,
        };

        Self {
            instrument_id: domestic.instrument_id.clone(),
            domestic_iv: domestic.value,
            foreign_iv: foreign.value,
            diff,
            timestamp: domestic.timestamp.max(foreign.timestamp),
            data_quality: if diff.is_some() {
                data_quality
            } else {
                IvQuality::Unavailable
            },
            domestic_price: domestic.underlying_price,
            foreign_price: foreign.underlying_price,
        }
    }

    /// Whether the observation may be used for signalling.
    pub fn is_usable(&self) -> bool {
        self.diff.is_some() && self.data_quality != IvQuality::Unavailable
    }

    pub fn abs_diff(&self) -> Option<Decimal> {
        self.diff.map(|d| d.abs())
    }
}

/// Stateless spread classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadAnalyzer;

impl SpreadAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Compute the spread and decide whether it warrants an OPEN signal.
    pub fn analyze(
        &self,
        domestic: &IvSnapshot,
        foreign: &IvSnapshot,
        thresholds: &Thresholds,
    ) -> (SpreadObservation, Option<ArbitrageSignal>) {
        let observation = SpreadObservation::from_snapshots(domestic, foreign);

        let Some(diff) = observation.diff.filter(|_| observation.is_usable()) else {
            debug!(
                instrument = %observation.instrument_id,
                domestic = %domestic.quality,
                foreign = %foreign.quality,
                "Observation unusable, no signal"
            );
            return (observation, None);
        };

        let abs_diff = diff.abs();
        if abs_diff < thresholds.min_diff {
            debug!(instrument = %observation.instrument_id, %diff, "Spread below noise floor");
            return (observation, None);
        }
        if abs_diff < thresholds.open {
            debug!(
                instrument = %observation.instrument_id,
                %diff,
                open = %thresholds.open,
                "Spread in weak band, no trigger"
            );
            return (observation, None);
        }

        let strength = if abs_diff >= thresholds.open * STRONG_MULTIPLIER {
            SignalStrength::Strong
        } else {
            SignalStrength::Medium
        };

        let signal = ArbitrageSignal {
            instrument_id: observation.instrument_id.clone(),
            kind: SignalKind::Open { strength },
            direction: Direction::from_diff(diff),
            diff_at_signal: Some(diff),
            data_quality: observation.data_quality,
            timestamp: observation.timestamp,
        };
        (observation, Some(signal))
    }
}
