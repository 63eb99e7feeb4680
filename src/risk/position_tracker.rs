//! Per-instrument position state machine.
//!
//! Each instrument moves through NONE → OPEN → CLOSED → NONE:
//! - an accepted OPEN signal records the spread, direction and expiry
//! - every cycle, an open position is checked against convergence,
//!   stop-loss, expiry proximity and maximum holding time, in that order
//! - a CLOSED record is dropped at the start of the following cycle
//!
//! Every transition is written to the [`PositionStore`] before the tracker
//! moves on. If the write fails the transition is undone in memory, so the
//! store and the tracker never disagree.

use crate::config::{InstrumentSpec, MonitorConfig, Thresholds};
use crate::error::PersistenceError;
use crate::market::IvQuality;
use crate::persistence::PositionStore;
use crate::strategy::{ArbitrageSignal, CloseReason, Direction, SignalKind, SpreadObservation};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// The one long-lived record per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument_id: String,
    pub opened_at: DateTime<Utc>,
    pub open_diff: Decimal,
    pub direction: Direction,
    pub status: PositionStatus,
    /// Quality of the data the position was opened on
    pub data_quality: IvQuality,
    /// Option expiry of the traded contract month
    pub expiry: NaiveDate,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<CloseReason>,
    #[serde(default)]
    pub close_diff: Option<Decimal>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Whole days since the position was opened.
    pub fn days_held(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_days()
    }

    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry - today).num_days()
    }
}

/// Holding-period limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Close when this many days or fewer remain to expiry
    pub expiry_lead_days: i64,
    pub max_holding_days: i64,
}

impl From<&MonitorConfig> for TrackerConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            expiry_lead_days: config.expiry_lead_days,
            max_holding_days: config.max_holding_days,
        }
    }
}

/// First close condition that holds, in priority order.
///
/// Convergence and stop-loss need a usable observation; expiry and holding
/// time are checked regardless, so a position still closes during an outage.
pub fn evaluate_close(
    position: &Position,
    observation: &SpreadObservation,
    thresholds: &Thresholds,
    config: &TrackerConfig,
    now: DateTime<Utc>,
) -> Option<CloseReason> {
    if let Some(abs_diff) = observation.abs_diff().filter(|_| observation.is_usable()) {
        if abs_diff <= thresholds.close {
            return Some(CloseReason::Convergence);
        }
        if abs_diff >= thresholds.stop_loss {
            return Some(CloseReason::StopLoss);
        }
    }

    let days_left = position.days_to_expiry(now.date_naive());
    if days_left <= config.expiry_lead_days {
        return Some(CloseReason::Expiry { days_left });
    }

    let days_held = position.days_held(now);
    if days_held >= config.max_holding_days {
        return Some(CloseReason::MaxHolding { days_held });
    }

    None
}

/// Owns every position and keeps the store in step with it.
pub struct PositionTracker {
    config: TrackerConfig,
    store: PositionStore,
    positions: BTreeMap<String, Position>,
}

impl PositionTracker {
    /// Rebuild the tracker from the store.
    pub fn restore(config: TrackerConfig, store: PositionStore) -> Result<Self, PersistenceError> {
        let positions = store.load()?;
        let open = positions.values().filter(|p| p.is_open()).count();
        if !positions.is_empty() {
            info!(
                "📂 [POSITION] Restored {} position(s), {} open, from {}",
                positions.len(),
                open,
                store.path().display()
            );
        }
        Ok(Self {
            config,
            store,
            positions,
        })
    }

    pub fn position(&self, instrument_id: &str) -> Option<&Position> {
        self.positions.get(instrument_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    /// Advance one instrument by one cycle.
    ///
    /// Returns the signal to dispatch: the accepted OPEN, or a CLOSE.
    pub fn on_cycle(
        &mut self,
        spec: &InstrumentSpec,
        observation: &SpreadObservation,
        open_signal: Option<ArbitrageSignal>,
        now: DateTime<Utc>,
    ) -> Result<Option<ArbitrageSignal>, PersistenceError> {
        let id = spec.id.as_str();

        // CLOSED → NONE
        if self
            .positions
            .get(id)
            .is_some_and(|p| p.status == PositionStatus::Closed)
        {
            let previous = self.positions.remove(id);
            if let Err(e) = self.store.save(&self.positions) {
                if let Some(previous) = previous {
                    self.positions.insert(id.to_string(), previous);
                }
                return Err(e);
            }
            debug!(instrument = id, "Cleared closed position");
        }

        match self.positions.get(id).cloned() {
            Some(position) => self.check_open(spec, position, observation, open_signal, now),
            None => match open_signal {
                Some(signal) => self.open(spec, signal, now),
                None => Ok(None),
            },
        }
    }

    fn open(
        &mut self,
        spec: &InstrumentSpec,
        signal: ArbitrageSignal,
        now: DateTime<Utc>,
    ) -> Result<Option<ArbitrageSignal>, PersistenceError> {
        let Some(open_diff) = signal.diff_at_signal.filter(|_| signal.is_open()) else {
            warn!(instrument = %spec.id, signal = %signal.label(), "Ignoring non-open signal");
            return Ok(None);
        };

        let position = Position {
            instrument_id: spec.id.clone(),
            opened_at: now,
            open_diff,
            direction: signal.direction,
            status: PositionStatus::Open,
            data_quality: signal.data_quality,
            expiry: spec.expiry_after(now.date_naive()),
            closed_at: None,
            close_reason: None,
            close_diff: None,
        };

        self.positions.insert(spec.id.clone(), position.clone());
        if let Err(e) = self.store.save(&self.positions) {
            self.positions.remove(&spec.id);
            return Err(e);
        }

        info!(
            "📥 [POSITION] {} opened | diff {:+.2} | {} | expiry {} | data {}",
            spec.id, open_diff, position.direction, position.expiry, position.data_quality
        );
        Ok(Some(signal))
    }

    fn check_open(
        &mut self,
        spec: &InstrumentSpec,
        position: Position,
        observation: &SpreadObservation,
        open_signal: Option<ArbitrageSignal>,
        now: DateTime<Utc>,
    ) -> Result<Option<ArbitrageSignal>, PersistenceError> {
        if let Some(signal) = &open_signal {
            info!(
                instrument = %spec.id,
                signal = %signal.label(),
                diff = ?signal.diff_at_signal,
                "Position already open, OPEN swallowed"
            );
        }

        let Some(reason) =
            evaluate_close(&position, observation, &spec.thresholds, &self.config, now)
        else {
            return Ok(None);
        };

        let close_diff = observation.diff.filter(|_| observation.is_usable());
        let mut closed = position.clone();
        closed.status = PositionStatus::Closed;
        closed.closed_at = Some(now);
        closed.close_reason = Some(reason);
        closed.close_diff = close_diff;

        self.positions.insert(spec.id.clone(), closed);
        if let Err(e) = self.store.save(&self.positions) {
            self.positions.insert(spec.id.clone(), position);
            return Err(e);
        }

        let signal = ArbitrageSignal {
            instrument_id: spec.id.clone(),
            kind: SignalKind::Close {
                reason,
                open_diff: position.open_diff,
            },
            direction: position.direction,
            diff_at_signal: close_diff,
            data_quality: observation.data_quality,
            timestamp: now,
        };

        info!(
            "📤 [POSITION] {} closed ({}) | open {:+.2} → now {} | held {}d",
            spec.id,
            reason,
            position.open_diff,
            close_diff
                .map(|d| format!("{:+.2}", d))
                .unwrap_or_else(|| "n/a".to_string()),
            position.days_held(now)
        );
        Ok(Some(signal))
    }
}
