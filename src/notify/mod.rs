//! Outbound alerts.
//!
//! The monitor talks to a [`Notifier`]; delivery is best effort. A `false`
//! return is logged by the caller and never undoes the state change that
//! produced the alert.

mod format;
mod telegram;

pub use format::format_alert;
pub use telegram::TelegramNotifier;

use crate::config::{InstrumentSpec, Thresholds};
use crate::market::{IvSnapshot, Side};
use crate::strategy::{ArbitrageSignal, TradeRecommendation};
use async_trait::async_trait;
use tracing::info;

/// Display context for a signal alert.
#[derive(Debug, Clone)]
pub struct SignalContext {
    pub instrument_name: String,
    pub instrument_name_en: String,
    pub domestic_exchange: String,
    pub foreign_exchange: String,
    pub domestic: IvSnapshot,
    pub foreign: IvSnapshot,
    pub thresholds: Thresholds,
    pub domestic_unit: String,
    pub foreign_unit: String,
    /// Legs to trade; present on OPEN signals with both underlying prices
    pub recommendation: Option<TradeRecommendation>,
}

impl SignalContext {
    pub fn new(spec: &InstrumentSpec, domestic: &IvSnapshot, foreign: &IvSnapshot) -> Self {
        Self {
            instrument_name: spec.name.clone(),
            instrument_name_en: spec.name_en.clone(),
            domestic_exchange: spec.domestic.exchange.clone(),
            foreign_exchange: spec.foreign.exchange.clone(),
            domestic: domestic.clone(),
            foreign: foreign.clone(),
            thresholds: spec.thresholds,
            domestic_unit: spec.domestic.base_unit.clone(),
            foreign_unit: spec.foreign.base_unit.clone(),
            recommendation: None,
        }
    }

    /// Context for `signal`, with trade legs when it opens a position.
    pub fn for_signal(
        spec: &InstrumentSpec,
        signal: &ArbitrageSignal,
        domestic: &IvSnapshot,
        foreign: &IvSnapshot,
    ) -> Self {
        Self {
            recommendation: TradeRecommendation::for_signal(
                spec,
                signal,
                domestic.underlying_price,
                foreign.underlying_price,
            ),
            ..Self::new(spec, domestic, foreign)
        }
    }
}

/// Everything the monitor reports to humans.
#[derive(Debug, Clone)]
pub enum Alert {
    /// An OPEN or CLOSE decision.
    Signal {
        signal: ArbitrageSignal,
        context: Box<SignalContext>,
    },
    /// Every source failed for at least one side.
    DataUnavailable {
        instrument_id: String,
        instrument_name: String,
        sides: Vec<Side>,
    },
    /// A position transition could not be persisted.
    StoreFailure { instrument_id: String, error: String },
    Started {
        instruments: Vec<String>,
        poll_interval_secs: u64,
    },
    Stopped {
        cycles: u64,
        signals: u64,
        outages: u64,
    },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::Signal { .. } => "signal",
            Alert::DataUnavailable { .. } => "data_unavailable",
            Alert::StoreFailure { .. } => "store_failure",
            Alert::Started { .. } => "started",
            Alert::Stopped { .. } => "stopped",
        }
    }
}

/// Delivers alerts somewhere a human will see them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the alert was delivered.
    async fn send(&self, alert: &Alert) -> bool;
}

/// Writes alerts to the log only. Used when no bot is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &Alert) -> bool {
        info!(kind = alert.kind(), "🔔 [ALERT]\n{}", format_alert(alert));
        true
    }
}
