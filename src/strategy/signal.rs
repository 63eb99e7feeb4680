//! Signal types emitted by the analyzer and the position tracker.

use crate::market::IvQuality;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which market's options are bought and which are sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Foreign IV is richer: buy domestic volatility, sell foreign
    BuyDomesticSellForeign,
    /// Domestic IV is richer: sell domestic volatility, buy foreign
    SellDomesticBuyForeign,
}

impl Direction {
    /// Direction implied by the sign of `foreign - domestic`.
    pub fn from_diff(diff: Decimal) -> Self {
        if diff > Decimal::ZERO {
            Direction::BuyDomesticSellForeign
        } else {
            Direction::SellDomesticBuyForeign
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Direction::BuyDomesticSellForeign => "buy domestic + sell foreign",
            Direction::SellDomesticBuyForeign => "sell domestic + buy foreign",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Strong,
    Medium,
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStrength::Strong => write!(f, "STRONG"),
            SignalStrength::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Why an open position was closed, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloseReason {
    Convergence,
    StopLoss,
    Expiry { days_left: i64 },
    MaxHolding { days_held: i64 },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Convergence => write!(f, "convergence"),
            CloseReason::StopLoss => write!(f, "stop-loss"),
            CloseReason::Expiry { days_left } => write!(f, "expiry in {days_left}d"),
            CloseReason::MaxHolding { days_held } => write!(f, "max holding ({days_held}d)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalKind {
    Open { strength: SignalStrength },
    Close { reason: CloseReason, open_diff: Decimal },
}

/// An actionable open or close decision. Constructed, dispatched, discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageSignal {
    pub instrument_id: String,
    pub kind: SignalKind,
    pub direction: Direction,
    /// Spread (foreign - domestic) when the signal fired; `None` for a close
    /// forced while data was unavailable
    pub diff_at_signal: Option<Decimal>,
    pub data_quality: IvQuality,
    pub timestamp: DateTime<Utc>,
}

impl ArbitrageSignal {
    pub fn is_open(&self) -> bool {
        matches!(self.kind, SignalKind::Open { .. })
    }

    pub fn is_close(&self) -> bool {
        matches!(self.kind, SignalKind::Close { .. })
    }

    /// Change in spread between open and close.
    pub fn realized_delta(&self) -> Option<Decimal> {
        match self.kind {
            SignalKind::Close { open_diff, .. } => self.diff_at_signal.map(|d| d - open_diff),
            SignalKind::Open { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self.kind {
            SignalKind::Open { strength } => format!("OPEN/{strength}"),
            SignalKind::Close { reason, .. } => format!("CLOSE/{reason}"),
        }
    }
}
