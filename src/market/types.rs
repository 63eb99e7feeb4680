//! Volatility snapshot types shared by all sources.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which listing of the instrument a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Domestic,
    Foreign,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Domestic => write!(f, "domestic"),
            Side::Foreign => write!(f, "foreign"),
        }
    }
}

/// How trustworthy an IV value is.
///
/// Variants are ordered best to worst, so `max` yields the worse quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IvQuality {
    /// Market-derived implied volatility
    Web,
    /// Degraded proxy computed from underlying price returns
    HistoricalVol,
    /// No value could be obtained
    Unavailable,
}

impl IvQuality {
    pub fn worse(self, other: IvQuality) -> IvQuality {
        self.max(other)
    }

    /// Short tag carried into logs and notifications.
    pub fn tag(&self) -> &'static str {
        match self {
            IvQuality::Web => "WEB",
            IvQuality::HistoricalVol => "HV",
            IvQuality::Unavailable => "N/A",
        }
    }
}

impl fmt::Display for IvQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One IV estimate for one side of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IvSnapshot {
    pub instrument_id: String,
    pub side: Side,
    /// IV in percent (e.g., 23.5 = 23.5%); `None` when unavailable
    pub value: Option<Decimal>,
    pub quality: IvQuality,
    /// Adapter that produced the value
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
    pub underlying_price: Option<Decimal>,
}

impl IvSnapshot {
    pub fn new(
        instrument_id: &str,
        side: Side,
        value: Decimal,
        quality: IvQuality,
        source: &'static str,
    ) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            side,
            value: Some(value),
            quality,
            source,
            timestamp: Utc::now(),
            underlying_price: None,
        }
    }

    /// Snapshot for a side where every adapter failed.
    pub fn unavailable(instrument_id: &str, side: Side) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            side,
            value: None,
            quality: IvQuality::Unavailable,
            source: "none",
            timestamp: Utc::now(),
            underlying_price: None,
        }
    }

    pub fn with_underlying(mut self, price: Option<Decimal>) -> Self {
        self.underlying_price = price;
        self
    }

    /// A positive value with a non-unavailable quality tag.
    pub fn is_usable(&self) -> bool {
        self.quality != IvQuality::Unavailable
            && self.value.map(|v| v > Decimal::ZERO).unwrap_or(false)
    }
}
