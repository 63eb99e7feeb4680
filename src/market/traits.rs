//! Source-agnostic traits for volatility and price data.
//!
//! Every volatility adapter (scraped options page, options API, historical
//! volatility) implements [`VolatilitySource`] so the acquirer can walk them
//! as an ordered fallback chain. [`PriceHistoryProvider`] supplies the
//! underlying closes the historical estimate and ATM selection need.

use crate::config::InstrumentSpec;
use crate::error::SourceError;
use crate::market::types::{IvSnapshot, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Produces an IV estimate for one side of one instrument.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VolatilitySource: Send + Sync {
    /// Adapter name used in logs and snapshot tags.
    fn name(&self) -> &'static str;

    /// Attempt to fetch an IV snapshot.
    ///
    /// Any failure, including "no matching contract", is a [`SourceError`];
    /// the acquirer moves on to the next adapter.
    async fn fetch(&self, instrument: &InstrumentSpec, side: Side)
        -> Result<IvSnapshot, SourceError>;
}

/// Daily closing prices of the underlying future, oldest first.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    async fn daily_closes(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<Vec<Decimal>, SourceError>;

    /// Most recent close.
    async fn latest_price(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<Decimal, SourceError> {
        self.daily_closes(instrument, side)
            .await?
            .last()
            .copied()
            .ok_or_else(|| SourceError::unavailable("price-history", "empty price history"))
    }
}
