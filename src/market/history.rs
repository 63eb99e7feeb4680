//! Underlying price history and the historical-volatility fallback tier.

use crate::config::InstrumentSpec;
use crate::error::SourceError;
use crate::market::sina::SinaClient;
use crate::market::traits::{PriceHistoryProvider, VolatilitySource};
use crate::market::types::{IvQuality, IvSnapshot, Side};
use crate::market::yahoo::YahooClient;
use crate::utils::decimal::{from_f64, to_f64};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

const ADAPTER: &str = "historical-vol";
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Routes history requests by side: Sina K-lines at home, Yahoo charts abroad.
pub struct MarketHistory {
    sina: SinaClient,
    yahoo: YahooClient,
}

impl MarketHistory {
    pub fn new(sina: SinaClient, yahoo: YahooClient) -> Self {
        Self { sina, yahoo }
    }
}

#[async_trait]
impl PriceHistoryProvider for MarketHistory {
    async fn daily_closes(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<Vec<Decimal>, SourceError> {
        let symbol = instrument
            .leg(side)
            .history_symbol
            .as_deref()
            .ok_or_else(|| SourceError::unavailable("price-history", "no history symbol configured"))?;

        match side {
            Side::Domestic => self.sina.daily_closes(symbol).await,
            Side::Foreign => self.yahoo.daily_closes(symbol).await,
        }
    }
}

/// Annualised close-to-close volatility in percent.
///
/// Uses the sample standard deviation of the last `window` daily log returns.
/// Returns `None` when fewer than `window + 1` positive closes are available.
pub fn historical_volatility(closes: &[Decimal], window: usize) -> Option<Decimal> {
    if window < 2 {
        return None;
    }
    let prices: Vec<f64> = closes
        .iter()
        .copied()
        .filter(|c| *c > Decimal::ZERO)
        .map(to_f64)
        .collect();
    if prices.len() < window + 1 {
        return None;
    }

    let tail = &prices[prices.len() - (window + 1)..];
    let returns: Vec<f64> = tail.windows(2).map(|w| (w[1] / w[0]).ln()).collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let annualised = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;

    from_f64(annualised).map(|v| v.round_dp(4))
}

/// Degraded estimate from underlying returns. Always tagged `HISTORICAL_VOL`.
pub struct HistoricalVolatilitySource {
    prices: Arc<dyn PriceHistoryProvider>,
    window: usize,
}

impl HistoricalVolatilitySource {
    pub fn new(prices: Arc<dyn PriceHistoryProvider>, window: usize) -> Self {
        Self { prices, window }
    }
}

#[async_trait]
impl VolatilitySource for HistoricalVolatilitySource {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    async fn fetch(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<IvSnapshot, SourceError> {
        let closes = self.prices.daily_closes(instrument, side).await?;
        let hv = historical_volatility(&closes, self.window)
            .filter(|v| *v > Decimal::ZERO)
            .ok_or_else(|| {
                SourceError::unavailable(
                    ADAPTER,
                    format!(
                        "need {} closes for a {}-day window, got {}",
                        self.window + 1,
                        self.window,
                        closes.len()
                    ),
                )
            })?;

        debug!(instrument = %instrument.id, %side, hv = %hv, "Historical volatility estimate");
        Ok(
            IvSnapshot::new(&instrument.id, side, hv, IvQuality::HistoricalVol, ADAPTER)
                .with_underlying(closes.last().copied()),
        )
    }
}
