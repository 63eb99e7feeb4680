//! Yahoo Finance style market-data client.
//!
//! Two read-only endpoints are used:
//! - `v7/finance/options/{symbol}`: option chain with per-contract implied vol
//! - `v8/finance/chart/{symbol}`: daily candles for the underlying future
//!
//! The options endpoint backs the third-party tier of the volatility chain.

use crate::config::InstrumentSpec;
use crate::error::SourceError;
use crate::market::traits::VolatilitySource;
use crate::market::types::{IvQuality, IvSnapshot, Side};
use crate::utils::decimal::{fraction_to_percent, from_f64};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

const ADAPTER: &str = "yahoo-options";

/// Options response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsResponse {
    pub option_chain: OptionChain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionChain {
    #[serde(default)]
    pub result: Vec<OptionChainResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionChainResult {
    pub quote: Option<UnderlyingQuote>,
    #[serde(default)]
    pub options: Vec<OptionExpiry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderlyingQuote {
    pub regular_market_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionExpiry {
    #[serde(default)]
    pub calls: Vec<OptionContract>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionContract {
    pub strike: f64,
    /// Fractional implied volatility (0.25 = 25%)
    pub implied_volatility: Option<f64>,
}

/// Chart response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartResponse {
    pub chart: Chart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chart {
    pub result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResult {
    pub indicators: ChartIndicators,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartIndicators {
    #[serde(default)]
    pub quote: Vec<ChartQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartQuote {
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

/// At-the-money quote extracted from an option chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmQuote {
    pub underlying: Decimal,
    pub strike: Decimal,
    /// Implied volatility in percent
    pub iv: Decimal,
}

/// Yahoo-style REST client.
#[derive(Debug, Clone)]
pub struct YahooClient {
    http: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the option chain and pick the call nearest the money.
    #[instrument(skip(self), name = "yahoo_atm_quote")]
    pub async fn atm_quote(&self, symbol: &str) -> Result<AtmQuote, SourceError> {
        let url = format!(
            "{}/v7/finance/options/{}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::http(ADAPTER, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::unavailable(ADAPTER, format!("HTTP {status}")));
        }

        let body: OptionsResponse = response
            .json()
            .await
            .map_err(|e| SourceError::parse(ADAPTER, e.to_string()))?;

        pick_atm(&body)
    }

    /// Daily closes for `symbol`, oldest first, skipping null candles.
    #[instrument(skip(self), name = "yahoo_daily_closes")]
    pub async fn daily_closes(&self, symbol: &str) -> Result<Vec<Decimal>, SourceError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=3mo&interval=1d",
            self.base_url,
            urlencoding::encode(symbol)
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::http("yahoo-chart", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::unavailable("yahoo-chart", format!("HTTP {status}")));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| SourceError::parse("yahoo-chart", e.to_string()))?;

        let closes: Vec<Decimal> = body
            .chart
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|r| r.indicators.quote.into_iter().next())
            .map(|q| q.close.into_iter().flatten().filter_map(from_f64).collect())
            .unwrap_or_default();

        debug!(symbol, candles = closes.len(), "Fetched chart closes");
        Ok(closes)
    }
}

/// Select the call closest to the underlying price that carries a real IV.
pub fn pick_atm(body: &OptionsResponse) -> Result<AtmQuote, SourceError> {
    let result = body
        .option_chain
        .result
        .first()
        .ok_or_else(|| SourceError::unavailable(ADAPTER, "empty option chain"))?;

    let underlying = result
        .quote
        .as_ref()
        .and_then(|q| q.regular_market_price)
        .and_then(from_f64)
        .filter(|p| *p > Decimal::ZERO)
        .ok_or_else(|| SourceError::unavailable(ADAPTER, "no underlying price"))?;

    let nearest = result
        .options
        .iter()
        .flat_map(|expiry| expiry.calls.iter())
        .filter_map(|c| Some((from_f64(c.strike)?, from_f64(c.implied_volatility?)?)))
        .min_by_key(|(strike, _)| (*strike - underlying).abs())
        .ok_or_else(|| SourceError::unavailable(ADAPTER, "no call contracts"))?;

    let (strike, iv_fraction) = nearest;
    // Yahoo reports ~0 for contracts it could not solve; that is not a genuine IV
    if iv_fraction <= Decimal::new(1, 4) {
        return Err(SourceError::unavailable(
            ADAPTER,
            format!("ATM strike {strike} has no implied volatility"),
        ));
    }

    Ok(AtmQuote {
        underlying,
        strike,
        iv: fraction_to_percent(iv_fraction),
    })
}

/// Third-party API tier of the volatility chain.
pub struct YahooOptionsSource {
    client: YahooClient,
}

impl YahooOptionsSource {
    pub fn new(client: YahooClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VolatilitySource for YahooOptionsSource {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    async fn fetch(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<IvSnapshot, SourceError> {
        let symbol = instrument
            .leg(side)
            .options_symbol
            .as_deref()
            .ok_or_else(|| SourceError::unavailable(ADAPTER, "no options symbol configured"))?;

        let quote = self.client.atm_quote(symbol).await?;
        debug!(
            instrument = %instrument.id,
            %side,
            strike = %quote.strike,
            iv = %quote.iv,
            "ATM implied volatility from options API"
        );

        Ok(
            IvSnapshot::new(&instrument.id, side, quote.iv, IvQuality::Web, ADAPTER)
                .with_underlying(Some(quote.underlying)),
        )
    }
}
