//! Volatility acquisition.
//!
//! ## Sources (in fallback order)
//! - `barchart`: options-chain page scrape, quality `WEB`
//! - `yahoo`: options API, quality `WEB`
//! - `sina_options`: domestic option board priced through Black-76, quality `WEB`
//! - `history`: historical volatility from underlying closes, quality `HISTORICAL_VOL`
//!
//! ## Price history
//! - Domestic legs: Sina daily K-lines
//! - Foreign legs: Yahoo daily chart

mod acquirer;
pub mod barchart;
pub mod history;
pub mod pricing;
pub mod sina;
pub mod sina_options;
mod traits;
mod types;
pub mod yahoo;

pub use acquirer::DataAcquirer;
pub use barchart::ChainPageSource;
pub use history::{historical_volatility, HistoricalVolatilitySource, MarketHistory};
pub use sina::SinaClient;
pub use sina_options::SinaOptionSource;
pub use traits::{PriceHistoryProvider, VolatilitySource};
pub use types::*;
pub use yahoo::{YahooClient, YahooOptionsSource};

use crate::config::SourcesConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Shared HTTP client for every data source.
pub fn build_http_client(config: &SourcesConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .context("Failed to create HTTP client")
}

/// Default fallback chain: chain page, options API, option board, historical volatility.
pub fn default_sources(config: &SourcesConfig, http: &Client) -> Result<Vec<Box<dyn VolatilitySource>>> {
    let yahoo = YahooClient::new(http.clone(), &config.yahoo_base_url);
    let sina = SinaClient::new(http.clone(), &config.sina_base_url);
    let history: Arc<dyn PriceHistoryProvider> = Arc::new(MarketHistory::new(sina, yahoo.clone()));

    let chain_page = ChainPageSource::new(http.clone(), history.clone())
        .context("Failed to compile chain page patterns")?;

    Ok(vec![
        Box::new(chain_page),
        Box::new(YahooOptionsSource::new(yahoo)),
        Box::new(SinaOptionSource::new(
            http.clone(),
            &config.sina_options_base_url,
            config.risk_free_rate,
        )),
        Box::new(HistoricalVolatilitySource::new(history, config.hv_window)),
    ])
}
