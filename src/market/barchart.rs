//! Options-chain page scraper (Barchart-style), the first and most trusted tier.
//!
//! The page URL comes from the leg's `chain_url` template with `{contract}`
//! replaced by the second-next month contract code. Parsing tries the rendered
//! chain table first and falls back to an `impliedVolatility` fragment embedded
//! in page scripts.

use crate::config::{contract_code, InstrumentSpec};
use crate::error::SourceError;
use crate::market::traits::{PriceHistoryProvider, VolatilitySource};
use crate::market::types::{IvQuality, IvSnapshot, Side};
use crate::utils::decimal::parse_loose;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::Client;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument};

const ADAPTER: &str = "chain-page";

/// IV read from a chain page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainQuote {
    /// IV in percent
    pub iv: Decimal,
    /// Strike of the row used; `None` when taken from an embedded fragment
    pub strike: Option<Decimal>,
}

/// Compiled patterns for chain-page parsing.
#[derive(Debug, Clone)]
pub struct ChainParser {
    table: Regex,
    header_cell: Regex,
    row: Regex,
    data_cell: Regex,
    tag: Regex,
    embedded_iv: Regex,
}

impl ChainParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            table: Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>")?,
            header_cell: Regex::new(r"(?is)<th\b[^>]*>(.*?)</th>")?,
            row: Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>")?,
            data_cell: Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            embedded_iv: Regex::new(r#""impliedVolatility"\s*:\s*"?(\d+(?:\.\d+)?)%?"#)?,
        })
    }

    /// Extract the ATM implied volatility from a chain page.
    ///
    /// With an underlying price, the row whose strike is nearest wins;
    /// without one, the middle strike of the table is used.
    pub fn parse(&self, html: &str, underlying: Option<Decimal>) -> Option<ChainQuote> {
        self.parse_table(html, underlying)
            .or_else(|| self.parse_embedded(html))
    }

    fn parse_table(&self, html: &str, underlying: Option<Decimal>) -> Option<ChainQuote> {
        for table in self.table.captures_iter(html) {
            let body = &table[1];
            let headers: Vec<String> = self
                .header_cell
                .captures_iter(body)
                .map(|c| self.cell_text(&c[1]).to_lowercase())
                .collect();

            let strike_col = headers.iter().position(|h| h.contains("strike"));
            let iv_col = headers
                .iter()
                .position(|h| h == "iv" || h == "iv%" || h.contains("implied"));
            let (Some(strike_col), Some(iv_col)) = (strike_col, iv_col) else {
                continue;
            };

            let mut rows: Vec<(Decimal, Decimal)> = self
                .row
                .captures_iter(body)
                .filter_map(|row| {
                    let cells: Vec<String> = self
                        .data_cell
                        .captures_iter(&row[1])
                        .map(|c| self.cell_text(&c[1]))
                        .collect();
                    let strike = parse_loose(cells.get(strike_col)?)?;
                    let iv = parse_loose(cells.get(iv_col)?)?;
                    (iv > Decimal::ZERO).then_some((strike, iv))
                })
                .collect();

            if rows.is_empty() {
                continue;
            }

            let (strike, iv) = match underlying {
                Some(price) => rows
                    .iter()
                    .copied()
                    .min_by_key(|(strike, _)| (*strike - price).abs())?,
                None => {
                    rows.sort_by_key(|(strike, _)| *strike);
                    rows[rows.len() / 2]
                }
            };
            return Some(ChainQuote {
                iv,
                strike: Some(strike),
            });
        }
        None
    }

    fn parse_embedded(&self, html: &str) -> Option<ChainQuote> {
        self.embedded_iv
            .captures_iter(html)
            .filter_map(|c| c[1].parse::<Decimal>().ok())
            .find(|iv| *iv > Decimal::ZERO)
            .map(|iv| ChainQuote { iv, strike: None })
    }

    fn cell_text(&self, raw: &str) -> String {
        self.tag
            .replace_all(raw, "")
            .replace("&nbsp;", " ")
            .trim()
            .to_string()
    }
}

/// Scrapes the options-chain page for one leg.
pub struct ChainPageSource {
    http: Client,
    parser: ChainParser,
    prices: Arc<dyn PriceHistoryProvider>,
}

impl ChainPageSource {
    pub fn new(
        http: Client,
        prices: Arc<dyn PriceHistoryProvider>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            http,
            parser: ChainParser::new()?,
            prices,
        })
    }

    #[instrument(skip(self), name = "chain_page_get")]
    async fn fetch_page(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .http
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| SourceError::http(ADAPTER, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::unavailable(ADAPTER, format!("HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| SourceError::http(ADAPTER, e))
    }
}

#[async_trait]
impl VolatilitySource for ChainPageSource {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    async fn fetch(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<IvSnapshot, SourceError> {
        let leg = instrument.leg(side);
        let template = leg
            .chain_url
            .as_deref()
            .ok_or_else(|| SourceError::unavailable(ADAPTER, "no chain page configured"))?;

        let contract = contract_code(leg, side, Utc::now().date_naive());
        let url = template.replace("{contract}", &contract);

        // Underlying is only used for ATM selection; the page is still usable without it
        let underlying = self.prices.latest_price(instrument, side).await.ok();

        let html = self.fetch_page(&url).await?;
        let quote = self.parser.parse(&html, underlying).ok_or_else(|| {
            SourceError::unavailable(ADAPTER, format!("no implied volatility on page for {contract}"))
        })?;

        debug!(
            instrument = %instrument.id,
            %side,
            contract = %contract,
            iv = %quote.iv,
            strike = ?quote.strike,
            "Scraped implied volatility"
        );

        Ok(
            IvSnapshot::new(&instrument.id, side, quote.iv, IvQuality::Web, ADAPTER)
                .with_underlying(underlying),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_instruments;
    use crate::market::history::tests::StaticHistory;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHAIN_TABLE: &str = r##"
        <html><body>
        <table class="nav"><tr><th>Menu</th></tr><tr><td>Home</td></tr></table>
        <table class="options">
          <thead><tr><th>Strike</th><th>Last</th><th>IV</th><th>Volume</th></tr></thead>
          <tbody>
            <tr><td>4.500</td><td>0.2650</td><td>31.20%</td><td>12</td></tr>
            <tr><td><a href="#">4.700</a></td><td>0.1520</td><td>32.82%</td><td>40</td></tr>
            <tr><td>4.900</td><td>0.0710</td><td>34.05%</td><td>8</td></tr>
          </tbody>
        </table>
        </body></html>
    "##;

    #[test]
    fn test_parse_table_nearest_strike() {
        let parser = ChainParser::new().unwrap();
        let quote = parser.parse(CHAIN_TABLE, Some(dec!(4.68))).unwrap();
        assert_eq!(quote.iv, dec!(32.82));
        assert_eq!(quote.strike, Some(dec!(4.700)));

        let quote = parser.parse(CHAIN_TABLE, Some(dec!(4.95))).unwrap();
        assert_eq!(quote.iv, dec!(34.05));
    }

    #[test]
    fn test_parse_table_without_underlying_uses_middle_strike() {
        let parser = ChainParser::new().unwrap();
        let quote = parser.parse(CHAIN_TABLE, None).unwrap();
        assert_eq!(quote.strike, Some(dec!(4.700)));
    }

    #[test]
    fn test_parse_implied_header_variant() {
        let html = r#"<table><tr><th>Strike Price</th><th>Implied Volatility</th></tr>
            <tr><td>2,900</td><td>18.4%</td></tr>
            <tr><td>3,000</td><td>17.9%</td></tr></table>"#;
        let parser = ChainParser::new().unwrap();
        let quote = parser.parse(html, Some(dec!(2990))).unwrap();
        assert_eq!(quote.iv, dec!(17.9));
    }

    #[test]
    fn test_parse_embedded_fallback() {
        let html = r#"<script>window.data = {"impliedVolatility": "0", "x": 1,
            "impliedVolatility":"23.45%"};</script>"#;
        let parser = ChainParser::new().unwrap();
        let quote = parser.parse(html, Some(dec!(1))).unwrap();
        assert_eq!(quote.iv, dec!(23.45));
        assert_eq!(quote.strike, None);
    }

    #[test]
    fn test_parse_nothing() {
        let parser = ChainParser::new().unwrap();
        assert!(parser.parse("<html><p>Access denied</p></html>", None).is_none());
    }

    #[tokio::test]
    async fn test_source_scrapes_configured_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/futures/quotes/HG[FGHJKMNQUVXZ]\d{2}/options$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(CHAIN_TABLE))
            .mount(&server)
            .await;

        let mut copper = default_instruments().remove(0);
        copper.foreign.chain_url = Some(format!(
            "{}/futures/quotes/{{contract}}/options",
            server.uri()
        ));

        let source = ChainPageSource::new(
            Client::new(),
            Arc::new(StaticHistory(vec![dec!(4.60), dec!(4.71)])),
        )
        .unwrap();

        let snapshot = source.fetch(&copper, Side::Foreign).await.unwrap();
        assert_eq!(snapshot.value, Some(dec!(32.82)));
        assert_eq!(snapshot.quality, IvQuality::Web);
        assert_eq!(snapshot.underlying_price, Some(dec!(4.71)));
    }

    #[tokio::test]
    async fn test_source_unconfigured_leg() {
        let source = ChainPageSource::new(Client::new(), Arc::new(StaticHistory(vec![]))).unwrap();
        let copper = default_instruments().remove(0);
        assert!(matches!(
            source.fetch(&copper, Side::Domestic).await,
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_source_blocked_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut copper = default_instruments().remove(0);
        copper.foreign.chain_url = Some(format!("{}/{{contract}}", server.uri()));

        let source = ChainPageSource::new(Client::new(), Arc::new(StaticHistory(vec![]))).unwrap();
        assert!(source.fetch(&copper, Side::Foreign).await.is_err());
    }
}
