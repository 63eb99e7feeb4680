//! Sina-style daily K-line client for domestic continuous futures (`CU0`).
//!
//! The endpoint answers with an array of rows:
//! `[date, open, high, low, close, volume]`, values as strings or numbers.

use crate::error::SourceError;
use crate::utils::decimal::{from_f64, parse_loose};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument};

const ADAPTER: &str = "sina-kline";
const CLOSE_INDEX: usize = 4;

#[derive(Debug, Clone)]
pub struct SinaClient {
    http: Client,
    base_url: String,
}

impl SinaClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Daily closes, oldest first.
    #[instrument(skip(self), name = "sina_daily_closes")]
    pub async fn daily_closes(&self, symbol: &str) -> Result<Vec<Decimal>, SourceError> {
        let url = format!(
            "{}/futures/api/json.php/IndexService.getInnerFuturesDailyKLine?symbol={}",
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

        let text = response
            .text()
            .await
            .map_err(|e| SourceError::http(ADAPTER, e))?;

        let closes = parse_kline(&text)?;
        debug!(symbol, candles = closes.len(), "Fetched K-line closes");
        Ok(closes)
    }
}

/// Extract closing prices from a K-line payload.
pub fn parse_kline(text: &str) -> Result<Vec<Decimal>, SourceError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| SourceError::parse(ADAPTER, e.to_string()))?;

    let rows = match value {
        Value::Array(rows) => rows,
        // Unknown symbols come back as `null`
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(SourceError::parse(
                ADAPTER,
                format!("expected array, got {}", kind_of(&other)),
            ))
        }
    };

    Ok(rows
        .iter()
        .filter_map(|row| row.as_array()?.get(CLOSE_INDEX).and_then(cell_decimal))
        .filter(|close| *close > Decimal::ZERO)
        .collect())
}

pub(crate) fn cell_decimal(cell: &Value) -> Option<Decimal> {
    match cell {
        Value::String(s) => parse_loose(s),
        Value::Number(n) => n.as_f64().and_then(from_f64),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_string_rows() {
        let text = r#"[["2026-10-14","78000","78600","77800","78350","10234"],
                       ["2026-10-15","78350","79000","78100","78820","11020"]]"#;
        assert_eq!(parse_kline(text).unwrap(), vec![dec!(78350), dec!(78820)]);
    }

    #[test]
    fn test_parse_numeric_rows_and_skips_short_rows() {
        let text = r#"[["2026-10-14",1,2,0.5,612.5,100],["bad"],["2026-10-15",1,2,0.5,615.0,90]]"#;
        assert_eq!(parse_kline(text).unwrap(), vec![dec!(612.5), dec!(615.0)]);
    }

    #[test]
    fn test_parse_null_is_empty() {
        assert!(parse_kline("null").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(parse_kline("<html>"), Err(SourceError::Parse { .. })));
        assert!(parse_kline(r#"{"error":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_fetch_closes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/futures/api/json.php/IndexService.getInnerFuturesDailyKLine",
            ))
            .and(query_param("symbol", "AU0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[["2026-10-15","610","616","608","612.34","5"]]"#),
            )
            .mount(&server)
            .await;

        let client = SinaClient::new(Client::new(), &server.uri());
        assert_eq!(client.daily_closes("AU0").await.unwrap(), vec![dec!(612.34)]);
    }
}
