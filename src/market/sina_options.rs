//! Sina-style commodity option board for domestic (SHFE/INE) legs.
//!
//! `OptionService.getOptionData` returns the whole board for one contract
//! month as two row lists, calls under `up` and puts under `down`, paired by
//! index:
//! - up: `[bid_vol, bid, last, ask, ask_vol, open_interest, change, strike, code]`
//! - down: `[bid_vol, bid, last, ask, ask_vol, open_interest, change, code]`
//!
//! The board carries prices only. The forward is implied from put-call
//! parity at the strike where call and put are closest, and the ATM
//! straddle is inverted through Black-76.

use crate::config::{contract_code, InstrumentSpec};
use crate::error::SourceError;
use crate::market::pricing::implied_volatility;
use crate::market::sina::cell_decimal;
use crate::market::traits::VolatilitySource;
use crate::market::types::{IvQuality, IvSnapshot, Side};
use crate::utils::decimal::{fraction_to_percent, from_f64, to_f64};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument};

const ADAPTER: &str = "sina-options";

const BID: usize = 1;
const LAST: usize = 2;
const ASK: usize = 3;
const STRIKE: usize = 7;

/// One strike of the board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardRow {
    pub strike: Decimal,
    pub call: Option<Decimal>,
    pub put: Option<Decimal>,
}

/// ATM implied volatility recovered from option prices.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmEstimate {
    pub strike: Decimal,
    /// Parity-implied futures price of the option month
    pub forward: Decimal,
    /// Percent
    pub iv: Decimal,
}

/// Parse an option board payload into strike rows.
pub fn parse_board(text: &str) -> Result<Vec<BoardRow>, SourceError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| SourceError::parse(ADAPTER, e.to_string()))?;

    let data = value
        .pointer("/result/data")
        .ok_or_else(|| SourceError::parse(ADAPTER, "missing result.data"))?;
    let rows = |key: &str| -> Vec<Value> {
        data.get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let (calls, puts) = (rows("up"), rows("down"));

    Ok(calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| {
            let call = call.as_array()?;
            let strike = call.get(STRIKE).and_then(cell_decimal)?;
            let put = puts.get(i).and_then(Value::as_array);
            Some(BoardRow {
                strike,
                call: quote_price(call),
                put: put.and_then(|p| quote_price(p)),
            })
        })
        .filter(|row| row.strike > Decimal::ZERO)
        .collect())
}

/// Last trade, else the bid/ask midpoint.
fn quote_price(row: &[Value]) -> Option<Decimal> {
    let cell = |i: usize| {
        row.get(i)
            .and_then(cell_decimal)
            .filter(|v| *v > Decimal::ZERO)
    };
    cell(LAST).or_else(|| {
        let (bid, ask) = (cell(BID)?, cell(ASK)?);
        Some((bid + ask) / Decimal::TWO)
    })
}

/// ATM implied volatility from a board.
///
/// # Arguments
/// * `rows` - Board rows for one contract month
/// * `years` - Time to option expiry
/// * `rate` - Discount rate
///
/// Averages the call and put IVs at the strike nearest the forward;
/// either one alone is enough.
pub fn atm_estimate(rows: &[BoardRow], years: f64, rate: f64) -> Option<AtmEstimate> {
    let anchor = rows
        .iter()
        .filter_map(|r| Some((r.strike, r.call?, r.put?)))
        .min_by_key(|(_, call, put)| (*call - *put).abs())?;
    let (strike, call, put) = anchor;
    let forward = to_f64(strike) + to_f64(call - put) * (rate * years).exp();
    if !(forward.is_finite() && forward > 0.0) {
        return None;
    }

    let atm = rows
        .iter()
        .filter(|r| r.call.is_some() || r.put.is_some())
        .min_by(|a, b| {
            let da = (to_f64(a.strike) - forward).abs();
            let db = (to_f64(b.strike) - forward).abs();
            da.total_cmp(&db)
        })?;

    let k = to_f64(atm.strike);
    let ivs: Vec<f64> = [(atm.call, true), (atm.put, false)]
        .into_iter()
        .filter_map(|(price, is_call)| {
            implied_volatility(to_f64(price?), forward, k, years, rate, is_call)
        })
        .collect();
    if ivs.is_empty() {
        return None;
    }
    let mean = ivs.iter().sum::<f64>() / ivs.len() as f64;

    Some(AtmEstimate {
        strike: atm.strike,
        forward: from_f64(forward)?.round_dp(2),
        iv: fraction_to_percent(from_f64(mean)?),
    })
}

/// Domestic option-board adapter.
#[derive(Debug, Clone)]
pub struct SinaOptionSource {
    http: Client,
    base_url: String,
    rate: f64,
}

impl SinaOptionSource {
    pub fn new(http: Client, base_url: &str, rate: f64) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate,
        }
    }

    #[instrument(skip(self), name = "sina_option_board")]
    async fn fetch_board(
        &self,
        product: &str,
        exchange: &str,
        contract: &str,
    ) -> Result<Vec<BoardRow>, SourceError> {
        let url = format!(
            "{}/futures/api/openapi.php/OptionService.getOptionData?type=futures&product={}&exchange={}&pinzhong={}",
            self.base_url,
            urlencoding::encode(product),
            urlencoding::encode(exchange),
            urlencoding::encode(contract)
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
        parse_board(&text)
    }
}

/// Years from `today` to `expiry`, on a 365-day basis.
fn years_between(today: NaiveDate, expiry: NaiveDate) -> f64 {
    (expiry - today).num_days() as f64 / 365.0
}

#[async_trait]
impl VolatilitySource for SinaOptionSource {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    async fn fetch(
        &self,
        instrument: &InstrumentSpec,
        side: Side,
    ) -> Result<IvSnapshot, SourceError> {
        let leg = instrument.leg(side);
        let product = leg
            .option_product
            .as_deref()
            .ok_or_else(|| SourceError::unavailable(ADAPTER, "no option product configured"))?;

        let today = Utc::now().date_naive();
        let contract = contract_code(leg, side, today);
        let years = years_between(today, instrument.expiry_after(today));
        if years <= 0.0 {
            return Err(SourceError::unavailable(ADAPTER, format!("{contract} has expired")));
        }

        let rows = self
            .fetch_board(product, &leg.exchange.to_lowercase(), &contract)
            .await?;
        let estimate = atm_estimate(&rows, years, self.rate).ok_or_else(|| {
            SourceError::unavailable(
                ADAPTER,
                format!("no priced ATM option for {contract} ({} strikes)", rows.len()),
            )
        })?;

        debug!(
            instrument = %instrument.id,
            %side,
            contract = %contract,
            strike = %estimate.strike,
            forward = %estimate.forward,
            iv = %estimate.iv,
            "ATM implied volatility from option board"
        );

        Ok(
            IvSnapshot::new(&instrument.id, side, estimate.iv, IvQuality::Web, ADAPTER)
                .with_underlying(Some(estimate.forward)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_instruments;
    use crate::market::pricing::black76_price;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Board priced at `vol`, rounded to whole yuan like the exchange tick.
    fn board(forward: f64, vol: f64, years: f64, rate: f64) -> Value {
        let mut up = Vec::new();
        let mut down = Vec::new();
        for strike in [76_000.0, 77_000.0, 78_000.0, 79_000.0, 80_000.0] {
            let call = black76_price(forward, strike, years, rate, vol, true).round();
            let put = black76_price(forward, strike, years, rate, vol, false).round();
            up.push(json!([
                "3", format!("{}", call - 10.0), format!("{call}"), format!("{}", call + 10.0),
                "2", "120", "15", format!("{strike}"), format!("cu2612C{strike}")
            ]));
            down.push(json!([
                "1", format!("{}", put - 10.0), format!("{put}"), format!("{}", put + 10.0),
                "4", "98", "-12", format!("cu2612P{strike}")
            ]));
        }
        json!({ "result": { "status": { "code": 0 }, "data": { "up": up, "down": down } } })
    }

    #[test]
    fn test_parse_board_pairs_calls_and_puts() {
        let text = r#"{"result":{"data":{
            "up":[["1","2300","2320","2340","2","10","5","78000","cu2612C78000"],
                  ["1","0","0","0","0","0","0","79000","cu2612C79000"],
                  ["1","1500","","1520","2","10","5","80000","cu2612C80000"]],
            "down":[["1","1900","1910","1930","2","10","-5","cu2612P78000"]]
        }}}"#;
        let rows = parse_board(text).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].call, Some(dec!(2320)));
        assert_eq!(rows[0].put, Some(dec!(1910)));
        // No trade and no quotes
        assert_eq!(rows[1].call, None);
        assert_eq!(rows[1].put, None);
        // No last price, midpoint instead
        assert_eq!(rows[2].call, Some(dec!(1510)));
    }

    #[test]
    fn test_parse_board_rejects_other_payloads() {
        assert!(matches!(parse_board("<html>"), Err(SourceError::Parse { .. })));
        assert!(parse_board(r#"{"result":{"status":{"code":1}}}"#).is_err());
        let empty = parse_board(r#"{"result":{"data":{"up":[],"down":[]}}}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_atm_estimate_recovers_vol_off_grid() {
        let (years, rate) = (55.0 / 365.0, 0.02);
        let text = board(78_350.0, 0.2075, years, rate).to_string();
        let rows = parse_board(&text).unwrap();

        let estimate = atm_estimate(&rows, years, rate).unwrap();
        assert_eq!(estimate.strike, dec!(78000));
        assert!((estimate.forward - dec!(78350)).abs() < dec!(5), "{}", estimate.forward);
        assert!((estimate.iv - dec!(20.75)).abs() < dec!(0.05), "{}", estimate.iv);
    }

    #[test]
    fn test_atm_estimate_needs_a_priced_pair() {
        let rows = vec![BoardRow {
            strike: dec!(78000),
            call: Some(dec!(2300)),
            put: None,
        }];
        assert!(atm_estimate(&rows, 0.15, 0.02).is_none());
        assert!(atm_estimate(&[], 0.15, 0.02).is_none());
    }

    #[tokio::test]
    async fn test_source_fetches_domestic_board() {
        let copper = default_instruments().remove(0);
        let today = Utc::now().date_naive();
        let years = years_between(today, copper.expiry_after(today));
        let rate = 0.02;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/futures/api/openapi.php/OptionService.getOptionData"))
            .and(query_param("type", "futures"))
            .and(query_param("product", "cu"))
            .and(query_param("exchange", "shfe"))
            .and(query_param(
                "pinzhong",
                contract_code(&copper.domestic, Side::Domestic, today).as_str(),
            ))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(board(78_000.0, 0.22, years, rate)),
            )
            .mount(&server)
            .await;

        let source = SinaOptionSource::new(Client::new(), &server.uri(), rate);
        let snapshot = source.fetch(&copper, Side::Domestic).await.unwrap();

        assert_eq!(snapshot.source, "sina-options");
        assert_eq!(snapshot.quality, IvQuality::Web);
        assert_eq!(snapshot.underlying_price, Some(dec!(78000)));
        let iv = snapshot.value.unwrap();
        assert!((iv - dec!(22)).abs() < dec!(0.05), "{iv}");
    }

    #[tokio::test]
    async fn test_foreign_leg_is_unavailable() {
        let source = SinaOptionSource::new(Client::new(), "http://127.0.0.1:9", 0.02);
        let copper = default_instruments().remove(0);

        let err = source.fetch(&copper, Side::Foreign).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_unpriced_board_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "data": { "up": [], "down": [] } }
            })))
            .mount(&server)
            .await;

        let source = SinaOptionSource::new(Client::new(), &server.uri(), 0.02);
        let copper = default_instruments().remove(0);
        let err = source.fetch(&copper, Side::Domestic).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }
}
