//! Instrument catalogue.
//!
//! Each [`InstrumentSpec`] pairs a domestic option listing (SHFE/INE) with its
//! foreign counterpart (CME) and carries the spread thresholds used for
//! signalling. Specs are validated once at load and never mutated afterwards.

use crate::error::ConfigError;
use crate::market::Side;
use crate::strategy::conversion_factor;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// One side of an instrument pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketLeg {
    /// Exchange code (e.g., "SHFE", "CME")
    pub exchange: String,
    /// Root contract symbol (e.g., "CU", "HG")
    pub symbol: String,
    /// Quote unit for display (e.g., "CNY/t", "USD/lb")
    #[serde(default)]
    pub unit: String,
    /// Symbol used by the daily price history provider (e.g., "CU0", "HG=F")
    #[serde(default)]
    pub history_symbol: Option<String>,
    /// Symbol used by the options API (e.g., "HG=F")
    #[serde(default)]
    pub options_symbol: Option<String>,
    /// Options-chain page template; `{contract}` is replaced by the contract code
    #[serde(default)]
    pub chain_url: Option<String>,
    /// Commodity-option product on the domestic option board (e.g., "cu")
    #[serde(default)]
    pub option_product: Option<String>,
    /// Contract multiplier, in `base_unit` per lot
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    /// Physical unit of one lot: t, kg, g, lb, oz or bbl
    #[serde(default)]
    pub base_unit: String,
    /// Quote price to strike-code factor (100 when strikes are listed in cents)
    #[serde(default = "default_strike_factor")]
    pub strike_scale: Decimal,
    /// Listed strike increment, in strike-code units
    #[serde(default = "default_strike_factor")]
    pub strike_step: Decimal,
}

fn default_lot_size() -> Decimal {
    Decimal::ONE
}

fn default_strike_factor() -> Decimal {
    Decimal::ONE
}

impl MarketLeg {
    fn contract(mut self, lot_size: Decimal, base_unit: &str) -> Self {
        self.lot_size = lot_size;
        self.base_unit = base_unit.to_string();
        self
    }

    fn strikes(mut self, scale: Decimal, step: Decimal) -> Self {
        self.strike_scale = scale;
        self.strike_step = step;
        self
    }
}

/// Spread thresholds, in IV percentage points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// |diff| at or above this opens a position
    pub open: Decimal,
    /// |diff| at or below this closes on convergence
    pub close: Decimal,
    /// |diff| at or above this closes on stop-loss
    pub stop_loss: Decimal,
    /// |diff| below this is treated as noise
    pub min_diff: Decimal,
}

impl Thresholds {
    pub fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        if self.open <= Decimal::ZERO {
            return Err(ConfigError::invalid(scope, "open threshold must be positive"));
        }
        if self.close < Decimal::ZERO || self.close >= self.open {
            return Err(ConfigError::invalid(
                scope,
                format!(
                    "close threshold {} must be within [0, open {})",
                    self.close, self.open
                ),
            ));
        }
        if self.stop_loss <= self.open {
            return Err(ConfigError::invalid(
                scope,
                format!(
                    "stop_loss threshold {} must exceed open threshold {}",
                    self.stop_loss, self.open
                ),
            ));
        }
        if self.min_diff < Decimal::ZERO || self.min_diff > self.open {
            return Err(ConfigError::invalid(
                scope,
                format!(
                    "min_diff {} must be within [0, open {}]",
                    self.min_diff, self.open
                ),
            ));
        }
        Ok(())
    }
}

/// Immutable description of a monitored instrument pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentSpec {
    /// Stable key, also the position-store key (e.g., "copper")
    pub id: String,
    /// Display name
    pub name: String,
    /// English display name
    #[serde(default)]
    pub name_en: String,
    pub domestic: MarketLeg,
    pub foreign: MarketLeg,
    pub thresholds: Thresholds,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Known option expiry dates, used for expiry-proximity closes
    #[serde(default)]
    pub expiry_dates: Vec<NaiveDate>,
}

fn default_enabled() -> bool {
    true
}

impl InstrumentSpec {
    pub fn leg(&self, side: Side) -> &MarketLeg {
        match side {
            Side::Domestic => &self.domestic,
            Side::Foreign => &self.foreign,
        }
    }

    /// Validate the instrument, rejecting anything that would only fail mid-cycle.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("instrument", "id must not be empty"));
        }
        for (side, leg) in [(Side::Domestic, &self.domestic), (Side::Foreign, &self.foreign)] {
            if leg.exchange.trim().is_empty() || leg.symbol.trim().is_empty() {
                return Err(ConfigError::invalid(
                    &self.id,
                    format!("{side} leg needs an exchange and a symbol"),
                ));
            }
            if leg.lot_size <= Decimal::ZERO
                || leg.strike_scale <= Decimal::ZERO
                || leg.strike_step <= Decimal::ZERO
            {
                return Err(ConfigError::invalid(
                    &self.id,
                    format!("{side} lot_size, strike_scale and strike_step must be positive"),
                ));
            }
            if let Some(url) = &leg.chain_url {
                if !url.contains("{contract}") {
                    return Err(ConfigError::invalid(
                        &self.id,
                        format!("{side} chain_url must contain a {{contract}} placeholder"),
                    ));
                }
            }
        }
        let (from, to) = (&self.domestic.base_unit, &self.foreign.base_unit);
        if !from.is_empty() && !to.is_empty() && conversion_factor(from, to).is_none() {
            return Err(ConfigError::invalid(
                &self.id,
                format!("no unit conversion from {from} to {to}"),
            ));
        }
        self.thresholds.validate(&self.id)
    }

    /// Expiry date to record for a position opened on `opened_on`.
    ///
    /// Uses the first configured expiry after the open date; without
    /// configured dates, estimates the 20th of the second-next month.
    pub fn expiry_after(&self, opened_on: NaiveDate) -> NaiveDate {
        let mut configured: Vec<NaiveDate> = self
            .expiry_dates
            .iter()
            .copied()
            .filter(|d| *d > opened_on)
            .collect();
        configured.sort();

        configured.first().copied().unwrap_or_else(|| {
            let (year, month) = contract_month(opened_on);
            NaiveDate::from_ymd_opt(year, month, 20).unwrap_or(opened_on)
        })
    }
}

/// Month of the second-next contract, the one the strategy trades.
pub fn contract_month(today: NaiveDate) -> (i32, u32) {
    let mut month = today.month() + 2;
    let mut year = today.year();
    if month > 12 {
        month -= 12;
        year += 1;
    }
    (year, month)
}

const CME_MONTH_CODES: [char; 12] = ['F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z'];

/// Contract code for a leg: CME style (`HGH26`) abroad, `cu2603` at home.
pub fn contract_code(leg: &MarketLeg, side: Side, today: NaiveDate) -> String {
    let (year, month) = contract_month(today);
    let yy = year % 100;
    match side {
        Side::Foreign => format!(
            "{}{}{:02}",
            leg.symbol.to_uppercase(),
            CME_MONTH_CODES[(month - 1) as usize],
            yy
        ),
        Side::Domestic => format!("{}{:02}{:02}", leg.symbol.to_lowercase(), yy, month),
    }
}

/// Read-only, ordered catalogue of instruments.
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    instruments: Vec<InstrumentSpec>,
}

impl InstrumentRegistry {
    /// Build a registry, validating every spec and rejecting duplicate ids.
    pub fn new(instruments: Vec<InstrumentSpec>) -> Result<Self, ConfigError> {
        for (i, spec) in instruments.iter().enumerate() {
            spec.validate()?;
            if instruments[..i].iter().any(|other| other.id == spec.id) {
                return Err(ConfigError::Duplicate(spec.id.clone()));
            }
        }
        Ok(Self { instruments })
    }

    pub fn get(&self, id: &str) -> Option<&InstrumentSpec> {
        self.instruments.iter().find(|spec| spec.id == id)
    }

    /// Look up an instrument, treating an unknown id as a configuration fault.
    pub fn require(&self, id: &str) -> Result<&InstrumentSpec, ConfigError> {
        self.get(id)
            .ok_or_else(|| ConfigError::UnknownInstrument(id.to_string()))
    }

    /// Enabled instruments in registry order.
    pub fn enabled(&self) -> impl Iterator<Item = &InstrumentSpec> {
        self.instruments.iter().filter(|spec| spec.enabled)
    }

    pub fn all(&self) -> &[InstrumentSpec] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

const BARCHART_CHAIN_URL: &str = "https://www.barchart.com/futures/quotes/{contract}/options";

fn cme_leg(symbol: &str, unit: &str) -> MarketLeg {
    let yahoo = format!("{symbol}=F");
    MarketLeg {
        exchange: "CME".to_string(),
        symbol: symbol.to_string(),
        unit: unit.to_string(),
        history_symbol: Some(yahoo.clone()),
        options_symbol: Some(yahoo),
        chain_url: Some(BARCHART_CHAIN_URL.to_string()),
        option_product: None,
        lot_size: Decimal::ONE,
        base_unit: String::new(),
        strike_scale: Decimal::ONE,
        strike_step: Decimal::ONE,
    }
}

fn domestic_leg(exchange: &str, symbol: &str, unit: &str) -> MarketLeg {
    MarketLeg {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        unit: unit.to_string(),
        history_symbol: Some(format!("{symbol}0")),
        options_symbol: None,
        chain_url: None,
        option_product: Some(symbol.to_lowercase()),
        lot_size: Decimal::ONE,
        base_unit: String::new(),
        strike_scale: Decimal::ONE,
        strike_step: Decimal::ONE,
    }
}

fn spec(
    id: &str,
    name: &str,
    name_en: &str,
    domestic: MarketLeg,
    foreign: MarketLeg,
    thresholds: Thresholds,
) -> InstrumentSpec {
    InstrumentSpec {
        id: id.to_string(),
        name: name.to_string(),
        name_en: name_en.to_string(),
        domestic,
        foreign,
        thresholds,
        enabled: true,
        expiry_dates: Vec::new(),
    }
}

/// Built-in catalogue used when the config file defines no instruments.
pub fn default_instruments() -> Vec<InstrumentSpec> {
    let standard = Thresholds {
        open: dec!(8.0),
        close: dec!(5.0),
        stop_loss: dec!(18.0),
        min_diff: dec!(3.0),
    };
    let gold = Thresholds {
        open: dec!(6.0),
        close: dec!(4.0),
        stop_loss: dec!(15.0),
        min_diff: dec!(2.0),
    };

    vec![
        spec(
            "copper",
            "铜",
            "Copper",
            domestic_leg("SHFE", "CU", "CNY/t")
                .contract(dec!(5), "t")
                .strikes(Decimal::ONE, dec!(1000)),
            cme_leg("HG", "USD/lb")
                .contract(dec!(25000), "lb")
                .strikes(dec!(100), Decimal::ONE),
            standard,
        ),
        spec(
            "gold",
            "黄金",
            "Gold",
            domestic_leg("SHFE", "AU", "CNY/g")
                .contract(dec!(1000), "g")
                .strikes(Decimal::ONE, dec!(10)),
            cme_leg("GC", "USD/oz")
                .contract(dec!(100), "oz")
                .strikes(Decimal::ONE, dec!(10)),
            gold,
        ),
        spec(
            "silver",
            "白银",
            "Silver",
            domestic_leg("SHFE", "AG", "CNY/kg")
                .contract(dec!(15), "kg")
                .strikes(Decimal::ONE, dec!(100)),
            cme_leg("SI", "USD/oz")
                .contract(dec!(5000), "oz")
                .strikes(dec!(100), dec!(50)),
            standard,
        ),
        spec(
            "crude_oil",
            "原油",
            "Crude Oil",
            domestic_leg("INE", "SC", "CNY/bbl")
                .contract(dec!(1000), "bbl")
                .strikes(Decimal::ONE, dec!(10)),
            cme_leg("CL", "USD/bbl")
                .contract(dec!(1000), "bbl")
                .strikes(Decimal::ONE, Decimal::ONE),
            standard,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_catalogue_is_valid() {
        let registry = InstrumentRegistry::new(default_instruments()).unwrap();
        assert_eq!(registry.len(), 4);
        let ids: Vec<&str> = registry.enabled().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["copper", "gold", "silver", "crude_oil"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut instruments = default_instruments();
        instruments.push(instruments[0].clone());
        let err = InstrumentRegistry::new(instruments).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(id) if id == "copper"));
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let mut instruments = default_instruments();
        instruments[1].thresholds.close = dec!(7.0); // above gold's open of 6
        assert!(InstrumentRegistry::new(instruments).is_err());

        let mut instruments = default_instruments();
        instruments[0].thresholds.stop_loss = dec!(8.0);
        assert!(InstrumentRegistry::new(instruments).is_err());

        let mut instruments = default_instruments();
        instruments[0].thresholds.min_diff = dec!(9.0);
        assert!(InstrumentRegistry::new(instruments).is_err());
    }

    #[test]
    fn test_chain_url_needs_placeholder() {
        let mut instruments = default_instruments();
        instruments[0].foreign.chain_url = Some("https://example.com/options".to_string());
        assert!(InstrumentRegistry::new(instruments).is_err());
    }

    #[test]
    fn test_unknown_instrument_is_config_error() {
        let registry = InstrumentRegistry::new(default_instruments()).unwrap();
        assert!(registry.require("gold").is_ok());
        assert!(matches!(
            registry.require("platinum"),
            Err(ConfigError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_disabled_instruments_skipped() {
        let mut instruments = default_instruments();
        instruments[1].enabled = false;
        let registry = InstrumentRegistry::new(instruments).unwrap();
        let ids: Vec<&str> = registry.enabled().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["copper", "silver", "crude_oil"]);
    }

    #[test]
    fn test_domestic_legs_read_the_option_board() {
        let instruments = default_instruments();
        assert_eq!(instruments[0].domestic.option_product.as_deref(), Some("cu"));
        assert_eq!(instruments[3].domestic.option_product.as_deref(), Some("sc"));
        assert!(instruments.iter().all(|s| s.foreign.option_product.is_none()));
    }

    #[test]
    fn test_contract_sizes_must_be_positive() {
        let mut instruments = default_instruments();
        instruments[0].foreign.lot_size = Decimal::ZERO;
        assert!(InstrumentRegistry::new(instruments).is_err());

        let mut instruments = default_instruments();
        instruments[2].domestic.strike_step = dec!(-100);
        assert!(InstrumentRegistry::new(instruments).is_err());
    }

    #[test]
    fn test_unconvertible_units_rejected() {
        let mut instruments = default_instruments();
        instruments[0].foreign.base_unit = "bbl".to_string();
        let err = InstrumentRegistry::new(instruments).unwrap_err();
        assert!(err.to_string().contains("no unit conversion from t to bbl"));

        // Legs without base units skip sizing rather than fail
        let mut instruments = default_instruments();
        instruments[0].foreign.base_unit.clear();
        assert!(InstrumentRegistry::new(instruments).is_ok());
    }

    #[test]
    fn test_contract_codes() {
        let instruments = default_instruments();
        let copper = &instruments[0];

        assert_eq!(
            contract_code(&copper.foreign, Side::Foreign, date(2026, 1, 15)),
            "HGH26"
        );
        assert_eq!(
            contract_code(&copper.domestic, Side::Domestic, date(2026, 1, 15)),
            "cu2603"
        );
        // Year rollover
        assert_eq!(
            contract_code(&copper.foreign, Side::Foreign, date(2026, 11, 2)),
            "HGF27"
        );
    }

    #[test]
    fn test_expiry_prefers_configured_dates() {
        let mut copper = default_instruments().remove(0);
        copper.expiry_dates = vec![date(2026, 12, 24), date(2026, 11, 24), date(2026, 10, 1)];

        assert_eq!(copper.expiry_after(date(2026, 10, 16)), date(2026, 11, 24));
    }

    #[test]
    fn test_expiry_estimate_without_calendar() {
        let copper = default_instruments().remove(0);
        assert_eq!(copper.expiry_after(date(2026, 10, 16)), date(2026, 12, 20));
        assert_eq!(copper.expiry_after(date(2026, 12, 1)), date(2027, 2, 20));
    }
}
