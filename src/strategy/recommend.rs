//! Concrete option legs for an OPEN signal.
//!
//! Both legs trade an ATM straddle (call + put at the strike nearest the
//! underlying) in the second-next contract month. The side whose IV is
//! cheaper is bought, the richer side sold, and the currency exposure is
//! hedged with CNH futures.

use super::signal::{ArbitrageSignal, Direction};
use super::sizing::{minimal_lots, LotSizing};
use crate::config::{contract_code, InstrumentSpec, MarketLeg};
use crate::market::Side;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegAction {
    Buy,
    Sell,
}

impl fmt::Display for LegAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegAction::Buy => write!(f, "BUY"),
            LegAction::Sell => write!(f, "SELL"),
        }
    }
}

/// One market's straddle.
#[derive(Debug, Clone, PartialEq)]
pub struct StraddleLeg {
    pub exchange: String,
    pub action: LegAction,
    /// Strike in contract-code units (cents for HG and SI)
    pub strike: Decimal,
    pub call: String,
    pub put: String,
    pub lots: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecommendation {
    pub domestic: StraddleLeg,
    pub foreign: StraddleLeg,
    /// Side of the CNH futures hedge
    pub fx_hedge: LegAction,
    pub sizing: Option<LotSizing>,
}

impl TradeRecommendation {
    /// Legs for opening `direction` at the given underlying prices.
    pub fn build(
        spec: &InstrumentSpec,
        direction: Direction,
        domestic_price: Decimal,
        foreign_price: Decimal,
        today: NaiveDate,
    ) -> Self {
        let (domestic_action, foreign_action) = match direction {
            Direction::BuyDomesticSellForeign => (LegAction::Buy, LegAction::Sell),
            Direction::SellDomesticBuyForeign => (LegAction::Sell, LegAction::Buy),
        };
        let sizing = minimal_lots(spec);

        Self {
            domestic: straddle(
                &spec.domestic,
                Side::Domestic,
                domestic_action,
                domestic_price,
                sizing.map(|s| s.domestic_lots),
                today,
            ),
            foreign: straddle(
                &spec.foreign,
                Side::Foreign,
                foreign_action,
                foreign_price,
                sizing.map(|s| s.foreign_lots),
                today,
            ),
            // Buying CNY-priced options leaves a CNY exposure to cover
            fx_hedge: domestic_action,
            sizing,
        }
    }

    /// Legs for an OPEN signal; `None` for closes or when a price is missing.
    pub fn for_signal(
        spec: &InstrumentSpec,
        signal: &ArbitrageSignal,
        domestic_price: Option<Decimal>,
        foreign_price: Option<Decimal>,
    ) -> Option<Self> {
        if !signal.is_open() {
            return None;
        }
        let (domestic_price, foreign_price) = domestic_price.zip(foreign_price)?;
        Some(Self::build(
            spec,
            signal.direction,
            domestic_price,
            foreign_price,
            signal.timestamp.date_naive(),
        ))
    }
}

/// Listed strike nearest `price`, in contract-code units.
pub fn atm_strike(leg: &MarketLeg, price: Decimal) -> Decimal {
    let steps = (price * leg.strike_scale / leg.strike_step).round();
    (steps * leg.strike_step).normalize()
}

/// Call and put codes, e.g. `CU2612C78000` / `HGZ26P471`.
pub fn option_codes(leg: &MarketLeg, side: Side, strike: Decimal, today: NaiveDate) -> (String, String) {
    let base = contract_code(leg, side, today).to_uppercase();
    (format!("{base}C{strike}"), format!("{base}P{strike}"))
}

fn straddle(
    leg: &MarketLeg,
    side: Side,
    action: LegAction,
    price: Decimal,
    lots: Option<u32>,
    today: NaiveDate,
) -> StraddleLeg {
    let strike = atm_strike(leg, price);
    let (call, put) = option_codes(leg, side, strike, today);
    StraddleLeg {
        exchange: leg.exchange.clone(),
        action,
        strike,
        call,
        put,
        lots,
    }
}
