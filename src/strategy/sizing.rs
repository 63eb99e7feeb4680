//! Hedge lot sizing across legs quoted in different physical units.

use crate::config::InstrumentSpec;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Direct unit conversions; the reverse direction is the reciprocal.
const UNIT_CONVERSIONS: [(&str, &str, Decimal); 4] = [
    ("t", "lb", dec!(2204.62)),
    ("kg", "oz", dec!(32.1507)),
    ("g", "oz", dec!(0.0321507)),
    ("oz", "g", dec!(31.1035)),
];

/// How many `to` units one `from` unit is worth.
pub fn conversion_factor(from: &str, to: &str) -> Option<Decimal> {
    if from == to {
        return Some(Decimal::ONE);
    }
    if let Some((_, _, factor)) = UNIT_CONVERSIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
    {
        return Some(*factor);
    }
    UNIT_CONVERSIONS
        .iter()
        .find(|(f, t, _)| *f == to && *t == from)
        .and_then(|(_, _, factor)| Decimal::ONE.checked_div(*factor))
}

/// Lot counts for one hedged pair of option positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotSizing {
    pub domestic_lots: u32,
    pub foreign_lots: u32,
    /// Domestic exposure, in the domestic base unit
    pub domestic_units: Decimal,
    /// Foreign exposure actually bought, in the foreign base unit
    pub foreign_units: Decimal,
    /// Foreign exposure over domestic exposure, in percent
    pub hedge_ratio: Decimal,
}

/// Foreign lots needed to hedge `domestic_lots` domestic lots.
///
/// # Arguments
/// * `spec` - Instrument whose legs carry lot sizes and base units
/// * `domestic_lots` - Domestic lots to hedge (at least 1)
/// * `round_up` - Round the foreign lot count up (over-hedge) instead of down
///
/// # Returns
/// `None` when either leg has no base unit or the units do not convert.
/// The foreign side never drops below one lot.
pub fn calculate_lots(spec: &InstrumentSpec, domestic_lots: u32, round_up: bool) -> Option<LotSizing> {
    let (domestic, foreign) = (&spec.domestic, &spec.foreign);
    if domestic.base_unit.is_empty() || foreign.base_unit.is_empty() {
        return None;
    }
    let factor = conversion_factor(&domestic.base_unit, &foreign.base_unit)?;

    let domestic_lots = domestic_lots.max(1);
    let domestic_units = Decimal::from(domestic_lots) * domestic.lot_size;
    let domestic_in_foreign = domestic_units * factor;

    let exact = domestic_in_foreign.checked_div(foreign.lot_size)?;
    let rounded = if round_up { exact.ceil() } else { exact.floor() };
    let foreign_lots = rounded.to_u32()?.max(1);

    let foreign_units = Decimal::from(foreign_lots) * foreign.lot_size;
    let hedge_ratio = (foreign_units * dec!(100))
        .checked_div(domestic_in_foreign)
        .unwrap_or(Decimal::ZERO);

    debug!(
        instrument = %spec.id,
        domestic_lots,
        foreign_lots,
        %exact,
        %hedge_ratio,
        "Sized hedge"
    );

    Some(LotSizing {
        domestic_lots,
        foreign_lots,
        domestic_units,
        foreign_units,
        hedge_ratio,
    })
}

/// Smallest pairing with one side at a single lot, whichever hedges closer to 100%.
///
/// Ties go to the single domestic lot.
pub fn minimal_lots(spec: &InstrumentSpec) -> Option<LotSizing> {
    let one_domestic = calculate_lots(spec, 1, true)?;

    let factor = conversion_factor(&spec.domestic.base_unit, &spec.foreign.base_unit)?;
    let needed = spec
        .foreign
        .lot_size
        .checked_div(factor)?
        .checked_div(spec.domestic.lot_size)?
        .round()
        .to_u32()?
        .max(1);
    let one_foreign = calculate_lots(spec, needed, true)?;

    let miss = |s: &LotSizing| (s.hedge_ratio - dec!(100)).abs();
    if miss(&one_domestic) <= miss(&one_foreign) {
        Some(one_domestic)
    } else {
        Some(one_foreign)
    }
}
