//! Black-76 pricing for options on futures, and its implied-vol inverse.
//!
//! Domestic option boards publish prices only, so their implied volatility
//! is recovered here from the ATM call and put.

use std::f64::consts::PI;

const MAX_ITERATIONS: u32 = 100;
/// Convergence tolerance, relative to the forward price
const TOLERANCE: f64 = 1e-8;
const INITIAL_VOL: f64 = 0.20;
const MIN_VOL: f64 = 0.001;
const MAX_VOL: f64 = 5.0;

/// Standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / 2.0_f64.sqrt()))
}

fn norm_pdf(x: f64) -> f64 {
    (-(x * x) / 2.0).exp() / (2.0 * PI).sqrt()
}

/// Abramowitz & Stegun 7.1.26, max error 1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// d1 = [ln(F/K) + σ²T/2] / (σ√T), d2 = d1 - σ√T
fn d1_d2(forward: f64, strike: f64, time: f64, volatility: f64) -> (f64, f64) {
    let sd = volatility * time.sqrt();
    let d1 = ((forward / strike).ln() + volatility * volatility * time / 2.0) / sd;
    (d1, d1 - sd)
}

/// Black-76 premium of a European option on a future.
///
/// # Arguments
/// * `forward` - Futures price F
/// * `strike` - Strike K, same units as F
/// * `time` - Years to expiry
/// * `rate` - Continuously compounded discount rate
/// * `volatility` - Annualized volatility (0.20 = 20%)
/// * `is_call` - Call or put
///
/// Returns the discounted intrinsic value when `time` is not positive.
pub fn black76_price(
    forward: f64,
    strike: f64,
    time: f64,
    rate: f64,
    volatility: f64,
    is_call: bool,
) -> f64 {
    let discount = (-rate * time.max(0.0)).exp();
    if time <= 0.0 {
        let intrinsic = if is_call { forward - strike } else { strike - forward };
        return discount * intrinsic.max(0.0);
    }

    let (d1, d2) = d1_d2(forward, strike, time, volatility);
    if is_call {
        discount * (forward * norm_cdf(d1) - strike * norm_cdf(d2))
    } else {
        discount * (strike * norm_cdf(-d2) - forward * norm_cdf(-d1))
    }
}

/// Volatility that reproduces `market_price` under Black-76.
///
/// Newton-Raphson from a 20% guess, bounded to [0.1%, 500%]. `None` for
/// non-positive inputs, a price outside the no-arbitrage range, a flat
/// vega or no convergence within 100 iterations.
pub fn implied_volatility(
    market_price: f64,
    forward: f64,
    strike: f64,
    time: f64,
    rate: f64,
    is_call: bool,
) -> Option<f64> {
    if !(market_price > 0.0 && forward > 0.0 && strike > 0.0 && time > 0.0) {
        return None;
    }
    let discount = (-rate * time).exp();
    let intrinsic = black76_price(forward, strike, 0.0, rate, 0.0, is_call) * discount;
    let ceiling = discount * if is_call { forward } else { strike };
    if market_price <= intrinsic || market_price >= ceiling {
        return None;
    }

    let tolerance = TOLERANCE * forward;
    let mut vol = INITIAL_VOL;

    for _ in 0..MAX_ITERATIONS {
        let diff = black76_price(forward, strike, time, rate, vol, is_call) - market_price;
        if diff.abs() < tolerance {
            return Some(vol);
        }

        let (d1, _) = d1_d2(forward, strike, time, vol);
        let vega = discount * forward * time.sqrt() * norm_pdf(d1);
        if vega.abs() < 1e-10 {
            return None;
        }

        vol = (vol - diff / vega).clamp(MIN_VOL, MAX_VOL);
    }

    None
}
