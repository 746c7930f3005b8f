//! Exact decimal arithmetic: the fold kernels must never touch binary
//! floating point.
//!
//! `Money` is a thin alias over `bigdecimal::BigDecimal`, the same
//! type used for every monetary/volume/fee column throughout this
//! crate.

use bigdecimal::BigDecimal;
use once_cell::sync::Lazy;
use std::str::FromStr;

pub type Money = BigDecimal;

/// Default fractional scale applied to derived quotients
/// (`avg_buy_price`, `avg_sell_price`), quantized to
/// `Decimal("0.000000")`; six fractional digits is also the store
/// contract's minimum precision.
pub const DEFAULT_SCALE: i64 = 6;

/// Consistency tolerance for cashflow derivation: `ε = 0.01`.
pub static EPSILON: Lazy<Money> = Lazy::new(|| Money::from_str("0.01").expect("valid literal"));

pub fn zero() -> Money {
    Money::from(0)
}

pub fn is_zero(value: &Money) -> bool {
    value == &zero()
}

/// `numerator / denominator`, rounded to `DEFAULT_SCALE`, or zero if
/// `denominator` is zero — the zero-denominator guard `avg_buy_price`/
/// `avg_sell_price` rely on.
pub fn safe_div(numerator: &Money, denominator: &Money) -> Money {
    if is_zero(denominator) {
        zero()
    } else {
        (numerator / denominator).with_scale(DEFAULT_SCALE)
    }
}

/// `|a - b| < EPSILON`, the tolerance check used by both cashflow
/// derivation invariants.
pub fn within_epsilon(a: &Money, b: &Money) -> bool {
    let diff = if a > b { a - b } else { b - a };
    diff < *EPSILON
}
