//! Decimal helpers shared by the ledger, strategies and reconciliation

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits kept on every ledger amount
pub const LEDGER_SCALE: u32 = 8;

/// Fractional digits kept on strategy percentages
pub const PERCENT_SCALE: u32 = 2;

/// Round a monetary value to the ledger scale (half away from zero)
pub fn round8(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(LEDGER_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a strategy percentage to two digits (half away from zero)
pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `value` moved by `percent`%, e.g. `(100, -5) -> 95`.
/// `None` if the result does not fit in a `Decimal`.
pub fn increment_by_percentage(value: Decimal, percent: Decimal) -> Option<Decimal> {
    let delta = percentage_of(value, percent)?;
    value.checked_add(delta).map(round8)
}

/// `percent`% of `value`, `None` on overflow
pub fn percentage_of(value: Decimal, percent: Decimal) -> Option<Decimal> {
    (value / Decimal::ONE_HUNDRED).checked_mul(percent).map(round8)
}

/// Relative distance of `to` from `from`, in percent
pub fn spread_percent(from: Decimal, to: Decimal) -> Decimal {
    if from.is_zero() {
        return Decimal::ZERO;
    }
    round8((to - from) / from * Decimal::ONE_HUNDRED)
}
