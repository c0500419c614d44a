use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{BotError, Result};

/// Split `amount` into market-order chunks that each fit in `[min, max]`.
///
/// Amounts up to `max` are sent as a single order. Larger amounts become
/// `n = floor(amount / max)` chunks of `max` plus the remainder; a remainder
/// below `min` is merged by replacing the last full chunk with two halves,
/// the second one carrying the remainder.
pub fn plan_chunks(amount: Decimal, min: Decimal, max: Decimal) -> Result<Vec<Decimal>> {
    if max <= Decimal::ZERO {
        return Err(BotError::Internal(format!(
            "invalid market order upper bound {}",
            max
        )));
    }
    if amount <= max {
        return Ok(vec![amount]);
    }

    let full = (amount / max).trunc();
    let remainder = amount - full * max;
    let n = full
        .to_usize()
        .ok_or_else(|| BotError::Internal(format!("{} chunks of {} is too many", full, max)))?;

    let mut chunks = Vec::with_capacity(n + 1);
    chunks.extend(std::iter::repeat(max).take(n - 1));

    if remainder.is_zero() {
        chunks.push(max);
    } else if remainder >= min {
        chunks.push(max);
        chunks.push(remainder);
    } else {
        let half = max / Decimal::TWO;
        chunks.push(half);
        chunks.push(half + remainder);
    }

    Ok(chunks)
}
