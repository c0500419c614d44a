use rust_decimal::Decimal;

use crate::error::{BotError, Result};
use crate::models::{AmountSide, OpResults, OpStatus, Operation, RemoteAccount, Side};
use crate::numeric::{round8, spread_percent};

/// Derive what actually happened to `op` from the account balances before and after it.
///
/// Market orders do not report a reliable fill price, so the traded amounts
/// are measured on the wallet itself.
pub fn reconcile(before: &RemoteAccount, after: &RemoteAccount, mut op: Operation) -> Result<Operation> {
    let base_diff = round8((after.amount_of(&op.base) - before.amount_of(&op.base)).abs());
    let quote_diff = round8((after.amount_of(&op.quote) - before.amount_of(&op.quote)).abs());

    if base_diff.is_zero() && quote_diff.is_zero() {
        op.status = OpStatus::Failed;
        tracing::error!(op_id = %op.op_id, "Neither base nor quote balance changed");
        return Err(BotError::Internal(format!(
            "operation {} left both balances unchanged",
            op.op_id
        )));
    }
    if base_diff.is_zero() {
        tracing::warn!(op_id = %op.op_id, "Base balance did not change");
    } else if quote_diff.is_zero() {
        tracing::warn!(op_id = %op.op_id, "Quote balance did not change");
    }

    op.status = if base_diff.is_zero() || quote_diff.is_zero() {
        OpStatus::PartiallyFilled
    } else {
        let requested_leg = match op.amount_side {
            AmountSide::Base => base_diff,
            AmountSide::Quote => quote_diff,
        };
        if requested_leg == op.amount {
            OpStatus::Filled
        } else {
            OpStatus::PartiallyFilled
        }
    };

    let (actual_price, spread) = match (base_diff.is_zero(), quote_diff.is_zero(), op.side) {
        // paid without receiving, or received without paying
        (true, _, Side::Buy) | (_, true, Side::Sell) => (Decimal::MAX, Decimal::MAX),
        (true, _, Side::Sell) | (_, true, Side::Buy) => (Decimal::ZERO, -Decimal::ONE_HUNDRED),
        _ => {
            let price = round8(quote_diff / base_diff);
            (price, spread_percent(op.target_price, price))
        }
    };

    op.results = OpResults {
        actual_price,
        base_diff,
        quote_diff,
        spread_percent: spread,
    };

    tracing::info!(
        op_id = %op.op_id,
        base_diff = %base_diff,
        quote_diff = %quote_diff,
        actual_price = %actual_price,
        spread = %spread,
        status = op.status.as_str(),
        "Operation reconciled"
    );

    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn op(side: Side, amount: Decimal, amount_side: AmountSide, price: Decimal) -> Operation {
        Operation::pending(Uuid::new_v4(), "BTC", "USDT", side, amount, amount_side, price, "test")
    }

    fn wallet(btc: Decimal, usdt: Decimal) -> RemoteAccount {
        RemoteAccount::from_pairs([("BTC", btc), ("ETH", dec!(18.92)), ("USDT", usdt)])
    }

    #[test]
    fn test_filled_buy_at_target_price() {
        let result = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(9.02), dec!(6934.384)),
            op(Side::Buy, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();

        assert_eq!(result.status, OpStatus::Filled);
        assert_eq!(result.results.base_diff, dec!(0.1));
        assert_eq!(result.results.quote_diff, dec!(3288.716));
        assert_eq!(result.results.actual_price, dec!(32887.16));
        assert_eq!(result.results.spread_percent, Decimal::ZERO);
    }

    #[test]
    fn test_filled_sell_by_quote_amount() {
        let result = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(8.9121875), dec!(10473.1)),
            op(Side::Sell, dec!(250), AmountSide::Quote, dec!(32000)),
        )
        .unwrap();

        assert_eq!(result.status, OpStatus::Filled);
        assert_eq!(result.results.base_diff, dec!(0.0078125));
        assert_eq!(result.results.actual_price, dec!(32000));
    }

    #[test]
    fn test_positive_and_negative_spread() {
        let worse = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(9.02), dec!(6923.1)),
            op(Side::Buy, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();
        assert_eq!(worse.results.actual_price, dec!(33000));
        assert_eq!(worse.results.spread_percent, dec!(0.34311263));

        let better = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(9.02), dec!(7023.1)),
            op(Side::Buy, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();
        assert_eq!(better.results.actual_price, dec!(32000));
        assert_eq!(better.results.spread_percent, dec!(-2.69758775));
    }

    #[test]
    fn test_requested_leg_short_is_partially_filled() {
        let result = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(8.97), dec!(8578.742)),
            op(Side::Buy, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();

        assert_eq!(result.status, OpStatus::PartiallyFilled);
        assert_eq!(result.results.base_diff, dec!(0.05));
    }

    #[test]
    fn test_one_leg_unchanged_uses_sentinels() {
        let paid_nothing_received = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(8.92), dec!(9223.1)),
            op(Side::Buy, dec!(1000), AmountSide::Quote, dec!(32887.16)),
        )
        .unwrap();
        assert_eq!(paid_nothing_received.status, OpStatus::PartiallyFilled);
        assert_eq!(paid_nothing_received.results.actual_price, Decimal::MAX);
        assert_eq!(paid_nothing_received.results.spread_percent, Decimal::MAX);

        let sold_for_nothing = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(8.82), dec!(10223.1)),
            op(Side::Sell, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();
        assert_eq!(sold_for_nothing.status, OpStatus::PartiallyFilled);
        assert_eq!(sold_for_nothing.results.actual_price, Decimal::MAX);

        let got_base_for_free = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(9.02), dec!(10223.1)),
            op(Side::Buy, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();
        assert_eq!(got_base_for_free.results.actual_price, Decimal::ZERO);
        assert_eq!(got_base_for_free.results.spread_percent, dec!(-100));

        let paid_without_selling = reconcile(
            &wallet(dec!(8.92), dec!(10223.1)),
            &wallet(dec!(8.92), dec!(10323.1)),
            op(Side::Sell, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        )
        .unwrap();
        assert_eq!(paid_without_selling.status, OpStatus::PartiallyFilled);
        assert_eq!(paid_without_selling.results.base_diff, Decimal::ZERO);
        assert_eq!(paid_without_selling.results.quote_diff, dec!(100));
        assert_eq!(paid_without_selling.results.actual_price, Decimal::ZERO);
        assert_eq!(paid_without_selling.results.spread_percent, dec!(-100));
    }

    #[test]
    fn test_no_movement_is_internal_error() {
        let same = wallet(dec!(8.92), dec!(10223.1));
        let result = reconcile(
            &same,
            &same,
            op(Side::Buy, dec!(0.1), AmountSide::Base, dec!(32887.16)),
        );
        assert!(matches!(result, Err(BotError::Internal(_))));
    }

    #[test]
    fn test_missing_balance_counts_as_zero() {
        let before = RemoteAccount::from_pairs([("USDT", dec!(100))]);
        let after = RemoteAccount::from_pairs([("BTC", dec!(0.001)), ("USDT", dec!(60))]);

        let result = reconcile(
            &before,
            &after,
            op(Side::Buy, dec!(40), AmountSide::Quote, dec!(40000)),
        )
        .unwrap();

        assert_eq!(result.status, OpStatus::Filled);
        assert_eq!(result.results.actual_price, dec!(40000));
    }
}
