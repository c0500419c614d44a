use rust_decimal::Decimal;
use std::collections::HashMap;

use super::{positive_prop, price_band, Decision, DecisionContext, Strategy};
use crate::error::Result;
use crate::numeric::percentage_of;

const BUY_PERCENTAGE: &str = "buyPercentage";
const SELL_PERCENTAGE: &str = "sellPercentage";
const BUY_AMOUNT_PERCENTAGE: &str = "buyAmountPercentage";
const SELL_AMOUNT_PERCENTAGE: &str = "sellAmountPercentage";

/// Percentage strategy: trade a fixed share of holdings or of the quote pool
/// whenever the price moves far enough from the last trade.
#[derive(Debug, Clone, PartialEq)]
pub struct PtsStrategy {
    pub buy_percentage: Decimal,
    pub sell_percentage: Decimal,
    pub buy_amount_percentage: Decimal,
    pub sell_amount_percentage: Decimal,
}

impl PtsStrategy {
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            buy_percentage: positive_prop(props, BUY_PERCENTAGE)?,
            sell_percentage: positive_prop(props, SELL_PERCENTAGE)?,
            buy_amount_percentage: positive_prop(props, BUY_AMOUNT_PERCENTAGE)?,
            sell_amount_percentage: positive_prop(props, SELL_AMOUNT_PERCENTAGE)?,
        })
    }
}

impl Strategy for PtsStrategy {
    fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        let (sell_price, buy_price) =
            price_band(ctx.state, self.sell_percentage, self.buy_percentage)?;

        if ctx.price >= sell_price {
            let amount = percentage_of(ctx.state.amount, self.sell_amount_percentage)?;
            Some(Decision::sell(amount, "pts sell"))
        } else if ctx.price <= buy_price {
            let amount = percentage_of(ctx.quote_available, self.buy_amount_percentage)?;
            Some(Decision::buy(amount, "pts buy"))
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "PTS"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AssetState;
    use crate::models::{OperationType, Side};
    use rust_decimal_macros::dec;

    fn strategy() -> PtsStrategy {
        PtsStrategy {
            buy_percentage: dec!(5),
            sell_percentage: dec!(5),
            buy_amount_percentage: dec!(10),
            sell_amount_percentage: dec!(50),
        }
    }

    fn decide(price: Decimal) -> Option<Decision> {
        let state = AssetState {
            asset: "ETH".to_string(),
            amount: dec!(2),
            last_operation_type: OperationType::Init,
            last_operation_price: dec!(1000),
            last_operation_amount: None,
        };
        strategy().decide(&DecisionContext {
            state: &state,
            quote_available: dec!(500),
            price,
        })
    }

    #[test]
    fn test_sells_share_of_holdings_on_rise() {
        let d = decide(dec!(1050)).unwrap();
        assert_eq!(d.side, Side::Sell);
        assert_eq!(d.amount, dec!(1));
    }

    #[test]
    fn test_buys_share_of_pool_on_drop() {
        let d = decide(dec!(950)).unwrap();
        assert_eq!(d.side, Side::Buy);
        assert_eq!(d.amount, dec!(50));
    }

    #[test]
    fn test_no_op_inside_band() {
        assert!(decide(dec!(1049.99)).is_none());
        assert!(decide(dec!(950.01)).is_none());
    }

    #[test]
    fn test_unbounded_last_price_is_no_op() {
        let state = AssetState {
            asset: "ETH".to_string(),
            amount: dec!(2),
            last_operation_type: OperationType::Buy,
            last_operation_price: Decimal::MAX,
            last_operation_amount: None,
        };
        let decision = strategy().decide(&DecisionContext {
            state: &state,
            quote_available: dec!(500),
            price: dec!(100),
        });
        assert!(decision.is_none());
    }
}
