use rust_decimal::Decimal;
use std::collections::HashMap;

use super::{positive_prop, price_band, Decision, DecisionContext, Strategy};
use crate::error::Result;
use crate::models::OperationType;

const BUY_THRESHOLD: &str = "buyThreshold";
const SELL_THRESHOLD: &str = "sellThreshold";
const STOP_LOSS_THRESHOLD: &str = "stopLossThreshold";
const MISS_PROFIT_THRESHOLD: &str = "missProfitThreshold";

/// Threshold strategy: alternate all-in buys and sells around the last trade price.
///
/// After a BUY the whole holding is sold on take-profit or stop-loss.
/// After a SELL the asset's whole quote sub-balance is spent on a dip or
/// when the price runs away (miss-profit).
#[derive(Debug, Clone, PartialEq)]
pub struct DtsStrategy {
    pub buy_threshold: Decimal,
    pub sell_threshold: Decimal,
    pub stop_loss_threshold: Decimal,
    pub miss_profit_threshold: Decimal,
}

impl DtsStrategy {
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            buy_threshold: positive_prop(props, BUY_THRESHOLD)?,
            sell_threshold: positive_prop(props, SELL_THRESHOLD)?,
            stop_loss_threshold: positive_prop(props, STOP_LOSS_THRESHOLD)?,
            miss_profit_threshold: positive_prop(props, MISS_PROFIT_THRESHOLD)?,
        })
    }
}

impl Strategy for DtsStrategy {
    fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        let price = ctx.price;

        match ctx.state.last_operation_type {
            OperationType::Buy => {
                let (sell_price, stop_loss_price) =
                    price_band(ctx.state, self.sell_threshold, self.stop_loss_threshold)?;

                if price >= sell_price {
                    Some(Decision::sell(ctx.state.amount, "dts sell"))
                } else if price <= stop_loss_price {
                    Some(Decision::sell(ctx.state.amount, "dts stop loss"))
                } else {
                    None
                }
            }
            OperationType::Sell => {
                let (miss_profit_price, buy_price) =
                    price_band(ctx.state, self.miss_profit_threshold, self.buy_threshold)?;

                if price <= buy_price {
                    Some(Decision::buy(ctx.quote_available, "dts buy"))
                } else if price >= miss_profit_price {
                    Some(Decision::buy(ctx.quote_available, "dts miss profit"))
                } else {
                    None
                }
            }
            // threshold ledgers are seeded as BUY, INIT never occurs
            OperationType::Init => None,
        }
    }

    fn name(&self) -> &str {
        "DTS"
    }
}
