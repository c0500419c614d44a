use rust_decimal::Decimal;
use std::collections::HashMap;

use super::{positive_prop, price_band, Decision, DecisionContext, Strategy};
use crate::error::{BotError, Result};
use crate::models::OperationType;
use crate::numeric::{percentage_of, round8};

const BUY_PERCENTAGE: &str = "buyPercentage";
const SELL_PERCENTAGE: &str = "sellPercentage";
const INIT_BUY_AMOUNT_PERCENTAGE: &str = "initBuyAmountPercentage";
const INIT_SELL_AMOUNT_PERCENTAGE: &str = "initSellAmountPercentage";
const EXPONENTIAL_BASE: &str = "exponentialBase";

/// Exponential backoff strategy.
///
/// Triggers like [`super::PtsStrategy`]. The first trade in a direction uses
/// the initial percentage; every further trade in the same direction is the
/// previous trade amount times `exponential_base`. Amounts are capped at
/// what is available.
#[derive(Debug, Clone, PartialEq)]
pub struct EptsStrategy {
    pub buy_percentage: Decimal,
    pub sell_percentage: Decimal,
    pub init_buy_amount_percentage: Decimal,
    pub init_sell_amount_percentage: Decimal,
    pub exponential_base: Decimal,
}

impl EptsStrategy {
    pub fn from_props(props: &HashMap<String, String>) -> Result<Self> {
        let exponential_base = positive_prop(props, EXPONENTIAL_BASE)?;
        if exponential_base <= Decimal::ONE {
            return Err(BotError::BadRequest(format!(
                "{} must be greater than 1, got {}",
                EXPONENTIAL_BASE, exponential_base
            )));
        }

        Ok(Self {
            buy_percentage: positive_prop(props, BUY_PERCENTAGE)?,
            sell_percentage: positive_prop(props, SELL_PERCENTAGE)?,
            init_buy_amount_percentage: positive_prop(props, INIT_BUY_AMOUNT_PERCENTAGE)?,
            init_sell_amount_percentage: positive_prop(props, INIT_SELL_AMOUNT_PERCENTAGE)?,
            exponential_base,
        })
    }

    fn next_amount(&self, repeated: bool, last_amount: Decimal, initial: Decimal) -> Decimal {
        if repeated {
            // capped at the available amount by the caller
            last_amount
                .checked_mul(self.exponential_base)
                .map(round8)
                .unwrap_or(Decimal::MAX)
        } else {
            initial
        }
    }
}

impl Strategy for EptsStrategy {
    fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        let state = ctx.state;
        let last_amount = state.last_operation_amount.unwrap_or(state.amount);
        let (sell_price, buy_price) =
            price_band(state, self.sell_percentage, self.buy_percentage)?;

        let decision = if ctx.price >= sell_price {
            let amount = self
                .next_amount(
                    state.last_operation_type == OperationType::Sell,
                    last_amount,
                    percentage_of(state.amount, self.init_sell_amount_percentage)?,
                )
                .min(state.amount);
            Decision::sell(amount, "epts sell")
        } else if ctx.price <= buy_price {
            let amount = self
                .next_amount(
                    state.last_operation_type == OperationType::Buy,
                    last_amount,
                    percentage_of(ctx.quote_available, self.init_buy_amount_percentage)?,
                )
                .min(ctx.quote_available);
            Decision::buy(amount, "epts buy")
        } else {
            return None;
        };

        if decision.amount.is_zero() {
            tracing::debug!(asset = %state.asset, "EPTS: no funds left for {}", decision.cause);
            return None;
        }

        Some(decision)
    }

    fn name(&self) -> &str {
        "EPTS"
    }
}
