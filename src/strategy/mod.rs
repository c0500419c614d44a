// Ledger decision strategies
pub mod dts;
pub mod epts;
pub mod pts;

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::{BotError, Result};
use crate::ledger::AssetState;
use crate::models::{AmountSide, Side, StrategyType};
use crate::numeric::{increment_by_percentage, round_percent};

pub use dts::DtsStrategy;
pub use epts::EptsStrategy;
pub use pts::PtsStrategy;

/// Inputs a strategy sees when a tick arrives for a tracked asset
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub state: &'a AssetState,
    /// Quote funds this asset may spend (pooled balance or its own sub-balance)
    pub quote_available: Decimal,
    pub price: Decimal,
}

/// Candidate trade produced by a strategy, before limit checks
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub side: Side,
    pub amount: Decimal,
    pub amount_side: AmountSide,
    pub cause: &'static str,
}

impl Decision {
    pub fn sell(amount: Decimal, cause: &'static str) -> Self {
        Self {
            side: Side::Sell,
            amount,
            amount_side: AmountSide::Base,
            cause,
        }
    }

    pub fn buy(amount: Decimal, cause: &'static str) -> Self {
        Self {
            side: Side::Buy,
            amount,
            amount_side: AmountSide::Quote,
            cause,
        }
    }
}

/// Shared contract of every strategy variant
pub trait Strategy: Send + Sync {
    /// Trade to place for the current tick, `None` for NO_OP
    fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision>;

    /// Get strategy name
    fn name(&self) -> &str;
}

/// Parsed strategy properties. The set of variants is closed.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyConfig {
    Dts(DtsStrategy),
    Pts(PtsStrategy),
    Epts(EptsStrategy),
}

impl StrategyConfig {
    /// Parse and validate `props` for the given strategy type
    pub fn parse(strategy_type: StrategyType, props: &HashMap<String, String>) -> Result<Self> {
        let config = match strategy_type {
            StrategyType::Dts => StrategyConfig::Dts(DtsStrategy::from_props(props)?),
            StrategyType::Pts => StrategyConfig::Pts(PtsStrategy::from_props(props)?),
            StrategyType::Epts => StrategyConfig::Epts(EptsStrategy::from_props(props)?),
        };
        Ok(config)
    }

    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyConfig::Dts(_) => StrategyType::Dts,
            StrategyConfig::Pts(_) => StrategyType::Pts,
            StrategyConfig::Epts(_) => StrategyType::Epts,
        }
    }
}

impl Strategy for StrategyConfig {
    fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        match self {
            StrategyConfig::Dts(s) => s.decide(ctx),
            StrategyConfig::Pts(s) => s.decide(ctx),
            StrategyConfig::Epts(s) => s.decide(ctx),
        }
    }

    fn name(&self) -> &str {
        match self {
            StrategyConfig::Dts(s) => s.name(),
            StrategyConfig::Pts(s) => s.name(),
            StrategyConfig::Epts(s) => s.name(),
        }
    }
}

/// Prices `up`% above and `down`% below the last trade price.
///
/// `None` when either bound overflows, which the caller treats as NO_OP.
pub(crate) fn price_band(
    state: &AssetState,
    up: Decimal,
    down: Decimal,
) -> Option<(Decimal, Decimal)> {
    let last_price = state.last_operation_price;
    match (
        increment_by_percentage(last_price, up),
        increment_by_percentage(last_price, -down),
    ) {
        (Some(upper), Some(lower)) => Some((upper, lower)),
        _ => {
            tracing::warn!(
                asset = %state.asset,
                last_price = %last_price,
                "Trigger price out of range, skipping"
            );
            None
        }
    }
}

/// Read a strictly positive percentage property, rounded to two digits
pub(crate) fn positive_prop(props: &HashMap<String, String>, key: &str) -> Result<Decimal> {
    // config sources lowercase their keys
    let raw = props
        .get(key)
        .or_else(|| {
            props
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .ok_or_else(|| BotError::BadRequest(format!("missing strategy property {}", key)))?;

    let value: Decimal = raw.trim().parse().map_err(|_| {
        BotError::BadRequest(format!("strategy property {} is not a number: {}", key, raw))
    })?;
    let value = round_percent(value);

    if value <= Decimal::ZERO {
        return Err(BotError::BadRequest(format!(
            "strategy property {} must be positive, got {}",
            key, value
        )));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_positive_prop_rounds_to_two_digits() {
        let p = props(&[("buyPercentage", "2.345")]);
        assert_eq!(
            positive_prop(&p, "buyPercentage").unwrap(),
            Decimal::new(235, 2)
        );
    }

    #[test]
    fn test_positive_prop_rejects_missing_and_invalid() {
        let p = props(&[("a", "-1"), ("b", "abc"), ("c", "0.001")]);
        assert!(matches!(positive_prop(&p, "missing"), Err(BotError::BadRequest(_))));
        assert!(matches!(positive_prop(&p, "a"), Err(BotError::BadRequest(_))));
        assert!(matches!(positive_prop(&p, "b"), Err(BotError::BadRequest(_))));
        // rounds to zero
        assert!(matches!(positive_prop(&p, "c"), Err(BotError::BadRequest(_))));
    }

    #[test]
    fn test_positive_prop_ignores_key_case() {
        let p = props(&[("buythreshold", "3")]);
        assert_eq!(positive_prop(&p, "buyThreshold").unwrap(), Decimal::new(3, 0));
    }

    #[test]
    fn test_parse_dispatches_on_type() {
        let p = props(&[
            ("buyPercentage", "1"),
            ("sellPercentage", "1"),
            ("buyAmountPercentage", "10"),
            ("sellAmountPercentage", "10"),
        ]);
        let config = StrategyConfig::parse(StrategyType::Pts, &p).unwrap();
        assert_eq!(config.strategy_type(), StrategyType::Pts);
        assert_eq!(config.name(), "PTS");

        // PTS props are not valid DTS props
        assert!(StrategyConfig::parse(StrategyType::Dts, &p).is_err());
    }
}
