//! Local account ledger: the bot's own view of what each strategy owns.
//!
//! A [`LocalAccount`] is an immutable version. Every mutation produces a new
//! version with a fresh `account_id` and timestamp; callers persist it and
//! publish it through [`LedgerService`].

pub mod service;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::models::{
    AmountSide, AssetPrice, MiniMarketStats, OpStatus, Operation, OperationType, RemoteAccount,
    Side, SpotMarketLimits, StrategyType,
};
use crate::numeric::round8;
use crate::strategy::{DecisionContext, Strategy, StrategyConfig};

pub use service::LedgerService;

/// Per-asset position tracked by a ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetState {
    pub asset: String,
    pub amount: Decimal,
    pub last_operation_type: OperationType,
    pub last_operation_price: Decimal,
    /// Size of the last trade, only tracked by the exponential strategy
    #[serde(default)]
    pub last_operation_amount: Option<Decimal>,
}

/// Quote currency held by the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QuoteBalance {
    /// One balance shared by every asset
    Pooled(Decimal),
    /// One sub-balance per asset, fed by that asset's sells
    PerAsset(HashMap<String, Decimal>),
}

impl QuoteBalance {
    /// Funds available to `asset`
    pub fn available_to(&self, asset: &str) -> Decimal {
        match self {
            QuoteBalance::Pooled(amount) => *amount,
            QuoteBalance::PerAsset(balances) => {
                balances.get(asset).copied().unwrap_or(Decimal::ZERO)
            }
        }
    }

    pub fn total(&self) -> Decimal {
        match self {
            QuoteBalance::Pooled(amount) => *amount,
            QuoteBalance::PerAsset(balances) => balances.values().copied().sum(),
        }
    }
}

/// Everything needed to seed a fresh ledger
#[derive(Debug, Clone)]
pub struct LocalAccountInit {
    pub exe_id: Uuid,
    pub strategy_type: StrategyType,
    pub quote_currency: String,
    pub remote_account: RemoteAccount,
    pub tradable_asset_prices: HashMap<String, AssetPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalAccount {
    pub account_id: Uuid,
    pub exe_id: Uuid,
    pub strategy_type: StrategyType,
    pub quote_currency: String,
    pub timestamp: DateTime<Utc>,
    /// Balances the ledger will never trade
    pub ignored: HashMap<String, Decimal>,
    pub assets: HashMap<String, AssetState>,
    pub quote_balance: QuoteBalance,
}

impl LocalAccount {
    /// Build the first ledger version from the exchange balances.
    ///
    /// Zero balances are dropped and assets without a tradable price are
    /// ignored. The threshold strategy keeps the quote currency aside and starts
    /// every asset with an empty quote sub-balance; the pooled strategies invest
    /// the whole quote balance.
    pub fn initialize(init: LocalAccountInit) -> Self {
        let mut ignored = HashMap::new();
        let mut assets = HashMap::new();
        let mut pooled = Decimal::ZERO;
        let per_asset = init.strategy_type == StrategyType::Dts;

        for balance in init.remote_account.balances {
            if balance.amount.is_zero() {
                continue;
            }

            if balance.asset == init.quote_currency {
                if per_asset {
                    ignored.insert(balance.asset, balance.amount);
                } else {
                    pooled += balance.amount;
                }
                continue;
            }

            let Some(price) = init.tradable_asset_prices.get(&balance.asset) else {
                tracing::warn!(asset = %balance.asset, "No tradable price, asset ignored");
                ignored.insert(balance.asset, balance.amount);
                continue;
            };

            let state = AssetState {
                asset: balance.asset.clone(),
                amount: balance.amount,
                last_operation_type: match init.strategy_type {
                    StrategyType::Dts => OperationType::Buy,
                    StrategyType::Pts | StrategyType::Epts => OperationType::Init,
                },
                last_operation_price: price.price,
                last_operation_amount: match init.strategy_type {
                    StrategyType::Epts => Some(balance.amount),
                    StrategyType::Dts | StrategyType::Pts => None,
                },
            };
            assets.insert(balance.asset, state);
        }

        let quote_balance = if per_asset {
            QuoteBalance::PerAsset(
                assets
                    .keys()
                    .map(|asset| (asset.clone(), Decimal::ZERO))
                    .collect(),
            )
        } else {
            QuoteBalance::Pooled(pooled)
        };

        tracing::info!(
            exe_id = %init.exe_id,
            strategy = %init.strategy_type,
            tracked = assets.len(),
            ignored = ignored.len(),
            "Local account initialized"
        );

        Self {
            account_id: Uuid::new_v4(),
            exe_id: init.exe_id,
            strategy_type: init.strategy_type,
            quote_currency: init.quote_currency,
            timestamp: Utc::now(),
            ignored,
            assets,
            quote_balance,
        }
    }

    /// Decide what to do with a tick for one of the tracked assets.
    ///
    /// Returns `Ok(None)` for NO_OP, including candidates below the exchange minimums.
    pub fn get_operation(
        &self,
        props: &HashMap<String, String>,
        tick: &MiniMarketStats,
        limits: &SpotMarketLimits,
    ) -> Result<Option<Operation>> {
        let state = self.assets.get(&tick.asset).ok_or_else(|| {
            BotError::NotFound(format!("asset {} is not tracked by the ledger", tick.asset))
        })?;

        if tick.last_price.is_zero() {
            return Err(BotError::Internal(format!(
                "zero price received for {}",
                tick.asset
            )));
        }

        let strategy = StrategyConfig::parse(self.strategy_type, props)?;
        let ctx = DecisionContext {
            state,
            quote_available: self.quote_balance.available_to(&tick.asset),
            price: tick.last_price,
        };

        let Some(decision) = strategy.decide(&ctx) else {
            tracing::trace!(
                strategy = strategy.name(),
                asset = %tick.asset,
                last_op = ?state.last_operation_type,
                last_price = %state.last_operation_price,
                price = %tick.last_price,
                "NO_OP"
            );
            return Ok(None);
        };

        let minimum = match decision.amount_side {
            AmountSide::Base => limits.min_base,
            AmountSide::Quote => limits.min_quote,
        };
        if decision.amount.is_zero() || decision.amount < minimum {
            tracing::debug!(
                asset = %tick.asset,
                side = decision.side.as_str(),
                amount = %decision.amount,
                minimum = %minimum,
                "{} below exchange minimum, skipped",
                decision.cause
            );
            return Ok(None);
        }

        tracing::info!(
            strategy = strategy.name(),
            asset = %tick.asset,
            last_op = ?state.last_operation_type,
            last_price = %state.last_operation_price,
            price = %tick.last_price,
            amount = %decision.amount,
            "{}",
            decision.cause
        );

        Ok(Some(Operation::pending(
            self.exe_id,
            &tick.asset,
            &self.quote_currency,
            decision.side,
            decision.amount,
            decision.amount_side,
            tick.last_price,
            decision.cause,
        )))
    }

    /// Apply a reconciled operation and return the next ledger version.
    ///
    /// # Panics
    /// If the update would leave any balance negative. The ledger can no longer
    /// be trusted at that point and the calling task must stop.
    pub fn register_trading(&self, op: &Operation) -> Result<LocalAccount> {
        if op.exe_id != self.exe_id {
            return Err(BotError::Internal(format!(
                "operation {} belongs to execution {}, ledger to {}",
                op.op_id, op.exe_id, self.exe_id
            )));
        }
        if op.quote != self.quote_currency {
            return Err(BotError::Internal(format!(
                "operation {} is quoted in {}, ledger only trades against {}",
                op.op_id, op.quote, self.quote_currency
            )));
        }
        if op.status == OpStatus::Failed {
            return Err(BotError::Internal(format!(
                "operation {} failed, nothing to register",
                op.op_id
            )));
        }
        let mut state = self.assets.get(&op.base).cloned().ok_or_else(|| {
            BotError::Internal(format!("asset {} is not tracked by the ledger", op.base))
        })?;

        let base_diff = op.results.base_diff;
        let quote_diff = op.results.quote_diff;
        let mut available_quote = self.quote_balance.available_to(&op.base);

        match op.side {
            Side::Buy => {
                state.amount = round8(state.amount + base_diff);
                available_quote = round8(available_quote - quote_diff);
            }
            Side::Sell => {
                state.amount = round8(state.amount - base_diff);
                available_quote = round8(available_quote + quote_diff);
            }
        }

        if state.amount < Decimal::ZERO {
            negative_balance(&state.asset, state.amount);
        }
        if available_quote < Decimal::ZERO {
            negative_balance(&self.quote_currency, available_quote);
        }

        state.last_operation_type = op.side.into();
        state.last_operation_price = trigger_price(op);
        if self.strategy_type == StrategyType::Epts {
            state.last_operation_amount = Some(match op.side {
                Side::Buy => quote_diff,
                Side::Sell => base_diff,
            });
        }

        let mut next = self.clone();
        match &mut next.quote_balance {
            QuoteBalance::Pooled(amount) => *amount = available_quote,
            QuoteBalance::PerAsset(balances) => {
                balances.insert(op.base.clone(), available_quote);
            }
        }
        next.assets.insert(op.base.clone(), state);
        next.account_id = Uuid::new_v4();
        next.timestamp = Utc::now();

        Ok(next)
    }

    /// Every balance the ledger knows about, including ignored assets and
    /// the aggregate quote balance
    pub fn get_asset_amounts(&self) -> HashMap<String, Decimal> {
        let mut amounts: HashMap<String, Decimal> = self.ignored.clone();
        for (asset, state) in &self.assets {
            amounts.insert(asset.clone(), state.amount);
        }
        let ignored_quote = self
            .ignored
            .get(&self.quote_currency)
            .copied()
            .unwrap_or(Decimal::ZERO);
        amounts.insert(
            self.quote_currency.clone(),
            ignored_quote + self.quote_balance.total(),
        );
        amounts
    }
}

/// Price the next decision for this asset is measured from.
///
/// When one leg of the trade did not move, reconciliation reports a sentinel
/// (`0` or `Decimal::MAX`) instead of a fill price; the price the operation
/// was decided at is kept then.
fn trigger_price(op: &Operation) -> Decimal {
    let actual = op.results.actual_price;
    if actual.is_zero() || actual == Decimal::MAX {
        tracing::warn!(
            op_id = %op.op_id,
            asset = %op.base,
            target_price = %op.target_price,
            "No fill price measured, keeping the target price"
        );
        return op.target_price;
    }
    actual
}

fn negative_balance(asset: &str, amount: Decimal) -> ! {
    tracing::error!(asset, amount = %amount, "Ledger balance went negative");
    panic!("negative ledger balance for {}: {}", asset, amount);
}
