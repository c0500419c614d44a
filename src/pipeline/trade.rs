use std::sync::Arc;

use super::ack::PipelineMetrics;
use super::slot::SlotGuard;
use crate::error::{BotError, Result};
use crate::exchange::ExchangeGateway;
use crate::execution::{reconcile, Executor};
use crate::ledger::{LedgerService, LocalAccount};
use crate::models::{Operation, OpStatus};

/// Shared handles a trade task needs
#[derive(Clone)]
pub(crate) struct TradeContext {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub executor: Arc<Executor>,
    pub ledger: Arc<LedgerService>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Run one trade while holding the slot. The guard is released (and the tick
/// acknowledged) when this returns.
pub(crate) async fn run_trade(
    ctx: TradeContext,
    account: Arc<LocalAccount>,
    op: Operation,
    _guard: SlotGuard,
) {
    let op_id = op.op_id;
    let symbol = op.symbol();

    match trade(&ctx, &account, op).await {
        Ok(done) => {
            PipelineMetrics::add(&ctx.metrics.trades_completed, 1);
            tracing::info!(
                op_id = %op_id,
                symbol = %symbol,
                status = done.status.as_str(),
                price = %done.results.actual_price,
                base_diff = %done.results.base_diff,
                quote_diff = %done.results.quote_diff,
                "Trade completed"
            );
        }
        Err(e) => {
            PipelineMetrics::add(&ctx.metrics.trades_failed, 1);
            tracing::error!(op_id = %op_id, symbol = %symbol, code = e.code(), "Trade failed: {}", e);
        }
    }
}

async fn trade(ctx: &TradeContext, account: &LocalAccount, op: Operation) -> Result<Operation> {
    if op.amount.is_zero() {
        return Err(BotError::Internal(format!("operation {} has zero amount", op.op_id)));
    }
    if op.target_price.is_zero() {
        return Err(BotError::Internal(format!("operation {} has zero price", op.op_id)));
    }

    let before = ctx.gateway.get_account().await?;
    let report = ctx.executor.execute(op.clone()).await?;

    // orders are live from here on; a missing snapshot leaves the ledger behind
    let after = ctx.gateway.get_account().await.map_err(|e| {
        tracing::error!(
            op_id = %op.op_id,
            "Orders sent but account snapshot failed, ledger not updated: {}",
            e
        );
        e
    })?;

    // measured on the ledger's own pair even when the executor flipped it
    let mut measured = op;
    measured.timestamp = report.operation.timestamp;
    let done = reconcile(&before, &after, measured)?;
    if done.status == OpStatus::Failed {
        return Err(BotError::Internal(format!("operation {} failed", done.op_id)));
    }

    let next = account.register_trading(&done)?;

    let committed = ctx.ledger.commit(next).await;
    let recorded = ctx.ledger.record_operation(&done).await;
    committed?;
    recorded?;

    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::exchange::fake::FakeGateway;
    use crate::ledger::LocalAccountInit;
    use crate::models::{AmountSide, AssetPrice, RemoteAccount, Side, SpotMarketLimits, StrategyType};
    use crate::pipeline::ack::AckSender;
    use crate::pipeline::slot::TradeSlot;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn limits() -> SpotMarketLimits {
        SpotMarketLimits {
            min_base: dec!(0.0001),
            max_base: dec!(1000),
            step_base: dec!(0.0001),
            min_quote: dec!(1),
        }
    }

    async fn setup(
        accounts: Vec<RemoteAccount>,
    ) -> (TradeContext, Arc<LocalAccount>, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let ledger = Arc::new(LedgerService::new(repo.clone()));
        let gateway: Arc<dyn ExchangeGateway> =
            Arc::new(FakeGateway::new(&["BTCUSDT"], limits()).with_accounts(accounts));
        let account = ledger
            .create(LocalAccountInit {
                exe_id: Uuid::new_v4(),
                strategy_type: StrategyType::Pts,
                quote_currency: "USDT".to_string(),
                remote_account: RemoteAccount::from_pairs([("BTC", dec!(1)), ("USDT", dec!(1000))]),
                tradable_asset_prices: HashMap::from([(
                    "BTC".to_string(),
                    AssetPrice {
                        asset: "BTC".to_string(),
                        price: dec!(100),
                    },
                )]),
            })
            .await
            .unwrap();

        let ctx = TradeContext {
            executor: Arc::new(Executor::new(gateway.clone())),
            gateway,
            ledger,
            metrics: Arc::new(PipelineMetrics::default()),
        };
        (ctx, account, repo)
    }

    fn sell_btc(account: &LocalAccount, amount: rust_decimal::Decimal) -> Operation {
        Operation::pending(
            account.exe_id,
            "BTC",
            "USDT",
            Side::Sell,
            amount,
            AmountSide::Base,
            dec!(110),
            "take profit",
        )
    }

    fn guard(slot: &TradeSlot) -> (SlotGuard, mpsc::Receiver<crate::models::MiniMarketStatsAck>) {
        let (tx, rx) = mpsc::channel(4);
        let acks = AckSender::new(tx, Arc::new(PipelineMetrics::default()));
        (slot.try_acquire(acks).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_trade_updates_ledger_and_records_operation() {
        let (ctx, account, repo) = setup(vec![
            RemoteAccount::from_pairs([("BTC", dec!(1)), ("USDT", dec!(1000))]),
            RemoteAccount::from_pairs([("BTC", dec!(0.5)), ("USDT", dec!(1055))]),
        ])
        .await;
        let slot = TradeSlot::new();
        let (guard, mut acks) = guard(&slot);

        run_trade(ctx.clone(), account.clone(), sell_btc(&account, dec!(0.5)), guard).await;

        assert!(!slot.is_busy());
        assert_eq!(acks.recv().await.unwrap().count, 1);
        assert_eq!(ctx.metrics.snapshot().trades_completed, 1);

        let latest = ctx.ledger.latest(account.exe_id).await.unwrap();
        assert_ne!(latest.account_id, account.account_id);
        assert_eq!(latest.assets["BTC"].amount, dec!(0.5));
        assert_eq!(latest.assets["BTC"].last_operation_price, dec!(110));
        assert_eq!(latest.quote_balance.total(), dec!(1055));

        let ops = ctx.ledger.operations(account.exe_id).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OpStatus::Filled);
        assert_eq!(repo.count_local_accounts(account.exe_id).await, 2);
    }

    #[tokio::test]
    async fn test_unchanged_balances_fail_without_ledger_update() {
        let (ctx, account, _repo) = setup(vec![RemoteAccount::from_pairs([
            ("BTC", dec!(1)),
            ("USDT", dec!(1000)),
        ])])
        .await;
        let slot = TradeSlot::new();
        let (guard, _acks) = guard(&slot);

        run_trade(ctx.clone(), account.clone(), sell_btc(&account, dec!(0.5)), guard).await;

        assert!(!slot.is_busy());
        assert_eq!(ctx.metrics.snapshot().trades_failed, 1);
        let latest = ctx.ledger.latest(account.exe_id).await.unwrap();
        assert_eq!(latest.account_id, account.account_id);
        assert!(ctx.ledger.operations(account.exe_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_amount_is_rejected() {
        let (ctx, account, _repo) = setup(vec![]).await;
        let result = trade(&ctx, &account, sell_btc(&account, dec!(0))).await;
        tokio_test::assert_err!(result);
    }
}
