//! Tick pipeline: turns batches of market ticks into at most one trade at a time.
//!
//! Every tick that enters a batch is acknowledged exactly once, either right
//! away when it is skipped, or by the slot guard when its trade attempt ends.

pub mod ack;
pub mod slot;
mod trade;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::exchange::ExchangeGateway;
use crate::execution::Executor;
use crate::ledger::LedgerService;
use crate::lifecycle::ExecutionService;
use crate::models::{symbol_of, Execution, MiniMarketStats};
use crate::persistence::TickLog;
use trade::{run_trade, TradeContext};

pub use ack::{AckSender, MetricsSnapshot, PipelineMetrics};
pub use slot::{SlotGuard, TradeSlot};

pub struct TickPipeline {
    quote: String,
    gateway: Arc<dyn ExchangeGateway>,
    executions: Arc<ExecutionService>,
    ledger: Arc<LedgerService>,
    executor: Arc<Executor>,
    tick_log: Option<Arc<dyn TickLog>>,
    slot: TradeSlot,
    acks: AckSender,
    metrics: Arc<PipelineMetrics>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl TickPipeline {
    pub fn new(
        quote: &str,
        gateway: Arc<dyn ExchangeGateway>,
        executions: Arc<ExecutionService>,
        ledger: Arc<LedgerService>,
        acks: mpsc::Sender<crate::models::MiniMarketStatsAck>,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::default());
        Self {
            quote: quote.to_string(),
            executor: Arc::new(Executor::new(gateway.clone())),
            gateway,
            executions,
            ledger,
            tick_log: None,
            slot: TradeSlot::new(),
            acks: AckSender::new(acks, metrics.clone()),
            metrics,
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_tick_log(mut self, tick_log: Arc<dyn TickLog>) -> Self {
        self.tick_log = Some(tick_log);
        self
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    pub fn slot(&self) -> TradeSlot {
        self.slot.clone()
    }

    /// Consume batches until the producer closes the channel, then wait for
    /// the last trade to finish
    pub async fn run(&self, mut ticks: mpsc::Receiver<Vec<MiniMarketStats>>) {
        tracing::info!(quote = %self.quote, "Tick pipeline started");
        while let Some(batch) = ticks.recv().await {
            self.handle_batch(batch).await;
        }
        self.drain().await;
        tracing::info!(metrics = ?self.metrics.snapshot(), "Tick pipeline stopped");
    }

    /// Wait for the trade currently holding the slot, if any
    pub async fn drain(&self) {
        let handle = self.in_flight.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Trade task aborted: {}", e);
            }
        }
    }

    pub async fn handle_batch(&self, batch: Vec<MiniMarketStats>) {
        if batch.is_empty() {
            return;
        }
        PipelineMetrics::add(&self.metrics.ticks_received, batch.len() as u64);

        if let Some(log) = &self.tick_log {
            let log = log.clone();
            let quote = self.quote.clone();
            let raw = batch.clone();
            tokio::spawn(async move {
                if let Err(e) = log.append(&quote, &raw).await {
                    tracing::warn!("Failed to store ticks: {}", e);
                }
            });
        }

        let exe = match self.executions.get_currently_active().await {
            Ok(Some(exe)) => exe,
            Ok(None) => {
                tracing::debug!(ticks = batch.len(), "No active execution, skipping batch");
                self.skip(batch.len());
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load active execution: {}", e);
                self.skip(batch.len());
                return;
            }
        };

        let tracked = match self.ledger.latest(exe.exe_id).await {
            Ok(account) => account.get_asset_amounts(),
            Err(e) => {
                tracing::error!(exe_id = %exe.exe_id, "Failed to load local account: {}", e);
                self.skip(batch.len());
                return;
            }
        };

        for tick in batch {
            if tick.asset == self.quote || !tracked.contains_key(&tick.asset) {
                self.skip(1);
                continue;
            }
            self.handle_tick(&exe, tick).await;
        }
    }

    async fn handle_tick(&self, exe: &Execution, tick: MiniMarketStats) {
        let symbol = symbol_of(&tick.asset, &self.quote);
        if !self.gateway.can_spot_trade(&symbol) {
            tracing::warn!(symbol = %symbol, "Spot trading unavailable, skipping tick");
            self.skip(1);
            return;
        }
        let limits = match self.gateway.get_spot_market_limits(&symbol) {
            Ok(limits) => limits,
            Err(e) => {
                tracing::error!(symbol = %symbol, "Failed to get market limits: {}", e);
                self.skip(1);
                return;
            }
        };

        let Some(guard) = self.slot.try_acquire(self.acks.clone()) else {
            PipelineMetrics::add(&self.metrics.ticks_dropped_busy, 1);
            tracing::debug!(symbol = %symbol, "Trading ongoing, skipping tick");
            self.acks.ack(1);
            return;
        };

        // re-read under the slot: a trade may have finished since the batch started
        let account = match self.ledger.latest(exe.exe_id).await {
            Ok(account) => account,
            Err(e) => {
                tracing::error!(exe_id = %exe.exe_id, "Failed to load local account: {}", e);
                PipelineMetrics::add(&self.metrics.ticks_skipped, 1);
                return;
            }
        };

        let op = match account.get_operation(&exe.strategy_props, &tick, &limits) {
            Ok(Some(op)) => op,
            Ok(None) => {
                PipelineMetrics::add(&self.metrics.no_ops, 1);
                return;
            }
            Err(crate::error::BotError::NotFound(e)) => {
                tracing::debug!(symbol = %symbol, "{}", e);
                PipelineMetrics::add(&self.metrics.ticks_skipped, 1);
                return;
            }
            Err(e) => {
                tracing::error!(symbol = %symbol, "Failed to decide operation: {}", e);
                PipelineMetrics::add(&self.metrics.ticks_skipped, 1);
                return;
            }
        };

        PipelineMetrics::add(&self.metrics.trades_dispatched, 1);
        let ctx = TradeContext {
            gateway: self.gateway.clone(),
            executor: self.executor.clone(),
            ledger: self.ledger.clone(),
            metrics: self.metrics.clone(),
        };
        let handle = tokio::spawn(run_trade(ctx, account, op, guard));
        *self.in_flight.lock().await = Some(handle);
    }

    fn skip(&self, count: usize) {
        PipelineMetrics::add(&self.metrics.ticks_skipped, count as u64);
        self.acks.ack(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::exchange::fake::FakeGateway;
    use crate::ledger::LocalAccountInit;
    use crate::lifecycle::ExecutionInit;
    use crate::models::{AssetPrice, MiniMarketStatsAck, RemoteAccount, SpotMarketLimits, StrategyType};
    use crate::persistence::MemoryTickLog;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct Harness {
        pipeline: TickPipeline,
        gateway: Arc<FakeGateway>,
        ledger: Arc<LedgerService>,
        acks: mpsc::Receiver<MiniMarketStatsAck>,
        exe: Execution,
    }

    fn limits() -> SpotMarketLimits {
        SpotMarketLimits {
            min_base: dec!(0.0001),
            max_base: dec!(1000),
            step_base: dec!(0.0001),
            min_quote: dec!(1),
        }
    }

    fn wallet() -> RemoteAccount {
        RemoteAccount::from_pairs([("BTC", dec!(1)), ("ETH", dec!(10)), ("USDT", dec!(1000))])
    }

    async fn harness(gateway: FakeGateway, ack_capacity: usize) -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        let executions = Arc::new(ExecutionService::new(repo.clone(), "USDT"));
        let ledger = Arc::new(LedgerService::new(repo));
        let exe = executions
            .create_or_restore(ExecutionInit {
                remote_account: wallet(),
                strategy_type: StrategyType::Pts,
                strategy_props: HashMap::from([
                    ("sellPercentage".to_string(), "10".to_string()),
                    ("buyPercentage".to_string(), "10".to_string()),
                    ("sellAmountPercentage".to_string(), "50".to_string()),
                    ("buyAmountPercentage".to_string(), "10".to_string()),
                ]),
            })
            .await
            .unwrap();
        let price = |asset: &str, price: Decimal| {
            (
                asset.to_string(),
                AssetPrice {
                    asset: asset.to_string(),
                    price,
                },
            )
        };
        ledger
            .create(LocalAccountInit {
                exe_id: exe.exe_id,
                strategy_type: StrategyType::Pts,
                quote_currency: "USDT".to_string(),
                remote_account: wallet(),
                tradable_asset_prices: HashMap::from([
                    price("BTC", dec!(100)),
                    price("ETH", dec!(10)),
                ]),
            })
            .await
            .unwrap();

        let gateway = Arc::new(gateway);
        let (ack_tx, acks) = mpsc::channel(ack_capacity);
        let pipeline = TickPipeline::new("USDT", gateway.clone(), executions, ledger.clone(), ack_tx);
        Harness {
            pipeline,
            gateway,
            ledger,
            acks,
            exe,
        }
    }

    fn acked(rx: &mut mpsc::Receiver<MiniMarketStatsAck>) -> usize {
        let mut total = 0;
        while let Ok(ack) = rx.try_recv() {
            total += ack.count;
        }
        total
    }

    fn tick(asset: &str, price: Decimal) -> MiniMarketStats {
        MiniMarketStats::flat(asset, price, 0)
    }

    #[tokio::test]
    async fn test_untracked_and_quote_ticks_are_skipped() {
        let gateway = FakeGateway::new(&["BTCUSDT", "ETHUSDT"], limits());
        let mut h = harness(gateway, 16).await;

        h.pipeline
            .handle_batch(vec![tick("DOGE", dec!(1)), tick("USDT", dec!(1))])
            .await;

        let snapshot = h.pipeline.metrics().snapshot();
        assert_eq!(snapshot.ticks_received, 2);
        assert_eq!(snapshot.ticks_skipped, 2);
        assert_eq!(acked(&mut h.acks), 2);
        assert!(h.gateway.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_flat_price_is_a_no_op() {
        let gateway = FakeGateway::new(&["BTCUSDT", "ETHUSDT"], limits());
        let mut h = harness(gateway, 16).await;

        h.pipeline.handle_batch(vec![tick("BTC", dec!(100))]).await;

        assert_eq!(h.pipeline.metrics().snapshot().no_ops, 1);
        assert!(!h.pipeline.slot().is_busy());
        assert_eq!(acked(&mut h.acks), 1);
    }

    #[tokio::test]
    async fn test_closed_market_is_skipped() {
        let mut gateway = FakeGateway::new(&["BTCUSDT", "ETHUSDT"], limits());
        gateway.closed.insert("BTCUSDT".to_string());
        let mut h = harness(gateway, 16).await;

        h.pipeline.handle_batch(vec![tick("BTC", dec!(200))]).await;

        assert_eq!(h.pipeline.metrics().snapshot().ticks_skipped, 1);
        assert_eq!(acked(&mut h.acks), 1);
        assert!(h.gateway.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_one_trade_at_a_time_and_one_ack_per_tick() {
        let gateway = FakeGateway::new(&["BTCUSDT", "ETHUSDT"], limits()).with_accounts(vec![
            wallet(),
            RemoteAccount::from_pairs([("BTC", dec!(0.5)), ("ETH", dec!(10)), ("USDT", dec!(1055))]),
        ]);
        let mut h = harness(gateway, 16).await;

        // hold the slot so the second profitable tick finds it busy
        let (hold_tx, _hold_rx) = mpsc::channel(1);
        let holder = h
            .pipeline
            .slot()
            .try_acquire(AckSender::new(hold_tx, h.pipeline.metrics()))
            .unwrap();
        h.pipeline.handle_batch(vec![tick("ETH", dec!(20))]).await;
        drop(holder);

        h.pipeline
            .handle_batch(vec![tick("BTC", dec!(110)), tick("ETH", dec!(20))])
            .await;
        h.pipeline.drain().await;

        let snapshot = h.pipeline.metrics().snapshot();
        assert_eq!(snapshot.ticks_received, 3);
        assert_eq!(snapshot.trades_dispatched, 1);
        assert_eq!(snapshot.trades_completed, 1);
        assert!(snapshot.ticks_dropped_busy >= 1);
        assert_eq!(acked(&mut h.acks), 3);
        assert_eq!(h.gateway.submitted().len(), 1);
        assert_eq!(h.gateway.submitted()[0].symbol, "BTCUSDT");

        let latest = h.ledger.latest(h.exe.exe_id).await.unwrap();
        assert_eq!(latest.assets["BTC"].amount, dec!(0.5));
    }

    #[tokio::test]
    async fn test_full_ack_channel_drops_and_counts() {
        let gateway = FakeGateway::new(&["BTCUSDT", "ETHUSDT"], limits());
        let mut h = harness(gateway, 1).await;

        h.pipeline
            .handle_batch(vec![tick("DOGE", dec!(1)), tick("SHIB", dec!(1))])
            .await;

        let snapshot = h.pipeline.metrics().snapshot();
        assert_eq!(snapshot.acks_sent, 1);
        assert_eq!(snapshot.acks_dropped, 1);
        assert_eq!(acked(&mut h.acks), 1);
    }

    #[tokio::test]
    async fn test_no_active_execution_acks_whole_batch() {
        let gateway = FakeGateway::new(&["BTCUSDT"], limits());
        let repo = Arc::new(MemoryRepository::new());
        let (ack_tx, mut acks) = mpsc::channel(4);
        let pipeline = TickPipeline::new(
            "USDT",
            Arc::new(gateway),
            Arc::new(ExecutionService::new(repo.clone(), "USDT")),
            Arc::new(LedgerService::new(repo)),
            ack_tx,
        );

        pipeline
            .handle_batch(vec![tick("BTC", dec!(1)), tick("ETH", dec!(1)), tick("BNB", dec!(1))])
            .await;

        assert_eq!(acks.recv().await.unwrap().count, 3);
        assert_eq!(pipeline.metrics().snapshot().ticks_skipped, 3);
    }

    #[tokio::test]
    async fn test_batches_reach_the_tick_log() {
        let gateway = FakeGateway::new(&["BTCUSDT", "ETHUSDT"], limits());
        let h = harness(gateway, 16).await;
        let log = Arc::new(MemoryTickLog::default());
        let pipeline = h.pipeline.with_tick_log(log.clone());

        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![tick("BTC", dec!(100)), tick("ETH", dec!(10))])
            .await
            .unwrap();
        drop(tx);
        pipeline.run(rx).await;

        // append runs on its own task
        for _ in 0..50 {
            if log.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(log.ticks_of("BTCUSDT").len(), 1);
        assert_eq!(log.ticks_of("ETHUSDT").len(), 1);
    }
}
