//! Top-level handle wiring the gateway, services and pipeline together

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::db::Repository;
use crate::error::{BotError, Result};
use crate::exchange::ExchangeGateway;
use crate::ledger::{LedgerService, LocalAccount, LocalAccountInit};
use crate::lifecycle::{ExecutionInit, ExecutionService};
use crate::models::{Execution, MiniMarketStats, Operation, StrategyType};
use crate::persistence::TickLog;
use crate::pipeline::{MetricsSnapshot, TickPipeline};
use crate::strategy::StrategyConfig;

pub struct TradingBot {
    quote: String,
    gateway: Arc<dyn ExchangeGateway>,
    executions: Arc<ExecutionService>,
    ledger: Arc<LedgerService>,
    pipeline: Arc<TickPipeline>,
    ticks: Mutex<Option<mpsc::Receiver<Vec<MiniMarketStats>>>>,
}

impl TradingBot {
    /// Build the bot and hand the gateway its channels
    pub async fn new(
        quote: &str,
        gateway: Arc<dyn ExchangeGateway>,
        repo: Arc<dyn Repository>,
        tick_log: Option<Arc<dyn TickLog>>,
        settings: &PipelineSettings,
    ) -> Result<Self> {
        let (tick_tx, tick_rx) = mpsc::channel(settings.tick_channel_size);
        let (ack_tx, ack_rx) = mpsc::channel(settings.ack_channel_size);
        gateway.initialize(tick_tx, ack_rx).await?;

        let executions = Arc::new(ExecutionService::new(repo.clone(), quote));
        let ledger = Arc::new(LedgerService::new(repo));

        let mut pipeline = TickPipeline::new(
            quote,
            gateway.clone(),
            executions.clone(),
            ledger.clone(),
            ack_tx,
        );
        if let Some(log) = tick_log {
            pipeline = pipeline.with_tick_log(log);
        }

        Ok(Self {
            quote: quote.to_string(),
            gateway,
            executions,
            ledger,
            pipeline: Arc::new(pipeline),
            ticks: Mutex::new(Some(tick_rx)),
        })
    }

    /// Restore the active execution, or start one over the current wallet.
    ///
    /// Properties are validated first so a bad configuration never creates
    /// an execution.
    pub async fn create_or_restore_execution(
        &self,
        strategy_type: StrategyType,
        props: HashMap<String, String>,
    ) -> Result<Execution> {
        StrategyConfig::parse(strategy_type, &props)?;

        let remote = self.gateway.get_account().await?;
        let exe = self
            .executions
            .create_or_restore(ExecutionInit {
                remote_account: remote.clone(),
                strategy_type,
                strategy_props: props,
            })
            .await?;
        if exe.strategy_type != strategy_type {
            tracing::warn!(
                exe_id = %exe.exe_id,
                active = %exe.strategy_type,
                requested = %strategy_type,
                "Active execution keeps its own strategy"
            );
        }

        let assets: Vec<String> = remote.balances.iter().map(|b| b.asset.clone()).collect();
        let tradable = self.gateway.filter_tradable_assets(&assets);
        let prices = self.gateway.get_assets_value(&tradable).await?;

        self.ledger
            .create_or_restore(LocalAccountInit {
                exe_id: exe.exe_id,
                strategy_type: exe.strategy_type,
                quote_currency: self.quote.clone(),
                remote_account: remote,
                tradable_asset_prices: prices,
            })
            .await?;

        Ok(exe)
    }

    pub async fn terminate_execution(&self, exe_id: Uuid) -> Result<Execution> {
        self.executions.terminate(exe_id).await
    }

    pub async fn get_execution(&self, exe_id: Uuid) -> Result<Execution> {
        self.executions
            .get_by_exe_id(exe_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("execution {} not found", exe_id)))
    }

    pub async fn get_active_execution(&self) -> Result<Option<Execution>> {
        self.executions.get_currently_active().await
    }

    pub async fn get_local_account(&self, exe_id: Uuid) -> Result<Arc<LocalAccount>> {
        self.ledger.latest(exe_id).await
    }

    pub async fn get_asset_amounts(&self, exe_id: Uuid) -> Result<HashMap<String, Decimal>> {
        Ok(self.ledger.latest(exe_id).await?.get_asset_amounts())
    }

    pub async fn get_operations(&self, exe_id: Uuid) -> Result<Vec<Operation>> {
        self.ledger.operations(exe_id).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pipeline.metrics().snapshot()
    }

    /// Stream market data through the pipeline until the stream ends or
    /// `shutdown` resolves. Can only be called once.
    pub async fn run<F>(&self, shutdown: F) -> Result<MetricsSnapshot>
    where
        F: Future<Output = ()>,
    {
        let ticks = self
            .ticks
            .lock()
            .await
            .take()
            .ok_or_else(|| BotError::Conflict("bot is already running".to_string()))?;

        let pipeline = self.pipeline.clone();
        let mut consumer = tokio::spawn(async move { pipeline.run(ticks).await });
        self.gateway.start_market_data_stream().await?;

        tokio::select! {
            finished = &mut consumer => {
                finished.map_err(|e| BotError::Internal(format!("pipeline task failed: {}", e)))?;
                self.gateway.stop_market_data_stream().await;
            }
            _ = shutdown => {
                tracing::info!("Shutdown requested");
                // the producer drops its sender on stop, which ends the pipeline
                self.gateway.stop_market_data_stream().await;
                consumer
                    .await
                    .map_err(|e| BotError::Internal(format!("pipeline task failed: {}", e)))?;
            }
        }

        Ok(self.metrics())
    }
}
