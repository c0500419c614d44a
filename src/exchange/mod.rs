// Exchange gateways: live Binance and offline replay
pub mod binance;
pub mod binance_rest;
pub mod binance_stream;
pub mod replay;
pub mod synthetic;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{
    AssetPrice, MiniMarketStats, MiniMarketStatsAck, RemoteAccount, Side, SpotMarketLimits,
};

pub use binance::BinanceExchange;
pub use replay::ReplayExchange;

/// Sending half of the market data channel
pub type TickSender = mpsc::Sender<Vec<MiniMarketStats>>;
/// Receiving half of the flow-control channel
pub type AckReceiver = mpsc::Receiver<MiniMarketStatsAck>;

/// How a market order is sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderQuantity {
    /// Amount of base asset to buy or sell
    Base(Decimal),
    /// Amount of quote asset to spend or receive
    Quote(Decimal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: OrderQuantity,
}

/// Exchange acknowledgement of a submitted market order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub executed_base: Decimal,
    pub executed_quote: Decimal,
}

/// Upstream market access.
///
/// The pipeline only talks to the exchange through this trait so the live
/// gateway and the replay gateway are interchangeable.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Hand the gateway the market data producer and the ack consumer.
    /// Must be called before [`ExchangeGateway::start_market_data_stream`].
    async fn initialize(&self, ticks: TickSender, acks: AckReceiver) -> Result<()>;

    /// Whether the exchange lists `symbol` at all
    fn has_symbol(&self, symbol: &str) -> bool;

    /// Whether `symbol` is currently open for spot trading
    fn can_spot_trade(&self, symbol: &str) -> bool;

    fn get_spot_market_limits(&self, symbol: &str) -> Result<SpotMarketLimits>;

    /// Subset of `assets` that can be traded against the quote currency
    fn filter_tradable_assets(&self, assets: &[String]) -> Vec<String>;

    /// Current price of each asset, in the quote currency
    async fn get_assets_value(&self, assets: &[String]) -> Result<HashMap<String, AssetPrice>>;

    /// Non-zero free balances
    async fn get_account(&self) -> Result<RemoteAccount>;

    async fn send_spot_market_order(&self, order: &MarketOrder) -> Result<OrderAck>;

    async fn start_market_data_stream(&self) -> Result<()>;

    /// Stop producing ticks and wait until the producer has exited
    async fn stop_market_data_stream(&self);
}

/// Stop/done rendezvous for a spawned producer task
pub(crate) struct StreamControl {
    stop: oneshot::Sender<()>,
    done: JoinHandle<()>,
}

impl StreamControl {
    pub(crate) fn new(stop: oneshot::Sender<()>, done: JoinHandle<()>) -> Self {
        Self { stop, done }
    }

    /// Signal the producer and wait for it to finish
    pub(crate) async fn shutdown(self) {
        // producer may already have exited on its own
        let _ = self.stop.send(());
        if let Err(e) = self.done.await {
            tracing::error!("Market data producer ended abnormally: {}", e);
        }
    }
}
