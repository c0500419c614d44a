//! Scriptable gateway for unit tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use super::{AckReceiver, ExchangeGateway, MarketOrder, OrderAck, TickSender};
use crate::error::{BotError, Result};
use crate::models::{AssetPrice, RemoteAccount, SpotMarketLimits};

pub struct FakeGateway {
    pub symbols: HashSet<String>,
    pub closed: HashSet<String>,
    pub limits: SpotMarketLimits,
    /// Outcome of each submitted order in order; empty means success
    pub outcomes: Mutex<VecDeque<bool>>,
    pub orders: Mutex<Vec<MarketOrder>>,
    /// Accounts returned by successive `get_account` calls; the last one repeats
    pub accounts: Mutex<VecDeque<RemoteAccount>>,
}

impl FakeGateway {
    pub fn new(symbols: &[&str], limits: SpotMarketLimits) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            closed: HashSet::new(),
            limits,
            outcomes: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            accounts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_outcomes(self, outcomes: &[bool]) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.iter().copied().collect();
        self
    }

    pub fn with_accounts(self, accounts: Vec<RemoteAccount>) -> Self {
        *self.accounts.lock().unwrap() = accounts.into();
        self
    }

    pub fn submitted(&self) -> Vec<MarketOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn initialize(&self, _ticks: TickSender, _acks: AckReceiver) -> Result<()> {
        Ok(())
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    fn can_spot_trade(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol) && !self.closed.contains(symbol)
    }

    fn get_spot_market_limits(&self, _symbol: &str) -> Result<SpotMarketLimits> {
        Ok(self.limits)
    }

    fn filter_tradable_assets(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .filter(|a| self.symbols.contains(&format!("{}USDT", a)))
            .cloned()
            .collect()
    }

    async fn get_assets_value(&self, _assets: &[String]) -> Result<HashMap<String, AssetPrice>> {
        Ok(HashMap::new())
    }

    async fn get_account(&self) -> Result<RemoteAccount> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.len() > 1 {
            Ok(accounts.pop_front().unwrap_or_default())
        } else {
            Ok(accounts.front().cloned().unwrap_or_default())
        }
    }

    async fn send_spot_market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        self.orders.lock().unwrap().push(order.clone());
        let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(OrderAck {
                order_id: format!("fake-{}", self.orders.lock().unwrap().len()),
                status: "FILLED".to_string(),
                executed_base: Decimal::ZERO,
                executed_quote: Decimal::ZERO,
            })
        } else {
            Err(BotError::Exchange("order rejected".to_string()))
        }
    }

    async fn start_market_data_stream(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_market_data_stream(&self) {}
}
