//! Offline gateway replaying recorded or synthetic price series
//!
//! The replay holds a simulated wallet and one tick queue per asset. Every
//! batch carries the head of each non-empty queue, and the next batch is only
//! emitted once the pipeline has acknowledged every tick of the current one,
//! so orders always fill at the price the strategy saw.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::synthetic::{MarketScenario, SyntheticDataGenerator};
use super::{
    AckReceiver, ExchangeGateway, MarketOrder, OrderAck, OrderQuantity, StreamControl, TickSender,
};
use crate::error::{BotError, Result};
use crate::models::{symbol_of, AssetPrice, MiniMarketStats, RemoteAccount, Side, SpotMarketLimits};
use crate::numeric::round8;

// ordered so every batch lists assets the same way on every run
type Series = Arc<Mutex<BTreeMap<String, VecDeque<MiniMarketStats>>>>;

fn replay_limits() -> SpotMarketLimits {
    SpotMarketLimits {
        min_base: Decimal::new(1, 8),
        max_base: Decimal::new(99_999_999, 0),
        step_base: Decimal::new(1, 8),
        min_quote: Decimal::new(1, 8),
    }
}

pub struct ReplayExchange {
    quote: String,
    balances: Mutex<BTreeMap<String, Decimal>>,
    series: Series,
    channels: Mutex<Option<(TickSender, AckReceiver)>>,
    control: tokio::sync::Mutex<Option<StreamControl>>,
    order_seq: Mutex<u64>,
}

impl ReplayExchange {
    /// Build a replay from a starting wallet and per-asset tick series.
    ///
    /// Every non-quote asset in the wallet needs a series. Series for assets
    /// outside the wallet are dropped.
    pub fn new(
        quote: &str,
        balances: HashMap<String, Decimal>,
        series: HashMap<String, Vec<MiniMarketStats>>,
    ) -> Result<Self> {
        for asset in balances.keys() {
            if asset == quote {
                continue;
            }
            if asset.ends_with(quote) {
                return Err(BotError::BadRequest(format!(
                    "wallet entries must be assets, not symbols: {}",
                    asset
                )));
            }
            if !series.contains_key(asset) {
                return Err(BotError::BadRequest(format!(
                    "no prices provided for {}",
                    symbol_of(asset, quote)
                )));
            }
        }

        let mut queues = BTreeMap::new();
        for (asset, mut ticks) in series {
            if !balances.contains_key(&asset) {
                warn!(asset = %asset, "Skipping prices of asset not in wallet");
                continue;
            }
            ticks.sort_by_key(|t| t.time);
            info!(asset = %asset, ticks = ticks.len(), "Loaded replay series");
            queues.insert(asset, VecDeque::from(ticks));
        }

        Ok(Self {
            quote: quote.to_string(),
            balances: Mutex::new(balances.into_iter().collect()),
            series: Arc::new(Mutex::new(queues)),
            channels: Mutex::new(None),
            control: tokio::sync::Mutex::new(None),
            order_seq: Mutex::new(0),
        })
    }

    /// Replay price history CSV files, one symbol per file
    pub fn from_csv_files<P: AsRef<Path>>(
        quote: &str,
        balances: HashMap<String, Decimal>,
        paths: &[P],
    ) -> Result<Self> {
        let mut series: HashMap<String, Vec<MiniMarketStats>> = HashMap::new();
        for path in paths {
            let file = std::fs::File::open(path.as_ref()).map_err(|e| {
                BotError::BadRequest(format!("cannot read {}: {}", path.as_ref().display(), e))
            })?;
            for tick in parse_price_csv(file, quote)? {
                series.entry(tick.asset.clone()).or_default().push(tick);
            }
        }
        Self::new(quote, balances, series)
    }

    /// Replay generated series, one per asset in `start_prices`
    pub fn synthetic(
        quote: &str,
        balances: HashMap<String, Decimal>,
        start_prices: &HashMap<String, Decimal>,
        scenario: MarketScenario,
        num_ticks: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut generator = SyntheticDataGenerator::new(seed);

        // sorted so a seed always maps to the same series
        let mut assets: Vec<&String> = start_prices.keys().collect();
        assets.sort();

        let series = assets
            .into_iter()
            .map(|asset| {
                let ticks = generator.generate(asset, start_prices[asset], scenario, num_ticks, 1);
                (asset.clone(), ticks)
            })
            .collect();
        Self::new(quote, balances, series)
    }

    fn asset_of<'a>(&self, symbol: &'a str) -> Option<&'a str> {
        symbol
            .strip_suffix(self.quote.as_str())
            .filter(|asset| !asset.is_empty())
    }

    fn head_price(&self, asset: &str) -> Option<Decimal> {
        let series = self.series.lock().ok()?;
        series
            .get(asset)
            .and_then(|q| q.front())
            .map(|t| t.last_price)
    }
}

/// One row of a price history file
#[derive(Debug, Deserialize)]
struct PriceRow {
    unix: i64,
    _date: IgnoredAny,
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    volume_base: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    volume_quote: Decimal,
}

/// Parse `unix,date,symbol,open,high,low,close,volume_base,volume_quote` rows.
///
/// The header and rows with a malformed timestamp are skipped; rows may come
/// in any order.
pub fn parse_price_csv<R: std::io::Read>(input: R, quote: &str) -> Result<Vec<MiniMarketStats>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut ticks = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| BotError::BadRequest(format!("bad price file: {}", e)))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.get(0).map_or(true, |t| t.parse::<i64>().is_err()) {
            debug!(line, "Skipping non-data row");
            continue;
        }

        let row: PriceRow = record
            .deserialize(None)
            .map_err(|e| BotError::BadRequest(format!("line {}: {}", line, e)))?;

        let symbol = row.symbol.replace('/', "").to_uppercase();
        let asset = match symbol.strip_suffix(quote) {
            Some(asset) if !asset.is_empty() => asset.to_string(),
            _ => {
                return Err(BotError::BadRequest(format!(
                    "line {}: {} is not quoted in {}",
                    line, symbol, quote
                )))
            }
        };

        ticks.push(MiniMarketStats {
            asset,
            open_price: row.open,
            high_price: row.high,
            low_price: row.low,
            last_price: row.close,
            base_volume: row.volume_base,
            quote_volume: row.volume_quote,
            time: row.unix,
        });
    }

    ticks.sort_by_key(|t| t.time);
    Ok(ticks)
}

#[async_trait]
impl ExchangeGateway for ReplayExchange {
    async fn initialize(&self, ticks: TickSender, acks: AckReceiver) -> Result<()> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| BotError::Internal("replay channels poisoned".to_string()))?;
        *channels = Some((ticks, acks));
        Ok(())
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        match (self.asset_of(symbol), self.series.lock()) {
            (Some(asset), Ok(series)) => series.contains_key(asset),
            _ => false,
        }
    }

    fn can_spot_trade(&self, symbol: &str) -> bool {
        self.has_symbol(symbol)
    }

    fn get_spot_market_limits(&self, symbol: &str) -> Result<SpotMarketLimits> {
        if !self.has_symbol(symbol) {
            return Err(BotError::Internal(format!("unknown symbol {}", symbol)));
        }
        Ok(replay_limits())
    }

    fn filter_tradable_assets(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .filter(|a| **a != self.quote && self.has_symbol(&symbol_of(a, &self.quote)))
            .cloned()
            .collect()
    }

    async fn get_assets_value(&self, assets: &[String]) -> Result<HashMap<String, AssetPrice>> {
        let mut prices = HashMap::new();
        for asset in self.filter_tradable_assets(assets) {
            let price = self.head_price(&asset).ok_or_else(|| {
                BotError::Exchange(format!("no price left for {}", symbol_of(&asset, &self.quote)))
            })?;
            prices.insert(asset.clone(), AssetPrice { asset, price });
        }
        Ok(prices)
    }

    async fn get_account(&self) -> Result<RemoteAccount> {
        let balances = self
            .balances
            .lock()
            .map_err(|_| BotError::Internal("replay wallet poisoned".to_string()))?;
        Ok(RemoteAccount::from_pairs(
            balances
                .iter()
                .filter(|(_, amount)| !amount.is_zero())
                .map(|(asset, amount)| (asset.clone(), *amount)),
        ))
    }

    async fn send_spot_market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        let base = self
            .asset_of(&order.symbol)
            .ok_or_else(|| BotError::Internal(format!("unknown symbol {}", order.symbol)))?;
        let price = self.head_price(base).ok_or_else(|| {
            BotError::Exchange(format!("no price left for {}", order.symbol))
        })?;

        let (base_amount, quote_amount) = match order.quantity {
            OrderQuantity::Base(qty) => (qty, round8(qty * price)),
            OrderQuantity::Quote(qty) => (round8(qty / price), qty),
        };

        let mut balances = self
            .balances
            .lock()
            .map_err(|_| BotError::Internal("replay wallet poisoned".to_string()))?;
        let base_available = balances.get(base).copied().unwrap_or_default();
        let quote_available = balances.get(&self.quote).copied().unwrap_or_default();

        let (base_after, quote_after) = match order.side {
            Side::Buy => (base_available + base_amount, quote_available - quote_amount),
            Side::Sell => (base_available - base_amount, quote_available + quote_amount),
        };
        if base_after.is_sign_negative() || quote_after.is_sign_negative() {
            return Err(BotError::Exchange(format!(
                "insufficient balance for {} {} {:?}",
                order.symbol,
                order.side.as_str(),
                order.quantity
            )));
        }

        balances.insert(base.to_string(), round8(base_after));
        balances.insert(self.quote.clone(), round8(quote_after));
        drop(balances);

        let order_id = {
            let mut seq = self
                .order_seq
                .lock()
                .map_err(|_| BotError::Internal("replay order counter poisoned".to_string()))?;
            *seq += 1;
            *seq
        };
        debug!(symbol = %order.symbol, side = order.side.as_str(), price = %price, "Replay fill");

        Ok(OrderAck {
            order_id: order_id.to_string(),
            status: "FILLED".to_string(),
            executed_base: base_amount,
            executed_quote: quote_amount,
        })
    }

    async fn start_market_data_stream(&self) -> Result<()> {
        let (ticks, acks) = self
            .channels
            .lock()
            .map_err(|_| BotError::Internal("replay channels poisoned".to_string()))?
            .take()
            .ok_or_else(|| {
                BotError::Internal("replay not initialized or already streaming".to_string())
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let done = tokio::spawn(serve(self.series.clone(), ticks, acks, stop_rx));
        *self.control.lock().await = Some(StreamControl::new(stop_tx, done));
        Ok(())
    }

    async fn stop_market_data_stream(&self) {
        if let Some(control) = self.control.lock().await.take() {
            info!("Stopping replay");
            control.shutdown().await;
        }
    }
}

/// Emit one batch per step until every queue is drained or stop is signalled.
/// Dropping `ticks` on return closes the market data channel.
async fn serve(
    series: Series,
    ticks: TickSender,
    mut acks: AckReceiver,
    mut stop: oneshot::Receiver<()>,
) {
    let mut batches = 0usize;

    loop {
        let batch: Vec<MiniMarketStats> = match series.lock() {
            Ok(series) => series.values().filter_map(|q| q.front().cloned()).collect(),
            Err(_) => break,
        };
        if batch.is_empty() {
            info!(batches, "Replay exhausted");
            break;
        }
        let size = batch.len();

        tokio::select! {
            sent = ticks.send(batch) => {
                if sent.is_err() {
                    info!("Tick channel closed, ending replay");
                    break;
                }
            }
            _ = &mut stop => break,
        }

        let mut acked = 0;
        while acked < size {
            tokio::select! {
                ack = acks.recv() => match ack {
                    Some(ack) => acked += ack.count,
                    None => {
                        warn!("Ack channel closed, ending replay");
                        return;
                    }
                },
                _ = &mut stop => return,
            }
        }

        if let Ok(mut series) = series.lock() {
            for queue in series.values_mut() {
                queue.pop_front();
            }
        }
        batches += 1;
    }
}
