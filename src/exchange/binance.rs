//! Live Binance spot gateway

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::binance_rest::{BinanceRestClient, SymbolFilter, SymbolInfo};
use super::{
    binance_stream, AckReceiver, ExchangeGateway, MarketOrder, OrderAck, StreamControl,
    TickSender,
};
use crate::config::BinanceSettings;
use crate::error::{BotError, Result};
use crate::models::{symbol_of, AssetPrice, RemoteAccount, SpotMarketLimits};

const TRADING: &str = "TRADING";

pub struct BinanceExchange {
    rest: BinanceRestClient,
    ws_url: String,
    quote: String,
    symbols: RwLock<HashMap<String, SymbolInfo>>,
    ticks: Mutex<Option<TickSender>>,
    control: tokio::sync::Mutex<Option<StreamControl>>,
}

impl BinanceExchange {
    pub fn new(settings: &BinanceSettings, quote: &str) -> Result<Self> {
        Ok(Self {
            rest: BinanceRestClient::new(settings)?,
            ws_url: settings.ws_url.clone(),
            quote: quote.to_string(),
            symbols: RwLock::new(HashMap::new()),
            ticks: Mutex::new(None),
            control: tokio::sync::Mutex::new(None),
        })
    }

    fn symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        self.symbols.read().ok()?.get(symbol).cloned()
    }
}

/// Combine the lot size, market lot size and notional filters of a symbol.
///
/// The tighter bound wins. A zero maximum means the filter does not cap orders.
pub fn limits_from_filters(symbol: &str, filters: &[SymbolFilter]) -> Result<SpotMarketLimits> {
    let mut lot = None;
    let mut market_lot = None;
    let mut notional = None;

    for filter in filters {
        match filter {
            SymbolFilter::LotSize {
                min_qty,
                max_qty,
                step_size,
            } => lot = Some((*min_qty, *max_qty, *step_size)),
            SymbolFilter::MarketLotSize {
                min_qty,
                max_qty,
                step_size,
            } => market_lot = Some((*min_qty, *max_qty, *step_size)),
            SymbolFilter::MinNotional { min_notional } | SymbolFilter::Notional { min_notional } => {
                notional = Some(notional.map_or(*min_notional, |n: Decimal| n.max(*min_notional)))
            }
            SymbolFilter::Other => {}
        }
    }

    let missing = |name: &str| BotError::Internal(format!("{} filter not found for {}", name, symbol));
    let (lot_min, lot_max, lot_step) = lot.ok_or_else(|| missing("LOT_SIZE"))?;
    let (mkt_min, mkt_max, mkt_step) = market_lot.ok_or_else(|| missing("MARKET_LOT_SIZE"))?;
    let min_quote = notional.ok_or_else(|| missing("MIN_NOTIONAL"))?;

    let uncapped = |max: Decimal| if max.is_zero() { Decimal::MAX } else { max };

    Ok(SpotMarketLimits {
        min_base: lot_min.max(mkt_min),
        max_base: uncapped(lot_max).min(uncapped(mkt_max)),
        step_base: lot_step.max(mkt_step),
        min_quote,
    })
}

#[async_trait]
impl ExchangeGateway for BinanceExchange {
    async fn initialize(&self, ticks: TickSender, _acks: AckReceiver) -> Result<()> {
        let info = self.rest.exchange_info().await?;
        info!("Registering {} exchange symbols", info.symbols.len());

        let symbols = info
            .symbols
            .into_iter()
            .map(|s| (s.symbol.clone(), s))
            .collect();
        *self
            .symbols
            .write()
            .map_err(|_| BotError::Internal("symbol cache poisoned".to_string()))? = symbols;
        *self
            .ticks
            .lock()
            .map_err(|_| BotError::Internal("tick sender poisoned".to_string()))? = Some(ticks);
        Ok(())
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols
            .read()
            .map(|s| s.contains_key(symbol))
            .unwrap_or(false)
    }

    fn can_spot_trade(&self, symbol: &str) -> bool {
        self.symbol_info(symbol)
            .map(|s| s.status == TRADING && s.is_spot_trading_allowed)
            .unwrap_or(false)
    }

    fn get_spot_market_limits(&self, symbol: &str) -> Result<SpotMarketLimits> {
        let info = self
            .symbol_info(symbol)
            .ok_or_else(|| BotError::Internal(format!("exchange symbol {} not found", symbol)))?;
        limits_from_filters(symbol, &info.filters)
    }

    fn filter_tradable_assets(&self, assets: &[String]) -> Vec<String> {
        assets
            .iter()
            .filter(|asset| {
                if **asset == self.quote {
                    return false;
                }
                let tradable = self.has_symbol(&symbol_of(asset, &self.quote));
                if !tradable {
                    warn!(asset = %asset, "Asset cannot be traded against {}", self.quote);
                }
                tradable
            })
            .cloned()
            .collect()
    }

    async fn get_assets_value(&self, assets: &[String]) -> Result<HashMap<String, AssetPrice>> {
        let wanted: HashMap<String, String> = self
            .filter_tradable_assets(assets)
            .into_iter()
            .map(|asset| (symbol_of(&asset, &self.quote), asset))
            .collect();
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }

        let prices = self
            .rest
            .ticker_prices()
            .await?
            .into_iter()
            .filter_map(|t| {
                let asset = wanted.get(&t.symbol)?.clone();
                Some((
                    asset.clone(),
                    AssetPrice {
                        asset,
                        price: t.price,
                    },
                ))
            })
            .collect();
        Ok(prices)
    }

    async fn get_account(&self) -> Result<RemoteAccount> {
        let balances = self.rest.account().await?;
        Ok(RemoteAccount::from_pairs(
            balances.into_iter().map(|b| (b.asset, b.free)),
        ))
    }

    async fn send_spot_market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        let ack = self.rest.market_order(order).await?;
        info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            order_id = %ack.order_id,
            status = %ack.status,
            "Market order placed"
        );
        Ok(ack)
    }

    async fn start_market_data_stream(&self) -> Result<()> {
        let ticks = self
            .ticks
            .lock()
            .map_err(|_| BotError::Internal("tick sender poisoned".to_string()))?
            .take()
            .ok_or_else(|| {
                BotError::Internal("gateway not initialized or already streaming".to_string())
            })?;

        let control = binance_stream::spawn(&self.ws_url, &self.quote, ticks);
        *self.control.lock().await = Some(control);
        info!("Mini ticker stream started");
        Ok(())
    }

    async fn stop_market_data_stream(&self) {
        if let Some(control) = self.control.lock().await.take() {
            control.shutdown().await;
        }
    }
}
