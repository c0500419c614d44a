//! Signed REST access to the Binance spot API

use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{MarketOrder, OrderAck, OrderQuantity};
use crate::config::BinanceSettings;
use crate::error::{BotError, Result};

const MAX_RETRIES: u32 = 3;
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// `GET /api/v3/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub is_spot_trading_allowed: bool,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// The subset of symbol filters that bound market orders
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        min_qty: Decimal,
        max_qty: Decimal,
        step_size: Decimal,
    },
    #[serde(rename = "MARKET_LOT_SIZE", rename_all = "camelCase")]
    MarketLotSize {
        min_qty: Decimal,
        max_qty: Decimal,
        step_size: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional { min_notional: Decimal },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional { min_notional: Decimal },
    #[serde(other)]
    Other,
}

/// `GET /api/v3/account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// `GET /api/v3/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// `POST /api/v3/order` (FULL or RESULT response)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default)]
    cummulative_quote_qty: Decimal,
}

/// Rate limited, signing Binance REST client.
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceRestClient {
    pub fn new(settings: &BinanceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let rpm = NonZeroU32::new(settings.requests_per_minute).ok_or_else(|| {
            BotError::Configuration("requests_per_minute must be positive".to_string())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: settings.rest_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            secret_key: settings.secret_key.clone(),
            recv_window_ms: settings.recv_window_ms,
            rate_limiter,
        })
    }

    pub async fn exchange_info(&self) -> Result<ExchangeInfo> {
        self.public(Method::GET, "/api/v3/exchangeInfo", &[]).await
    }

    /// Free balances, zero balances dropped
    pub async fn account(&self) -> Result<Vec<Balance>> {
        let info: AccountInfo = self
            .signed(Method::GET, "/api/v3/account", Vec::new(), true)
            .await?;
        Ok(info
            .balances
            .into_iter()
            .filter(|b| !b.free.is_zero())
            .collect())
    }

    pub async fn ticker_prices(&self) -> Result<Vec<TickerPrice>> {
        self.public(Method::GET, "/api/v3/ticker/price", &[]).await
    }

    /// Place a MARKET order. Not retried on transport or server errors since the
    /// order may already be live.
    pub async fn market_order(&self, order: &MarketOrder) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), order.side.as_str().to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("newOrderRespType".to_string(), "RESULT".to_string()),
        ];
        match order.quantity {
            OrderQuantity::Base(qty) => {
                params.push(("quantity".to_string(), qty.normalize().to_string()))
            }
            OrderQuantity::Quote(qty) => {
                params.push(("quoteOrderQty".to_string(), qty.normalize().to_string()))
            }
        }

        let response: OrderResponse = self
            .signed(Method::POST, "/api/v3/order", params, false)
            .await?;

        Ok(OrderAck {
            order_id: response.order_id.to_string(),
            status: response.status,
            executed_base: response.executed_qty,
            executed_quote: response.cummulative_quote_qty,
        })
    }

    async fn public<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .make_request(|| self.client.request(method.clone(), &url), true)
            .await?;
        Ok(response.json().await?)
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
        retry: bool,
    ) -> Result<T> {
        let response = self
            .make_request(
                || {
                    // timestamp must be fresh on every attempt
                    let query = self.signed_query(&params, chrono::Utc::now().timestamp_millis());
                    self.client
                        .request(method.clone(), format!("{}{}?{}", self.base_url, path, query))
                        .header(API_KEY_HEADER, &self.api_key)
                },
                retry,
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Query string with `recvWindow`, `timestamp` and trailing `signature`
    fn signed_query(&self, params: &[(String, String)], timestamp: i64) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", timestamp));
        let query = query.join("&");

        let signature = sign(&self.secret_key, &query);
        format!("{}&signature={}", query, signature)
    }

    /// Rate-limited request with retry on 429 and 5xx
    async fn make_request<F>(&self, build: F, retry: bool) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = if retry { MAX_RETRIES } else { 1 };

        for attempt in 1..=attempts {
            self.rate_limiter.until_ready().await;

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    if (status.as_u16() == 429 || status.is_server_error()) && attempt < attempts {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "Binance returned {}, retrying in {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            attempts
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(BotError::Exchange(format!(
                        "Binance API error ({}): {}",
                        status, error_text
                    )));
                }
                Err(e) if attempt < attempts => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BotError::Exchange(format!(
            "Binance request failed after {} attempts",
            attempts
        )))
    }
}

/// Hex encoded HMAC-SHA256 of `payload`
fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
