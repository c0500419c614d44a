use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::time::{timeout, Duration};

use crate::error::{BotError, Result};
use crate::models::{symbol_of, MiniMarketStats};

/// Durable append-only log of raw market ticks
#[async_trait]
pub trait TickLog: Send + Sync {
    async fn append(&self, quote: &str, ticks: &[MiniMarketStats]) -> Result<()>;
}

/// Compact tick for Redis storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTick {
    price: Decimal,
    base_volume: Decimal,
    quote_volume: Decimal,
    time: i64,
}

/// Redis tick log
///
/// Uses sorted sets with the tick time (unix ms) as score for efficient
/// time-range queries
#[derive(Clone)]
pub struct RedisPersistence {
    conn: ConnectionManager,
}

impl RedisPersistence {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                BotError::Persistence("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn key(symbol: &str) -> String {
        format!("ticks:{}", symbol)
    }

    /// Load ticks of `symbol` from the last `hours_back` hours, oldest first
    pub async fn load_ticks(
        &self,
        symbol: &str,
        asset: &str,
        hours_back: u64,
    ) -> Result<Vec<MiniMarketStats>> {
        let mut conn = self.conn.clone();
        let cutoff = Utc::now() - chrono::Duration::hours(hours_back as i64);
        let min_score = cutoff.timestamp_millis() as f64;

        let results: Vec<String> = conn
            .zrangebyscore(Self::key(symbol), min_score, "+inf")
            .await?;

        let mut ticks = Vec::with_capacity(results.len());
        for json_str in results {
            let stored: StoredTick = serde_json::from_str(&json_str)?;
            ticks.push(MiniMarketStats {
                base_volume: stored.base_volume,
                quote_volume: stored.quote_volume,
                ..MiniMarketStats::flat(asset, stored.price, stored.time)
            });
        }

        tracing::debug!("Loaded {} ticks for {} from Redis", ticks.len(), symbol);
        Ok(ticks)
    }

    /// Remove ticks older than `keep_hours` to prevent unbounded growth
    pub async fn cleanup_old(&self, symbol: &str, keep_hours: u64) -> Result<usize> {
        let mut conn = self.conn.clone();
        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);
        let max_score = cutoff.timestamp_millis() as f64;

        let removed: usize = conn
            .zrembyscore(Self::key(symbol), "-inf", max_score)
            .await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old ticks for {}", removed, symbol);
        }

        Ok(removed)
    }

    pub async fn count_ticks(&self, symbol: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(Self::key(symbol)).await?;
        Ok(count)
    }
}

#[async_trait]
impl TickLog for RedisPersistence {
    async fn append(&self, quote: &str, ticks: &[MiniMarketStats]) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();

        for tick in ticks {
            let stored = StoredTick {
                price: tick.last_price,
                base_volume: tick.base_volume,
                quote_volume: tick.quote_volume,
                time: tick.time,
            };
            let value = serde_json::to_string(&stored)?;
            pipe.zadd(Self::key(&symbol_of(&tick.asset, quote)), value, tick.time as f64)
                .ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;
        tracing::trace!("Saved {} ticks to Redis", ticks.len());
        Ok(())
    }
}

/// In-process tick log for tests and simulations
#[derive(Default)]
pub struct MemoryTickLog {
    ticks: Mutex<Vec<(String, MiniMarketStats)>>,
}

impl MemoryTickLog {
    pub fn len(&self) -> usize {
        self.ticks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logged ticks of `symbol`, in arrival order
    pub fn ticks_of(&self, symbol: &str) -> Vec<MiniMarketStats> {
        self.ticks
            .lock()
            .map(|t| {
                t.iter()
                    .filter(|(s, _)| s == symbol)
                    .map(|(_, tick)| tick.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TickLog for MemoryTickLog {
    async fn append(&self, quote: &str, ticks: &[MiniMarketStats]) -> Result<()> {
        let mut log = self
            .ticks
            .lock()
            .map_err(|_| BotError::Persistence("tick log poisoned".to_string()))?;
        log.extend(
            ticks
                .iter()
                .map(|t| (symbol_of(&t.asset, quote), t.clone())),
        );
        Ok(())
    }
}
