use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::BotError;
use crate::models::MiniMarketStats;
use crate::numeric::round8;

/// Market scenario types for synthetic tick generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% around the opening price)
    Sideways,
    /// Large swings (±5% per tick)
    Volatile,
}

impl FromStr for MarketScenario {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" => Ok(MarketScenario::Uptrend),
            "downtrend" => Ok(MarketScenario::Downtrend),
            "sideways" => Ok(MarketScenario::Sideways),
            "volatile" => Ok(MarketScenario::Volatile),
            other => Err(BotError::BadRequest(format!("unknown scenario {}", other))),
        }
    }
}

/// Generates synthetic mini ticker series for replay
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_volume: 1_000.0,
        }
    }

    /// Generate `num_ticks` ticks for `asset` starting at `start_price`,
    /// `interval_minutes` apart and ending now
    pub fn generate(
        &mut self,
        asset: &str,
        start_price: Decimal,
        scenario: MarketScenario,
        num_ticks: usize,
        interval_minutes: i64,
    ) -> Vec<MiniMarketStats> {
        let start_time = Utc::now() - Duration::minutes(num_ticks as i64 * interval_minutes);
        let base_price = start_price.to_f64().unwrap_or(1.0);
        let mut ticks = Vec::with_capacity(num_ticks);
        let mut current_price = base_price;

        // +/-2% per day spread over the ticks of one day
        let drift_per_interval = 0.02 / (24.0 * 60.0 / interval_minutes as f64);

        for i in 0..num_ticks {
            let time = start_time + Duration::minutes(i as i64 * interval_minutes);

            current_price += match scenario {
                MarketScenario::Uptrend => {
                    current_price * drift_per_interval
                        + current_price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Downtrend => {
                    -current_price * drift_per_interval
                        + current_price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Sideways => {
                    (base_price - current_price) * 0.1
                        + current_price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => current_price * self.rng.gen_range(-0.05..0.05),
            };

            // Prevent price from collapsing
            if current_price < base_price * 0.5 {
                current_price = base_price * 0.5;
            }

            ticks.push(self.create_tick(asset, current_price, time.timestamp_millis()));
        }

        ticks
    }

    /// Build a tick with a plausible OHLC envelope around `price`
    fn create_tick(&mut self, asset: &str, price: f64, time: i64) -> MiniMarketStats {
        let noise_pct = 0.002;

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        MiniMarketStats {
            asset: asset.to_string(),
            last_price: to_decimal(price),
            open_price: to_decimal(open),
            high_price: to_decimal(high),
            low_price: to_decimal(low),
            base_volume: to_decimal(volume),
            quote_volume: to_decimal(volume * price),
            time,
        }
    }
}

fn to_decimal(value: f64) -> Decimal {
    round8(Decimal::from_f64(value).unwrap_or(Decimal::ZERO))
}
