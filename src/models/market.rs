use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One rolling 24h mini-ticker update for an asset quoted in the quote currency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiniMarketStats {
    pub asset: String,
    pub last_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
    /// Event time, unix milliseconds
    pub time: i64,
}

impl MiniMarketStats {
    /// Tick where every price field equals `price` (used by replay and tests)
    pub fn flat(asset: &str, price: Decimal, time: i64) -> Self {
        Self {
            asset: asset.to_string(),
            last_price: price,
            open_price: price,
            high_price: price,
            low_price: price,
            base_volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
            time,
        }
    }
}

/// Flow-control acknowledgement: `count` ticks have been fully handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiniMarketStatsAck {
    pub count: usize,
}

/// Exchange trading limits for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SpotMarketLimits {
    pub min_base: Decimal,
    pub max_base: Decimal,
    pub step_base: Decimal,
    pub min_quote: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetAmount {
    pub asset: String,
    pub amount: Decimal,
}

/// Free balances as reported by the exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteAccount {
    pub balances: Vec<AssetAmount>,
}

impl RemoteAccount {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        Self {
            balances: pairs
                .into_iter()
                .map(|(asset, amount)| AssetAmount {
                    asset: asset.into(),
                    amount,
                })
                .collect(),
        }
    }

    /// Balance of `asset`, zero when the exchange did not report it
    pub fn amount_of(&self, asset: &str) -> Decimal {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn as_map(&self) -> HashMap<String, Decimal> {
        self.balances
            .iter()
            .map(|b| (b.asset.clone(), b.amount))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetPrice {
    pub asset: String,
    pub price: Decimal,
}
