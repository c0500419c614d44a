mod execution;
mod market;
mod operation;

pub use execution::{Execution, ExecutionStatus, StrategyType};
pub use market::{
    AssetAmount, AssetPrice, MiniMarketStats, MiniMarketStatsAck, RemoteAccount,
    SpotMarketLimits,
};
pub use operation::{
    AmountSide, OpKind, OpResults, OpStatus, Operation, OperationType, Side,
};

/// Default quote currency every asset is traded against
pub const DEFAULT_QUOTE_CURRENCY: &str = "USDT";

/// Exchange symbol for a base/quote pair, e.g. `BTC` + `USDT` -> `BTCUSDT`
pub fn symbol_of(base: &str, quote: &str) -> String {
    format!("{}{}", base, quote)
}
