// Core modules
pub mod bot;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod numeric;
pub mod persistence;
pub mod pipeline;
pub mod strategy;

// Re-export commonly used types
pub use bot::TradingBot;
pub use error::{BotError, Result};
pub use models::*;
pub use strategy::Strategy;
