use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BotError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Active,
    Terminated,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Active => "ACTIVE",
            ExecutionStatus::Terminated => "TERMINATED",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ExecutionStatus::Active),
            "TERMINATED" => Ok(ExecutionStatus::Terminated),
            other => Err(BotError::Internal(format!("unknown execution status {}", other))),
        }
    }
}

/// Decision strategy driving a ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    /// Threshold based, one quote sub-balance per asset
    Dts,
    /// Percentage based, pooled quote balance
    Pts,
    /// Exponential backoff sizing, pooled quote balance
    Epts,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Dts => "DTS",
            StrategyType::Pts => "PTS",
            StrategyType::Epts => "EPTS",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            // FTS is the legacy name of the threshold strategy
            "DTS" | "FTS" => Ok(StrategyType::Dts),
            "PTS" => Ok(StrategyType::Pts),
            "EPTS" => Ok(StrategyType::Epts),
            other => Err(BotError::BadRequest(format!("unknown strategy type {}", other))),
        }
    }
}

/// One trading session. Stored as an append-only version history keyed by `exe_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub exe_id: Uuid,
    pub status: ExecutionStatus,
    pub assets: BTreeSet<String>,
    pub strategy_type: StrategyType,
    pub strategy_props: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Execution {
    pub fn is_active(&self) -> bool {
        self.status == ExecutionStatus::Active
    }

    /// Next version of this execution with a new status and timestamp
    pub fn with_status(&self, status: ExecutionStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_type_parsing() {
        assert_eq!("dts".parse::<StrategyType>().unwrap(), StrategyType::Dts);
        assert_eq!("FTS".parse::<StrategyType>().unwrap(), StrategyType::Dts);
        assert_eq!("EPTS".parse::<StrategyType>().unwrap(), StrategyType::Epts);
        assert!(matches!(
            "XYZ".parse::<StrategyType>(),
            Err(BotError::BadRequest(_))
        ));
    }

    #[test]
    fn test_with_status_keeps_identity() {
        let exe = Execution {
            exe_id: Uuid::new_v4(),
            status: ExecutionStatus::Active,
            assets: ["BTC".to_string(), "USDT".to_string()].into_iter().collect(),
            strategy_type: StrategyType::Pts,
            strategy_props: HashMap::new(),
            timestamp: Utc::now(),
        };

        let terminated = exe.with_status(ExecutionStatus::Terminated);

        assert_eq!(terminated.exe_id, exe.exe_id);
        assert_eq!(terminated.assets, exe.assets);
        assert!(!terminated.is_active());
        assert!(terminated.timestamp >= exe.timestamp);
    }
}
