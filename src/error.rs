//! Error types shared across the bot

use thiserror::Error;

/// Result type alias using [`BotError`]
pub type Result<T> = std::result::Result<T, BotError>;

/// Categorised failure returned by every fallible operation.
///
/// Invariant violations that would corrupt the ledger are not represented
/// here: they abort the task that detected them.
#[derive(Error, Debug)]
pub enum BotError {
    /// A referenced execution, ledger or asset does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input such as strategy properties
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Duplicate or state conflict (e.g. terminating twice)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Inconsistent internal state
    #[error("internal error: {0}")]
    Internal(String),

    /// Exchange rejected a request or is unreachable
    #[error("exchange error: {0}")]
    Exchange(String),

    /// Storage failure
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BotError {
    /// Stable code exposed to callers above the library
    pub fn code(&self) -> &'static str {
        match self {
            BotError::NotFound(_) => "NOT_FOUND",
            BotError::BadRequest(_) => "BAD_REQUEST",
            BotError::Conflict(_) => "CONFLICT",
            BotError::Internal(_) => "INTERNAL",
            BotError::Exchange(_) => "EXCHANGE",
            BotError::Persistence(_) => "PERSISTENCE",
            BotError::Configuration(_) => "CONFIGURATION",
        }
    }
}

impl From<sqlx::Error> for BotError {
    fn from(e: sqlx::Error) -> Self {
        BotError::Persistence(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for BotError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        BotError::Persistence(format!("migration failed: {}", e))
    }
}

impl From<redis::RedisError> for BotError {
    fn from(e: redis::RedisError) -> Self {
        BotError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        BotError::Exchange(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BotError::Exchange(format!("websocket: {}", e))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::Internal(format!("json: {}", e))
    }
}

impl From<config::ConfigError> for BotError {
    fn from(e: config::ConfigError) -> Self {
        BotError::Configuration(e.to_string())
    }
}

impl From<rust_decimal::Error> for BotError {
    fn from(e: rust_decimal::Error) -> Self {
        BotError::BadRequest(format!("invalid decimal: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(BotError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(BotError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(BotError::Exchange("x".into()).code(), "EXCHANGE");
    }

    #[test]
    fn test_decimal_error_is_bad_request() {
        let err: BotError = "abc".parse::<rust_decimal::Decimal>().unwrap_err().into();
        assert!(matches!(err, BotError::BadRequest(_)));
    }
}
