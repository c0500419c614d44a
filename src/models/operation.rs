use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::symbol_of;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn inverse(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Which leg of the pair an operation amount is expressed in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmountSide {
    Base,
    Quote,
}

impl AmountSide {
    pub fn inverse(self) -> Self {
        match self {
            AmountSide::Base => AmountSide::Quote,
            AmountSide::Quote => AmountSide::Base,
        }
    }
}

/// Last operation recorded against an asset in the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Buy,
    Sell,
    Init,
}

impl From<Side> for OperationType {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => OperationType::Buy,
            Side::Sell => OperationType::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Auto,
    Init,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Failed,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Pending => "PENDING",
            OpStatus::Filled => "FILLED",
            OpStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OpStatus::Failed => "FAILED",
        }
    }
}

/// Outcome of a reconciled operation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OpResults {
    pub actual_price: Decimal,
    pub base_diff: Decimal,
    pub quote_diff: Decimal,
    pub spread_percent: Decimal,
}

/// A trading intention, and after execution its reconciled result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub op_id: Uuid,
    pub exe_id: Uuid,
    pub kind: OpKind,
    pub base: String,
    pub quote: String,
    pub side: Side,
    pub amount: Decimal,
    pub amount_side: AmountSide,
    pub target_price: Decimal,
    pub cause: String,
    pub status: OpStatus,
    pub results: OpResults,
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    /// New PENDING automatic operation
    pub fn pending(
        exe_id: Uuid,
        base: &str,
        quote: &str,
        side: Side,
        amount: Decimal,
        amount_side: AmountSide,
        target_price: Decimal,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            exe_id,
            kind: OpKind::Auto,
            base: base.to_string(),
            quote: quote.to_string(),
            side,
            amount,
            amount_side,
            target_price,
            cause: cause.into(),
            status: OpStatus::Pending,
            results: OpResults::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn symbol(&self) -> String {
        symbol_of(&self.base, &self.quote)
    }

    /// Same intent on the inverse pair: base and quote swap, side and amount side invert.
    ///
    /// The target price is expressed per unit of the new base.
    pub fn flip(&self) -> Self {
        let target_price = if self.target_price.is_zero() {
            Decimal::ZERO
        } else {
            crate::numeric::round8(Decimal::ONE / self.target_price)
        };
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
            side: self.side.inverse(),
            amount_side: self.amount_side.inverse(),
            target_price,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy_btc() -> Operation {
        Operation::pending(
            Uuid::new_v4(),
            "BTC",
            "USDT",
            Side::Buy,
            dec!(100),
            AmountSide::Quote,
            dec!(40000),
            "test",
        )
    }

    #[test]
    fn test_flip_swaps_pair_and_inverts_sides() {
        let op = buy_btc();
        let flipped = op.flip();

        assert_eq!(flipped.base, "USDT");
        assert_eq!(flipped.quote, "BTC");
        assert_eq!(flipped.side, Side::Sell);
        assert_eq!(flipped.amount_side, AmountSide::Base);
        assert_eq!(flipped.amount, dec!(100));
        assert_eq!(flipped.target_price, dec!(0.000025));
        assert_eq!(flipped.op_id, op.op_id);
    }

    #[test]
    fn test_double_flip_restores_pair() {
        let op = buy_btc();
        let back = op.flip().flip();

        assert_eq!(back.base, op.base);
        assert_eq!(back.quote, op.quote);
        assert_eq!(back.side, op.side);
        assert_eq!(back.amount_side, op.amount_side);
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&OpStatus::PartiallyFilled).unwrap();
        assert_eq!(json, "\"PARTIALLY_FILLED\"");
    }
}
