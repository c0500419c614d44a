use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::iceberg::plan_chunks;
use crate::error::{BotError, Result};
use crate::exchange::{ExchangeGateway, MarketOrder, OrderAck, OrderQuantity};
use crate::models::{symbol_of, AmountSide, Operation};

/// Result of one submitted chunk
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub amount: Decimal,
    pub result: std::result::Result<OrderAck, String>,
}

impl ChunkOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// What the executor did with an operation
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The operation as submitted, possibly flipped onto the listed pair
    pub operation: Operation,
    pub chunks: Vec<ChunkOutcome>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.chunks.iter().filter(|c| c.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.chunks.len() - self.succeeded()
    }

    /// Sum of the chunks the exchange accepted
    pub fn submitted_amount(&self) -> Decimal {
        self.chunks
            .iter()
            .filter(|c| c.succeeded())
            .map(|c| c.amount)
            .sum()
    }
}

/// Turns a PENDING operation into one or more market orders
pub struct Executor {
    gateway: Arc<dyn ExchangeGateway>,
}

impl Executor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Validate and submit `op`.
    ///
    /// Orders above the exchange maximum are split into an iceberg of smaller
    /// orders. Individual chunk failures are tolerated; the operation only fails
    /// when no chunk went through.
    pub async fn execute(&self, op: Operation) -> Result<ExecutionReport> {
        let mut op = self.resolve_pair(op)?;
        let symbol = op.symbol();

        if !self.gateway.can_spot_trade(&symbol) {
            return Err(BotError::Exchange(format!(
                "spot trading is disabled for {}",
                symbol
            )));
        }

        op.timestamp = Utc::now();
        let limits = self.gateway.get_spot_market_limits(&symbol)?;

        let (min, max) = match op.amount_side {
            AmountSide::Base => (limits.min_base, limits.max_base),
            AmountSide::Quote => (
                limits.min_quote,
                limits
                    .max_base
                    .checked_mul(op.target_price)
                    .unwrap_or(Decimal::MAX),
            ),
        };

        if op.amount < min {
            return Err(BotError::Internal(format!(
                "{} {} of {:?} {} is below the minimum {}",
                symbol,
                op.side.as_str(),
                op.amount_side,
                op.amount,
                min
            )));
        }

        let plan = plan_chunks(op.amount, min, max)?;
        if plan.len() > 1 {
            tracing::info!(
                symbol = %symbol,
                side = op.side.as_str(),
                chunks = plan.len(),
                max = %max,
                "Iceberg order"
            );
        }

        let mut chunks = Vec::with_capacity(plan.len());
        for amount in plan {
            let order = MarketOrder {
                symbol: symbol.clone(),
                side: op.side,
                quantity: match op.amount_side {
                    AmountSide::Base => OrderQuantity::Base(amount),
                    AmountSide::Quote => OrderQuantity::Quote(amount),
                },
            };

            let result = match self.gateway.send_spot_market_order(&order).await {
                Ok(ack) => {
                    tracing::debug!(symbol = %symbol, order_id = %ack.order_id, amount = %amount, "Chunk accepted");
                    Ok(ack)
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, amount = %amount, "Chunk failed: {}", e);
                    Err(e.to_string())
                }
            };
            chunks.push(ChunkOutcome { amount, result });
        }

        let report = ExecutionReport {
            operation: op,
            chunks,
        };

        if report.succeeded() == 0 {
            let failed = &report.operation;
            tracing::error!(
                op_id = %failed.op_id,
                symbol = %symbol,
                amount = %failed.amount,
                "Every order of the operation failed"
            );
            return Err(BotError::Exchange(format!(
                "market order {} {} {} failed",
                symbol,
                failed.side.as_str(),
                failed.amount
            )));
        }

        if report.failed() > 0 {
            tracing::warn!(
                op_id = %report.operation.op_id,
                succeeded = report.succeeded(),
                failed = report.failed(),
                submitted = %report.submitted_amount(),
                "Operation partially submitted"
            );
        }

        Ok(report)
    }

    /// Keep the pair if listed, otherwise flip onto the inverse pair
    fn resolve_pair(&self, op: Operation) -> Result<Operation> {
        if self.gateway.has_symbol(&op.symbol()) {
            return Ok(op);
        }
        if self.gateway.has_symbol(&symbol_of(&op.quote, &op.base)) {
            tracing::debug!(op_id = %op.op_id, "Flipping operation onto {}{}", op.quote, op.base);
            return Ok(op.flip());
        }
        Err(BotError::Internal(format!(
            "neither {}{} nor {}{} is listed",
            op.base, op.quote, op.quote, op.base
        )))
    }
}
