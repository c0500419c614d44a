// Order execution and fill reconciliation
pub mod executor;
pub mod iceberg;
pub mod reconcile;

pub use executor::{ChunkOutcome, ExecutionReport, Executor};
pub use iceberg::plan_chunks;
pub use reconcile::reconcile;
