// Durable storage for executions, operations and ledger versions
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::LocalAccount;
use crate::models::{Execution, Operation};

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// Append-version store.
///
/// Records are never updated in place: a new version of an execution or a
/// ledger is a new row, and "current" means the latest one for its id.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_execution(&self, exe: &Execution) -> Result<()>;

    /// Latest version of one execution
    async fn find_latest_execution(&self, exe_id: Uuid) -> Result<Option<Execution>>;

    /// Latest version of every execution
    async fn find_latest_executions(&self) -> Result<Vec<Execution>>;

    async fn insert_operation(&self, op: &Operation) -> Result<()>;

    /// Operations of an execution, oldest first
    async fn find_operations(&self, exe_id: Uuid) -> Result<Vec<Operation>>;

    async fn insert_local_account(&self, account: &LocalAccount) -> Result<()>;

    /// Latest ledger version of an execution
    async fn find_latest_local_account(&self, exe_id: Uuid) -> Result<Option<LocalAccount>>;
}
