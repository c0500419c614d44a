use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Repository;
use crate::error::Result;
use crate::ledger::LocalAccount;
use crate::models::{Execution, Operation};

/// In-process repository used by simulations and tests
#[derive(Default)]
pub struct MemoryRepository {
    executions: RwLock<Vec<Execution>>,
    operations: RwLock<Vec<Operation>>,
    accounts: RwLock<Vec<LocalAccount>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ledger versions for an execution
    pub async fn count_local_accounts(&self, exe_id: Uuid) -> usize {
        self.accounts
            .read()
            .await
            .iter()
            .filter(|a| a.exe_id == exe_id)
            .count()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_execution(&self, exe: &Execution) -> Result<()> {
        self.executions.write().await.push(exe.clone());
        Ok(())
    }

    async fn find_latest_execution(&self, exe_id: Uuid) -> Result<Option<Execution>> {
        // later insertions win timestamp ties
        let executions = self.executions.read().await;
        Ok(executions
            .iter()
            .filter(|e| e.exe_id == exe_id)
            .fold(None, |latest: Option<&Execution>, e| match latest {
                Some(l) if l.timestamp > e.timestamp => Some(l),
                _ => Some(e),
            })
            .cloned())
    }

    async fn find_latest_executions(&self) -> Result<Vec<Execution>> {
        let executions = self.executions.read().await;
        let mut latest: HashMap<Uuid, &Execution> = HashMap::new();
        for exe in executions.iter() {
            let newer = latest
                .get(&exe.exe_id)
                .map_or(true, |l| exe.timestamp >= l.timestamp);
            if newer {
                latest.insert(exe.exe_id, exe);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn insert_operation(&self, op: &Operation) -> Result<()> {
        self.operations.write().await.push(op.clone());
        Ok(())
    }

    async fn find_operations(&self, exe_id: Uuid) -> Result<Vec<Operation>> {
        let mut ops: Vec<Operation> = self
            .operations
            .read()
            .await
            .iter()
            .filter(|op| op.exe_id == exe_id)
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.timestamp);
        Ok(ops)
    }

    async fn insert_local_account(&self, account: &LocalAccount) -> Result<()> {
        self.accounts.write().await.push(account.clone());
        Ok(())
    }

    async fn find_latest_local_account(&self, exe_id: Uuid) -> Result<Option<LocalAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .iter()
            .filter(|a| a.exe_id == exe_id)
            .fold(None, |latest: Option<&LocalAccount>, a| match latest {
                Some(l) if l.timestamp > a.timestamp => Some(l),
                _ => Some(a),
            })
            .cloned())
    }
}
