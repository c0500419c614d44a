//! Execution lifecycle: at most one ACTIVE execution exists system-wide.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Repository;
use crate::error::{BotError, Result};
use crate::models::{Execution, ExecutionStatus, RemoteAccount, StrategyType};

/// Parameters for a new execution
#[derive(Debug, Clone)]
pub struct ExecutionInit {
    pub remote_account: RemoteAccount,
    pub strategy_type: StrategyType,
    pub strategy_props: HashMap<String, String>,
}

pub struct ExecutionService {
    repo: Arc<dyn Repository>,
    quote_currency: String,
}

impl ExecutionService {
    pub fn new(repo: Arc<dyn Repository>, quote_currency: impl Into<String>) -> Self {
        Self {
            repo,
            quote_currency: quote_currency.into(),
        }
    }

    /// Return the active execution if there is one, otherwise start a new one
    /// tracking every balance asset plus the quote currency.
    pub async fn create_or_restore(&self, init: ExecutionInit) -> Result<Execution> {
        if let Some(active) = self.get_currently_active().await? {
            tracing::info!(exe_id = %active.exe_id, "Restoring active execution");
            return Ok(active);
        }

        if init.remote_account.balances.is_empty() {
            return Err(BotError::Internal(
                "cannot start an execution with an empty wallet".to_string(),
            ));
        }

        let mut assets: BTreeSet<String> = init
            .remote_account
            .balances
            .iter()
            .map(|b| b.asset.clone())
            .collect();
        assets.insert(self.quote_currency.clone());

        let exe = Execution {
            exe_id: Uuid::new_v4(),
            status: ExecutionStatus::Active,
            assets,
            strategy_type: init.strategy_type,
            strategy_props: init.strategy_props,
            timestamp: Utc::now(),
        };
        self.repo.insert_execution(&exe).await?;

        tracing::info!(
            exe_id = %exe.exe_id,
            strategy = %exe.strategy_type,
            assets = exe.assets.len(),
            "Created execution"
        );
        Ok(exe)
    }

    /// Append a TERMINATED version of the execution
    pub async fn terminate(&self, exe_id: Uuid) -> Result<Execution> {
        let current = self
            .get_by_exe_id(exe_id)
            .await?
            .ok_or_else(|| BotError::NotFound(format!("execution {} not found", exe_id)))?;

        if current.status == ExecutionStatus::Terminated {
            return Err(BotError::Conflict(format!(
                "execution {} is already terminated",
                exe_id
            )));
        }

        let terminated = current.with_status(ExecutionStatus::Terminated);
        self.repo.insert_execution(&terminated).await?;

        tracing::info!(exe_id = %exe_id, "Execution terminated");
        Ok(terminated)
    }

    /// The single non-terminated execution, if any
    pub async fn get_currently_active(&self) -> Result<Option<Execution>> {
        let mut active: Vec<Execution> = self
            .repo
            .find_latest_executions()
            .await?
            .into_iter()
            .filter(Execution::is_active)
            .collect();

        match active.len() {
            0 => Ok(None),
            1 => Ok(active.pop()),
            n => {
                tracing::error!(count = n, "More than one active execution");
                Err(BotError::Internal(format!(
                    "found {} active executions, expected at most one",
                    n
                )))
            }
        }
    }

    pub async fn get_by_exe_id(&self, exe_id: Uuid) -> Result<Option<Execution>> {
        self.repo.find_latest_execution(exe_id).await
    }
}
