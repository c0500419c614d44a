use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LocalAccount, LocalAccountInit};
use crate::db::Repository;
use crate::error::{BotError, Result};
use crate::models::Operation;

/// Owns the current ledger version.
///
/// The in-memory version is published before it is persisted, so readers
/// never wait on storage and a failed write does not roll back a trade that
/// already happened on the exchange.
pub struct LedgerService {
    repo: Arc<dyn Repository>,
    current: RwLock<Option<Arc<LocalAccount>>>,
}

impl LedgerService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            current: RwLock::new(None),
        }
    }

    /// Create the first ledger version of an execution
    pub async fn create(&self, init: LocalAccountInit) -> Result<Arc<LocalAccount>> {
        if self.repo.find_latest_local_account(init.exe_id).await?.is_some() {
            return Err(BotError::Conflict(format!(
                "execution {} already has a local account",
                init.exe_id
            )));
        }

        let account = LocalAccount::initialize(init);
        self.repo.insert_local_account(&account).await?;

        let account = Arc::new(account);
        *self.current.write().await = Some(account.clone());
        Ok(account)
    }

    /// Restore the latest version for the execution, or create one
    pub async fn create_or_restore(&self, init: LocalAccountInit) -> Result<Arc<LocalAccount>> {
        match self.repo.find_latest_local_account(init.exe_id).await? {
            Some(account) => {
                tracing::info!(
                    exe_id = %account.exe_id,
                    account_id = %account.account_id,
                    "Restored local account"
                );
                let account = Arc::new(account);
                *self.current.write().await = Some(account.clone());
                Ok(account)
            }
            None => self.create(init).await,
        }
    }

    /// Latest ledger version of an execution
    pub async fn latest(&self, exe_id: Uuid) -> Result<Arc<LocalAccount>> {
        if let Some(account) = self.current.read().await.as_ref() {
            if account.exe_id == exe_id {
                return Ok(account.clone());
            }
        }

        let account = self
            .repo
            .find_latest_local_account(exe_id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| {
                BotError::NotFound(format!("no local account for execution {}", exe_id))
            })?;

        *self.current.write().await = Some(account.clone());
        Ok(account)
    }

    /// Publish a new version, then persist it
    pub async fn commit(&self, next: LocalAccount) -> Result<Arc<LocalAccount>> {
        let next = Arc::new(next);
        *self.current.write().await = Some(next.clone());

        self.repo.insert_local_account(&next).await.map_err(|e| {
            tracing::error!(
                account_id = %next.account_id,
                "Failed to persist local account, keeping in-memory version: {}",
                e
            );
            e
        })?;

        Ok(next)
    }

    pub async fn record_operation(&self, op: &Operation) -> Result<()> {
        self.repo.insert_operation(op).await
    }

    pub async fn operations(&self, exe_id: Uuid) -> Result<Vec<Operation>> {
        self.repo.find_operations(exe_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::models::{AssetPrice, RemoteAccount, StrategyType};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn init(exe_id: Uuid) -> LocalAccountInit {
        LocalAccountInit {
            exe_id,
            strategy_type: StrategyType::Pts,
            quote_currency: "USDT".to_string(),
            remote_account: RemoteAccount::from_pairs([("BTC", dec!(1)), ("USDT", dec!(100))]),
            tradable_asset_prices: HashMap::from([(
                "BTC".to_string(),
                AssetPrice {
                    asset: "BTC".to_string(),
                    price: dec!(30000),
                },
            )]),
        }
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let service = LedgerService::new(Arc::new(MemoryRepository::new()));
        let exe_id = Uuid::new_v4();

        service.create(init(exe_id)).await.unwrap();
        let second = service.create(init(exe_id)).await;

        assert!(matches!(second, Err(BotError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_or_restore_returns_existing() {
        let repo = Arc::new(MemoryRepository::new());
        let exe_id = Uuid::new_v4();

        let first = LedgerService::new(repo.clone())
            .create_or_restore(init(exe_id))
            .await
            .unwrap();
        // fresh service, same storage
        let restored = LedgerService::new(repo.clone())
            .create_or_restore(init(exe_id))
            .await
            .unwrap();

        assert_eq!(first.account_id, restored.account_id);
        assert_eq!(repo.count_local_accounts(exe_id).await, 1);
    }

    #[tokio::test]
    async fn test_latest_missing_is_not_found() {
        let service = LedgerService::new(Arc::new(MemoryRepository::new()));
        assert!(matches!(
            service.latest(Uuid::new_v4()).await,
            Err(BotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_publishes_new_version() {
        let repo = Arc::new(MemoryRepository::new());
        let service = LedgerService::new(repo.clone());
        let exe_id = Uuid::new_v4();
        let created = service.create(init(exe_id)).await.unwrap();

        let mut next = (*created).clone();
        next.account_id = Uuid::new_v4();
        service.commit(next.clone()).await.unwrap();

        assert_eq!(service.latest(exe_id).await.unwrap().account_id, next.account_id);
        assert_eq!(repo.count_local_accounts(exe_id).await, 2);
    }
}
