use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::Repository;
use crate::error::Result;
use crate::ledger::LocalAccount;
use crate::models::{Execution, Operation};

/// Postgres repository
///
/// Each version is stored as a JSONB document next to the columns used to
/// find it. Ties on `ts` are broken by insertion order (`seq`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert_execution(&self, exe: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (exe_id, status, ts, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(exe.exe_id)
        .bind(exe.status.as_str())
        .bind(exe.timestamp)
        .bind(Json(exe))
        .execute(&self.pool)
        .await?;

        tracing::debug!(exe_id = %exe.exe_id, status = exe.status.as_str(), "Saved execution version");
        Ok(())
    }

    async fn find_latest_execution(&self, exe_id: Uuid) -> Result<Option<Execution>> {
        let row: Option<(Json<Execution>,)> = sqlx::query_as(
            r#"
            SELECT body FROM executions
            WHERE exe_id = $1
            ORDER BY ts DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(exe_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(exe),)| exe))
    }

    async fn find_latest_executions(&self) -> Result<Vec<Execution>> {
        let rows: Vec<(Json<Execution>,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (exe_id) body FROM executions
            ORDER BY exe_id, ts DESC, seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(Json(exe),)| exe).collect())
    }

    async fn insert_operation(&self, op: &Operation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (op_id, exe_id, status, ts, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(op.op_id)
        .bind(op.exe_id)
        .bind(op.status.as_str())
        .bind(op.timestamp)
        .bind(Json(op))
        .execute(&self.pool)
        .await?;

        tracing::debug!(op_id = %op.op_id, "Saved operation");
        Ok(())
    }

    async fn find_operations(&self, exe_id: Uuid) -> Result<Vec<Operation>> {
        let rows: Vec<(Json<Operation>,)> = sqlx::query_as(
            r#"
            SELECT body FROM operations
            WHERE exe_id = $1
            ORDER BY ts ASC, seq ASC
            "#,
        )
        .bind(exe_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(Json(op),)| op).collect())
    }

    async fn insert_local_account(&self, account: &LocalAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_accounts (account_id, exe_id, ts, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account.account_id)
        .bind(account.exe_id)
        .bind(account.timestamp)
        .bind(Json(account))
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            account_id = %account.account_id,
            exe_id = %account.exe_id,
            "Saved ledger version"
        );
        Ok(())
    }

    async fn find_latest_local_account(&self, exe_id: Uuid) -> Result<Option<LocalAccount>> {
        let row: Option<(Json<LocalAccount>,)> = sqlx::query_as(
            r#"
            SELECT body FROM local_accounts
            WHERE exe_id = $1
            ORDER BY ts DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(exe_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(account),)| account))
    }
}
