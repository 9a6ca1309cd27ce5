//! 账户仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use super::traits::AccountRepositoryTrait;
use crate::error::{ProgressError, Result};
use crate::models::Account;

/// 账户仓储（PostgreSQL）
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, user_id: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, name, last_login_at, created_at, updated_at
            FROM accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn find_by_ids(&self, user_ids: &[String]) -> Result<Vec<Account>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, name, last_login_at, created_at, updated_at
            FROM accounts
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    #[instrument(skip(self, account), fields(user_id = %account.user_id))]
    pub async fn create(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, name, last_login_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&account.user_id)
        .bind(&account.name)
        .bind(account.last_login_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE accounts SET last_login_at = $2, updated_at = $2 WHERE user_id = $1"#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProgressError::AccountNotFound(user_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountRepositoryTrait for AccountRepository {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<Account>> {
        self.find_by_id(user_id).await
    }

    async fn find_by_ids(&self, user_ids: &[String]) -> Result<Vec<Account>> {
        self.find_by_ids(user_ids).await
    }

    async fn create(&self, account: &Account) -> Result<bool> {
        self.create(account).await
    }

    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch_last_login(user_id, at).await
    }
}
