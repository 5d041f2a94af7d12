use async_trait::async_trait;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::RepositoryError;
use crate::models::User;

/// Narrow window onto the relational store. The dispatcher and reconciler
/// only ever need these four operations; everything else about the schema
/// stays behind this trait.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// True iff the user's current balance covers `amount`. Read-only; the
    /// balance is not reserved.
    async fn check_user_token(&self, user_id: &str, amount: i64) -> Result<bool, RepositoryError>;
    /// Deduct `cost` from the user's balance. Conditional at the storage
    /// layer: the balance must still cover the cost at write time, so the
    /// balance can never go negative even with concurrent writers.
    async fn update_user_token_by_cost(&self, user: &User, cost: i64)
        -> Result<(), RepositoryError>;
    /// Persist one batch of extracted results under their correlation id.
    async fn update_list_result(
        &self,
        request_id: &str,
        results: &[serde_json::Value],
    ) -> Result<(), RepositoryError>;
}

pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT id, email, token FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn check_user_token(&self, user_id: &str, amount: i64) -> Result<bool, RepositoryError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT token FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((token,)) => Ok(token >= amount),
            None => Err(RepositoryError::UserNotFound(user_id.to_string())),
        }
    }

    async fn update_user_token_by_cost(
        &self,
        user: &User,
        cost: i64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET token = token - ?1 WHERE id = ?2 AND token >= ?1")
            .bind(cost)
            .bind(&user.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::InsufficientBalance {
                email: user.email.clone(),
                cost,
            });
        }
        Ok(())
    }

    async fn update_list_result(
        &self,
        request_id: &str,
        results: &[serde_json::Value],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for payload in results {
            sqlx::query("INSERT INTO results (id, request_id, payload) VALUES (?1, ?2, ?3)")
                .bind(Uuid::new_v4().to_string())
                .bind(request_id)
                .bind(payload.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
