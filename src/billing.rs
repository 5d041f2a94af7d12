use std::sync::Arc;
use tracing::info;

use crate::error::RepositoryError;
use crate::models::{JobReturnData, User};
use crate::repository::Repository;

/// Applies the token cost of a job against the user record, and gates
/// admission before any compute resource is committed.
#[derive(Clone)]
pub struct BillingReconciler {
    repo: Arc<dyn Repository>,
}

impl BillingReconciler {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Pre-flight balance check. Read-only; nothing is reserved, so the
    /// deduction in `reconcile` re-checks at write time.
    pub async fn admit(&self, user: &User, cost: i64) -> Result<bool, RepositoryError> {
        self.repo.check_user_token(&user.id, cost).await
    }

    /// Persist the extracted results, then deduct the call cost. Strictly
    /// persist-then-bill: a result that failed to persist is never billed.
    pub async fn reconcile(&self, ret: &JobReturnData) -> Result<(), RepositoryError> {
        self.repo
            .update_list_result(&ret.result_request_id, &ret.results)
            .await?;

        let user = self
            .repo
            .get_user_by_email(&ret.user_email)
            .await?
            .ok_or_else(|| RepositoryError::UserNotFound(ret.user_email.clone()))?;
        self.repo.update_user_token_by_cost(&user, ret.call_cost).await?;

        info!(
            "Billed {} token(s) to {} for request {}",
            ret.call_cost, user.email, ret.result_request_id
        );
        Ok(())
    }
}
