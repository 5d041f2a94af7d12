use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("a consumer is already registered on this queue")]
    ConsumerAlreadyRegistered,
    #[error("queue backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("queue codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("token balance of {email} no longer covers cost {cost}")]
    InsufficientBalance { email: String, cost: i64 },
}
