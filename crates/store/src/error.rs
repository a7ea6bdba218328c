//! Store error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A persisted row no longer decodes into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
