//! Alert delivery errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] poolwatch_store::StoreError),
    #[error("webhook error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("invalid dispatcher config: {0}")]
    InvalidConfig(String),
}
