//! Error types for feed and oracle operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running the chain event feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("failed to parse upstream payload: {0}")]
    ParseError(String),

    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("all endpoints exhausted after {attempts} attempts")]
    AllEndpointsExhausted { attempts: u32 },

    #[error("channel closed")]
    ChannelClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::ConnectionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::ConnectionFailed(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(err.to_string())
        } else {
            FeedError::ConnectionFailed(err.to_string())
        }
    }
}

impl FeedError {
    /// Returns true if this error is transient and likely to succeed on retry.
    /// The feed treats every connection-level failure as transient; losing the
    /// feed entirely is unrecoverable for this system, so it never gives up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionFailed(_)
                | FeedError::Disconnected(_)
                | FeedError::Timeout(_)
                | FeedError::SubscriptionFailed(_)
                | FeedError::RpcError { .. }
                | FeedError::AllEndpointsExhausted { .. }
        )
    }

    /// Returns a suggested retry delay for this error type, if applicable.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FeedError::ConnectionFailed(_) => Some(Duration::from_secs(5)),
            FeedError::Disconnected(_) => Some(Duration::from_secs(2)),
            FeedError::Timeout(_) => Some(Duration::from_secs(2)),
            FeedError::SubscriptionFailed(_) => Some(Duration::from_secs(5)),
            FeedError::RpcError { .. } => Some(Duration::from_secs(5)),
            FeedError::AllEndpointsExhausted { .. } => Some(Duration::from_secs(60)),
            FeedError::ParseError(_) | FeedError::ChannelClosed => None,
        }
    }
}

/// Errors from the sentiment scoring boundary.
/// A stale score is not an error; it is absence of signal.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    RequestFailed(String),

    #[error("oracle returned invalid payload: {0}")]
    InvalidResponse(String),

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::RequestFailed(err.to_string())
    }
}

impl From<serde_json::Error> for OracleError {
    fn from(err: serde_json::Error) -> Self {
        OracleError::InvalidResponse(err.to_string())
    }
}
