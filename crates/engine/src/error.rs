//! Engine error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Rejected configuration. Only raised at startup, never at runtime.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single event that cannot be applied to detector state. The event
    /// is dropped and the lane keeps running.
    #[error("invalid detector input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = EngineError::InvalidInput("trade predates pool creation".into());
        assert!(e.to_string().contains("invalid detector input"));
    }
}
