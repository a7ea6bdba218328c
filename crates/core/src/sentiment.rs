//! Token sentiment readings from the external scoring boundary.

use crate::Address;
use chrono::{DateTime, Duration, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// A sentiment reading for one token, in [-1.0, 1.0].
/// Most-recent wins per token; zero is a valid reading and means neutral,
/// which is why absence is modeled as Option, never as 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub token: Address,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    pub source: CompactString,
}

impl SentimentScore {
    pub fn new(token: Address, value: f64, source: &str) -> Self {
        Self {
            token,
            value: clamp_score(value),
            observed_at: Utc::now(),
            source: CompactString::new(source),
        }
    }

    /// Older than the TTL means no signal, not neutral.
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.observed_at > ttl
    }
}

/// Clamp a raw oracle value into the valid score range.
pub fn clamp_score(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(0.7), 0.7);
        assert_eq!(clamp_score(1.8), 1.0);
        assert_eq!(clamp_score(-3.0), -1.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
    }

    #[test]
    fn test_staleness() {
        let mut score = SentimentScore::new(Address::ZERO, 0.8, "test");
        let now = Utc::now();
        score.observed_at = now - Duration::minutes(20);

        assert!(score.is_stale(Duration::minutes(15), now));
        assert!(!score.is_stale(Duration::minutes(30), now));
    }

    #[test]
    fn test_constructor_clamps() {
        let score = SentimentScore::new(Address::ZERO, 5.0, "test");
        assert_eq!(score.value, 1.0);
    }
}
