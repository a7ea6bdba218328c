//! Typed detection signals and signal-set arithmetic.

use crate::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four detector outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignalKind {
    NewPool = 0,
    LiquiditySpike = 1,
    WhaleBuy = 2,
    SentimentHigh = 3,
}

impl SignalKind {
    pub const COUNT: usize = 4;

    /// Stable wire name used in persistence and idempotency keys.
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::NewPool => "new_pool",
            SignalKind::LiquiditySpike => "liquidity_spike",
            SignalKind::WhaleBuy => "whale_buy",
            SignalKind::SentimentHigh => "sentiment",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "new_pool" => Some(SignalKind::NewPool),
            "liquidity_spike" => Some(SignalKind::LiquiditySpike),
            "whale_buy" => Some(SignalKind::WhaleBuy),
            "sentiment" => Some(SignalKind::SentimentHigh),
            _ => None,
        }
    }

    /// Contribution of this kind to an alert's aggregate score.
    /// Weights sum to 1.0 across all four kinds.
    pub fn weight(self) -> f64 {
        match self {
            SignalKind::NewPool => 0.30,
            SignalKind::LiquiditySpike => 0.25,
            SignalKind::WhaleBuy => 0.25,
            SignalKind::SentimentHigh => 0.20,
        }
    }

    pub fn all() -> &'static [SignalKind] {
        &[
            SignalKind::NewPool,
            SignalKind::LiquiditySpike,
            SignalKind::WhaleBuy,
            SignalKind::SentimentHigh,
        ]
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of distinct signal kinds, packed into one byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalSet(u8);

impl SignalSet {
    pub const EMPTY: SignalSet = SignalSet(0);

    pub fn insert(&mut self, kind: SignalKind) {
        self.0 |= 1 << kind as u8;
    }

    pub fn remove(&mut self, kind: SignalKind) {
        self.0 &= !(1 << kind as u8);
    }

    #[inline]
    pub fn contains(self, kind: SignalKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    /// Number of distinct kinds present.
    #[inline]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SignalKind> {
        SignalKind::all().iter().copied().filter(move |k| self.contains(*k))
    }

    /// Wire names in deterministic (alphabetical) order, as used in
    /// idempotency keys and alert summaries.
    pub fn sorted_names(self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.iter().map(SignalKind::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Canonical textual form, e.g. "liquidity_spike+new_pool+whale_buy".
    pub fn canonical(self) -> String {
        self.sorted_names().join("+")
    }

    /// Sum of member weights, capped at 1.0.
    pub fn score(self) -> f64 {
        let total: f64 = self.iter().map(SignalKind::weight).sum();
        total.min(1.0)
    }
}

impl FromIterator<SignalKind> for SignalSet {
    fn from_iter<T: IntoIterator<Item = SignalKind>>(iter: T) -> Self {
        let mut set = SignalSet::EMPTY;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl fmt::Display for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A single detection emission. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub pool: Address,
    pub block_number: u64,
    pub detected_at: DateTime<Utc>,
    /// Kind-specific magnitude: spike ratio, whale fraction, sentiment value,
    /// or pool age in blocks for NewPool.
    pub magnitude: f64,
    /// Normalized confidence in [0, 1].
    pub confidence: f64,
}

impl Signal {
    pub fn new(kind: SignalKind, pool: Address, block_number: u64, magnitude: f64) -> Self {
        Self {
            kind,
            pool,
            block_number,
            detected_at: Utc::now(),
            magnitude,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(SignalKind::NewPool.as_str(), "new_pool");
        assert_eq!(SignalKind::SentimentHigh.as_str(), "sentiment");
        assert_eq!(
            SignalKind::from_str_opt("liquidity_spike"),
            Some(SignalKind::LiquiditySpike)
        );
        assert_eq!(SignalKind::from_str_opt("bogus"), None);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = SignalKind::all().iter().map(|k| k.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_insert_contains_len() {
        let mut set = SignalSet::EMPTY;
        assert!(set.is_empty());

        set.insert(SignalKind::NewPool);
        set.insert(SignalKind::WhaleBuy);
        set.insert(SignalKind::WhaleBuy); // duplicate insert is a no-op

        assert_eq!(set.len(), 2);
        assert!(set.contains(SignalKind::NewPool));
        assert!(set.contains(SignalKind::WhaleBuy));
        assert!(!set.contains(SignalKind::SentimentHigh));

        set.remove(SignalKind::NewPool);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_canonical_is_sorted_and_stable() {
        let set: SignalSet = [
            SignalKind::WhaleBuy,
            SignalKind::NewPool,
            SignalKind::LiquiditySpike,
        ]
        .into_iter()
        .collect();
        assert_eq!(set.canonical(), "liquidity_spike+new_pool+whale_buy");

        // Insertion order must not matter
        let reordered: SignalSet = [
            SignalKind::LiquiditySpike,
            SignalKind::WhaleBuy,
            SignalKind::NewPool,
        ]
        .into_iter()
        .collect();
        assert_eq!(set.canonical(), reordered.canonical());
    }

    #[test]
    fn test_set_score() {
        let three: SignalSet = [
            SignalKind::NewPool,
            SignalKind::LiquiditySpike,
            SignalKind::WhaleBuy,
        ]
        .into_iter()
        .collect();
        assert!((three.score() - 0.80).abs() < 1e-9);

        let all: SignalSet = SignalKind::all().iter().copied().collect();
        assert_eq!(all.score(), 1.0);
    }

    #[test]
    fn test_signal_confidence_clamped() {
        let signal =
            Signal::new(SignalKind::WhaleBuy, Address::ZERO, 110, 0.008).with_confidence(1.7);
        assert_eq!(signal.confidence, 1.0);
    }
}
