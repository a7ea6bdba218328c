//! Alert payloads emitted on strategy qualification.

use crate::{Address, Chain, Pool, Signal, SignalKind, SignalSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global alert ID counter (process-local; persistence assigns its own keys).
static ALERT_ID: AtomicU64 = AtomicU64::new(1);

/// One signal's contribution as carried in an alert payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub kind: SignalKind,
    pub magnitude: f64,
    pub block_number: u64,
}

/// A fully-formed alert, created exactly once per (pool, signal-set, epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub pool: Address,
    pub chain: Chain,
    /// Pair label, e.g. "PEPE/WETH".
    pub pair: String,
    /// Factory version label, e.g. "V3 0.30%".
    pub version: String,
    pub signals: SignalSet,
    pub breakdown: Vec<SignalSummary>,
    /// Aggregate confidence: sum of triggered kinds' weights, capped at 1.0.
    pub score: f64,
    /// Qualification epoch; bumps every time the pool re-qualifies.
    pub epoch: u32,
    /// Block height at which qualification happened.
    pub block_number: u64,
    pub explorer_url: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Derive the persistent at-most-once delivery key.
    /// Kind names are sorted so composition order never changes the key.
    pub fn derive_key(pool: Address, signals: SignalSet, epoch: u32) -> String {
        format!("{}:{}:{}", pool, signals.canonical(), epoch)
    }

    /// Build an alert from a qualifying signal set.
    /// `active` carries one signal per kind (the aggregator's invariant).
    pub fn from_qualification(
        pool: &Pool,
        active: &[Signal],
        epoch: u32,
        block_number: u64,
    ) -> Self {
        let signals: SignalSet = active.iter().map(|s| s.kind).collect();

        let mut breakdown: Vec<SignalSummary> = active
            .iter()
            .map(|s| SignalSummary {
                kind: s.kind,
                magnitude: s.magnitude,
                block_number: s.block_number,
            })
            .collect();
        breakdown.sort_by_key(|s| s.kind.as_str());

        Self {
            id: ALERT_ID.fetch_add(1, Ordering::Relaxed),
            pool: pool.address,
            chain: pool.chain,
            pair: pool.pair_label(),
            version: pool.version_label(),
            signals,
            breakdown,
            score: signals.score(),
            epoch,
            block_number,
            explorer_url: pool.explorer_url(),
            idempotency_key: Self::derive_key(pool.address, signals, epoch),
            created_at: Utc::now(),
        }
    }

    /// Count summary like "3/4" for logs and notification text.
    pub fn count_summary(&self) -> String {
        format!("{}/{}", self.signals.len(), SignalKind::COUNT)
    }
}
