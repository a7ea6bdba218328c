//! Normalized on-chain trade events.

use crate::{Address, Pool, TxHash, UsdValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Kind of pool mutation a log represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKind {
    Mint,
    Swap,
    Burn,
}

impl TradeKind {
    /// Stable lowercase name used in persistence and payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            TradeKind::Mint => "mint",
            TradeKind::Swap => "swap",
            TradeKind::Burn => "burn",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "mint" => Some(TradeKind::Mint),
            "swap" => Some(TradeKind::Swap),
            "burn" => Some(TradeKind::Burn),
            _ => None,
        }
    }
}

/// Identity of one log observation, used for deduplication.
/// Upstream sources deliver at-least-once; this key makes it exactly-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub tx_hash: TxHash,
    pub log_index: u32,
}

impl EventKey {
    pub fn new(tx_hash: TxHash, log_index: u32) -> Self {
        Self { tx_hash, log_index }
    }
}

/// One normalized mint/swap/burn observation.
///
/// Canonical order is (block_number, log_index); the feed guarantees this
/// order downstream so per-pool replay is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub pool: Address,
    pub kind: TradeKind,
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub log_index: u32,
    /// Token leg magnitudes (absolute); orientation carried by `token0_in`.
    pub amount0: u128,
    pub amount1: u128,
    /// For swaps: true when token0 flowed into the pool. Unused otherwise.
    pub token0_in: bool,
    /// Derived USD-notional estimate for this event.
    pub usd_value: UsdValue,
    pub observed_at: DateTime<Utc>,
}

impl TradeEvent {
    #[inline]
    pub fn key(&self) -> EventKey {
        EventKey::new(self.tx_hash, self.log_index)
    }

    /// Canonical stream position: block then log index.
    #[inline]
    pub fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    /// Compare by canonical stream position.
    pub fn cmp_position(&self, other: &TradeEvent) -> Ordering {
        self.position().cmp(&other.position())
    }
}

/// What the chain event feed emits downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolEvent {
    Created(Pool),
    Trade(TradeEvent),
}

impl PoolEvent {
    /// Pool address this event belongs to, for lane routing.
    pub fn pool_address(&self) -> Address {
        match self {
            PoolEvent::Created(pool) => pool.address,
            PoolEvent::Trade(event) => event.pool,
        }
    }

    /// Block height the event was observed at.
    pub fn block_number(&self) -> u64 {
        match self {
            PoolEvent::Created(pool) => pool.created_block,
            PoolEvent::Trade(event) => event.block_number,
        }
    }
}

impl From<TradeEvent> for PoolEvent {
    fn from(event: TradeEvent) -> Self {
        PoolEvent::Trade(event)
    }
}

impl From<Pool> for PoolEvent {
    fn from(pool: Pool) -> Self {
        PoolEvent::Created(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hash(n: u8) -> TxHash {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        TxHash(bytes)
    }

    fn event(block: u64, log_index: u32) -> TradeEvent {
        TradeEvent {
            pool: Address::ZERO,
            kind: TradeKind::Swap,
            block_number: block,
            tx_hash: hash(7),
            log_index,
            amount0: 1_000,
            amount1: 2_000,
            token0_in: true,
            usd_value: UsdValue::from_f64(10.0),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_trade_kind_names() {
        assert_eq!(TradeKind::Mint.as_str(), "mint");
        assert_eq!(TradeKind::Swap.as_str(), "swap");
        assert_eq!(TradeKind::Burn.as_str(), "burn");
        assert_eq!(TradeKind::from_str_opt("swap"), Some(TradeKind::Swap));
        assert_eq!(TradeKind::from_str_opt("other"), None);
    }

    #[test]
    fn test_event_key_identity() {
        let a = event(100, 3);
        let b = event(101, 3); // same tx/log, different block metadata
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_canonical_ordering() {
        let mut events = vec![event(102, 0), event(100, 5), event(100, 2), event(101, 1)];
        events.sort_by(|a, b| a.cmp_position(b));
        let positions: Vec<(u64, u32)> = events.iter().map(|e| e.position()).collect();
        assert_eq!(positions, vec![(100, 2), (100, 5), (101, 1), (102, 0)]);
    }

    #[test]
    fn test_pool_event_routing_fields() {
        let trade = event(100, 2);
        let pool_event: PoolEvent = trade.clone().into();
        assert_eq!(pool_event.pool_address(), trade.pool);
        assert_eq!(pool_event.block_number(), 100);
    }
}
