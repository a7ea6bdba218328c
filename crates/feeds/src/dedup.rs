//! Exactly-once and in-order delivery on top of at-least-once upstreams.

use poolwatch_core::{EventKey, PoolEvent};
use std::collections::{BTreeMap, HashSet};

/// Bounded set of already-delivered event keys.
///
/// Upstream sources redeliver logs on reconnect and backfill overlap, so
/// every candidate event passes through here first. Retention is bounded in
/// blocks; anything older than the window is assumed to have aged out of any
/// possible redelivery path.
#[derive(Debug)]
pub struct SeenSet {
    seen: HashSet<EventKey>,
    by_block: BTreeMap<u64, Vec<EventKey>>,
    retention_blocks: u64,
}

impl SeenSet {
    pub fn new(retention_blocks: u64) -> Self {
        Self {
            seen: HashSet::new(),
            by_block: BTreeMap::new(),
            retention_blocks: retention_blocks.max(1),
        }
    }

    /// Record a key. Returns false when the key was already present,
    /// i.e. the event is a duplicate and must be dropped.
    pub fn insert(&mut self, key: EventKey, block: u64) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.by_block.entry(block).or_default().push(key);
        true
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.seen.contains(key)
    }

    /// Drop keys recorded for blocks older than the retention window.
    pub fn prune(&mut self, head: u64) {
        let cutoff = head.saturating_sub(self.retention_blocks);
        let stale: Vec<u64> = self
            .by_block
            .range(..cutoff)
            .map(|(block, _)| *block)
            .collect();
        for block in stale {
            if let Some(keys) = self.by_block.remove(&block) {
                for key in keys {
                    self.seen.remove(&key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Outcome of offering an event to the reorder buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Held until its block seals.
    Buffered,
    /// Arrived for a block that already flushed; delivered out of order.
    Late,
}

/// Holds events per block until a newer block is observed, then releases the
/// sealed block's events sorted by log index. This converts "whatever order
/// the upstream felt like" into canonical (block, log_index) order.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    pending: BTreeMap<u64, Vec<(u32, PoolEvent)>>,
    /// Highest block already flushed.
    watermark: u64,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: u64, log_index: u32, event: PoolEvent) -> PushOutcome {
        if block <= self.watermark && self.watermark > 0 {
            return PushOutcome::Late;
        }
        self.pending
            .entry(block)
            .or_default()
            .push((log_index, event));
        PushOutcome::Buffered
    }

    /// Release every block strictly below `head`, in order.
    pub fn flush_before(&mut self, head: u64) -> Vec<PoolEvent> {
        let sealed: Vec<u64> = self
            .pending
            .range(..head)
            .map(|(block, _)| *block)
            .collect();
        let mut out = Vec::new();
        for block in sealed {
            if let Some(mut entries) = self.pending.remove(&block) {
                entries.sort_by_key(|(log_index, _)| *log_index);
                out.extend(entries.into_iter().map(|(_, event)| event));
            }
            self.watermark = self.watermark.max(block);
        }
        out
    }

    /// Release everything, used at shutdown so buffered events are not lost.
    pub fn drain_all(&mut self) -> Vec<PoolEvent> {
        self.flush_before(u64::MAX)
    }

    pub fn pending_blocks(&self) -> usize {
        self.pending.len()
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }
}
