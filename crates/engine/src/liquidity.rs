//! Per-pool liquidity bookkeeping with a trailing per-block baseline.

use poolwatch_core::{TradeKind, UsdValue};
use std::collections::VecDeque;

/// Tracks a pool's current USD liquidity from cumulative mint/burn deltas
/// and keeps end-of-block snapshots for the trailing moving average.
///
/// The history starts at the first observed event, so a freshly created
/// pool is compared against its own early blocks rather than against a
/// window padded with zeros.
#[derive(Debug, Clone)]
pub struct LiquidityTracker {
    current: UsdValue,
    history: VecDeque<UsdValue>,
    capacity: usize,
    last_block: u64,
}

impl LiquidityTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: UsdValue::ZERO,
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            last_block: 0,
        }
    }

    /// Apply one trade. Mints add to liquidity, burns remove (floored at
    /// zero), swaps leave the total unchanged but still advance the clock.
    pub fn observe(&mut self, block: u64, kind: TradeKind, value: UsdValue) {
        self.roll_to(block);
        match kind {
            TradeKind::Mint => self.current = self.current + value,
            TradeKind::Burn => self.current = self.current - value,
            TradeKind::Swap => {}
        }
    }

    /// Seal end-of-block snapshots for every block between the last seen
    /// one and `block`. Gaps longer than the window collapse to a full
    /// window of the unchanged value.
    fn roll_to(&mut self, block: u64) {
        if self.last_block == 0 {
            self.last_block = block;
            return;
        }
        if block <= self.last_block {
            return;
        }
        let gap = (block - self.last_block).min(self.capacity as u64);
        for _ in 0..gap {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(self.current);
        }
        self.last_block = block;
    }

    pub fn current(&self) -> UsdValue {
        self.current
    }

    /// Trailing moving average of end-of-block liquidity, or None before
    /// any block has been sealed.
    pub fn baseline(&self) -> Option<UsdValue> {
        if self.history.is_empty() {
            return None;
        }
        let sum: u128 = self.history.iter().map(|v| v.0 as u128).sum();
        Some(UsdValue((sum / self.history.len() as u128) as u64))
    }

    /// Current liquidity over the trailing baseline. None when there is
    /// no baseline yet or the baseline is zero; such pools cannot spike.
    pub fn spike_ratio(&self) -> Option<f64> {
        self.current.ratio_to(self.baseline()?)
    }

    pub fn observed_blocks(&self) -> usize {
        self.history.len()
    }
}
