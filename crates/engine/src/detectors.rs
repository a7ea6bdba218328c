//! The four signal detectors, evaluated per pool.
//!
//! Each detector fires at most one signal per triggering condition. The
//! aggregator replaces same-kind signals, so a detector re-firing on a
//! later trigger refreshes the vote instead of stacking it.

use crate::config::DetectorSettings;
use crate::liquidity::LiquidityTracker;
use poolwatch_core::{Pool, SentimentScore, Signal, SignalKind, TradeEvent, TradeKind};
use std::sync::Arc;

/// Detector state for one pool: liquidity window, the one-shot new-pool
/// latch and the spike hysteresis arm.
#[derive(Debug)]
pub struct PoolDetectors {
    settings: Arc<DetectorSettings>,
    liquidity: LiquidityTracker,
    new_pool_fired: bool,
    spike_armed: bool,
}

impl PoolDetectors {
    pub fn new(settings: Arc<DetectorSettings>) -> Self {
        let liquidity = LiquidityTracker::new(settings.baseline_blocks);
        Self {
            settings,
            liquidity,
            new_pool_fired: false,
            spike_armed: true,
        }
    }

    /// New-pool check, run when the creation event arrives. Fires at most
    /// once per pool, and only while the pool is still fresh; a creation
    /// replayed from deep backfill stays silent.
    pub fn on_creation(&mut self, pool: &Pool, head: u64) -> Option<Signal> {
        if self.new_pool_fired {
            return None;
        }
        self.new_pool_fired = true;

        let head = head.max(pool.created_block);
        let age = head - pool.created_block;
        if age >= self.settings.new_pool_blocks {
            return None;
        }
        Some(Signal::new(
            SignalKind::NewPool,
            pool.address,
            pool.created_block,
            age as f64,
        ))
    }

    /// Apply one trade and evaluate the liquidity-spike and whale-buy
    /// detectors against the updated state.
    pub fn on_trade(&mut self, event: &TradeEvent) -> Vec<Signal> {
        self.liquidity
            .observe(event.block_number, event.kind, event.usd_value);

        let mut fired = Vec::new();
        let current = self.liquidity.current();
        let deep_enough = current.to_f64() >= self.settings.min_liquidity_usd;

        // Spike: strictly above the multiplier, then disarmed until the
        // ratio falls back below the re-arm threshold.
        if let Some(ratio) = self.liquidity.spike_ratio() {
            if self.spike_armed {
                if deep_enough && ratio > self.settings.spike_multiplier {
                    self.spike_armed = false;
                    fired.push(Signal::new(
                        SignalKind::LiquiditySpike,
                        event.pool,
                        event.block_number,
                        ratio,
                    ));
                }
            } else if ratio < self.settings.spike_rearm_multiplier {
                self.spike_armed = true;
            }
        }

        // Whale: one swap strictly above the configured fraction of the
        // pool's liquidity.
        if event.kind == TradeKind::Swap && deep_enough {
            if let Some(fraction) = event.usd_value.fraction_of(current) {
                if fraction > self.settings.whale_fraction {
                    fired.push(Signal::new(
                        SignalKind::WhaleBuy,
                        event.pool,
                        event.block_number,
                        fraction,
                    ));
                }
            }
        }

        fired
    }

    /// Sentiment check against the latest non-stale score. Staleness and
    /// outages are filtered upstream; absence means no signal here.
    pub fn on_sentiment(&self, pool: &Pool, score: &SentimentScore, head: u64) -> Option<Signal> {
        if score.value <= self.settings.sentiment_threshold {
            return None;
        }
        Some(
            Signal::new(SignalKind::SentimentHigh, pool.address, head, score.value)
                .with_confidence(score.value.abs()),
        )
    }

    pub fn liquidity(&self) -> &LiquidityTracker {
        &self.liquidity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use poolwatch_core::{Address, Chain, PoolVersion, TokenInfo, TxHash, UsdValue};
    use pretty_assertions::assert_eq;

    fn pool_fixture(created_block: u64) -> Pool {
        Pool {
            chain: Chain::Base,
            version: PoolVersion::V2,
            address: Address([0xAB; 20]),
            token0: TokenInfo::new(Address([0x01; 20]), "PEPE", 18),
            token1: TokenInfo::new(Address([0x02; 20]), "WETH", 18),
            fee_tier: None,
            created_block,
            created_at: Utc::now(),
            quote_index: 1,
        }
    }

    fn trade(kind: TradeKind, block: u64, usd: f64) -> TradeEvent {
        TradeEvent {
            pool: Address([0xAB; 20]),
            kind,
            block_number: block,
            tx_hash: TxHash([block as u8; 32]),
            log_index: 0,
            amount0: 0,
            amount1: 0,
            token0_in: true,
            usd_value: UsdValue::from_f64(usd),
            observed_at: Utc::now(),
        }
    }

    fn settings() -> Arc<DetectorSettings> {
        // Zero liquidity floor so small-number scenarios stay readable.
        Arc::new(DetectorSettings {
            min_liquidity_usd: 0.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_new_pool_fires_inside_window() {
        let mut detectors = PoolDetectors::new(settings());
        let pool = pool_fixture(100);

        let signal = detectors.on_creation(&pool, 105).unwrap();
        assert_eq!(signal.kind, SignalKind::NewPool);
        assert_eq!(signal.magnitude, 5.0);
    }

    #[test]
    fn test_new_pool_silent_outside_window() {
        let mut detectors = PoolDetectors::new(settings());
        let pool = pool_fixture(100);

        assert!(detectors.on_creation(&pool, 115).is_none());
    }

    #[test]
    fn test_new_pool_never_refires() {
        let mut detectors = PoolDetectors::new(settings());
        let pool = pool_fixture(100);

        assert!(detectors.on_creation(&pool, 101).is_some());
        assert!(detectors.on_creation(&pool, 102).is_none());
    }

    #[test]
    fn test_spike_boundary_exact_multiplier_does_not_fire() {
        let mut detectors = PoolDetectors::new(settings());
        detectors.on_trade(&trade(TradeKind::Mint, 100, 1_000.0));
        detectors.on_trade(&trade(TradeKind::Swap, 101, 1.0));

        // Baseline 1000; mint to exactly 5000 makes the ratio exactly 5.0.
        let fired = detectors.on_trade(&trade(TradeKind::Mint, 102, 4_000.0));
        assert!(fired.is_empty(), "exact threshold must not fire");

        // A hair over the line does.
        let fired = detectors.on_trade(&trade(TradeKind::Mint, 102, 0.0001));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, SignalKind::LiquiditySpike);
        assert!(fired[0].magnitude > 5.0);
    }

    #[test]
    fn test_spike_hysteresis_blocks_refire_until_rearm() {
        let mut detectors = PoolDetectors::new(settings());
        detectors.on_trade(&trade(TradeKind::Mint, 100, 1_000.0));
        detectors.on_trade(&trade(TradeKind::Swap, 101, 1.0));

        // Ratio jumps to 6x and fires once.
        let fired = detectors.on_trade(&trade(TradeKind::Mint, 102, 5_000.0));
        assert_eq!(fired.len(), 1);

        // Same block, same elevated ratio: disarmed, so nothing fires.
        let fired = detectors.on_trade(&trade(TradeKind::Swap, 102, 1.0));
        assert!(fired.is_empty());

        // As spike blocks seal, the baseline catches up and the ratio
        // falls below the re-arm threshold.
        let fired = detectors.on_trade(&trade(TradeKind::Swap, 103, 1.0));
        assert!(fired.is_empty());

        // The next rally fires again.
        let fired = detectors.on_trade(&trade(TradeKind::Mint, 104, 30_000.0));
        assert_eq!(fired.len(), 1, "re-armed spike fires again");
    }

    #[test]
    fn test_whale_fires_strictly_above_fraction() {
        let mut detectors = PoolDetectors::new(settings());
        detectors.on_trade(&trade(TradeKind::Mint, 100, 10_000.0));

        // Exactly 0.5% of 10k is 50: must not fire.
        let fired = detectors.on_trade(&trade(TradeKind::Swap, 101, 50.0));
        assert!(fired.is_empty());

        // 0.8% fires.
        let fired = detectors.on_trade(&trade(TradeKind::Swap, 102, 80.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, SignalKind::WhaleBuy);
        assert!((fired[0].magnitude - 0.008).abs() < 1e-12);
    }

    #[test]
    fn test_whale_ignores_mints_and_burns() {
        let mut detectors = PoolDetectors::new(settings());
        detectors.on_trade(&trade(TradeKind::Mint, 100, 10_000.0));

        let fired = detectors.on_trade(&trade(TradeKind::Burn, 101, 500.0));
        assert!(fired.iter().all(|s| s.kind != SignalKind::WhaleBuy));
    }

    #[test]
    fn test_min_liquidity_gate_silences_shallow_pools() {
        let gated = Arc::new(DetectorSettings::default());
        let mut detectors = PoolDetectors::new(gated);

        // $800 pool is under the $5000 floor: a huge relative swap stays
        // silent.
        detectors.on_trade(&trade(TradeKind::Mint, 100, 800.0));
        let fired = detectors.on_trade(&trade(TradeKind::Swap, 101, 100.0));
        assert!(fired.is_empty());
    }

    #[test]
    fn test_unpriceable_trade_fires_nothing() {
        let mut detectors = PoolDetectors::new(settings());
        detectors.on_trade(&trade(TradeKind::Mint, 100, 10_000.0));

        let fired = detectors.on_trade(&trade(TradeKind::Swap, 101, 0.0));
        assert!(fired.is_empty());
    }

    #[test]
    fn test_sentiment_strictly_above_threshold() {
        let detectors = PoolDetectors::new(settings());
        let pool = pool_fixture(100);

        let flat = SentimentScore::new(pool.base_token().address, 0.6, "test");
        assert!(detectors.on_sentiment(&pool, &flat, 200).is_none());

        let high = SentimentScore::new(pool.base_token().address, 0.75, "test");
        let signal = detectors.on_sentiment(&pool, &high, 200).unwrap();
        assert_eq!(signal.kind, SignalKind::SentimentHigh);
        assert_eq!(signal.magnitude, 0.75);
    }
}
