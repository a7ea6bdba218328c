//! Per-pool signal aggregation.
//!
//! Each tracked pool gets one [`PoolMachine`] driving its detectors and the
//! Idle -> Accumulating -> Qualified lifecycle. Signals count toward
//! qualification while inside a rolling block horizon; crossing the
//! distinct-kind threshold emits exactly one alert per epoch.

use crate::config::{AggregatorSettings, DetectorSettings};
use crate::detectors::PoolDetectors;
use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use poolwatch_core::{Alert, Pool, SentimentScore, Signal, SignalSet, TradeEvent};
use std::sync::Arc;

pub use poolwatch_core::{Phase, StrategySnapshot};

/// A signal currently counting toward qualification.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSignal {
    pub signal: Signal,
    /// Last block (inclusive) at which this signal still counts.
    pub expires_at_block: u64,
}

/// Per-pool strategy state: detectors plus the accumulation window.
///
/// One machine per pool, owned by exactly one lane, so every method takes
/// `&mut self` without further locking.
pub struct PoolMachine {
    pool: Pool,
    detectors: PoolDetectors,
    signals: Vec<ActiveSignal>,
    phase: Phase,
    epoch: u32,
    last_activity: DateTime<Utc>,
    aggregator: Arc<AggregatorSettings>,
}

impl PoolMachine {
    pub fn new(
        pool: Pool,
        epoch: u32,
        detector_settings: Arc<DetectorSettings>,
        aggregator: Arc<AggregatorSettings>,
    ) -> Self {
        Self {
            detectors: PoolDetectors::new(detector_settings),
            pool,
            signals: Vec::new(),
            phase: Phase::Idle,
            epoch,
            last_activity: Utc::now(),
            aggregator,
        }
    }

    /// Rebuild a machine from a persisted snapshot.
    ///
    /// Live signals are not persisted. A machine restored as qualified
    /// carries none, so the first sweep settles the drop-out and bumps the
    /// epoch; until then it stays silent, which keeps the no-storm rule
    /// intact across restarts.
    pub fn restore(
        pool: Pool,
        snapshot: &StrategySnapshot,
        detector_settings: Arc<DetectorSettings>,
        aggregator: Arc<AggregatorSettings>,
    ) -> Self {
        let mut machine = Self::new(pool, snapshot.epoch, detector_settings, aggregator);
        machine.phase = snapshot.phase;
        machine
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Distinct kinds currently inside the horizon.
    pub fn active_kinds(&self) -> SignalSet {
        self.signals.iter().map(|active| active.signal.kind).collect()
    }

    pub fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            pool: self.pool.address,
            phase: self.phase,
            epoch: self.epoch,
            updated_at: Utc::now(),
        }
    }

    /// Feed the pool-creation observation through the new-pool detector.
    pub fn handle_creation(&mut self, head: u64) -> Option<Alert> {
        self.last_activity = Utc::now();
        let signal = self.detectors.on_creation(&self.pool, head)?;
        self.admit(signal)
    }

    /// Run one trade through the detectors, admitting whatever fires.
    ///
    /// Events that cannot belong to this pool are rejected rather than
    /// scored; the caller drops them and the lane keeps running.
    pub fn handle_trade(&mut self, event: &TradeEvent) -> Result<Option<Alert>, EngineError> {
        if event.pool != self.pool.address {
            return Err(EngineError::InvalidInput(format!(
                "trade for {} routed to machine for {}",
                event.pool, self.pool.address
            )));
        }
        if event.block_number < self.pool.created_block {
            return Err(EngineError::InvalidInput(format!(
                "trade at block {} predates pool created at block {}",
                event.block_number, self.pool.created_block
            )));
        }

        self.last_activity = Utc::now();
        let mut alert = None;
        for signal in self.detectors.on_trade(event) {
            if let Some(fired) = self.admit(signal) {
                alert = Some(fired);
            }
        }
        Ok(alert)
    }

    /// Score the latest sentiment reading against the threshold.
    pub fn handle_sentiment(&mut self, score: &SentimentScore, head: u64) -> Option<Alert> {
        let signal = self.detectors.on_sentiment(&self.pool, score, head)?;
        self.admit(signal)
    }

    /// Drop signals whose horizon has passed and settle the phase.
    ///
    /// Leaving the qualified window bumps the epoch: a later qualification
    /// is a new episode with its own delivery key.
    pub fn expire(&mut self, head: u64) {
        self.signals.retain(|active| head <= active.expires_at_block);

        let required = usize::from(self.aggregator.signals_required);
        match self.phase {
            Phase::Qualified if self.signals.len() < required => {
                self.epoch += 1;
                self.phase = if self.signals.is_empty() {
                    Phase::Idle
                } else {
                    Phase::Accumulating
                };
            }
            Phase::Accumulating if self.signals.is_empty() => {
                self.phase = Phase::Idle;
            }
            _ => {}
        }
    }

    /// Whether this machine's memory can be reclaimed.
    ///
    /// Only idle machines qualify; the caller retains the epoch so a
    /// re-created machine cannot reuse a delivered key.
    pub fn is_evictable(&self, now: DateTime<Utc>, idle_after: Duration) -> bool {
        self.phase == Phase::Idle && now.signed_duration_since(self.last_activity) >= idle_after
    }

    /// Fold one signal into the accumulation window.
    ///
    /// A repeated kind replaces its previous observation instead of
    /// stacking, so qualification always counts distinct kinds. Returns an
    /// alert only on the transition into `Qualified`; once qualified the
    /// machine stays silent until drop-out and re-qualification.
    fn admit(&mut self, signal: Signal) -> Option<Alert> {
        let block = signal.block_number;
        self.expire(block);
        self.last_activity = Utc::now();

        self.signals.retain(|active| active.signal.kind != signal.kind);
        self.signals.push(ActiveSignal {
            signal,
            expires_at_block: block + self.aggregator.horizon_blocks,
        });

        if self.phase == Phase::Qualified {
            return None;
        }

        if self.signals.len() >= usize::from(self.aggregator.signals_required) {
            self.phase = Phase::Qualified;
            let contributing: Vec<Signal> =
                self.signals.iter().map(|active| active.signal.clone()).collect();
            return Some(Alert::from_qualification(
                &self.pool,
                &contributing,
                self.epoch,
                block,
            ));
        }

        self.phase = Phase::Accumulating;
        None
    }
}
