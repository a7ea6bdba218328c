//! Lane-partitioned event processing.
//!
//! The router hashes every event to one of N lanes by pool address, so all
//! events for one pool are handled by exactly one task in arrival order.
//! Lanes own their machines outright; no cross-lane locking exists.

use crate::config::{AggregatorSettings, DetectorSettings};
use crate::error::EngineError;
use crate::strategy::{Phase, PoolMachine, StrategySnapshot};
use chrono::Utc;
use poolwatch_core::{Address, Alert, Pool, PoolEvent, TradeEvent};
use poolwatch_feeds::{FeedMessage, PoolRegistry, SentimentCache, StatusEvent};
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Per-lane inbox depth. Full lanes push back on the router, which in turn
/// pushes back on the feed instead of dropping events.
const LANE_CHANNEL_CAPACITY: usize = 1024;

/// Process-wide engine counters, shared with the status loop.
#[derive(Debug, Default)]
pub struct EngineStats {
    events_processed: AtomicU64,
    alerts_emitted: AtomicU64,
    invalid_events: AtomicU64,
    pools_tracked: AtomicU64,
}

impl EngineStats {
    pub fn record_event(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tracked(&self) {
        self.pools_tracked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.pools_tracked.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }

    pub fn invalid_events(&self) -> u64 {
        self.invalid_events.load(Ordering::Relaxed)
    }

    pub fn pools_tracked(&self) -> u64 {
        self.pools_tracked.load(Ordering::Relaxed)
    }
}

/// Stable pool-to-lane assignment. One pool always maps to the same lane,
/// so its events are never processed concurrently.
pub fn lane_for(pool: Address, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    pool.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}

#[derive(Debug)]
enum LaneMessage {
    Event(PoolEvent),
    /// Sealed chain head, broadcast to every lane for signal expiry.
    Head(u64),
    /// Persisted state replayed at startup, before any live events.
    Restore(StrategySnapshot),
}

/// What one machine call produced; applied after the borrow ends.
#[derive(Default)]
struct Outcome {
    alerts: Vec<Alert>,
    snapshot: Option<StrategySnapshot>,
    rejected: Option<EngineError>,
}

impl Outcome {
    fn rejected(error: EngineError) -> Self {
        Self {
            rejected: Some(error),
            ..Default::default()
        }
    }
}

/// One worker task owning a disjoint subset of pool machines.
struct Lane {
    id: usize,
    rx: mpsc::Receiver<LaneMessage>,
    machines: HashMap<Address, PoolMachine>,
    /// Epoch floor for pools whose machine was evicted or never restored.
    /// Keyed only for epochs above zero, so it stays small.
    epochs: HashMap<Address, u32>,
    registry: PoolRegistry,
    sentiment: Arc<SentimentCache>,
    stats: Arc<EngineStats>,
    alerts_tx: mpsc::Sender<Alert>,
    snapshots_tx: mpsc::Sender<StrategySnapshot>,
    detector_settings: Arc<DetectorSettings>,
    aggregator: Arc<AggregatorSettings>,
    head: u64,
}

impl Lane {
    async fn run(mut self) {
        let mut sweep =
            tokio::time::interval(Duration::from_secs(self.aggregator.sweep_interval_secs));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await,
            }
        }

        self.log_leftovers();
    }

    async fn handle(&mut self, message: LaneMessage) {
        match message {
            LaneMessage::Event(event) => self.handle_event(event).await,
            LaneMessage::Head(block) => {
                self.head = self.head.max(block);
            }
            LaneMessage::Restore(snapshot) => self.restore(snapshot),
        }
    }

    async fn handle_event(&mut self, event: PoolEvent) {
        self.stats.record_event();
        self.head = self.head.max(event.block_number());

        let outcome = match event {
            PoolEvent::Created(pool) => self.on_created(pool),
            PoolEvent::Trade(trade) => self.on_trade(trade),
        };
        self.settle(outcome).await;
    }

    fn on_created(&mut self, pool: Pool) -> Outcome {
        let head = self.head;
        let machine = self.ensure_machine(pool);
        let before = (machine.phase(), machine.epoch());
        let alerts = machine.handle_creation(head).into_iter().collect();
        Outcome {
            snapshot: changed_since(before, machine),
            alerts,
            rejected: None,
        }
    }

    fn on_trade(&mut self, trade: TradeEvent) -> Outcome {
        let head = self.head;
        let Some(pool) = self.registry.get(&trade.pool) else {
            return Outcome::rejected(EngineError::InvalidInput(format!(
                "trade for untracked pool {}",
                trade.pool
            )));
        };

        let first_sight = !self.machines.contains_key(&trade.pool);
        let machine = self.ensure_machine(pool);
        let before = (machine.phase(), machine.epoch());

        let mut alerts = Vec::new();
        let mut rejected = None;
        if first_sight {
            // A pool first seen through a trade (warm restart) may still be
            // young enough for the new-pool detector.
            alerts.extend(machine.handle_creation(head));
        }
        match machine.handle_trade(&trade) {
            Ok(fired) => alerts.extend(fired),
            Err(error) => rejected = Some(error),
        }

        Outcome {
            snapshot: changed_since(before, machine),
            alerts,
            rejected,
        }
    }

    /// Rebuild per-pool state persisted before the last shutdown.
    fn restore(&mut self, snapshot: StrategySnapshot) {
        match self.registry.get(&snapshot.pool) {
            Some(pool) => {
                let machine = PoolMachine::restore(
                    pool,
                    &snapshot,
                    self.detector_settings.clone(),
                    self.aggregator.clone(),
                );
                self.machines.insert(snapshot.pool, machine);
                self.stats.record_tracked();
                debug!(
                    "lane {}: restored {} as {} (epoch {})",
                    self.id,
                    snapshot.pool.short(),
                    snapshot.phase.as_str(),
                    snapshot.epoch
                );
            }
            None => {
                // Pool metadata did not survive. Keep an epoch floor so a
                // re-created machine cannot reuse a delivered key; a pool
                // lost mid-qualification counts that epoch as spent.
                let floor = match snapshot.phase {
                    Phase::Qualified => snapshot.epoch + 1,
                    _ => snapshot.epoch,
                };
                if floor > 0 {
                    self.epochs.insert(snapshot.pool, floor);
                }
                warn!(
                    "lane {}: no pool record for restored state {}",
                    self.id,
                    snapshot.pool.short()
                );
            }
        }
    }

    /// Periodic pass: expire horizons, sample sentiment, evict idle state.
    async fn sweep(&mut self) {
        let now = Utc::now();
        let idle_after = chrono::Duration::seconds(self.aggregator.idle_eviction_secs);
        let head = self.head;

        let mut alerts = Vec::new();
        let mut snapshots = Vec::new();
        let mut evictable = Vec::new();

        for (address, machine) in self.machines.iter_mut() {
            let before = (machine.phase(), machine.epoch());
            machine.expire(head);

            // Sentiment rides the sweep so a quiet pool still accumulates
            // the oracle signal. Stale or missing scores contribute nothing.
            let base = machine.pool().base_token().address;
            if let Some(score) = self.sentiment.latest(&base) {
                alerts.extend(machine.handle_sentiment(&score, head));
            }

            if (machine.phase(), machine.epoch()) != before {
                snapshots.push(machine.snapshot());
            }
            if machine.is_evictable(now, idle_after) {
                evictable.push(*address);
            }
        }

        for address in evictable {
            if let Some(machine) = self.machines.remove(&address) {
                if machine.epoch() > 0 {
                    self.epochs.insert(address, machine.epoch());
                }
                self.stats.record_evicted();
                debug!("lane {}: evicted idle pool {}", self.id, address.short());
            }
        }

        for alert in alerts {
            self.emit_alert(alert).await;
        }
        for snapshot in snapshots {
            self.emit_snapshot(snapshot).await;
        }
    }

    async fn settle(&mut self, outcome: Outcome) {
        if let Some(error) = outcome.rejected {
            self.stats.record_invalid();
            warn!("lane {}: dropping event: {}", self.id, error);
        }
        for alert in outcome.alerts {
            self.emit_alert(alert).await;
        }
        if let Some(snapshot) = outcome.snapshot {
            self.emit_snapshot(snapshot).await;
        }
    }

    fn ensure_machine(&mut self, pool: Pool) -> &mut PoolMachine {
        let address = pool.address;
        let epoch = self.epochs.get(&address).copied().unwrap_or(0);
        match self.machines.entry(address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.stats.record_tracked();
                entry.insert(PoolMachine::new(
                    pool,
                    epoch,
                    self.detector_settings.clone(),
                    self.aggregator.clone(),
                ))
            }
        }
    }

    async fn emit_alert(&mut self, alert: Alert) {
        self.stats.record_alert();
        info!(
            "lane {}: {} qualified at block {} with {} (epoch {})",
            self.id,
            alert.pair,
            alert.block_number,
            alert.signals.canonical(),
            alert.epoch
        );
        if self.alerts_tx.send(alert).await.is_err() {
            warn!("lane {}: alert channel closed before shutdown", self.id);
        }
    }

    async fn emit_snapshot(&mut self, snapshot: StrategySnapshot) {
        if snapshot.epoch > 0 {
            self.epochs.insert(snapshot.pool, snapshot.epoch);
        }
        if self.snapshots_tx.send(snapshot).await.is_err() {
            debug!("lane {}: snapshot channel closed", self.id);
        }
    }

    /// Shutdown accounting: pools abandoned mid-accumulation are logged so
    /// an operator can explain missing alerts after a restart.
    fn log_leftovers(&self) {
        let accumulating: Vec<_> = self
            .machines
            .values()
            .filter(|machine| machine.phase() == Phase::Accumulating)
            .collect();
        if accumulating.is_empty() {
            debug!("lane {} drained clean", self.id);
            return;
        }

        warn!(
            "lane {} shut down with {} pool(s) mid-accumulation",
            self.id,
            accumulating.len()
        );
        for machine in accumulating {
            debug!(
                "lane {}: {} left with {} active signal kind(s)",
                self.id,
                machine.pool().address.short(),
                machine.active_kinds().len()
            );
        }
    }
}

fn changed_since(before: (Phase, u32), machine: &PoolMachine) -> Option<StrategySnapshot> {
    ((machine.phase(), machine.epoch()) != before).then(|| machine.snapshot())
}

/// Routes feed output across the lane pool and supervises lane lifecycle.
pub struct SignalEngine {
    detector_settings: Arc<DetectorSettings>,
    aggregator: Arc<AggregatorSettings>,
    registry: PoolRegistry,
    sentiment: Arc<SentimentCache>,
    stats: Arc<EngineStats>,
}

impl SignalEngine {
    pub fn new(
        detector_settings: DetectorSettings,
        aggregator: AggregatorSettings,
        registry: PoolRegistry,
        sentiment: Arc<SentimentCache>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            detector_settings: Arc::new(detector_settings),
            aggregator: Arc::new(aggregator),
            registry,
            sentiment,
            stats,
        }
    }

    /// Consume the feed until it closes, then drain every lane.
    ///
    /// `restored` is delivered before any live event so warm state is in
    /// place when the first trade arrives. Returns only after all lanes
    /// finished their bounded drain.
    pub async fn run(
        self,
        mut feed_rx: mpsc::Receiver<FeedMessage>,
        restored: Vec<StrategySnapshot>,
        alerts_tx: mpsc::Sender<Alert>,
        snapshots_tx: mpsc::Sender<StrategySnapshot>,
    ) {
        let lane_count = self.aggregator.lanes.max(1);
        let mut senders = Vec::with_capacity(lane_count);
        let mut handles = Vec::with_capacity(lane_count);

        for id in 0..lane_count {
            let (tx, rx) = mpsc::channel(LANE_CHANNEL_CAPACITY);
            let lane = Lane {
                id,
                rx,
                machines: HashMap::new(),
                epochs: HashMap::new(),
                registry: self.registry.clone(),
                sentiment: self.sentiment.clone(),
                stats: self.stats.clone(),
                alerts_tx: alerts_tx.clone(),
                snapshots_tx: snapshots_tx.clone(),
                detector_settings: self.detector_settings.clone(),
                aggregator: self.aggregator.clone(),
                head: 0,
            };
            senders.push(tx);
            handles.push(tokio::spawn(lane.run()));
        }
        info!("signal engine started with {} lane(s)", lane_count);

        for snapshot in restored {
            let lane = lane_for(snapshot.pool, lane_count);
            if senders[lane]
                .send(LaneMessage::Restore(snapshot))
                .await
                .is_err()
            {
                warn!("lane {} rejected a restored snapshot", lane);
            }
        }

        while let Some(message) = feed_rx.recv().await {
            match message {
                FeedMessage::Pool(event) => {
                    let lane = lane_for(event.pool_address(), lane_count);
                    if senders[lane]
                        .send(LaneMessage::Event(event))
                        .await
                        .is_err()
                    {
                        warn!("lane {} stopped; shutting the router down", lane);
                        break;
                    }
                }
                FeedMessage::Status(status) => self.handle_status(status, &senders).await,
            }
        }

        // Dropping the senders lets each lane finish its buffered work.
        drop(senders);
        for handle in handles {
            if let Err(error) = handle.await {
                warn!("lane task failed: {}", error);
            }
        }
        info!("signal engine stopped");
    }

    async fn handle_status(&self, status: StatusEvent, senders: &[mpsc::Sender<LaneMessage>]) {
        match status {
            StatusEvent::Connected { endpoint } => {
                debug!("feed connected via {}", endpoint);
            }
            StatusEvent::Disconnected { endpoint, reason } => {
                debug!("feed lost {}: {}", endpoint, reason);
            }
            StatusEvent::Unavailable {
                cycle_attempts,
                retry_in_ms,
            } => {
                warn!(
                    "feed unavailable after {} full cycle(s), next retry in {:.1}s",
                    cycle_attempts,
                    retry_in_ms as f64 / 1000.0
                );
            }
            StatusEvent::HeadAdvanced { block } => {
                for sender in senders {
                    if sender.send(LaneMessage::Head(block)).await.is_err() {
                        debug!("a lane stopped before head broadcast");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Phase;
    use poolwatch_core::{
        Chain, PoolVersion, SentimentScore, SignalKind, TokenInfo, TradeKind, TxHash, UsdValue,
    };
    use poolwatch_feeds::QuoteBook;
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

    fn registry_fixture() -> PoolRegistry {
        let mut quotes = QuoteBook::new();
        quotes.add(Address([0x02; 20]), "WETH", 2_500.0, 18);
        let registry = PoolRegistry::new(Chain::Base, quotes);
        registry.restore(pool_fixture(100));
        registry
    }

    fn engine_fixture(
        registry: PoolRegistry,
        sentiment: Arc<SentimentCache>,
    ) -> (SignalEngine, Arc<EngineStats>) {
        let stats = Arc::new(EngineStats::default());
        let engine = SignalEngine::new(
            DetectorSettings {
                min_liquidity_usd: 0.0,
                ..Default::default()
            },
            AggregatorSettings {
                lanes: 2,
                sweep_interval_secs: 1,
                ..Default::default()
            },
            registry,
            sentiment,
            stats.clone(),
        );
        (engine, stats)
    }

    #[test]
    fn test_lane_assignment_is_stable() {
        let pool = Address([0xAB; 20]);
        assert_eq!(lane_for(pool, 8), lane_for(pool, 8));
        assert_eq!(lane_for(pool, 1), 0);
        assert!(lane_for(pool, 8) < 8);
    }

    #[tokio::test]
    async fn test_qualifying_event_stream_produces_one_alert() {
        let (engine, stats) = engine_fixture(registry_fixture(), Arc::new(SentimentCache::new(3600)));
        let (feed_tx, feed_rx) = mpsc::channel(64);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(64);
        let (snapshots_tx, mut snapshots_rx) = mpsc::channel(64);

        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Created(pool_fixture(100))))
            .await
            .unwrap();
        for event in [
            trade(TradeKind::Mint, 101, 1_000.0),
            trade(TradeKind::Mint, 108, 5_200.0),
            trade(TradeKind::Swap, 110, 49.6),
        ] {
            feed_tx
                .send(FeedMessage::Pool(PoolEvent::Trade(event)))
                .await
                .unwrap();
        }
        feed_tx
            .send(FeedMessage::Status(StatusEvent::head(110)))
            .await
            .unwrap();
        drop(feed_tx);

        engine.run(feed_rx, Vec::new(), alerts_tx, snapshots_tx).await;

        let alert = alerts_rx.recv().await.expect("qualification alert");
        assert_eq!(
            alert.signals.canonical(),
            "liquidity_spike+new_pool+whale_buy"
        );
        assert_eq!(alert.block_number, 110);
        assert!(alerts_rx.recv().await.is_none());

        let mut phases = Vec::new();
        while let Some(snapshot) = snapshots_rx.recv().await {
            phases.push(snapshot.phase);
        }
        assert_eq!(phases, vec![Phase::Accumulating, Phase::Qualified]);

        assert_eq!(stats.events_processed(), 4);
        assert_eq!(stats.alerts_emitted(), 1);
        assert_eq!(stats.pools_tracked(), 1);
    }

    #[tokio::test]
    async fn test_restored_qualified_pool_does_not_realert() {
        let (engine, stats) = engine_fixture(registry_fixture(), Arc::new(SentimentCache::new(3600)));
        let (feed_tx, feed_rx) = mpsc::channel(64);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(64);
        let (snapshots_tx, _snapshots_rx) = mpsc::channel(64);

        let restored = vec![StrategySnapshot {
            pool: Address([0xAB; 20]),
            phase: Phase::Qualified,
            epoch: 0,
            updated_at: Utc::now(),
        }];

        // An oversized swap right after restart: the whale detector fires,
        // but the restored machine is still inside its qualified window.
        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Trade(trade(
                TradeKind::Mint,
                120,
                10_000.0,
            ))))
            .await
            .unwrap();
        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Trade(trade(
                TradeKind::Swap,
                121,
                100.0,
            ))))
            .await
            .unwrap();
        drop(feed_tx);

        engine.run(feed_rx, restored, alerts_tx, snapshots_tx).await;

        assert!(alerts_rx.recv().await.is_none());
        assert_eq!(stats.alerts_emitted(), 0);
        assert_eq!(stats.pools_tracked(), 1);
    }

    #[tokio::test]
    async fn test_invalid_trade_is_dropped_and_lane_continues() {
        let (engine, stats) = engine_fixture(registry_fixture(), Arc::new(SentimentCache::new(3600)));
        let (feed_tx, feed_rx) = mpsc::channel(64);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(64);
        let (snapshots_tx, _snapshots_rx) = mpsc::channel(64);

        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Created(pool_fixture(100))))
            .await
            .unwrap();
        // Predates the pool; rejected without touching detector state.
        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Trade(trade(
                TradeKind::Mint,
                99,
                777.0,
            ))))
            .await
            .unwrap();
        for event in [
            trade(TradeKind::Mint, 101, 1_000.0),
            trade(TradeKind::Mint, 108, 5_200.0),
            trade(TradeKind::Swap, 110, 49.6),
        ] {
            feed_tx
                .send(FeedMessage::Pool(PoolEvent::Trade(event)))
                .await
                .unwrap();
        }
        drop(feed_tx);

        engine.run(feed_rx, Vec::new(), alerts_tx, snapshots_tx).await;

        let alert = alerts_rx.recv().await.expect("bad event must not stall the lane");
        assert_eq!(
            alert.signals.canonical(),
            "liquidity_spike+new_pool+whale_buy"
        );
        assert_eq!(stats.invalid_events(), 1);
        assert_eq!(stats.events_processed(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentiment_joins_through_the_sweep() {
        let sentiment = Arc::new(SentimentCache::new(3600));
        // Base token of the fixture pool scores above the threshold.
        sentiment.record(SentimentScore::new(Address([0x01; 20]), 0.75, "unit-test"));

        let (engine, _stats) = engine_fixture(registry_fixture(), sentiment);
        let (feed_tx, feed_rx) = mpsc::channel(64);
        let (alerts_tx, mut alerts_rx) = mpsc::channel(64);
        let (snapshots_tx, _snapshots_rx) = mpsc::channel(64);

        let engine_task = tokio::spawn(engine.run(feed_rx, Vec::new(), alerts_tx, snapshots_tx));

        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Created(pool_fixture(100))))
            .await
            .unwrap();
        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Trade(trade(
                TradeKind::Mint,
                101,
                10_000.0,
            ))))
            .await
            .unwrap();
        feed_tx
            .send(FeedMessage::Pool(PoolEvent::Trade(trade(
                TradeKind::Swap,
                110,
                80.0,
            ))))
            .await
            .unwrap();

        // Two kinds arrive from trades; the third rides the next sweep.
        let alert = alerts_rx.recv().await.expect("sweep delivers sentiment");
        assert_eq!(alert.signals.canonical(), "new_pool+sentiment+whale_buy");
        assert!(alert.signals.contains(SignalKind::SentimentHigh));

        drop(feed_tx);
        engine_task.await.expect("engine task");
    }
}
