//! Chain event feed: runs one upstream at a time in priority order,
//! failing over on error and backing off after a full failed cycle.
//!
//! Raw logs from the active source pass through decode, registry lookup,
//! duplicate suppression and per-block reordering before they reach the
//! engine. The checkpoint records the last sealed block so a restart or
//! failover resumes exactly one block after it.

use crate::decode::{topics, DecodedLog, LogDecoder};
use crate::dedup::{PushOutcome, ReorderBuffer, SeenSet};
use crate::endpoint::{ConnectionState, Endpoint, FeedSettings, Transport};
use crate::message::{FeedMessage, SourceMessage, StatusEvent};
use crate::poll::{fetch_logs_range, latest_block, PollSource};
use crate::registry::PoolRegistry;
use crate::rpc::LogEntry;
use crate::socket::SocketSource;
use crate::FeedError;
use chrono::Utc;
use poolwatch_core::{EventKey, PoolEvent, TradeEvent};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SOURCE_CHANNEL_CAPACITY: usize = 4096;
/// How often the consume loop re-checks the shutdown flag while idle.
const RECV_TICK: Duration = Duration::from_millis(500);
/// An endpoint that stayed up this long resets the backoff counter.
const STABLE_UPTIME: Duration = Duration::from_secs(300);

pub struct ChainEventFeed {
    settings: FeedSettings,
    decoder: LogDecoder,
    registry: PoolRegistry,
    checkpoint: Arc<AtomicU64>,
    seen: SeenSet,
    reorder: ReorderBuffer,
    state: ConnectionState,
    out: mpsc::Sender<FeedMessage>,
}

impl ChainEventFeed {
    pub fn new(
        settings: FeedSettings,
        decoder: LogDecoder,
        registry: PoolRegistry,
        checkpoint: Arc<AtomicU64>,
        out: mpsc::Sender<FeedMessage>,
    ) -> Self {
        let seen = SeenSet::new(settings.dedup_retention_blocks);
        Self {
            settings,
            decoder,
            registry,
            checkpoint,
            seen,
            reorder: ReorderBuffer::new(),
            state: ConnectionState::Disconnected,
            out,
        }
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.load(Ordering::Relaxed)
    }

    /// Run until shutdown. Endpoints are tried in priority order; when the
    /// whole list fails in one cycle the feed reports itself unavailable,
    /// backs off exponentially up to the ceiling, and tries again. It never
    /// gives up on its own.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        let endpoints = self.settings.ordered_endpoints();
        if endpoints.is_empty() {
            warn!("no feed endpoints configured, feed exiting");
            return;
        }
        info!(
            "chain event feed starting with {} endpoint(s), checkpoint at block {}",
            endpoints.len(),
            self.checkpoint()
        );

        let mut failed_cycles = 0u32;
        'cycles: while running.load(Ordering::Relaxed) {
            let mut cycle_attempts = 0u32;
            for endpoint in &endpoints {
                if !running.load(Ordering::Relaxed) {
                    break 'cycles;
                }
                let started = std::time::Instant::now();
                match self.run_endpoint(endpoint, &running).await {
                    Ok(()) => break 'cycles,
                    Err(e) => {
                        cycle_attempts += 1;
                        let uptime = started.elapsed();
                        if uptime > STABLE_UPTIME {
                            info!(
                                "{}: stable for {:?} before failing, resetting backoff",
                                endpoint.url, uptime
                            );
                            failed_cycles = 0;
                        }
                        warn!("{}: source failed after {:?}: {}", endpoint.url, uptime, e);
                        // Only an established link reports a disconnect; a
                        // failed dial surfaces through the cycle status.
                        if self.state.is_connected() {
                            self.emit_status(StatusEvent::disconnected(
                                &endpoint.url,
                                e.to_string(),
                            ))
                            .await;
                        }
                        self.state = self.state.clone().error(&e.to_string());
                        tokio::time::sleep(Duration::from_millis(self.settings.reconnect_delay_ms))
                            .await;
                    }
                }
            }
            if !running.load(Ordering::Relaxed) {
                break;
            }

            // Every endpoint failed this cycle. Unavailability is reported,
            // never fatal: keep retrying at the capped delay.
            failed_cycles = failed_cycles.saturating_add(1);
            self.state = ConnectionState::Reconnecting {
                attempt: failed_cycles,
            };
            let backoff_power = failed_cycles.min(8);
            let base = self
                .settings
                .reconnect_delay_ms
                .saturating_mul(1u64 << backoff_power);
            let capped = base.min(self.settings.backoff_ceiling_ms);
            let jitter = rand::thread_rng().gen_range(0..=capped / 4);
            let delay_ms = capped
                .saturating_add(jitter)
                .min(self.settings.backoff_ceiling_ms);
            warn!(
                "all {} endpoint(s) failed (cycle #{}), retrying in {:.1}s",
                endpoints.len(),
                failed_cycles,
                delay_ms as f64 / 1000.0
            );
            self.emit_status(StatusEvent::unavailable(cycle_attempts, delay_ms))
                .await;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        info!("chain event feed stopped at block {}", self.checkpoint());
    }

    /// Drive one endpoint until it errors or shutdown is requested.
    async fn run_endpoint(
        &mut self,
        endpoint: &Endpoint,
        running: &Arc<AtomicBool>,
    ) -> Result<(), FeedError> {
        // Socket subscriptions only carry live traffic; catch up over HTTP
        // first so the gap since the checkpoint is not lost.
        if endpoint.transport == Transport::SocketStream {
            self.backfill().await?;
        }
        self.state = self.state.clone().connect();

        let (tx, mut rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
        let checkpoint = self.checkpoint.load(Ordering::Relaxed);
        let resume = if checkpoint == 0 { 0 } else { checkpoint + 1 };

        let mut handle = match endpoint.transport {
            Transport::SocketStream => {
                let source =
                    SocketSource::new(&endpoint.url, self.settings.request_timeout_ms, tx);
                tokio::spawn(async move { source.run_once().await })
            }
            Transport::Poll => {
                let source = PollSource::new(
                    &endpoint.url,
                    self.settings.poll_interval_ms,
                    self.settings.max_blocks_per_query,
                    self.settings.request_timeout_ms,
                    self.decoder.clone(),
                    self.registry.clone(),
                    tx,
                )?;
                tokio::spawn(async move { source.run_once(resume).await })
            }
        };

        let result: Result<(), FeedError> = loop {
            if !running.load(Ordering::Relaxed) {
                break Ok(());
            }
            match tokio::time::timeout(RECV_TICK, rx.recv()).await {
                Ok(Some(msg)) => {
                    if let Err(e) = self.handle_source_message(endpoint, msg).await {
                        break Err(e);
                    }
                }
                Ok(None) => {
                    break match (&mut handle).await {
                        Ok(Err(e)) => Err(e),
                        Ok(Ok(())) => Err(FeedError::Disconnected("source ended".into())),
                        Err(e) => {
                            Err(FeedError::Disconnected(format!("source task failed: {e}")))
                        }
                    };
                }
                Err(_) => continue,
            }
        };
        handle.abort();
        result
    }

    async fn handle_source_message(
        &mut self,
        endpoint: &Endpoint,
        msg: SourceMessage,
    ) -> Result<(), FeedError> {
        match msg {
            SourceMessage::Connected => {
                self.state = self.state.clone().connected();
                info!("{}: live", endpoint.url);
                self.emit_status(StatusEvent::connected(&endpoint.url)).await;
            }
            SourceMessage::Log(entry) => self.handle_log(&entry).await?,
            SourceMessage::Head(next) => self.advance_head(next).await?,
        }
        Ok(())
    }

    /// Decode one raw log and buffer the resulting event. A malformed log
    /// is dropped with a warning; it never takes the stream down.
    async fn handle_log(&mut self, entry: &LogEntry) -> Result<(), FeedError> {
        let decoded = match self.decoder.decode(entry) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(
                    "dropping undecodable log at block {} index {}: {}",
                    entry.block_number, entry.log_index, e
                );
                return Ok(());
            }
        };

        match &decoded {
            DecodedLog::Creation {
                block_number,
                tx_hash,
                log_index,
                ..
            } => {
                let key = EventKey {
                    tx_hash: *tx_hash,
                    log_index: *log_index,
                };
                if !self.seen.insert(key, *block_number) {
                    return Ok(());
                }
                if let Some(pool) = self.registry.observe_creation(&decoded) {
                    info!(
                        "new pool {} {} at block {}",
                        pool.pair_label(),
                        pool.address.short(),
                        block_number
                    );
                    self.buffer(*block_number, *log_index, PoolEvent::Created(pool));
                }
            }
            DecodedLog::Trade {
                pool,
                kind,
                amount0,
                amount1,
                token0_in,
                block_number,
                tx_hash,
                log_index,
            } => {
                // Trades on pools we never saw created are not ours to track.
                let Some(tracked) = self.registry.get(pool) else {
                    return Ok(());
                };
                let key = EventKey {
                    tx_hash: *tx_hash,
                    log_index: *log_index,
                };
                if !self.seen.insert(key, *block_number) {
                    return Ok(());
                }
                let usd_value = self.registry.estimate_usd(&tracked, *kind, *amount0, *amount1);
                let event = TradeEvent {
                    pool: *pool,
                    kind: *kind,
                    block_number: *block_number,
                    tx_hash: *tx_hash,
                    log_index: *log_index,
                    amount0: *amount0,
                    amount1: *amount1,
                    token0_in: *token0_in,
                    usd_value,
                    observed_at: Utc::now(),
                };
                self.buffer(*block_number, *log_index, PoolEvent::Trade(event));
            }
        }
        Ok(())
    }

    fn buffer(&mut self, block: u64, log_index: u32, event: PoolEvent) {
        if self.reorder.push(block, log_index, event) == PushOutcome::Late {
            debug!("event for sealed block {} arrived late, dropped", block);
        }
    }

    /// Seal blocks below `next`: flush them downstream in (block, log index)
    /// order, advance the checkpoint and prune the seen set.
    async fn advance_head(&mut self, next: u64) -> Result<(), FeedError> {
        let sealed = self.reorder.flush_before(next);
        for event in sealed {
            self.out
                .send(FeedMessage::Pool(event))
                .await
                .map_err(|_| FeedError::ChannelClosed)?;
        }
        let acked = next.saturating_sub(1);
        if acked > self.checkpoint.load(Ordering::Relaxed) {
            self.checkpoint.store(acked, Ordering::Relaxed);
        }
        self.seen.prune(acked);
        self.emit_status(StatusEvent::head(acked)).await;
        Ok(())
    }

    /// Catch up from the checkpoint over the first HTTP endpoint. Without
    /// one the gap is unrecoverable and the feed resumes live only.
    async fn backfill(&mut self) -> Result<(), FeedError> {
        let checkpoint = self.checkpoint.load(Ordering::Relaxed);
        if checkpoint == 0 {
            return Ok(());
        }
        let Some(poll) = self
            .settings
            .ordered_endpoints()
            .into_iter()
            .find(|e| e.transport == Transport::Poll)
        else {
            warn!(
                "no poll endpoint for catch-up, resuming live after block {}",
                checkpoint
            );
            return Ok(());
        };

        let latest = latest_block(&poll.url, self.settings.request_timeout_ms).await?;
        let mut from = checkpoint + 1;
        if latest < from {
            return Ok(());
        }
        info!("backfilling blocks {}..={} via {}", from, latest, poll.url);

        while from <= latest {
            let to = (from + self.settings.max_blocks_per_query - 1).min(latest);
            let factories = self.decoder.factory_addresses();
            let creations = fetch_logs_range(
                &poll.url,
                self.settings.request_timeout_ms,
                from,
                to,
                &factories,
                topics::creations(),
            )
            .await?;
            for log in &creations {
                self.handle_log(log).await?;
            }
            // Creations above are already in the registry, so pools born
            // inside this range are covered by the trade filter.
            let tracked = self.registry.addresses();
            if !tracked.is_empty() {
                let trades = fetch_logs_range(
                    &poll.url,
                    self.settings.request_timeout_ms,
                    from,
                    to,
                    &tracked,
                    topics::trades(),
                )
                .await?;
                for log in &trades {
                    self.handle_log(log).await?;
                }
            }
            self.advance_head(to + 1).await?;
            from = to + 1;
        }
        Ok(())
    }

    async fn emit_status(&self, event: StatusEvent) {
        // Status events are best effort; shutdown closes the receiver first.
        let _ = self.out.send(FeedMessage::Status(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::QuoteBook;
    use poolwatch_core::{Address, Chain, TxHash};
    use pretty_assertions::assert_eq;

    fn log_fixture(
        address: Address,
        topic0: &str,
        extra_topics: Vec<String>,
        data: &str,
        block: u64,
        index: u32,
    ) -> LogEntry {
        let mut all_topics = vec![topic0.to_string()];
        all_topics.extend(extra_topics);
        serde_json::from_value(serde_json::json!({
            "address": address.to_string(),
            "topics": all_topics,
            "data": data,
            "blockNumber": format!("0x{:x}", block),
            "transactionHash": TxHash([block as u8; 32]).to_string(),
            "logIndex": format!("0x{:x}", index),
        }))
        .unwrap()
    }

    fn feed_fixture(out: mpsc::Sender<FeedMessage>) -> ChainEventFeed {
        let factory = Address([0xFA; 20]);
        let mut quotes = QuoteBook::new();
        quotes.add(Address([0xEE; 20]), "WETH", 2500.0, 18);
        ChainEventFeed::new(
            FeedSettings::default(),
            LogDecoder::new(vec![factory], vec![]),
            PoolRegistry::new(Chain::Base, quotes),
            Arc::new(AtomicU64::new(0)),
            out,
        )
    }

    fn pair_created_log(block: u64, index: u32) -> LogEntry {
        let token0 = Address([0x11; 20]);
        let token1 = Address([0xEE; 20]);
        let pool = Address([0xCC; 20]);
        let data = format!("0x{:0>64}{:0>64}", hex_body(&pool.to_string()), "1");
        log_fixture(
            Address([0xFA; 20]),
            topics::V2_PAIR_CREATED,
            vec![topic_for(&token0), topic_for(&token1)],
            &data,
            block,
            index,
        )
    }

    fn topic_for(addr: &Address) -> String {
        format!("0x{:0>64}", hex_body(&addr.to_string()))
    }

    fn hex_body(s: &str) -> &str {
        s.strip_prefix("0x").unwrap_or(s)
    }

    #[tokio::test]
    async fn test_creation_log_flows_through_to_pool_event() {
        let (out, mut rx) = mpsc::channel(64);
        let mut feed = feed_fixture(out);

        feed.handle_log(&pair_created_log(100, 3)).await.unwrap();
        feed.advance_head(101).await.unwrap();

        match rx.recv().await.unwrap() {
            FeedMessage::Pool(PoolEvent::Created(pool)) => {
                assert_eq!(pool.address, Address([0xCC; 20]));
                assert_eq!(pool.created_block, 100);
            }
            other => panic!("expected pool creation, got {:?}", other),
        }
        assert_eq!(feed.checkpoint(), 100);
    }

    #[tokio::test]
    async fn test_duplicate_log_emitted_once() {
        let (out, mut rx) = mpsc::channel(64);
        let mut feed = feed_fixture(out);

        let log = pair_created_log(100, 3);
        feed.handle_log(&log).await.unwrap();
        feed.handle_log(&log).await.unwrap();
        feed.advance_head(101).await.unwrap();

        let mut pool_events = 0;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, FeedMessage::Pool(_)) {
                pool_events += 1;
            }
        }
        assert_eq!(pool_events, 1);
    }

    #[tokio::test]
    async fn test_malformed_log_is_dropped_not_fatal() {
        let (out, _rx) = mpsc::channel(64);
        let mut feed = feed_fixture(out);

        // Creation topic with no token topics decodes to an error.
        let bad = log_fixture(
            Address([0xFA; 20]),
            topics::V2_PAIR_CREATED,
            vec![],
            "0x",
            100,
            0,
        );
        assert!(feed.handle_log(&bad).await.is_ok());

        // The stream keeps going afterwards.
        feed.handle_log(&pair_created_log(100, 1)).await.unwrap();
        assert_eq!(feed.reorder.pending_blocks(), 1);
    }

    #[tokio::test]
    async fn test_untracked_trade_is_skipped() {
        let (out, mut rx) = mpsc::channel(64);
        let mut feed = feed_fixture(out);

        let swap = log_fixture(
            Address([0xDD; 20]),
            topics::V2_SWAP,
            vec![
                topic_for(&Address([0x01; 20])),
                topic_for(&Address([0x02; 20])),
            ],
            &format!("0x{}", "00".repeat(128)),
            100,
            0,
        );
        feed.handle_log(&swap).await.unwrap();
        feed.advance_head(101).await.unwrap();

        while let Ok(msg) = rx.try_recv() {
            assert!(
                !matches!(msg, FeedMessage::Pool(_)),
                "untracked trade must not surface"
            );
        }
    }

    #[tokio::test]
    async fn test_checkpoint_only_moves_forward() {
        let (out, _rx) = mpsc::channel(64);
        let mut feed = feed_fixture(out);

        feed.advance_head(101).await.unwrap();
        assert_eq!(feed.checkpoint(), 100);
        feed.advance_head(90).await.unwrap();
        assert_eq!(feed.checkpoint(), 100);
    }
}
