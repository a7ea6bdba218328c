//! Durable capture of the event stream.
//!
//! The recorder sits between the feed and the engine. Pools and trades are
//! written to the store as they pass through, so a restart can rebuild the
//! registry and skip trades it already processed. Status messages pass
//! through untouched.

use poolwatch_core::PoolEvent;
use poolwatch_engine::StrategySnapshot;
use poolwatch_feeds::FeedMessage;
use poolwatch_store::Store;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Checkpoint row key for the chain event feed.
pub const FEED_SOURCE: &str = "chain-feed";

/// How often the checkpoint saver looks for an advanced block.
const CHECKPOINT_SAVE_SECS: u64 = 5;

/// Forward feed messages to the engine, persisting pool creations and
/// trades on the way.
///
/// Trades already on the log are not forwarded again; after a restart the
/// replayed block range only feeds the engine events it has never seen.
/// Persistence failures are logged and the message forwarded anyway; the
/// live pipeline does not stall on the database.
pub async fn run_event_recorder(
    store: Store,
    mut feed_rx: mpsc::Receiver<FeedMessage>,
    engine_tx: mpsc::Sender<FeedMessage>,
) {
    info!("event recorder started");
    while let Some(message) = feed_rx.recv().await {
        match &message {
            FeedMessage::Pool(PoolEvent::Created(pool)) => {
                if let Err(e) = store.save_pool(pool).await {
                    warn!("failed to persist pool {}: {}", pool.address.short(), e);
                }
            }
            FeedMessage::Pool(PoolEvent::Trade(event)) => match store.append_trade(event).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        "trade {}:{} already on the log, not replayed",
                        event.tx_hash, event.log_index
                    );
                    continue;
                }
                Err(e) => warn!("failed to persist trade: {}", e),
            },
            FeedMessage::Status(_) => {}
        }
        if engine_tx.send(message).await.is_err() {
            break;
        }
    }
    info!("event recorder stopped");
}

/// Persist the feed checkpoint whenever it advances, and once more on the
/// way out so the next start resumes from the last sealed block.
pub async fn run_checkpoint_saver(
    store: Store,
    checkpoint: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    let mut last_saved = 0u64;
    loop {
        for _ in 0..CHECKPOINT_SAVE_SECS * 10 {
            if !running.load(Ordering::Relaxed) {
                let block = checkpoint.load(Ordering::Relaxed);
                if block > last_saved {
                    if let Err(e) = store.save_checkpoint(FEED_SOURCE, block).await {
                        warn!("final checkpoint save failed at block {}: {}", block, e);
                    }
                }
                info!("checkpoint saver stopped at block {}", block);
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let block = checkpoint.load(Ordering::Relaxed);
        if block > last_saved {
            match store.save_checkpoint(FEED_SOURCE, block).await {
                Ok(()) => last_saved = block,
                Err(e) => warn!("failed to persist checkpoint at block {}: {}", block, e),
            }
        }
    }
}

/// Persist per-pool strategy state as lanes report changes. Runs until the
/// engine drops its sender.
pub async fn run_snapshot_saver(store: Store, mut snapshots_rx: mpsc::Receiver<StrategySnapshot>) {
    while let Some(snapshot) = snapshots_rx.recv().await {
        if let Err(e) = store.save_snapshot(&snapshot).await {
            warn!(
                "failed to persist strategy state for pool {}: {}",
                snapshot.pool.short(),
                e
            );
        }
    }
    info!("snapshot writer stopped");
}

/// Hourly trade-log retention trim.
pub async fn run_store_maintenance(store: Store, retention_days: i64, running: Arc<AtomicBool>) {
    info!("store maintenance started ({} day retention)", retention_days);
    loop {
        for _ in 0..3600 {
            if !running.load(Ordering::Relaxed) {
                info!("store maintenance stopped");
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        match store.cleanup_trades(retention_days).await {
            Ok(0) => {}
            Ok(removed) => info!("trimmed {} trade(s) past retention", removed),
            Err(e) => warn!("trade log cleanup failed: {}", e),
        }
    }
}
