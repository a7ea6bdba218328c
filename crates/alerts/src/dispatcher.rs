//! Alert delivery with persistent idempotency and redrive.

use crate::error::DispatchError;
use crate::sink::{format_alert_message, AlertSink};
use poolwatch_core::Alert;
use poolwatch_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Parked deliveries retried per redrive pass.
const REDRIVE_BATCH: u32 = 100;

/// Seconds between delivered-history cleanup passes.
const CLEANUP_INTERVAL_SECS: u64 = 6 * 3600;

/// Delivery and retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Delivery attempts per alert before parking it for redrive.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub retry_delay_ms: u64,
    /// Seconds between redrive passes over parked deliveries.
    pub redrive_interval_secs: u64,
    /// Days of delivered history to keep.
    pub history_retention_days: i64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            redrive_interval_secs: 300,
            history_retention_days: 7,
        }
    }
}

impl DispatcherSettings {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_attempts == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.redrive_interval_secs == 0 {
            return Err(DispatchError::InvalidConfig(
                "redrive_interval_secs must be at least 1".into(),
            ));
        }
        if self.history_retention_days <= 0 {
            return Err(DispatchError::InvalidConfig(
                "history_retention_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Consumes qualification alerts and delivers each idempotency key at most
/// once per sink, no matter how often the engine re-emits it.
pub struct Dispatcher {
    store: Store,
    sink: Arc<dyn AlertSink>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(store: Store, sink: Arc<dyn AlertSink>, settings: DispatcherSettings) -> Self {
        Self {
            store,
            sink,
            settings,
        }
    }

    /// Consume alerts until the channel closes. Parked deliveries are
    /// redriven on a timer and delivered history is trimmed periodically.
    pub async fn run(self, mut alerts_rx: mpsc::Receiver<Alert>) {
        info!(
            "alert dispatcher started, delivering via {}",
            self.sink.name()
        );

        let mut redrive =
            tokio::time::interval(Duration::from_secs(self.settings.redrive_interval_secs));
        redrive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cleanup = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_alert = alerts_rx.recv() => {
                    match maybe_alert {
                        Some(alert) => {
                            if let Err(e) = self.process(alert).await {
                                error!("alert processing failed: {}", e);
                            }
                        }
                        None => break,
                    }
                }
                // The first tick fires immediately, which doubles as the
                // startup redrive of anything parked before the last shutdown.
                _ = redrive.tick() => {
                    if let Err(e) = self.redrive().await {
                        error!("redrive pass failed: {}", e);
                    }
                }
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!("dispatch history cleanup failed: {}", e);
                    }
                }
            }
        }

        info!("alert dispatcher stopped");
    }

    /// Handle one qualification. Returns false when the idempotency key was
    /// already tracked and the alert was suppressed.
    pub async fn process(&self, alert: Alert) -> Result<bool, DispatchError> {
        if !self.store.reserve_dispatch(&alert).await? {
            debug!("duplicate alert suppressed: {}", alert.idempotency_key);
            return Ok(false);
        }
        self.deliver_with_retry(&alert).await?;
        Ok(true)
    }

    /// Attempt delivery up to `max_attempts` times with doubling delays.
    /// An exhausted alert is parked as failed and waits for a redrive pass.
    async fn deliver_with_retry(&self, alert: &Alert) -> Result<(), DispatchError> {
        let message = format_alert_message(alert);
        let mut attempts = 0u32;
        let mut last_error = String::new();

        loop {
            attempts += 1;
            match self.sink.deliver(alert, &message).await {
                Ok(()) => {
                    self.store
                        .mark_dispatch_sent(&alert.idempotency_key)
                        .await?;
                    info!(key = %alert.idempotency_key, attempts, "alert delivered");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempts >= self.settings.max_attempts {
                        break;
                    }
                    let delay = self.retry_delay(attempts);
                    debug!(
                        key = %alert.idempotency_key,
                        attempts,
                        "delivery failed ({}), retrying in {:?}",
                        last_error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.store
            .mark_dispatch_failed(&alert.idempotency_key, attempts, &last_error)
            .await?;
        warn!(
            key = %alert.idempotency_key,
            attempts,
            "delivery failed, parked for redrive: {}",
            last_error
        );
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .settings
            .retry_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(8));
        Duration::from_millis(doubled)
    }

    /// Retry parked deliveries. A failed row stays on the books until some
    /// pass delivers it; age alone never drops it.
    pub async fn redrive(&self) -> Result<u32, DispatchError> {
        let parked = self.store.undelivered_dispatches(REDRIVE_BATCH).await?;
        if parked.is_empty() {
            return Ok(0);
        }

        info!("redriving {} undelivered alert(s)", parked.len());
        let mut recovered = 0u32;

        for dispatch in parked {
            let message = format_alert_message(&dispatch.alert);
            match self.sink.deliver(&dispatch.alert, &message).await {
                Ok(()) => {
                    self.store
                        .mark_dispatch_sent(&dispatch.idempotency_key)
                        .await?;
                    info!(key = %dispatch.idempotency_key, "redrive delivered");
                    recovered += 1;
                }
                Err(e) => {
                    let attempts = dispatch.attempts + 1;
                    self.store
                        .mark_dispatch_failed(&dispatch.idempotency_key, attempts, &e.to_string())
                        .await?;
                    debug!(
                        key = %dispatch.idempotency_key,
                        attempts,
                        "redrive attempt failed: {}",
                        e
                    );
                }
            }
        }

        Ok(recovered)
    }

    /// Trim delivered history past retention. Undelivered rows are exempt.
    pub async fn cleanup(&self) -> Result<u64, DispatchError> {
        let removed = self
            .store
            .cleanup_dispatches(self.settings.history_retention_days)
            .await?;
        if removed > 0 {
            info!(removed, "trimmed delivered alert history");
        }
        Ok(removed)
    }
}
