//! Application state management.

use poolwatch_engine::EngineStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters surfaced by the periodic status line.
#[derive(Debug, Clone)]
pub struct StatsSummary {
    pub events_processed: u64,
    pub invalid_events: u64,
    pub alerts_emitted: u64,
    pub pools_tracked: u64,
    pub uptime_secs: u64,
}

/// Application state shared across tasks.
pub struct AppState {
    /// Engine counters, shared with the lane workers.
    pub stats: Arc<EngineStats>,
    /// Cooperative shutdown flag. Long-lived tasks poll it.
    pub running: Arc<AtomicBool>,
    /// Process start, for uptime reporting.
    started_at: Instant,
}

pub type SharedState = Arc<AppState>;

/// Create new application state.
pub fn create_state() -> SharedState {
    Arc::new(AppState::new())
}

impl AppState {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(EngineStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn stats_summary(&self) -> StatsSummary {
        StatsSummary {
            events_processed: self.stats.events_processed(),
            invalid_events: self.stats.invalid_events(),
            alerts_emitted: self.stats.alerts_emitted(),
            pools_tracked: self.stats.pools_tracked(),
            uptime_secs: self.uptime_secs(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
