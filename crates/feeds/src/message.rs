//! Message types flowing out of the chain event feed.

use poolwatch_core::PoolEvent;

/// What a source task delivers to the feed loop.
#[derive(Debug, Clone)]
pub enum SourceMessage {
    /// Raw log payload, not yet decoded.
    Log(crate::rpc::LogEntry),
    /// Blocks strictly below this number are complete and may be flushed.
    Head(u64),
    /// Source established its subscription.
    Connected,
}

/// What the feed delivers downstream.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// A normalized, deduplicated, in-order pool event.
    Pool(PoolEvent),
    /// Connection lifecycle, surfaced for stats and logging.
    Status(StatusEvent),
}

/// Feed lifecycle notifications.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    Connected {
        endpoint: String,
    },
    Disconnected {
        endpoint: String,
        reason: String,
    },
    /// Every endpoint failed in one fallback cycle. The feed keeps retrying
    /// at the ceiling interval; this is reported, never fatal.
    Unavailable {
        cycle_attempts: u32,
        retry_in_ms: u64,
    },
    /// Chain head advanced; lanes use this for expiry between trades.
    HeadAdvanced {
        block: u64,
    },
}

impl StatusEvent {
    pub fn connected(endpoint: impl Into<String>) -> Self {
        StatusEvent::Connected {
            endpoint: endpoint.into(),
        }
    }

    pub fn disconnected(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        StatusEvent::Disconnected {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(cycle_attempts: u32, retry_in_ms: u64) -> Self {
        StatusEvent::Unavailable {
            cycle_attempts,
            retry_in_ms,
        }
    }

    pub fn head(block: u64) -> Self {
        StatusEvent::HeadAdvanced { block }
    }
}

impl From<PoolEvent> for FeedMessage {
    fn from(event: PoolEvent) -> Self {
        FeedMessage::Pool(event)
    }
}

impl From<StatusEvent> for FeedMessage {
    fn from(event: StatusEvent) -> Self {
        FeedMessage::Status(event)
    }
}
