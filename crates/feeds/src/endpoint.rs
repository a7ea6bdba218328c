//! Upstream endpoint configuration and connection lifecycle.

use serde::{Deserialize, Serialize};

/// How an endpoint delivers logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Persistent WebSocket subscription (eth_subscribe).
    SocketStream,
    /// Periodic HTTP range queries (eth_getLogs).
    Poll,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::SocketStream => "socket-stream",
            Transport::Poll => "poll",
        }
    }
}

/// One upstream log source. Endpoints are tried in ascending priority order;
/// failure of one falls through to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub transport: Transport,
    pub priority: u32,
}

impl Endpoint {
    pub fn socket(url: &str, priority: u32) -> Self {
        Self {
            url: url.to_string(),
            transport: Transport::SocketStream,
            priority,
        }
    }

    pub fn poll(url: &str, priority: u32) -> Self {
        Self {
            url: url.to_string(),
            transport: Transport::Poll,
            priority,
        }
    }
}

/// Connection state for the active upstream.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error(String),
}

impl ConnectionState {
    pub fn connect(self) -> Self {
        ConnectionState::Connecting
    }

    pub fn connected(self) -> Self {
        ConnectionState::Connected
    }

    pub fn disconnect(self) -> Self {
        ConnectionState::Disconnected
    }

    pub fn error(self, msg: &str) -> Self {
        ConnectionState::Error(msg.to_string())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Runtime settings for the chain event feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Fallback list, sorted by priority before use.
    pub endpoints: Vec<Endpoint>,
    /// Base reconnect delay (ms); doubles per attempt up to the ceiling.
    pub reconnect_delay_ms: u64,
    /// Backoff ceiling (ms). The feed retries forever at this interval once
    /// every endpoint has failed in a cycle.
    pub backoff_ceiling_ms: u64,
    /// Poll transport query interval (ms).
    pub poll_interval_ms: u64,
    /// Max blocks per eth_getLogs range query.
    pub max_blocks_per_query: u64,
    /// Network call timeout (ms).
    pub request_timeout_ms: u64,
    /// Dedup seen-set retention window in blocks.
    pub dedup_retention_blocks: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            reconnect_delay_ms: 1_000,
            backoff_ceiling_ms: 300_000,
            poll_interval_ms: 5_000,
            max_blocks_per_query: 500,
            request_timeout_ms: 10_000,
            dedup_retention_blocks: 1_000,
        }
    }
}

impl FeedSettings {
    /// Endpoints in the order they should be tried.
    pub fn ordered_endpoints(&self) -> Vec<Endpoint> {
        let mut sorted = self.endpoints.clone();
        sorted.sort_by_key(|e| e.priority);
        sorted
    }
}
