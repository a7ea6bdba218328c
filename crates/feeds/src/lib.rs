//! Chain data ingestion for the pool activity monitor.
//!
//! This crate connects to EVM JSON-RPC upstreams (WebSocket subscriptions
//! or HTTP polling), decodes factory and pool logs into normalized events,
//! and polls the external sentiment service.
//!
//! ## Architecture
//!
//! - `socket` / `poll` - upstream sources emitting raw `SourceMessage`s
//! - `feed` - endpoint failover, checkpointing, dedup and block ordering
//! - `decode` / `registry` - log decoding and tracked-pool bookkeeping
//! - `oracle` - sentiment scoring boundary with a staleness-aware cache

pub mod decode;
pub mod dedup;
pub mod endpoint;
pub mod error;
pub mod feed;
pub mod message;
pub mod oracle;
pub mod poll;
pub mod registry;
pub mod rpc;
pub mod socket;

pub use decode::{DecodedLog, LogDecoder};
pub use dedup::{PushOutcome, ReorderBuffer, SeenSet};
pub use endpoint::{ConnectionState, Endpoint, FeedSettings, Transport};
pub use error::{FeedError, OracleError};
pub use feed::ChainEventFeed;
pub use message::{FeedMessage, SourceMessage, StatusEvent};
pub use oracle::{
    HttpSentimentOracle, SentimentCache, SentimentOracle, SentimentPoller,
};
pub use poll::PollSource;
pub use registry::{PoolRegistry, QuoteBook, QuoteToken};
pub use rpc::LogEntry;
pub use socket::SocketSource;
