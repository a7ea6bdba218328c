//! Alert delivery for qualified pools.
//!
//! This crate provides:
//! - Persistent idempotency keyed by (pool, signal set, epoch)
//! - Webhook delivery with bounded retry
//! - Redrive of parked deliveries after an outage

pub mod dispatcher;
pub mod error;
pub mod sink;

pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use error::DispatchError;
pub use sink::{format_alert_message, AlertSink, LogSink, WebhookSink};
