//! SQLite persistence for the pool activity monitor.
//!
//! Three concerns share one database: the append-only trade log with its
//! feed checkpoints, at-most-once dispatch tracking keyed by idempotency
//! key, and per-pool strategy snapshots for warm restart.

pub mod db;
pub mod error;

pub use db::{DispatchStatus, Store, StoredDispatch};
pub use error::StoreError;
