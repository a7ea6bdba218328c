//! Core data types for the pool activity monitor.

pub mod address;
pub mod alert;
pub mod chain;
pub mod event;
pub mod pool;
pub mod sentiment;
pub mod signal;
pub mod state;
pub mod usd;

pub use address::*;
pub use alert::*;
pub use chain::*;
pub use event::*;
pub use pool::*;
pub use sentiment::*;
pub use signal::*;
pub use state::*;
pub use usd::*;
