//! Signal detection and strategy aggregation.
//!
//! Consumes the normalized feed, runs per-pool detectors, and aggregates
//! their signals into at-most-one alert per qualification epoch.
//!
//! ## Architecture
//!
//! - [`detectors`]: per-pool detectors over liquidity, trades, and sentiment
//! - [`liquidity`]: trailing moving-average baseline behind the spike detector
//! - [`strategy`]: the Idle -> Accumulating -> Qualified machine per pool
//! - [`lanes`]: hash-partitioned worker tasks, one pool to one lane
//! - [`config`]: detector and aggregator tuning, validated at startup

pub mod config;
pub mod detectors;
pub mod error;
pub mod lanes;
pub mod liquidity;
pub mod strategy;

pub use config::{AggregatorSettings, DetectorSettings};
pub use detectors::PoolDetectors;
pub use error::EngineError;
pub use lanes::{lane_for, EngineStats, SignalEngine};
pub use liquidity::LiquidityTracker;
pub use strategy::{ActiveSignal, Phase, PoolMachine, StrategySnapshot};
