//! # Aggregation pipeline
//!
//! Turns a historical snapshot plus a live stream of request-log events into
//! chart buckets, a rolling window of recent records, and headline trends.
//!
//! ## Data flow
//!
//! 1. `history` fetches the seed (recent records, hourly stats, trend counts)
//! 2. `engine::AggregationCoordinator::initialize` seeds every sub-state
//! 3. `streamer_core` delivers live events over a channel
//! 4. `ingestion` applies them one by one and publishes `DashboardSnapshot`s
//!
//! ## Module Organization
//!
//! - `types` - `EventRecord`, `Category`, `StatsPoint`
//! - `classify` - status code to category
//! - `buckets` - time-bucketed counters and the hourly base series
//! - `window` - bounded, timestamp-ordered record buffer
//! - `trend` - total/last counters
//! - `engine` - single-writer coordinator
//! - `history` - HTTP client for the historical endpoints
//! - `speedtest` - network-performance headline metrics
//! - `ingestion` - ingestion loop and session wiring
//! - `config` - environment configuration

pub mod types;
pub mod classify;
pub mod buckets;
pub mod window;
pub mod trend;
pub mod engine;
pub mod history;
pub mod speedtest;
pub mod ingestion;
pub mod config;

pub use buckets::{Bucket, BucketAggregator, TimeRange};
pub use engine::{AggregationCoordinator, DashboardSnapshot, HistoricalSeed};
pub use ingestion::LiveSession;
pub use types::{Category, EventRecord};
