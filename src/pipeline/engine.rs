//! Aggregation coordinator - single writer for all dashboard state
//!
//! Owns the bucket aggregator, window buffer, trend counter and the hourly
//! base series. Every live event is applied to all of them before the next
//! one is looked at, and readers only ever get an owned `DashboardSnapshot`.

use super::buckets::{Bucket, BucketAggregator, HourlySeries, MergeOutcome, TimeRange};
use super::classify::classify;
use super::config::PipelineConfig;
use super::trend::{ErrorPolicy, TrendCounter, TrendSnapshot};
use super::types::{current_timestamp_ms, EventRecord, StatsPoint};
use super::window::WindowBuffer;
use crate::streamer_core::connection::{ConnectionState, LiveMessage, ShutdownHandle};

/// One-time historical fetch used to seed a session
#[derive(Debug, Clone, Default)]
pub struct HistoricalSeed {
    /// Most recent raw records, any order
    pub records: Vec<EventRecord>,
    /// Pre-bucketed hourly statistics; trusted over recomputation when present
    pub points: Option<Vec<StatsPoint>>,
    pub trend: Option<TrendSnapshot>,
}

/// Fully consistent, owned view of the aggregation state
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSnapshot {
    pub range: TimeRange,
    pub buckets: Vec<Bucket>,
    pub window: Vec<EventRecord>,
    pub trend: TrendSnapshot,
    pub connection: ConnectionState,
    pub processed: u64,
    pub dropped: u64,
    pub generated_at: i64,
}

pub struct AggregationCoordinator {
    buckets: BucketAggregator,
    window: WindowBuffer,
    trend: TrendCounter,
    hourly: HourlySeries,
    connection: ConnectionState,
    processed: u64,
    dropped: u64,
    shutdown: Option<ShutdownHandle>,
    shutdown_requested: bool,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl AggregationCoordinator {
    /// Coordinator on the system clock (milliseconds)
    pub fn new(window_capacity: usize, range: TimeRange, policy: ErrorPolicy) -> Self {
        Self::new_with_timestamp_fn(window_capacity, range, policy, Box::new(current_timestamp_ms))
    }

    /// Coordinator with a custom clock, for deterministic tests
    pub fn new_with_timestamp_fn(
        window_capacity: usize,
        range: TimeRange,
        policy: ErrorPolicy,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            buckets: BucketAggregator::new(range),
            window: WindowBuffer::new(window_capacity),
            trend: TrendCounter::new(policy),
            hourly: HourlySeries::new(),
            connection: ConnectionState::Idle,
            processed: 0,
            dropped: 0,
            shutdown: None,
            shutdown_requested: false,
            now_fn,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.window_capacity, config.default_range, config.error_policy)
    }

    /// Seed every sub-state from the historical fetch
    ///
    /// Missing parts resolve to empty defaults: zero buckets across the
    /// active range, an empty window, a zero trend.
    pub fn initialize(&mut self, seed: HistoricalSeed) {
        let now = (self.now_fn)();
        let range = self.buckets.range();

        match &seed.points {
            Some(points) => {
                self.hourly = HourlySeries::from_points(points);
                self.buckets.rebuild_from_points(range, points, now);
            }
            None => {
                self.hourly = HourlySeries::from_records(&seed.records);
                self.buckets.rebuild(range, &seed.records, now);
            }
        }
        self.hourly.prune(now);

        let record_count = seed.records.len();
        self.window.seed(seed.records);
        self.trend.seed(seed.trend.unwrap_or_default());

        log::info!(
            "📦 Seeded {} range: {} buckets, {} records in window (of {} fetched), trend total {}",
            range.as_str(),
            self.buckets.len(),
            self.window.len(),
            record_count,
            self.trend.snapshot().all.total
        );
    }

    /// Apply one live event to buckets, window and trend, in that order
    pub fn on_live_event(&mut self, record: EventRecord) -> MergeOutcome {
        let now = (self.now_fn)();
        let category = classify(record.status);

        let outcome = self.buckets.merge_category(record.timestamp, category, now);
        if outcome == MergeOutcome::OutOfRange {
            log::debug!(
                "Event {} at {} predates the {} range; window and trend only",
                record.id,
                record.timestamp,
                self.buckets.range().as_str()
            );
        }
        self.hourly.record_live(record.timestamp, category, now);
        self.window.insert(record);
        self.trend.record(category);
        self.processed += 1;

        outcome
    }

    pub fn on_state_change(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub fn on_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Route a message from the connection task
    pub fn apply(&mut self, message: LiveMessage) {
        match message {
            LiveMessage::Event(record) => {
                self.on_live_event(record);
            }
            LiveMessage::State(state) => self.on_state_change(state),
            LiveMessage::Dropped => self.on_dropped(),
        }
    }

    /// Rebuild buckets for `range` from the hourly series
    ///
    /// Window and trend are left untouched.
    pub fn change_range(&mut self, range: TimeRange) -> Vec<Bucket> {
        let now = (self.now_fn)();
        self.hourly.prune(now);
        let buckets = self.buckets.rebuild_from_points(range, &self.hourly.points(), now);

        log::info!(
            "📐 Range changed to {} ({} buckets, {} events)",
            range.as_str(),
            buckets.len(),
            self.buckets.total()
        );
        buckets
    }

    pub fn attach_shutdown(&mut self, handle: ShutdownHandle) {
        if self.shutdown_requested {
            handle.shutdown();
        }
        self.shutdown = Some(handle);
    }

    /// Ask the connection manager to stop; repeated calls are no-ops
    pub fn shutdown(&mut self) {
        if self.shutdown_requested {
            return;
        }
        self.shutdown_requested = true;
        if let Some(handle) = &self.shutdown {
            handle.shutdown();
        }
        log::info!("🛑 Shutdown requested after {} events", self.processed);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn range(&self) -> TimeRange {
        self.buckets.range()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            range: self.buckets.range(),
            buckets: self.buckets.buckets(),
            window: self.window.to_vec(),
            trend: self.trend.snapshot(),
            connection: self.connection,
            processed: self.processed,
            dropped: self.dropped,
            generated_at: (self.now_fn)(),
        }
    }
}
