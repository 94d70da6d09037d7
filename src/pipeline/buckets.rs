//! Time-bucketed category counters for the request chart
//!
//! The active `TimeRange` fixes the bucket width so the chart stays around
//! 170-180 points regardless of range. `rebuild` is the only full scan; live
//! events go through `merge`, which touches a single bucket (plus lazy
//! extension of the tail when the clock has moved past the last bucket).

use super::classify::classify;
use super::types::{Category, EventRecord, StatsPoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MS_HOUR: i64 = 60 * 60 * 1000;
pub const MS_DAY: i64 = 24 * MS_HOUR;

/// Selectable chart range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "90d")]
    Days90,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Days7 => "7d",
            TimeRange::Days30 => "30d",
            TimeRange::Days90 => "90d",
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            TimeRange::Days7 => 7 * MS_DAY,
            TimeRange::Days30 => 30 * MS_DAY,
            TimeRange::Days90 => 90 * MS_DAY,
        }
    }

    pub fn bucket_width_ms(&self) -> i64 {
        match self {
            TimeRange::Days7 => MS_HOUR,
            TimeRange::Days30 => 4 * MS_HOUR,
            TimeRange::Days90 => 12 * MS_HOUR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "7d" => Some(TimeRange::Days7),
            "30d" => Some(TimeRange::Days30),
            "90d" => Some(TimeRange::Days90),
            _ => None,
        }
    }

    pub fn all() -> [TimeRange; 3] {
        [TimeRange::Days7, TimeRange::Days30, TimeRange::Days90]
    }

    /// Range with the longest duration; bounds how much history is worth keeping
    pub fn longest() -> TimeRange {
        TimeRange::Days90
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::Days90
    }
}

/// Per-category counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounts {
    pub success: u64,
    pub redirect: u64,
    pub bad_request: u64,
    pub error: u64,
    pub provisional: u64,
}

impl CategoryCounts {
    pub fn increment(&mut self, category: Category) {
        *self.slot(category) += 1;
    }

    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Success => self.success,
            Category::Redirect => self.redirect,
            Category::BadRequest => self.bad_request,
            Category::Error => self.error,
            Category::Provisional => self.provisional,
        }
    }

    pub fn add(&mut self, other: &CategoryCounts) {
        self.success += other.success;
        self.redirect += other.redirect;
        self.bad_request += other.bad_request;
        self.error += other.error;
        self.provisional += other.provisional;
    }

    pub fn total(&self) -> u64 {
        self.success + self.redirect + self.bad_request + self.error + self.provisional
    }

    fn slot(&mut self, category: Category) -> &mut u64 {
        match category {
            Category::Success => &mut self.success,
            Category::Redirect => &mut self.redirect,
            Category::BadRequest => &mut self.bad_request,
            Category::Error => &mut self.error,
            Category::Provisional => &mut self.provisional,
        }
    }
}

impl From<&StatsPoint> for CategoryCounts {
    fn from(point: &StatsPoint) -> Self {
        Self {
            success: point.success,
            redirect: point.redirect,
            bad_request: point.bad_request,
            error: point.error,
            provisional: point.provisional,
        }
    }
}

/// Half-open interval `[start, start + width)` with its counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: i64,
    pub width: i64,
    #[serde(flatten)]
    pub counts: CategoryCounts,
}

impl Bucket {
    pub fn empty(start: i64, width: i64) -> Self {
        Self {
            start,
            width,
            counts: CategoryCounts::default(),
        }
    }

    pub fn end(&self) -> i64 {
        self.start + self.width
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end()
    }
}

/// Where a merged event landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Counted in the bucket covering its timestamp
    Counted { bucket_start: i64 },
    /// Future-dated beyond the current tail; counted in the last bucket
    Clamped { bucket_start: i64 },
    /// Older than `now - duration` of the active range; not counted
    OutOfRange,
}

pub fn floor_to(timestamp: i64, width: i64) -> i64 {
    timestamp.div_euclid(width) * width
}

/// Ordered, gap-free sequence of buckets for the active range
#[derive(Debug, Clone)]
pub struct BucketAggregator {
    range: TimeRange,
    buckets: BTreeMap<i64, Bucket>,
}

impl BucketAggregator {
    pub fn new(range: TimeRange) -> Self {
        Self {
            range,
            buckets: BTreeMap::new(),
        }
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn width(&self) -> i64 {
        self.range.bucket_width_ms()
    }

    /// Recompute every bucket of `range` from raw records
    ///
    /// Records outside `[now - duration, now]` are ignored. Empty buckets are
    /// materialized so the result is contiguous from the floored range start
    /// to the floored `now`.
    pub fn rebuild(&mut self, range: TimeRange, records: &[EventRecord], now: i64) -> Vec<Bucket> {
        self.rebuild_with(
            range,
            now,
            records.iter().map(|r| {
                let mut counts = CategoryCounts::default();
                counts.increment(classify(r.status));
                (r.timestamp, counts)
            }),
        );
        self.buckets()
    }

    /// Recompute every bucket of `range` from pre-aggregated points
    ///
    /// Points are trusted as-is and re-bucketed to the range width; the same
    /// `[now - duration, now]` filter applies to each point's date.
    pub fn rebuild_from_points(
        &mut self,
        range: TimeRange,
        points: &[StatsPoint],
        now: i64,
    ) -> Vec<Bucket> {
        self.rebuild_with(
            range,
            now,
            points.iter().map(|p| (p.date, CategoryCounts::from(p))),
        );
        self.buckets()
    }

    fn rebuild_with<I>(&mut self, range: TimeRange, now: i64, items: I)
    where
        I: IntoIterator<Item = (i64, CategoryCounts)>,
    {
        self.range = range;
        self.buckets.clear();

        let width = range.bucket_width_ms();
        let range_start = now - range.duration_ms();

        for (timestamp, counts) in items {
            if timestamp < range_start || timestamp > now {
                continue;
            }
            let start = floor_to(timestamp, width);
            self.buckets
                .entry(start)
                .or_insert_with(|| Bucket::empty(start, width))
                .counts
                .add(&counts);
        }

        self.fill(now);
    }

    /// Materialize zero buckets for every missing start in the active range
    fn fill(&mut self, now: i64) {
        let width = self.width();
        let mut start = floor_to(now - self.range.duration_ms(), width);
        while start <= now {
            self.buckets
                .entry(start)
                .or_insert_with(|| Bucket::empty(start, width));
            start += width;
        }
    }

    /// Extend the tail up to `now` and drop buckets that fell out of the range
    fn advance_to(&mut self, now: i64) {
        let width = self.width();
        let tail_target = floor_to(now, width);

        if let Some(&last) = self.buckets.keys().next_back() {
            let mut start = last + width;
            while start <= tail_target {
                self.buckets.insert(start, Bucket::empty(start, width));
                start += width;
            }
        }

        let head = floor_to(now - self.range.duration_ms(), width);
        while let Some((&first, _)) = self.buckets.first_key_value() {
            if first >= head {
                break;
            }
            self.buckets.pop_first();
        }
    }

    /// Fold one live record into the active buckets
    pub fn merge(&mut self, record: &EventRecord, now: i64) -> MergeOutcome {
        self.merge_category(record.timestamp, classify(record.status), now)
    }

    /// Same head rule as `rebuild`: anything before `now - duration` is
    /// rejected even when the floored first bucket would cover it.
    pub fn merge_category(&mut self, timestamp: i64, category: Category, now: i64) -> MergeOutcome {
        if self.buckets.is_empty() {
            self.fill(now);
        } else {
            self.advance_to(now);
        }

        if timestamp < now - self.range.duration_ms() {
            return MergeOutcome::OutOfRange;
        }

        let start = floor_to(timestamp, self.width());

        if let Some(bucket) = self.buckets.get_mut(&start) {
            bucket.counts.increment(category);
            return MergeOutcome::Counted { bucket_start: start };
        }

        match self.buckets.values_mut().next_back() {
            Some(last) => {
                last.counts.increment(category);
                MergeOutcome::Clamped {
                    bucket_start: last.start,
                }
            }
            None => MergeOutcome::OutOfRange,
        }
    }

    /// Buckets in ascending start order
    pub fn buckets(&self) -> Vec<Bucket> {
        self.buckets.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    pub fn get(&self, start: i64) -> Option<&Bucket> {
        self.buckets.get(&start)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sum of every category across all buckets
    pub fn total(&self) -> u64 {
        self.buckets.values().map(|b| b.counts.total()).sum()
    }
}

/// Hour-granular base series the chart can always be re-bucketed from
///
/// Every supported width is a whole number of hours, so keeping hourly counts
/// (seeded from history, bumped by live events) lets a range change rebuild
/// exactly instead of from the bounded window buffer.
#[derive(Debug, Clone, Default)]
pub struct HourlySeries {
    hours: BTreeMap<i64, CategoryCounts>,
    /// Hour of `now` at the last prune
    pruned_at: Option<i64>,
}

impl HourlySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: &[StatsPoint]) -> Self {
        let mut series = Self::new();
        for point in points {
            series
                .hours
                .entry(floor_to(point.date, MS_HOUR))
                .or_default()
                .add(&CategoryCounts::from(point));
        }
        series
    }

    pub fn from_records(records: &[EventRecord]) -> Self {
        let mut series = Self::new();
        for record in records {
            series.record(record.timestamp, classify(record.status));
        }
        series
    }

    pub fn record(&mut self, timestamp: i64, category: Category) {
        self.hours
            .entry(floor_to(timestamp, MS_HOUR))
            .or_default()
            .increment(category);
    }

    /// Live-path variant of `record`
    ///
    /// Prunes once per new hour of `now`, ignores timestamps already past the
    /// retention cutoff and files future-dated events under the current hour,
    /// matching where `BucketAggregator::merge` counts them. Returns whether
    /// the event was kept. Holds at most `90 * 24 + 1` hours.
    pub fn record_live(&mut self, timestamp: i64, category: Category, now: i64) -> bool {
        if self.pruned_at != Some(floor_to(now, MS_HOUR)) {
            self.prune(now);
        }
        if timestamp < Self::cutoff(now) {
            return false;
        }
        self.record(timestamp.min(now), category);
        true
    }

    fn cutoff(now: i64) -> i64 {
        floor_to(now - TimeRange::longest().duration_ms(), MS_HOUR)
    }

    /// Drop hours older than the longest selectable range
    pub fn prune(&mut self, now: i64) {
        self.hours = self.hours.split_off(&Self::cutoff(now));
        self.pruned_at = Some(floor_to(now, MS_HOUR));
    }

    pub fn points(&self) -> Vec<StatsPoint> {
        self.hours
            .iter()
            .map(|(&date, c)| StatsPoint {
                date,
                success: c.success,
                redirect: c.redirect,
                bad_request: c.bad_request,
                error: c.error,
                provisional: c.provisional,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }
}
