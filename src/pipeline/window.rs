//! Bounded, timestamp-ordered retention of the most recent events

use super::types::EventRecord;
use std::collections::VecDeque;

/// Rolling buffer of raw records, ascending by timestamp
///
/// Overflow evicts the earliest timestamp, not the earliest insertion, so a
/// late-delivered record that is older than everything else is the first to go.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    records: VecDeque<EventRecord>,
    capacity: usize,
}

impl WindowBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace contents with `records`, keeping the newest `capacity`
    pub fn seed(&mut self, records: Vec<EventRecord>) {
        let mut records = records;
        records.sort_by_key(|r| r.timestamp);

        let skip = records.len().saturating_sub(self.capacity);
        self.records = records.into_iter().skip(skip).collect();
    }

    /// Insert in sorted position; equal timestamps keep receipt order
    pub fn insert(&mut self, record: EventRecord) {
        let idx = self
            .records
            .partition_point(|r| r.timestamp <= record.timestamp);
        self.records.insert(idx, record);

        if self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    pub fn newest(&self) -> Option<&EventRecord> {
        self.records.back()
    }

    pub fn to_vec(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(id: usize, timestamp: i64) -> EventRecord {
        EventRecord {
            id: format!("req-{}", id),
            timestamp,
            status: 200,
            method: "GET".to_string(),
            path: "/".to_string(),
            duration_ms: None,
            data: None,
        }
    }

    fn assert_sorted(buffer: &WindowBuffer) {
        let ts: Vec<i64> = buffer.iter().map(|r| r.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]), "not sorted: {:?}", ts);
    }

    #[test]
    fn test_overflow_keeps_newest() {
        // Test: 300 strictly increasing inserts into a 256 buffer
        let mut buffer = WindowBuffer::new(256);
        for i in 0..300 {
            buffer.insert(make_record(i, 1_000 + i as i64));
            assert!(buffer.len() <= 256);
        }

        assert_eq!(buffer.len(), 256);
        assert_eq!(buffer.iter().next().unwrap().id, "req-44");
        assert_eq!(buffer.newest().unwrap().id, "req-299");
        assert_sorted(&buffer);
    }

    #[test]
    fn test_out_of_order_insert_is_placed() {
        let mut buffer = WindowBuffer::new(8);
        buffer.insert(make_record(0, 100));
        buffer.insert(make_record(1, 300));
        buffer.insert(make_record(2, 200));
        buffer.insert(make_record(3, 50));

        let ids: Vec<&str> = buffer.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["req-3", "req-0", "req-2", "req-1"]);
    }

    #[test]
    fn test_late_oldest_record_is_evicted_first() {
        let mut buffer = WindowBuffer::new(3);
        buffer.insert(make_record(0, 10));
        buffer.insert(make_record(1, 20));
        buffer.insert(make_record(2, 30));
        buffer.insert(make_record(3, 5));

        // The late record is the earliest, so it is the one dropped
        let ids: Vec<&str> = buffer.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["req-0", "req-1", "req-2"]);
    }

    #[test]
    fn test_seed_sorts_and_truncates() {
        let mut buffer = WindowBuffer::new(3);
        buffer.insert(make_record(99, 1));

        // Newest-first, as the history endpoint returns them
        let seed: Vec<_> = (0..5).rev().map(|i| make_record(i, i as i64 * 10)).collect();
        buffer.seed(seed);

        let ts: Vec<i64> = buffer.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![20, 30, 40]);
    }

    #[test]
    fn test_sorted_under_mixed_inserts() {
        let mut buffer = WindowBuffer::new(16);
        for i in 0..64usize {
            let ts = ((i * 37) % 50) as i64;
            buffer.insert(make_record(i, ts));
            assert_sorted(&buffer);
            assert!(buffer.len() <= 16);
        }
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        WindowBuffer::new(0);
    }
}
