use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One alerted identifier and the wall-clock time it was marked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeenRecord {
    pub id: String,
    pub seen_at: DateTime<Utc>,
}

/// Set of listing identifiers already alerted on, with time-based expiry.
///
/// Eviction scans in insertion order and stops at the first unexpired
/// entry. That is correct only because entries are marked at observation
/// time, so timestamps are roughly non-decreasing along the queue.
pub struct SeenStore {
    records: HashMap<String, DateTime<Utc>>,
    order: VecDeque<String>,
    retention: Duration,
}

impl SeenStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            retention,
        }
    }

    /// Retention horizon derived from the freshness window:
    /// `multiplier × window`, multiplier clamped to at least 1.
    pub fn with_window(freshness_window_secs: u64, retention_multiplier: u32) -> Self {
        let multiplier = retention_multiplier.max(1) as i64;
        Self::new(Duration::seconds(freshness_window_secs as i64 * multiplier))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Everything at or before this instant is expired.
    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    /// True iff `id` was marked and its record has not expired.
    pub fn contains(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.records
            .get(id)
            .map(|seen_at| now.signed_duration_since(*seen_at) <= self.retention)
            .unwrap_or(false)
    }

    /// Insert or refresh a record at `now`. Opportunistically evicts
    /// expired entries from the head of the queue.
    pub fn mark(&mut self, id: &str, now: DateTime<Utc>) {
        if self.records.insert(id.to_string(), now).is_none() {
            self.order.push_back(id.to_string());
        }
        self.prune(now);
    }

    /// Drop every record older than the retention duration. Returns the
    /// number of evicted records.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.order.front().cloned() {
            let expired = self
                .records
                .get(&front)
                .map(|seen_at| now.signed_duration_since(*seen_at) > self.retention)
                .unwrap_or(true);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.records.remove(&front);
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot in insertion order, for persistence.
    pub fn records(&self) -> Vec<SeenRecord> {
        self.order
            .iter()
            .filter_map(|id| {
                self.records.get(id).map(|seen_at| SeenRecord {
                    id: id.clone(),
                    seen_at: *seen_at,
                })
            })
            .collect()
    }

    /// Rebuild from a persisted snapshot. Records are re-ordered by
    /// timestamp so the insertion-order eviction invariant holds again.
    pub fn restore(&mut self, mut records: Vec<SeenRecord>) {
        self.records.clear();
        self.order.clear();
        records.sort_by_key(|record| record.seen_at);
        for record in records {
            if self.records.insert(record.id.clone(), record.seen_at).is_none() {
                self.order.push_back(record.id);
            }
        }
    }
}
