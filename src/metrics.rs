//! Request counters.
//!
//! The bulk processor and the HTTP handlers only see the [`CounterSink`]
//! trait. [`MetricsRegistry`] is the in-process implementation used by the
//! server; it can also print itself periodically as a JSON line.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Every counter the server maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// Bulk requests received, including ones rejected as too large.
    BulkTotal,
    CreateOk,
    CreateDuplicate,
    CreateTooMany,
    CreateNonIndex,
    /// Bulk requests rejected with 413.
    BulkTooLarge,
    Index,
    Update,
    Delete,
    License,
    Root,
}

const COUNTER_COUNT: usize = 11;

impl Counter {
    pub const ALL: [Counter; COUNTER_COUNT] = [
        Counter::BulkTotal,
        Counter::CreateOk,
        Counter::CreateDuplicate,
        Counter::CreateTooMany,
        Counter::CreateNonIndex,
        Counter::BulkTooLarge,
        Counter::Index,
        Counter::Update,
        Counter::Delete,
        Counter::License,
        Counter::Root,
    ];

    /// Exported counter name.
    pub fn name(self) -> &'static str {
        match self {
            Counter::BulkTotal => "bulk.create.total",
            Counter::CreateOk => "bulk.create.ok",
            Counter::CreateDuplicate => "bulk.create.duplicate",
            Counter::CreateTooMany => "bulk.create.too_many",
            Counter::CreateNonIndex => "bulk.create.non_index",
            Counter::BulkTooLarge => "bulk.create.too_large",
            Counter::Index => "bulk.index.total",
            Counter::Update => "bulk.update.total",
            Counter::Delete => "bulk.delete.total",
            Counter::License => "license.total",
            Counter::Root => "root.total",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Something that can count events.
///
/// Implementations must tolerate concurrent increments from every request
/// handler.
pub trait CounterSink: Send + Sync {
    fn increment(&self, counter: Counter);
}

/// Atomic in-memory counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counts: [AtomicU64; COUNTER_COUNT],
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter.slot()].load(Ordering::Relaxed)
    }

    /// All counters keyed by exported name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL
            .iter()
            .map(|&c| (c.name(), self.get(c)))
            .collect()
    }

    /// Snapshot rendered as `{"name": {"count": n}, ...}`.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .snapshot()
            .into_iter()
            .map(|(name, count)| (name.to_string(), json!({ "count": count })))
            .collect();
        Value::Object(map)
    }

    /// Print the snapshot to stdout every `interval` until the runtime stops.
    pub fn spawn_reporter(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("Writing metrics snapshot");
                println!("{}", self.to_json());
            }
        })
    }
}

impl CounterSink for MetricsRegistry {
    fn increment(&self, counter: Counter) {
        self.counts[counter.slot()].fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_names_are_unique() {
        let mut names: Vec<_> = Counter::ALL.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Counter::ALL.len());
    }

    #[test]
    fn test_slots_match_all_order() {
        for (i, c) in Counter::ALL.iter().enumerate() {
            assert_eq!(c.slot(), i);
        }
    }

    #[test]
    fn test_increment_and_snapshot() {
        let registry = MetricsRegistry::new();
        registry.increment(Counter::CreateOk);
        registry.increment(Counter::CreateOk);
        registry.increment(Counter::Delete);

        assert_eq!(registry.get(Counter::CreateOk), 2);
        assert_eq!(registry.get(Counter::Delete), 1);
        assert_eq!(registry.get(Counter::Root), 0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["bulk.create.ok"], 2);
        assert_eq!(snapshot["bulk.delete.total"], 1);
        assert_eq!(snapshot.len(), Counter::ALL.len());
    }

    #[test]
    fn test_json_shape() {
        let registry = MetricsRegistry::new();
        registry.increment(Counter::License);
        let json = registry.to_json();
        assert_eq!(json["license.total"]["count"], 1);
        assert_eq!(json["root.total"]["count"], 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.increment(Counter::BulkTotal);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get(Counter::BulkTotal), 8000);
    }
}
