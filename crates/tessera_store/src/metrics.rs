//! Per-region control metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::region::RegionId;
use crate::unix_time_ms;

/// Counters for one region, registered on create and dropped on delete.
#[derive(Debug, Default)]
pub struct RegionMetrics {
    commands_done: AtomicU64,
    commands_failed: AtomicU64,
    last_command_at_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionMetricsSnapshot {
    pub commands_done: u64,
    pub commands_failed: u64,
    pub last_command_at_ms: u64,
}

impl RegionMetrics {
    pub fn record_command(&self, ok: bool) {
        if ok {
            self.commands_done.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_command_at_ms
            .fetch_max(unix_time_ms(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RegionMetricsSnapshot {
        RegionMetricsSnapshot {
            commands_done: self.commands_done.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            last_command_at_ms: self.last_command_at_ms.load(Ordering::Relaxed),
        }
    }
}

/// Registry of per-region metrics, keyed by region id.
#[derive(Debug, Default)]
pub struct RegionMetricsRegistry {
    metrics: DashMap<RegionId, Arc<RegionMetrics>>,
}

impl RegionMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch) the metrics handle for a region.
    pub fn register(&self, region_id: RegionId) -> Arc<RegionMetrics> {
        self.metrics
            .entry(region_id)
            .or_insert_with(|| Arc::new(RegionMetrics::default()))
            .clone()
    }

    pub fn get(&self, region_id: RegionId) -> Option<Arc<RegionMetrics>> {
        self.metrics.get(&region_id).map(|m| m.clone())
    }

    pub fn remove(&self, region_id: RegionId) {
        self.metrics.remove(&region_id);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_and_remove_forgets() {
        let registry = RegionMetricsRegistry::new();
        let a = registry.register(1);
        a.record_command(true);
        let b = registry.register(1);
        assert_eq!(b.snapshot().commands_done, 1);

        registry.remove(1);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.register(1).snapshot().commands_done, 0);
    }

    #[test]
    fn record_distinguishes_outcomes() {
        let metrics = RegionMetrics::default();
        metrics.record_command(true);
        metrics.record_command(false);
        metrics.record_command(false);
        let snap = metrics.snapshot();
        assert_eq!(snap.commands_done, 1);
        assert_eq!(snap.commands_failed, 2);
        assert!(snap.last_command_at_ms > 0);
    }
}
