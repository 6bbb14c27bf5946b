//! Operation and batch statistics

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Count and timing for one operation name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationStat {
    pub count: u64,
    pub total_micros: u64,
    pub max_micros: u64,
}

impl OperationStat {
    /// Average duration in microseconds
    pub fn average_micros(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_micros as f64 / self.count as f64
        }
    }
}

/// Per-operation metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationMetrics {
    operations: BTreeMap<&'static str, OperationStat>,
}

impl OperationMetrics {
    /// Record one call of `operation`
    pub fn record(&mut self, operation: &'static str, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let stat = self.operations.entry(operation).or_default();
        stat.count += 1;
        stat.total_micros = stat.total_micros.saturating_add(micros);
        stat.max_micros = stat.max_micros.max(micros);
    }

    /// Stats for one operation
    pub fn get(&self, operation: &str) -> Option<&OperationStat> {
        self.operations.get(operation)
    }

    /// All operations by name
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &OperationStat)> {
        self.operations.iter().map(|(name, stat)| (*name, stat))
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Batch tracking statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatchStats {
    /// Batch calls
    pub batches: u64,

    /// Items inserted by batch calls
    pub total_items: u64,

    /// Mean items per batch
    pub average_batch_size: f64,

    /// Largest batch seen
    pub max_batch_size: usize,
}

impl BatchStats {
    /// Record a batch of `size` items
    pub fn record(&mut self, size: usize) {
        self.batches += 1;
        self.total_items += size as u64;
        self.average_batch_size = self.total_items as f64 / self.batches as f64;
        self.max_batch_size = self.max_batch_size.max(size);
    }
}
