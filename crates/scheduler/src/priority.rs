//! Update priorities and queued update tasks
//!
//! Tasks are ordered by priority (higher first), then by enqueue order
//! (earlier first) so that work within one priority tier runs FIFO.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

/// Update priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePriority {
    /// Idle effects, runs whenever a frame is available
    Low = 0,

    /// Regular visual updates (filters, text, displacement)
    #[default]
    Normal = 1,

    /// Pointer and touch feedback
    High = 2,

    /// Slide transitions and immediate interaction feedback
    Critical = 3,
}

/// Callback executed when a task is drained
pub type UpdateFn = Box<dyn FnOnce() + Send + 'static>;

/// A pending update keyed by a caller-chosen id
///
/// Equality and ordering only consider the scheduling fields; the callback
/// is opaque.
pub struct UpdateTask {
    /// Coalescing key; scheduling the same id replaces the pending task
    pub id: String,

    /// Priority tier
    pub priority: UpdatePriority,

    /// When the task was enqueued
    pub enqueued_at: Instant,

    /// Enqueue sequence number (tie-breaker for identical timestamps)
    sequence: u64,

    callback: UpdateFn,
}

impl UpdateTask {
    /// Create a new task
    pub fn new(
        id: impl Into<String>,
        priority: UpdatePriority,
        enqueued_at: Instant,
        sequence: u64,
        callback: UpdateFn,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            enqueued_at,
            sequence,
            callback,
        }
    }

    /// Enqueue sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Consume the task and return its callback
    pub fn into_callback(self) -> UpdateFn {
        self.callback
    }
}

impl fmt::Debug for UpdateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl PartialEq for UpdateTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.sequence == other.sequence
    }
}

impl Eq for UpdateTask {}

impl PartialOrd for UpdateTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpdateTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare by priority (higher priority first)
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => {
                // Within same priority, earlier tasks compare greater
                other
                    .enqueued_at
                    .cmp(&self.enqueued_at)
                    .then_with(|| other.sequence.cmp(&self.sequence))
            }
            other => other,
        }
    }
}

/// Sort tasks into execution order (greatest first)
pub fn execution_order(mut tasks: Vec<UpdateTask>) -> Vec<UpdateTask> {
    tasks.sort_by(|a, b| b.cmp(a));
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(id: &str, priority: UpdatePriority, at: Instant, sequence: u64) -> UpdateTask {
        UpdateTask::new(id, priority, at, sequence, Box::new(|| {}))
    }

    #[test]
    fn test_update_priority_ordering() {
        assert!(UpdatePriority::Critical > UpdatePriority::High);
        assert!(UpdatePriority::High > UpdatePriority::Normal);
        assert!(UpdatePriority::Normal > UpdatePriority::Low);
        assert_eq!(UpdatePriority::default(), UpdatePriority::Normal);
    }

    #[test]
    fn test_priority_before_enqueue_time() {
        let t0 = Instant::now();
        let ordered = execution_order(vec![
            task("a", UpdatePriority::Normal, t0, 0),
            task("b", UpdatePriority::Critical, t0 + Duration::from_millis(1), 1),
            task("c", UpdatePriority::Normal, t0 + Duration::from_millis(2), 2),
        ]);

        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let t0 = Instant::now();
        let ordered = execution_order(vec![
            task("third", UpdatePriority::High, t0 + Duration::from_millis(5), 2),
            task("first", UpdatePriority::High, t0, 0),
            task("second", UpdatePriority::High, t0 + Duration::from_millis(3), 1),
        ]);

        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_sequence_breaks_timestamp_ties() {
        let t0 = Instant::now();
        let ordered = execution_order(vec![
            task("late", UpdatePriority::Low, t0, 9),
            task("early", UpdatePriority::Low, t0, 4),
        ]);
        assert_eq!(ordered[0].id, "early");
        assert_eq!(ordered[1].id, "late");
    }
}
