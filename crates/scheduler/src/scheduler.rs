//! Render scheduler implementation
//!
//! Collects keyed update callbacks and drains them at most once per display
//! refresh, in priority order, gated by a [`FrameThrottler`].

use crate::priority::{execution_order, UpdateFn, UpdatePriority, UpdateTask};
use crate::throttle::{FrameThrottler, PerformanceMetrics, ThrottleConfig, ThrottleStrategy};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Host hook for the display's per-frame callback
///
/// The scheduler calls [`FrameRequester::request_frame`] whenever it wants
/// [`RenderScheduler::on_frame`] to run on the next refresh.
pub trait FrameRequester: Send + Sync {
    /// Ask the host for one more frame callback
    fn request_frame(&self);
}

/// Result of one frame callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing was queued; the drain loop stopped
    Idle,

    /// The throttler rejected this frame; work stays queued
    Throttled,

    /// Queued tasks ran
    Drained {
        /// Tasks executed
        executed: usize,
        /// Tasks whose callback panicked
        failed: usize,
    },
}

/// Render scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    /// Total `schedule_update` calls
    pub updates_scheduled: u64,

    /// Scheduled updates that replaced a pending task with the same id
    pub updates_replaced: u64,

    /// Pending updates removed by `cancel_update` or `clear`
    pub updates_cancelled: u64,

    /// Callbacks executed
    pub updates_executed: u64,

    /// Callbacks that panicked
    pub updates_failed: u64,

    /// Frames that drained the queue
    pub drains: u64,

    /// Frames rejected by the throttler
    pub throttled_frames: u64,

    /// Current queue size
    pub queue_size: usize,
}

struct SchedulerState {
    pending: HashMap<String, UpdateTask>,

    /// Enqueue counter (FIFO tie-breaker)
    sequence: u64,

    /// Counter for `execute_immediate` ids
    immediate_counter: u64,

    /// True while a frame has been requested or a drain is in progress
    running: bool,

    stats: SchedulerStats,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            pending: HashMap::new(),
            sequence: 0,
            immediate_counter: 0,
            running: false,
            stats: SchedulerStats::default(),
        }
    }
}

/// Render scheduler with keyed coalescing
///
/// Thread-safe, although the intended host drives it from a single
/// event-loop thread. Locks are never held while callbacks run, so a
/// callback may schedule further updates; those run on a later frame.
///
/// # Example
///
/// ```
/// use carousel_scheduler::{FrameOutcome, RenderScheduler, UpdatePriority};
/// use std::time::Instant;
///
/// let scheduler = RenderScheduler::default();
/// scheduler.schedule_update("tilt", UpdatePriority::Normal, Box::new(|| {}));
/// // Same id: replaces the pending task
/// scheduler.schedule_update("tilt", UpdatePriority::High, Box::new(|| {}));
/// assert_eq!(scheduler.pending_updates(), 1);
///
/// let outcome = scheduler.on_frame(Instant::now());
/// assert_eq!(outcome, FrameOutcome::Drained { executed: 1, failed: 0 });
/// ```
pub struct RenderScheduler {
    state: Arc<Mutex<SchedulerState>>,
    throttler: Mutex<FrameThrottler>,
    requester: Mutex<Option<Arc<dyn FrameRequester>>>,
}

impl RenderScheduler {
    /// Create a scheduler with the given throttle configuration
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::new())),
            throttler: Mutex::new(FrameThrottler::new(config)),
            requester: Mutex::new(None),
        }
    }

    /// Install the host's per-frame hook
    pub fn with_frame_requester(self, requester: Arc<dyn FrameRequester>) -> Self {
        *self.requester.lock() = Some(requester);
        self
    }

    /// Replace the host's per-frame hook
    pub fn set_frame_requester(&self, requester: Option<Arc<dyn FrameRequester>>) {
        *self.requester.lock() = requester;
    }

    /// Schedule an update
    ///
    /// A pending task with the same id is replaced, taking the new priority
    /// and enqueue time. Starts the drain loop if it is not running.
    /// Returns `true` if a pending task was replaced.
    pub fn schedule_update(
        &self,
        id: impl Into<String>,
        priority: UpdatePriority,
        callback: UpdateFn,
    ) -> bool {
        let id = id.into();
        let start_loop;
        let replaced;
        {
            let mut state = self.state.lock();
            let sequence = state.sequence;
            state.sequence += 1;

            let task = UpdateTask::new(id.clone(), priority, Instant::now(), sequence, callback);
            replaced = state.pending.insert(id.clone(), task).is_some();

            state.stats.updates_scheduled += 1;
            if replaced {
                state.stats.updates_replaced += 1;
            }

            start_loop = !state.running;
            state.running = true;
        }

        tracing::trace!(%id, ?priority, replaced, "update scheduled");

        if start_loop {
            self.request_frame();
        }
        replaced
    }

    /// Remove a pending update
    ///
    /// Returns `true` if a task with this id was pending.
    pub fn cancel_update(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.pending.remove(id).is_some();
        if removed {
            state.stats.updates_cancelled += 1;
        }
        removed
    }

    /// Run a callback with `Critical` priority and force a drain attempt
    ///
    /// The throttler is still consulted; under `FixedFps` the task may have
    /// to wait for the next allowed frame.
    pub fn execute_immediate(&self, callback: UpdateFn, now: Instant) -> FrameOutcome {
        let id = {
            let mut state = self.state.lock();
            state.immediate_counter += 1;
            format!("immediate:{}", state.immediate_counter)
        };
        self.schedule_update(id, UpdatePriority::Critical, callback);
        self.on_frame(now)
    }

    /// Per-frame drain entry point
    ///
    /// Called by the host from its display refresh callback.
    pub fn on_frame(&self, now: Instant) -> FrameOutcome {
        let highest = {
            let mut state = self.state.lock();
            match state.pending.values().map(|task| task.priority).max() {
                Some(priority) => priority,
                None => {
                    state.running = false;
                    return FrameOutcome::Idle;
                }
            }
        };

        if !self.throttler.lock().should_process_frame(highest, now) {
            self.state.lock().stats.throttled_frames += 1;
            self.request_frame();
            return FrameOutcome::Throttled;
        }

        let tasks = {
            let mut state = self.state.lock();
            let drained: Vec<UpdateTask> = state.pending.drain().map(|(_, task)| task).collect();
            execution_order(drained)
        };

        let mut executed = 0;
        let mut failed = 0;
        for task in tasks {
            let id = task.id.clone();
            let callback = task.into_callback();
            executed += 1;
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                failed += 1;
                tracing::error!(%id, "scheduled update panicked");
            }
        }

        self.throttler.lock().frame_processed(now);

        let more_work = {
            let mut state = self.state.lock();
            state.stats.drains += 1;
            state.stats.updates_executed += executed as u64;
            state.stats.updates_failed += failed as u64;
            let more = !state.pending.is_empty();
            state.running = more;
            more
        };

        if more_work {
            self.request_frame();
        }

        FrameOutcome::Drained { executed, failed }
    }

    fn request_frame(&self) {
        let requester = self.requester.lock().clone();
        if let Some(requester) = requester {
            requester.request_frame();
        }
    }

    /// Drop every pending update
    ///
    /// Returns the number of tasks removed.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.pending.len();
        state.pending.clear();
        state.running = false;
        state.stats.updates_cancelled += removed as u64;
        removed
    }

    /// Forget all state, including statistics and throttler history
    pub fn reset(&self) {
        *self.state.lock() = SchedulerState::new();
        self.throttler.lock().reset();
    }

    /// Whether an update with this id is pending
    pub fn is_pending(&self, id: &str) -> bool {
        self.state.lock().pending.contains_key(id)
    }

    /// Number of pending updates
    pub fn pending_updates(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether the drain loop is active
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Switch the throttle strategy
    pub fn set_strategy(&self, strategy: ThrottleStrategy) {
        self.throttler.lock().set_strategy(strategy);
    }

    /// Throttler metrics
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.throttler.lock().performance_metrics()
    }

    /// Scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.queue_size = state.pending.len();
        stats
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(ThrottleConfig::new(ThrottleStrategy::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> UpdateFn) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> UpdateFn {
            let sink = sink.clone();
            Box::new(move || sink.lock().push(name))
        };
        (log, make)
    }

    #[derive(Default)]
    struct CountingRequester {
        requests: AtomicUsize,
    }

    impl FrameRequester for CountingRequester {
        fn request_frame(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let scheduler = RenderScheduler::default();
        let (log, make) = recorder();

        scheduler.schedule_update("a", UpdatePriority::Normal, make("A"));
        scheduler.schedule_update("b", UpdatePriority::Critical, make("B"));
        scheduler.schedule_update("c", UpdatePriority::Normal, make("C"));

        let outcome = scheduler.on_frame(Instant::now());
        assert_eq!(outcome, FrameOutcome::Drained { executed: 3, failed: 0 });
        assert_eq!(*log.lock(), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_same_id_replaces_pending_task() {
        let scheduler = RenderScheduler::default();
        let (log, make) = recorder();

        assert!(!scheduler.schedule_update("filter", UpdatePriority::Low, make("old")));
        assert!(scheduler.schedule_update("filter", UpdatePriority::Low, make("new")));
        assert_eq!(scheduler.pending_updates(), 1);

        scheduler.on_frame(Instant::now());
        assert_eq!(*log.lock(), vec!["new"]);

        let stats = scheduler.stats();
        assert_eq!(stats.updates_scheduled, 2);
        assert_eq!(stats.updates_replaced, 1);
        assert_eq!(stats.updates_executed, 1);
    }

    #[test]
    fn test_panicking_task_does_not_abort_batch() {
        let scheduler = RenderScheduler::default();
        let (log, make) = recorder();

        scheduler.schedule_update("boom", UpdatePriority::Critical, Box::new(|| panic!("boom")));
        scheduler.schedule_update("after", UpdatePriority::Low, make("after"));

        let outcome = scheduler.on_frame(Instant::now());
        assert_eq!(outcome, FrameOutcome::Drained { executed: 2, failed: 1 });
        assert_eq!(*log.lock(), vec!["after"]);
        assert_eq!(scheduler.stats().updates_failed, 1);
    }

    #[test]
    fn test_loop_stops_when_idle() {
        let requester = Arc::new(CountingRequester::default());
        let scheduler = RenderScheduler::default().with_frame_requester(requester.clone());

        scheduler.schedule_update("a", UpdatePriority::Normal, Box::new(|| {}));
        scheduler.schedule_update("b", UpdatePriority::Normal, Box::new(|| {}));
        // Only the first schedule starts the loop
        assert_eq!(requester.requests.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_running());

        scheduler.on_frame(Instant::now());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.on_frame(Instant::now()), FrameOutcome::Idle);
        assert_eq!(requester.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_work_scheduled_during_drain_runs_next_frame() {
        let requester = Arc::new(CountingRequester::default());
        let scheduler = Arc::new(RenderScheduler::default().with_frame_requester(requester.clone()));
        let (log, make) = recorder();

        let inner = scheduler.clone();
        let follow_up = make("follow-up");
        let sink = log.clone();
        scheduler.schedule_update(
            "outer",
            UpdatePriority::Normal,
            Box::new(move || {
                sink.lock().push("outer");
                inner.schedule_update("inner", UpdatePriority::Normal, follow_up);
            }),
        );

        let now = Instant::now();
        assert_eq!(
            scheduler.on_frame(now),
            FrameOutcome::Drained { executed: 1, failed: 0 }
        );
        assert!(scheduler.is_running());
        assert_eq!(requester.requests.load(Ordering::SeqCst), 2);

        scheduler.on_frame(now + Duration::from_millis(16));
        assert_eq!(*log.lock(), vec!["outer", "follow-up"]);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_throttled_frame_keeps_work_queued() {
        let config = ThrottleConfig::new(ThrottleStrategy::FixedFps).with_target_fps(50.0);
        let scheduler = RenderScheduler::new(config);
        let t0 = Instant::now();

        scheduler.schedule_update("a", UpdatePriority::Normal, Box::new(|| {}));
        assert!(matches!(scheduler.on_frame(t0), FrameOutcome::Drained { .. }));

        scheduler.schedule_update("b", UpdatePriority::Normal, Box::new(|| {}));
        assert_eq!(
            scheduler.on_frame(t0 + Duration::from_millis(5)),
            FrameOutcome::Throttled
        );
        assert_eq!(scheduler.pending_updates(), 1);
        assert!(scheduler.is_running());

        assert!(matches!(
            scheduler.on_frame(t0 + Duration::from_millis(20)),
            FrameOutcome::Drained { executed: 1, .. }
        ));
        assert_eq!(scheduler.stats().throttled_frames, 1);
    }

    #[test]
    fn test_execute_immediate_bypasses_priority_gate() {
        let config = ThrottleConfig::new(ThrottleStrategy::Priority).with_target_fps(50.0);
        let scheduler = RenderScheduler::new(config);
        let (log, make) = recorder();
        let t0 = Instant::now();

        scheduler.schedule_update("idle", UpdatePriority::Low, make("idle"));
        scheduler.on_frame(t0);

        let outcome = scheduler.execute_immediate(make("press"), t0 + Duration::from_millis(1));
        assert_eq!(outcome, FrameOutcome::Drained { executed: 1, failed: 0 });
        assert_eq!(*log.lock(), vec!["idle", "press"]);
    }

    #[test]
    fn test_cancel_and_clear() {
        let scheduler = RenderScheduler::default();
        scheduler.schedule_update("a", UpdatePriority::Normal, Box::new(|| {}));
        scheduler.schedule_update("b", UpdatePriority::Normal, Box::new(|| {}));
        scheduler.schedule_update("c", UpdatePriority::Normal, Box::new(|| {}));

        assert!(scheduler.cancel_update("a"));
        assert!(!scheduler.cancel_update("a"));
        assert!(!scheduler.is_pending("a"));
        assert_eq!(scheduler.clear(), 2);
        assert_eq!(scheduler.pending_updates(), 0);
        assert_eq!(scheduler.stats().updates_cancelled, 3);
        assert_eq!(scheduler.on_frame(Instant::now()), FrameOutcome::Idle);
    }

    #[test]
    fn test_drains_feed_throttler_metrics() {
        let scheduler = RenderScheduler::default();
        let t0 = Instant::now();
        for i in 0..3u64 {
            scheduler.schedule_update("tick", UpdatePriority::Normal, Box::new(|| {}));
            scheduler.on_frame(t0 + Duration::from_millis(16 * i));
        }
        let metrics = scheduler.performance_metrics();
        assert_eq!(metrics.frame_count, 3);
        assert_eq!(metrics.strategy, ThrottleStrategy::None);
    }

    #[test]
    fn test_reset() {
        let scheduler = RenderScheduler::default();
        scheduler.schedule_update("a", UpdatePriority::Normal, Box::new(|| {}));
        scheduler.on_frame(Instant::now());
        scheduler.reset();
        assert_eq!(scheduler.stats(), SchedulerStats::default());
        assert_eq!(scheduler.performance_metrics().frame_count, 0);
    }
}
