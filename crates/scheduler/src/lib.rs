//! Carousel Render Scheduler Library
//!
//! Frame-synced update batching with priority ordering and throttling.
//!
//! Callers schedule keyed callbacks; the host drives
//! [`RenderScheduler::on_frame`] from its display refresh hook. Each frame
//! that passes the [`FrameThrottler`] gate drains the whole queue, highest
//! priority first and FIFO within a tier.
//!
//! # Example
//!
//! ```
//! use carousel_scheduler::{
//!     FrameOutcome, RenderScheduler, ThrottleConfig, ThrottleStrategy, UpdatePriority,
//! };
//! use std::time::Instant;
//!
//! let scheduler = RenderScheduler::new(
//!     ThrottleConfig::new(ThrottleStrategy::Priority).with_target_fps(60.0),
//! );
//!
//! scheduler.schedule_update("displacement", UpdatePriority::Normal, Box::new(|| {
//!     // update filter uniforms
//! }));
//! scheduler.schedule_update("transition", UpdatePriority::Critical, Box::new(|| {
//!     // advance slide transition
//! }));
//!
//! match scheduler.on_frame(Instant::now()) {
//!     FrameOutcome::Drained { executed, .. } => assert_eq!(executed, 2),
//!     other => panic!("unexpected outcome {other:?}"),
//! }
//! ```

mod priority;
mod scheduler;
mod throttle;

// Re-export public API
pub use priority::{execution_order, UpdateFn, UpdatePriority, UpdateTask};
pub use scheduler::{FrameOutcome, FrameRequester, RenderScheduler, SchedulerStats};
pub use throttle::{
    fps_to_interval, FrameThrottler, PerformanceMetrics, ThrottleConfig, ThrottleStrategy,
    ADAPTIVE_ADJUST_INTERVAL, DEFAULT_SAMPLE_WINDOW, DEFAULT_TARGET_FPS,
};
