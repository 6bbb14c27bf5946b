//! Frame throttling for batched UI updates
//!
//! Decides whether a display refresh should process queued work, based on
//! the configured strategy and the priority of the most urgent task.
//!
//! # Target Frame Times
//! - 120 FPS: 8.33ms per frame
//! - 60 FPS (standard): 16.67ms per frame
//! - 30 FPS (floor for adaptive throttling): 33.33ms per frame

use crate::priority::UpdatePriority;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default target frame rate
pub const DEFAULT_TARGET_FPS: f64 = 60.0;

/// Default number of frame durations kept for adaptive throttling
pub const DEFAULT_SAMPLE_WINDOW: usize = 60;

/// Minimum time between adaptive target adjustments
pub const ADAPTIVE_ADJUST_INTERVAL: Duration = Duration::from_secs(1);

/// Convert a frame rate to a frame interval (`1000 / fps` milliseconds)
pub fn fps_to_interval(fps: f64) -> Duration {
    if fps <= 0.0 || !fps.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(1.0 / fps)
}

/// Throttling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleStrategy {
    /// Gate purely on elapsed time against `1000 / target_fps`
    #[default]
    FixedFps,

    /// Like `FixedFps`, with the target adjusted from measured frame rate
    Adaptive,

    /// `High` and `Critical` work bypasses the gate
    Priority,

    /// Always process
    None,
}

impl ThrottleStrategy {
    /// Parse a strategy name (`fixed_fps`, `adaptive`, `priority`, `none`)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fixed_fps" | "fixed" => Some(Self::FixedFps),
            "adaptive" => Some(Self::Adaptive),
            "priority" => Some(Self::Priority),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

/// Throttler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// Throttling policy
    pub strategy: ThrottleStrategy,

    /// Initial target frame rate
    pub target_fps: f64,

    /// Lower clamp for adaptive throttling
    pub min_fps: f64,

    /// Upper clamp for adaptive throttling
    pub max_fps: f64,

    /// Number of frame durations in the adaptive rolling window
    pub sample_window: usize,

    /// Minimum time between adaptive target adjustments
    pub adjust_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            strategy: ThrottleStrategy::default(),
            target_fps: DEFAULT_TARGET_FPS,
            min_fps: 30.0,
            max_fps: 120.0,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            adjust_interval: ADAPTIVE_ADJUST_INTERVAL,
        }
    }
}

impl ThrottleConfig {
    /// Create a configuration for a strategy with default rates
    pub fn new(strategy: ThrottleStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Set the target frame rate
    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.target_fps = fps;
        self
    }

    /// Set the adaptive clamp range
    pub fn with_fps_range(mut self, min_fps: f64, max_fps: f64) -> Self {
        self.min_fps = min_fps;
        self.max_fps = max_fps;
        self
    }
}

/// Snapshot of throttler state
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Measured frame rate over the last second
    pub current_fps: f64,

    /// Current target frame rate
    pub target_fps: f64,

    /// Current target interval in milliseconds
    pub target_interval_ms: f64,

    /// Frames processed since creation or reset
    pub frame_count: u64,

    /// Active strategy
    pub strategy: ThrottleStrategy,
}

/// Frame throttler
///
/// The host calls [`FrameThrottler::should_process_frame`] on each display
/// refresh and [`FrameThrottler::frame_processed`] after the work ran, so
/// the rolling metrics stay correct.
///
/// # Example
///
/// ```
/// use carousel_scheduler::{FrameThrottler, ThrottleConfig, ThrottleStrategy, UpdatePriority};
/// use std::time::{Duration, Instant};
///
/// let mut throttler = FrameThrottler::new(ThrottleConfig::new(ThrottleStrategy::FixedFps));
/// let t0 = Instant::now();
///
/// assert!(throttler.should_process_frame(UpdatePriority::Normal, t0));
/// throttler.frame_processed(t0);
///
/// // 5ms later is too early for a 60 FPS target
/// assert!(!throttler.should_process_frame(UpdatePriority::Normal, t0 + Duration::from_millis(5)));
/// ```
#[derive(Debug, Clone)]
pub struct FrameThrottler {
    config: ThrottleConfig,

    /// Current target (moves under adaptive throttling)
    target_fps: f64,

    /// Cached `1000 / target_fps`
    interval: Duration,

    /// Start of the last frame that was allowed through the gate
    last_frame: Option<Instant>,

    /// Last `frame_processed` timestamp
    last_processed: Option<Instant>,

    /// Rolling window of durations between processed frames
    frame_durations: VecDeque<Duration>,

    /// Last adaptive adjustment
    last_adjustment: Option<Instant>,

    frame_count: u64,

    /// Frames counted towards the next `current_fps` refresh
    frames_since_fps_update: u32,
    last_fps_update: Option<Instant>,
    current_fps: f64,
}

impl FrameThrottler {
    /// Create a throttler
    pub fn new(config: ThrottleConfig) -> Self {
        let target_fps = clamp_fps(config.target_fps, &config);
        Self {
            interval: fps_to_interval(target_fps),
            target_fps,
            last_frame: None,
            last_processed: None,
            frame_durations: VecDeque::with_capacity(config.sample_window.max(1)),
            last_adjustment: None,
            frame_count: 0,
            frames_since_fps_update: 0,
            last_fps_update: None,
            current_fps: 0.0,
            config,
        }
    }

    /// Decide whether the frame at `now` should process queued work
    pub fn should_process_frame(&mut self, priority: UpdatePriority, now: Instant) -> bool {
        let allowed = match self.config.strategy {
            ThrottleStrategy::None => true,
            ThrottleStrategy::FixedFps => self.interval_elapsed(now),
            ThrottleStrategy::Adaptive => {
                self.maybe_adjust(now);
                self.interval_elapsed(now)
            }
            ThrottleStrategy::Priority => {
                priority >= UpdatePriority::High || self.interval_elapsed(now)
            }
        };

        if allowed {
            self.last_frame = Some(now);
        }
        allowed
    }

    /// Record that a frame's work completed at `now`
    pub fn frame_processed(&mut self, now: Instant) {
        if let Some(previous) = self.last_processed {
            let duration = now.saturating_duration_since(previous);
            if self.frame_durations.len() >= self.config.sample_window.max(1) {
                self.frame_durations.pop_front();
            }
            self.frame_durations.push_back(duration);
        }
        self.last_processed = Some(now);
        self.frame_count += 1;
        self.frames_since_fps_update += 1;

        let since = *self.last_fps_update.get_or_insert(now);
        let elapsed = now.saturating_duration_since(since);
        if elapsed >= Duration::from_secs(1) {
            self.current_fps = self.frames_since_fps_update as f64 / elapsed.as_secs_f64();
            self.frames_since_fps_update = 0;
            self.last_fps_update = Some(now);
        }
    }

    fn interval_elapsed(&self, now: Instant) -> bool {
        match self.last_frame {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Average frame rate over the rolling window, if any samples exist
    pub fn average_fps(&self) -> Option<f64> {
        if self.frame_durations.is_empty() {
            return None;
        }
        let total: Duration = self.frame_durations.iter().sum();
        let average = total.as_secs_f64() / self.frame_durations.len() as f64;
        if average <= 0.0 {
            return None;
        }
        Some(1.0 / average)
    }

    fn maybe_adjust(&mut self, now: Instant) {
        let since = *self.last_adjustment.get_or_insert(now);
        if now.saturating_duration_since(since) < self.config.adjust_interval {
            return;
        }
        self.last_adjustment = Some(now);

        let Some(average) = self.average_fps() else {
            return;
        };

        let previous = self.target_fps;
        let headroom = average / self.target_fps;
        let next = if average < self.config.min_fps {
            self.target_fps * 0.8
        } else if headroom >= 0.98 {
            self.target_fps * 1.2
        } else if headroom >= 0.9 {
            self.target_fps * 1.1
        } else {
            self.target_fps
        };

        self.set_target_fps(next);
        if (self.target_fps - previous).abs() > f64::EPSILON {
            tracing::debug!(
                average_fps = average,
                from = previous,
                to = self.target_fps,
                "adaptive throttle adjusted target"
            );
        }
    }

    /// Set the target frame rate, clamped to `[min_fps, max_fps]`
    pub fn set_target_fps(&mut self, fps: f64) {
        self.target_fps = clamp_fps(fps, &self.config);
        self.interval = fps_to_interval(self.target_fps);
    }

    /// Switch strategy without resetting metrics
    pub fn set_strategy(&mut self, strategy: ThrottleStrategy) {
        self.config.strategy = strategy;
    }

    /// Active strategy
    pub fn strategy(&self) -> ThrottleStrategy {
        self.config.strategy
    }

    /// Current target frame rate
    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Current target interval
    pub fn target_interval(&self) -> Duration {
        self.interval
    }

    /// Frames processed so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Throttler configuration
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Snapshot the metrics
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            current_fps: self.current_fps,
            target_fps: self.target_fps,
            target_interval_ms: self.interval.as_secs_f64() * 1000.0,
            frame_count: self.frame_count,
            strategy: self.config.strategy,
        }
    }

    /// Forget timing history and restore the configured target
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl Default for FrameThrottler {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

fn clamp_fps(fps: f64, config: &ThrottleConfig) -> f64 {
    let min = config.min_fps.max(1.0);
    let max = config.max_fps.max(min);
    if !fps.is_finite() {
        return min;
    }
    fps.clamp(min, max)
}
