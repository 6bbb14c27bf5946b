//! Sliding-window slide residency
//!
//! Decides which slides are resident around the active slide. The manager
//! is a pure state machine: it reports which slides to initialize, load or
//! unload and leaves the actual work to the caller.

use carousel_resources::DisplayObjectId;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

/// Default number of slides kept resident on each side of the active one
pub const DEFAULT_WINDOW_RADIUS: usize = 2;

/// Lifecycle state of one slide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideState {
    #[default]
    Uninitialized,
    /// Display object exists, texture not loaded
    Placeholder,
    Loaded,
    /// The current slide
    Active,
    Error,
}

/// Last navigation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Backward,
    Still,
    #[default]
    Forward,
}

impl Direction {
    fn between(from: usize, to: usize) -> Self {
        match to.cmp(&from) {
            std::cmp::Ordering::Less => Direction::Backward,
            std::cmp::Ordering::Equal => Direction::Still,
            std::cmp::Ordering::Greater => Direction::Forward,
        }
    }

    /// -1, 0 or +1
    pub fn signum(self) -> i8 {
        match self {
            Direction::Backward => -1,
            Direction::Still => 0,
            Direction::Forward => 1,
        }
    }
}

/// Per-slide bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideInfo {
    pub index: usize,
    pub state: SlideState,
    pub sprite: Option<DisplayObjectId>,
    /// Within `radius` of the active index
    pub in_window: bool,
    #[serde(skip)]
    pub last_active: Option<Instant>,
}

/// Slides that entered and left the window on navigation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowDelta {
    pub entered: Vec<usize>,
    pub left: Vec<usize>,
}

impl WindowDelta {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

/// Slide counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    pub total: usize,
    pub in_window: usize,
    pub uninitialized: usize,
    pub placeholder: usize,
    pub loaded: usize,
    pub active: usize,
    pub error: usize,
}

/// Sliding-window activation manager
///
/// # Example
///
/// ```
/// use carousel_core::SlidingWindowManager;
///
/// let mut window = SlidingWindowManager::new(10, 2, 0);
/// assert_eq!(window.window_indices(), vec![0, 1, 2]);
///
/// let delta = window.update_active_index(5);
/// assert_eq!(window.window_indices(), vec![3, 4, 5, 6, 7]);
/// assert_eq!(delta.left, vec![0, 1, 2]);
/// ```
#[derive(Debug, Clone)]
pub struct SlidingWindowManager {
    slides: Vec<SlideInfo>,
    radius: usize,
    active: usize,
    direction: Direction,
}

impl SlidingWindowManager {
    /// Create a manager for `total` slides
    ///
    /// Every slide starts uninitialized. An `initial` index past the end is
    /// clamped to the last slide.
    pub fn new(total: usize, radius: usize, initial: usize) -> Self {
        let active = initial.min(total.saturating_sub(1));
        let slides = (0..total)
            .map(|index| SlideInfo {
                index,
                state: SlideState::Uninitialized,
                sprite: None,
                in_window: false,
                last_active: None,
            })
            .collect();
        let mut manager = Self {
            slides,
            radius,
            active,
            direction: Direction::Forward,
        };
        manager.refresh_in_window();
        manager
    }

    /// Number of slides
    pub fn total(&self) -> usize {
        self.slides.len()
    }

    /// Window radius
    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Current slide index
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Last navigation direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn bounds(&self) -> Option<(usize, usize)> {
        let last = self.slides.len().checked_sub(1)?;
        Some((
            self.active.saturating_sub(self.radius),
            self.active.saturating_add(self.radius).min(last),
        ))
    }

    /// `[max(0, active - R), min(total - 1, active + R)]`
    pub fn window_indices(&self) -> Vec<usize> {
        self.bounds()
            .map(|(lo, hi)| (lo..=hi).collect())
            .unwrap_or_default()
    }

    /// The window plus one slide past its edge in the navigation direction
    pub fn extended_window_indices(&self) -> Vec<usize> {
        let Some((lo, hi)) = self.bounds() else {
            return Vec::new();
        };
        let (lo, hi) = match self.direction {
            Direction::Forward if hi + 1 < self.slides.len() => (lo, hi + 1),
            Direction::Backward if lo > 0 => (lo - 1, hi),
            _ => (lo, hi),
        };
        (lo..=hi).collect()
    }

    /// Make `index` the current slide
    ///
    /// Out-of-range indices (negative or `>= total`) are logged and leave
    /// the state untouched.
    pub fn update_active_index(&mut self, index: isize) -> WindowDelta {
        let index = match usize::try_from(index) {
            Ok(index) if index < self.slides.len() => index,
            _ => {
                tracing::warn!(index, total = self.slides.len(), "slide index out of range");
                return WindowDelta::default();
            }
        };

        let before: BTreeSet<usize> = self.window_indices().into_iter().collect();
        let previous = self.active;

        self.direction = Direction::between(previous, index);
        if previous != index {
            self.slides[previous].state = SlideState::Loaded;
        }
        self.active = index;
        let slide = &mut self.slides[index];
        slide.state = SlideState::Active;
        slide.last_active = Some(Instant::now());
        self.refresh_in_window();

        let after: BTreeSet<usize> = self.window_indices().into_iter().collect();
        let delta = WindowDelta {
            entered: after.difference(&before).copied().collect(),
            left: before.difference(&after).copied().collect(),
        };
        tracing::debug!(
            from = previous,
            to = index,
            entered = ?delta.entered,
            left = ?delta.left,
            "active slide changed"
        );
        delta
    }

    /// Next slide in the navigation direction, if any
    pub fn predicted_next(&self) -> Option<usize> {
        match self.direction {
            Direction::Forward => Some(self.active + 1).filter(|&i| i < self.slides.len()),
            Direction::Backward => self.active.checked_sub(1),
            Direction::Still => None,
        }
    }

    /// Extended-window slides still uninitialized
    pub fn slides_to_initialize(&self) -> Vec<usize> {
        self.extended_window_indices()
            .into_iter()
            .filter(|&i| self.slides[i].state == SlideState::Uninitialized)
            .collect()
    }

    /// Window slides holding only a placeholder
    pub fn slides_to_load(&self) -> Vec<usize> {
        self.window_indices()
            .into_iter()
            .filter(|&i| self.slides[i].state == SlideState::Placeholder)
            .collect()
    }

    /// Out-of-window slides that still hold content
    pub fn slides_to_unload(&self) -> Vec<usize> {
        self.slides
            .iter()
            .filter(|slide| {
                !slide.in_window && matches!(slide.state, SlideState::Loaded | SlideState::Active)
            })
            .map(|slide| slide.index)
            .collect()
    }

    /// Change the radius; `in_window` is recomputed immediately
    pub fn set_window_size(&mut self, radius: usize) {
        self.radius = radius;
        self.refresh_in_window();
    }

    /// Attach a sprite and state to a slide
    ///
    /// Registering the active index always stores `Active`.
    pub fn register_slide(
        &mut self,
        index: usize,
        sprite: Option<DisplayObjectId>,
        state: SlideState,
    ) -> bool {
        let active = self.active;
        let Some(slide) = self.slides.get_mut(index) else {
            tracing::warn!(index, "register_slide: index out of range");
            return false;
        };
        slide.sprite = sprite;
        slide.state = if index == active {
            SlideState::Active
        } else {
            state
        };
        true
    }

    /// Set a slide's state
    ///
    /// `Active` is only accepted for the current slide; elsewhere it is
    /// stored as `Loaded`.
    pub fn set_slide_state(&mut self, index: usize, state: SlideState) -> bool {
        let active = self.active;
        let Some(slide) = self.slides.get_mut(index) else {
            return false;
        };
        slide.state = match state {
            SlideState::Active if index != active => SlideState::Loaded,
            other => other,
        };
        true
    }

    /// Record a load failure
    pub fn mark_error(&mut self, index: usize) -> bool {
        self.set_slide_state(index, SlideState::Error)
    }

    /// One slide
    pub fn slide(&self, index: usize) -> Option<&SlideInfo> {
        self.slides.get(index)
    }

    /// All slides in index order
    pub fn slides(&self) -> &[SlideInfo] {
        &self.slides
    }

    /// Counts by state
    pub fn stats(&self) -> WindowStats {
        let mut stats = WindowStats {
            total: self.slides.len(),
            ..Default::default()
        };
        for slide in &self.slides {
            if slide.in_window {
                stats.in_window += 1;
            }
            match slide.state {
                SlideState::Uninitialized => stats.uninitialized += 1,
                SlideState::Placeholder => stats.placeholder += 1,
                SlideState::Loaded => stats.loaded += 1,
                SlideState::Active => stats.active += 1,
                SlideState::Error => stats.error += 1,
            }
        }
        stats
    }

    fn refresh_in_window(&mut self) {
        let (active, radius) = (self.active, self.radius);
        for slide in &mut self.slides {
            slide.in_window = slide.index.abs_diff(active) <= radius;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_law() {
        let mut window = SlidingWindowManager::new(10, 2, 0);
        assert_eq!(window.window_indices(), vec![0, 1, 2]);

        let delta = window.update_active_index(5);
        assert_eq!(window.window_indices(), vec![3, 4, 5, 6, 7]);
        assert_eq!(delta.entered, vec![3, 4, 5, 6, 7]);
        assert_eq!(delta.left, vec![0, 1, 2]);
    }

    #[test]
    fn test_window_clamps_at_end() {
        let mut window = SlidingWindowManager::new(10, 2, 0);
        window.update_active_index(9);
        assert_eq!(window.window_indices(), vec![7, 8, 9]);
        assert_eq!(window.extended_window_indices(), vec![7, 8, 9]);
    }

    #[test]
    fn test_out_of_range_leaves_state_untouched() {
        let mut window = SlidingWindowManager::new(10, 2, 3);
        let before = window.slides().to_vec();

        assert!(window.update_active_index(-1).is_empty());
        assert!(window.update_active_index(10).is_empty());
        assert_eq!(window.active_index(), 3);
        assert_eq!(window.slides(), &before[..]);
        assert_eq!(window.direction(), Direction::Forward);
    }

    #[test]
    fn test_overlapping_move_delta() {
        let mut window = SlidingWindowManager::new(10, 2, 4);
        let delta = window.update_active_index(5);
        assert_eq!(delta.entered, vec![7]);
        assert_eq!(delta.left, vec![2]);

        // Same index: no change, no direction
        let delta = window.update_active_index(5);
        assert!(delta.is_empty());
        assert_eq!(window.direction(), Direction::Still);
        assert_eq!(window.slide(5).unwrap().state, SlideState::Active);
    }

    #[test]
    fn test_navigation_updates_states_and_direction() {
        let mut window = SlidingWindowManager::new(10, 2, 5);
        window.update_active_index(5);
        window.update_active_index(4);

        assert_eq!(window.direction(), Direction::Backward);
        assert_eq!(window.direction().signum(), -1);
        assert_eq!(window.slide(4).unwrap().state, SlideState::Active);
        assert!(window.slide(4).unwrap().last_active.is_some());
        assert_eq!(window.slide(5).unwrap().state, SlideState::Loaded);
        assert_eq!(window.stats().active, 1);
        assert_eq!(window.extended_window_indices(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(window.predicted_next(), Some(3));
    }

    #[test]
    fn test_at_most_one_active() {
        let mut window = SlidingWindowManager::new(6, 1, 0);
        for index in [1, 2, 3, 2, 5] {
            window.update_active_index(index);
            assert_eq!(window.stats().active, 1);
        }
        assert!(window.set_slide_state(1, SlideState::Active));
        assert_eq!(window.slide(1).unwrap().state, SlideState::Loaded);
        assert_eq!(window.stats().active, 1);
    }

    #[test]
    fn test_twenty_slide_session() {
        let mut window = SlidingWindowManager::new(20, 2, 0);
        assert_eq!(window.slides_to_initialize(), vec![0, 1, 2, 3]);

        for index in window.slides_to_initialize() {
            window.register_slide(index, None, SlideState::Loaded);
        }

        for step in 1..=10 {
            let delta = window.update_active_index(step as isize);
            assert_eq!(window.slide(step - 1).unwrap().state, SlideState::Loaded);
            assert_eq!(window.slide(step).unwrap().state, SlideState::Active);
            assert_eq!(window.stats().active, 1);

            let lo = step.saturating_sub(2);
            assert_eq!(window.window_indices(), (lo..=step + 2).collect::<Vec<_>>());
            if step > 2 {
                assert_eq!(delta.left, vec![step - 3]);
                assert!(!window.slide(step - 3).unwrap().in_window);
            }
            for index in delta.entered {
                window.register_slide(index, None, SlideState::Loaded);
            }
        }

        assert_eq!(window.slides_to_unload(), (0..=7).collect::<Vec<_>>());
        assert_eq!(window.stats().in_window, 5);
    }

    #[test]
    fn test_load_and_unload_lists() {
        let mut window = SlidingWindowManager::new(10, 1, 0);
        window.register_slide(0, None, SlideState::Loaded);
        window.register_slide(1, None, SlideState::Placeholder);
        window.register_slide(2, None, SlideState::Placeholder);
        assert_eq!(window.slide(0).unwrap().state, SlideState::Active);
        assert_eq!(window.slides_to_load(), vec![1]);

        window.update_active_index(2);
        assert_eq!(window.slides_to_load(), vec![1]);
        assert_eq!(window.slides_to_unload(), vec![0]);
        assert_eq!(window.slides_to_initialize(), vec![3, 4]);
    }

    #[test]
    fn test_radius_change_recomputes_window() {
        let mut window = SlidingWindowManager::new(10, 2, 5);
        window.set_window_size(0);
        assert_eq!(window.window_indices(), vec![5]);
        assert!(!window.slide(4).unwrap().in_window);

        window.set_window_size(3);
        assert!(window.slide(2).unwrap().in_window);
        assert!(!window.slide(1).unwrap().in_window);
    }

    #[test]
    fn test_mark_error() {
        let mut window = SlidingWindowManager::new(3, 2, 0);
        assert!(window.mark_error(2));
        assert_eq!(window.slide(2).unwrap().state, SlideState::Error);
        assert!(!window.mark_error(3));
        assert_eq!(window.stats().error, 1);
    }

    #[test]
    fn test_empty_carousel() {
        let mut window = SlidingWindowManager::new(0, 2, 0);
        assert!(window.window_indices().is_empty());
        assert!(window.slides_to_initialize().is_empty());
        assert!(window.update_active_index(0).is_empty());
    }
}
