//! Runtime context and mounted slider instances
//!
//! The context owns what is shared between sliders (configuration and the
//! shader pool). Each [`SliderInstance`] owns its own registry, scheduler,
//! animation coordinator, atlas cache and slide window.

use crate::animation::{AnimationCoordinator, AnimationEngine, CoordinatorStats};
use crate::atlas::{AssetLoader, AtlasManager};
use crate::config::CarouselConfig;
use crate::window::{SlideState, SlidingWindowManager, WindowDelta, WindowStats};
use carousel_resources::{DisplayObject, DisplayObjectId, ResourceManager, ResourceStats, ShaderResourceManager};
use carousel_scheduler::{FrameOutcome, FrameRequester, PerformanceMetrics, RenderScheduler, SchedulerStats};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Shared runtime state
pub struct RuntimeContext {
    config: CarouselConfig,
    shaders: Arc<ShaderResourceManager>,
}

impl RuntimeContext {
    pub fn new(config: CarouselConfig) -> Self {
        let shaders = Arc::new(ShaderResourceManager::new(config.shader_pool_config()));
        Self { config, shaders }
    }

    pub fn config(&self) -> &CarouselConfig {
        &self.config
    }

    pub fn shaders(&self) -> &Arc<ShaderResourceManager> {
        &self.shaders
    }

    /// Mount a slider with `total_slides` slides, starting at `initial`
    pub fn mount(
        &self,
        total_slides: usize,
        initial: usize,
        engine: Arc<dyn AnimationEngine>,
        loader: Arc<dyn AssetLoader>,
    ) -> SliderInstance {
        let resources = Arc::new(ResourceManager::new(
            self.config.resource_config(),
            self.shaders.clone(),
        ));
        let scheduler = Arc::new(RenderScheduler::new(self.config.throttle_config()));
        let animations = AnimationCoordinator::with_runtime(
            engine,
            self.config.animation,
            scheduler.clone(),
            resources.clone(),
        );
        let atlas = AtlasManager::new(loader, resources.clone());
        let window = SlidingWindowManager::new(total_slides, self.config.window.radius, initial);
        tracing::info!(total_slides, initial, radius = self.config.window.radius, "slider mounted");

        SliderInstance {
            resources,
            scheduler,
            animations,
            atlas,
            window: Mutex::new(window),
        }
    }

    /// Drop every pooled shader program
    ///
    /// For test isolation; sliders mounted earlier keep their filters but
    /// lose their pool references.
    pub fn reset(&self) {
        self.shaders.reset();
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(CarouselConfig::default())
    }
}

/// Result of a navigation step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Navigation {
    pub delta: WindowDelta,
    /// Slides whose sprites were released
    pub evicted: Vec<usize>,
}

/// Aggregated stats for one slider
#[derive(Debug, Clone, Serialize)]
pub struct SliderStats {
    pub resources: ResourceStats,
    pub scheduler: SchedulerStats,
    pub performance: PerformanceMetrics,
    pub animations: CoordinatorStats,
    pub window: WindowStats,
    pub atlases: usize,
    pub cached_textures: usize,
}

/// One mounted slider
pub struct SliderInstance {
    resources: Arc<ResourceManager>,
    scheduler: Arc<RenderScheduler>,
    animations: AnimationCoordinator,
    atlas: AtlasManager,
    window: Mutex<SlidingWindowManager>,
}

impl SliderInstance {
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn scheduler(&self) -> &Arc<RenderScheduler> {
        &self.scheduler
    }

    pub fn animations(&self) -> &AnimationCoordinator {
        &self.animations
    }

    pub fn atlas(&self) -> &AtlasManager {
        &self.atlas
    }

    /// Connect the host's per-frame callback
    pub fn set_frame_requester(&self, requester: Arc<dyn FrameRequester>) {
        self.scheduler.set_frame_requester(Some(requester));
    }

    /// Run `f` against the slide window
    pub fn with_window<R>(&self, f: impl FnOnce(&mut SlidingWindowManager) -> R) -> R {
        f(&mut self.window.lock())
    }

    /// Track a slide sprite and register it in the window
    pub fn register_slide(
        &self,
        index: usize,
        sprite: Arc<dyn DisplayObject>,
        state: SlideState,
    ) -> Option<DisplayObjectId> {
        if index >= self.window.lock().total() {
            tracing::warn!(index, "register_slide: index out of range");
            return None;
        }
        let id = self.resources.track_display_object(sprite)?;
        let previous = {
            let mut window = self.window.lock();
            let previous = window.slide(index).and_then(|slide| slide.sprite);
            window.register_slide(index, Some(id), state);
            previous
        };
        if let Some(previous) = previous.filter(|previous| *previous != id) {
            self.resources.release_display_object(previous);
        }
        Some(id)
    }

    /// Move to `index` and release sprites of slides that left the window
    ///
    /// Out-of-range indices and calls after unmount return an empty
    /// navigation.
    pub fn navigate(&self, index: isize) -> Navigation {
        if !self.resources.is_active() {
            return Navigation::default();
        }
        let delta = self.window.lock().update_active_index(index);
        if delta.is_empty() {
            return Navigation {
                delta,
                evicted: Vec::new(),
            };
        }
        let evicted = self.evict_out_of_window();
        tracing::debug!(index, entered = ?delta.entered, left = ?delta.left, "navigated");
        Navigation { delta, evicted }
    }

    /// Release sprites of every loaded slide outside the window
    ///
    /// Evicted slides return to `Uninitialized`.
    pub fn evict_out_of_window(&self) -> Vec<usize> {
        let sprites: Vec<(usize, Option<DisplayObjectId>)> = {
            let mut window = self.window.lock();
            window
                .slides_to_unload()
                .into_iter()
                .map(|index| {
                    let sprite = window.slide(index).and_then(|slide| slide.sprite);
                    window.register_slide(index, None, SlideState::Uninitialized);
                    (index, sprite)
                })
                .collect()
        };
        for sprite in sprites.iter().filter_map(|(_, sprite)| *sprite) {
            self.resources.release_display_object(sprite);
        }
        sprites.into_iter().map(|(index, _)| index).collect()
    }

    /// Per-frame host hook
    ///
    /// Drains the scheduler, flushes queued animation groups past their
    /// batch window and runs auto-cleanup when due.
    pub fn frame(&self, now: Instant) -> FrameOutcome {
        let outcome = self.scheduler.on_frame(now);
        self.animations.poll(now);
        self.resources.tick(now);
        outcome
    }

    pub fn is_mounted(&self) -> bool {
        self.resources.is_active()
    }

    /// Tear the slider down
    ///
    /// Order: refuse new tracking, cancel animation groups, drop pending
    /// updates, dispose the registry, forget cached atlases. Repeated calls
    /// are no-ops.
    pub fn unmount(&self) {
        if self.resources.is_disposed() {
            return;
        }
        self.resources.mark_unmounting();
        let cancelled = self.animations.cancel_all();
        let dropped = self.scheduler.clear();
        self.resources.dispose();
        self.atlas.clear();
        tracing::info!(cancelled, dropped, "slider unmounted");
    }

    pub fn stats(&self) -> SliderStats {
        SliderStats {
            resources: self.resources.stats(),
            scheduler: self.scheduler.stats(),
            performance: self.scheduler.performance_metrics(),
            animations: self.animations.stats(),
            window: self.window.lock().stats(),
            atlases: self.atlas.atlas_ids().len(),
            cached_textures: self.atlas.texture_count(),
        }
    }
}

impl Drop for SliderInstance {
    fn drop(&mut self) {
        self.unmount();
    }
}
