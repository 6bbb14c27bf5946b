//! Per-instance resource registry
//!
//! One [`ResourceManager`] is created per mounted slider. It owns the strong
//! references to every engine handle the slider creates and tears them down
//! in a fixed order on unmount.

use crate::config::{LogLevel, ResourceConfig};
use crate::diagnostics::FilterDiagnostics;
use crate::filter;
use crate::handle::{
    Animation, AnimationId, AppId, DestroyOptions, DisplayObject, DisplayObjectId, EventListener,
    Filter, FilterId, HandleError, ListenerId, RenderApp, Texture, Timer, TimerId,
};
use crate::metrics::{BatchStats, OperationMetrics};
use crate::shader::{ShaderPoolStats, ShaderResourceManager};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Emit a tracing event at the configured level
macro_rules! op_log {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Off => {}
            LogLevel::Error => tracing::error!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Trace => tracing::trace!($($arg)+),
        }
    };
}

struct TextureEntry {
    texture: Arc<dyn Texture>,
    ref_count: i64,
    last_used: Instant,
}

struct DisplayEntry {
    object: Arc<dyn DisplayObject>,
    filters: Vec<FilterId>,
}

#[derive(Default)]
struct ManagerState {
    textures: BTreeMap<String, TextureEntry>,
    filters: BTreeMap<FilterId, Arc<dyn Filter>>,
    display_objects: BTreeMap<DisplayObjectId, DisplayEntry>,
    animations: BTreeMap<AnimationId, Arc<dyn Animation>>,
    apps: BTreeMap<AppId, Arc<dyn RenderApp>>,
    timers: BTreeMap<TimerId, Arc<dyn Timer>>,
    listeners: BTreeMap<ListenerId, Arc<dyn EventListener>>,
    batch: BatchStats,
    unmounting: bool,
    disposing: bool,
    disposed: bool,
    last_cleanup: Option<Instant>,
}

impl ManagerState {
    fn accepting(&self) -> bool {
        !self.disposed && !self.disposing && !self.unmounting
    }
}

/// What an auto-cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub textures: usize,
    pub animations: usize,
}

/// Resource counts and metrics
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub textures: usize,
    /// Sum of texture reference counts
    pub texture_references: i64,
    pub filters: usize,
    pub display_objects: usize,
    pub animations: usize,
    pub apps: usize,
    pub timers: usize,
    pub listeners: usize,
    pub active: bool,
    pub disposed: bool,
    pub batch: BatchStats,
    /// Present when metrics are enabled
    pub operations: Option<OperationMetrics>,
    pub shaders: ShaderPoolStats,
}

/// Ownership registry for one slider instance
///
/// Every tracking call becomes a no-op once the manager is unmounting or
/// disposed. Engine handles are never called while the registry lock is
/// held.
///
/// # Example
///
/// ```no_run
/// use carousel_resources::{ResourceConfig, ResourceManager, ShaderResourceManager};
/// use std::sync::Arc;
///
/// let shaders = Arc::new(ShaderResourceManager::default());
/// let resources = ResourceManager::new(ResourceConfig::default(), shaders);
///
/// // let texture = resources.track_texture("slides/1.jpg", loaded_texture);
/// // ... slider runs ...
/// resources.dispose();
/// assert!(resources.is_disposed());
/// ```
pub struct ResourceManager {
    state: Mutex<ManagerState>,
    metrics: Mutex<OperationMetrics>,
    shaders: Arc<ShaderResourceManager>,
    config: ResourceConfig,
}

impl ResourceManager {
    /// Create a manager bound to a shared shader pool
    pub fn new(config: ResourceConfig, shaders: Arc<ShaderResourceManager>) -> Self {
        Self {
            state: Mutex::new(ManagerState::default()),
            metrics: Mutex::new(OperationMetrics::default()),
            shaders,
            config,
        }
    }

    /// Configuration
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Shared shader pool
    pub fn shaders(&self) -> &Arc<ShaderResourceManager> {
        &self.shaders
    }

    fn timed<R>(&self, operation: &'static str, f: impl FnOnce() -> R) -> R {
        if !self.config.enable_metrics {
            return f();
        }
        let started = Instant::now();
        let result = f();
        self.metrics.lock().record(operation, started.elapsed());
        result
    }

    fn report(&self, what: &str, result: Result<(), HandleError>) {
        if let Err(err) = result {
            tracing::warn!(%err, "failed to destroy {what}");
        }
    }

    // --- Textures -------------------------------------------------------

    /// Track a texture under `key`
    ///
    /// Increments the reference count if the key is already tracked. The
    /// texture is returned unchanged.
    pub fn track_texture<T: Texture + 'static>(&self, key: impl Into<String>, texture: Arc<T>) -> Arc<T> {
        self.track_texture_handle(key, texture.clone());
        texture
    }

    /// Track an already type-erased texture
    ///
    /// Returns the new reference count, or `None` when tracking is refused.
    pub fn track_texture_handle(&self, key: impl Into<String>, texture: Arc<dyn Texture>) -> Option<i64> {
        let key = key.into();
        self.timed("track_texture", || {
            let mut state = self.state.lock();
            if !state.accepting() {
                return None;
            }
            let ref_count = insert_texture(&mut state, key.clone(), texture);
            op_log!(self.config.log_level, %key, ref_count, "texture tracked");
            Some(ref_count)
        })
    }

    /// Track several textures in one call
    ///
    /// Returns the number of entries tracked.
    pub fn track_texture_batch<I>(&self, textures: I) -> usize
    where
        I: IntoIterator<Item = (String, Arc<dyn Texture>)>,
    {
        self.timed("track_texture_batch", || {
            let mut state = self.state.lock();
            if !state.accepting() {
                return 0;
            }
            let mut count = 0;
            for (key, texture) in textures {
                insert_texture(&mut state, key, texture);
                count += 1;
            }
            state.batch.record(count);
            op_log!(self.config.log_level, count, "texture batch tracked");
            count
        })
    }

    /// Drop one reference to a texture
    ///
    /// The texture is destroyed once its count reaches zero. Returns `true`
    /// if it was destroyed.
    pub fn release_texture(&self, key: &str) -> bool {
        self.timed("release_texture", || {
            let removed = {
                let mut state = self.state.lock();
                let Some(entry) = state.textures.get_mut(key) else {
                    return false;
                };
                entry.ref_count -= 1;
                entry.last_used = Instant::now();
                if entry.ref_count > 0 {
                    op_log!(self.config.log_level, key, ref_count = entry.ref_count, "texture released");
                    return false;
                }
                state.textures.remove(key)
            };

            match removed {
                Some(entry) => {
                    self.report("texture", entry.texture.destroy());
                    op_log!(self.config.log_level, key, "texture destroyed");
                    true
                }
                None => false,
            }
        })
    }

    /// Current reference count for a texture
    pub fn texture_ref_count(&self, key: &str) -> Option<i64> {
        self.state.lock().textures.get(key).map(|entry| entry.ref_count)
    }

    /// Whether a texture is tracked under `key`
    pub fn has_texture(&self, key: &str) -> bool {
        self.state.lock().textures.contains_key(key)
    }

    // --- Filters --------------------------------------------------------

    /// Track a filter and register its shader program with the pool
    pub fn track_filter(&self, filter: Arc<dyn Filter>) -> Option<FilterId> {
        self.timed("track_filter", || {
            let filter_id = {
                let mut state = self.state.lock();
                if !state.accepting() {
                    return None;
                }
                let filter_id = FilterId::next();
                state.filters.insert(filter_id, filter.clone());
                filter_id
            };
            self.register_shader(filter_id, filter.as_ref());
            op_log!(self.config.log_level, %filter_id, kind = %filter.kind(), "filter tracked");
            Some(filter_id)
        })
    }

    /// Track several filters in one call
    pub fn track_filter_batch(&self, filters: Vec<Arc<dyn Filter>>) -> Vec<FilterId> {
        self.timed("track_filter_batch", || {
            let tracked: Vec<(FilterId, Arc<dyn Filter>)> = {
                let mut state = self.state.lock();
                if !state.accepting() {
                    return Vec::new();
                }
                let tracked: Vec<_> = filters
                    .into_iter()
                    .map(|filter| {
                        let filter_id = FilterId::next();
                        state.filters.insert(filter_id, filter.clone());
                        (filter_id, filter)
                    })
                    .collect();
                state.batch.record(tracked.len());
                tracked
            };
            for (filter_id, filter) in &tracked {
                self.register_shader(*filter_id, filter.as_ref());
            }
            op_log!(self.config.log_level, count = tracked.len(), "filter batch tracked");
            tracked.into_iter().map(|(filter_id, _)| filter_id).collect()
        })
    }

    fn register_shader(&self, filter_id: FilterId, filter: &dyn Filter) {
        if let Some(key) = filter.shader_key() {
            self.shaders.get_shader_program(&key, filter_id, filter);
        } else if let Some((vertex, fragment)) = filter.shader_sources() {
            self.shaders
                .get_shader_program_for_sources(&vertex, &fragment, filter_id, filter);
        }
    }

    /// Release a filter's shader reference and destroy it
    pub fn release_filter(&self, filter_id: FilterId) -> bool {
        self.timed("release_filter", || {
            let removed = {
                let mut state = self.state.lock();
                let removed = state.filters.remove(&filter_id);
                if removed.is_some() {
                    for entry in state.display_objects.values_mut() {
                        entry.filters.retain(|id| *id != filter_id);
                    }
                }
                removed
            };
            let Some(filter) = removed else {
                return false;
            };
            self.shaders.release_shader(filter_id);
            self.report("filter", filter.destroy());
            op_log!(self.config.log_level, %filter_id, "filter released");
            true
        })
    }

    /// Neutralize a filter's effect knobs
    ///
    /// Returns the number of knobs written; unknown kinds write none.
    pub fn disable_filter(&self, filter: &dyn Filter) -> usize {
        filter::disable_filter(filter)
    }

    // --- Display objects ------------------------------------------------

    /// Track a display object
    pub fn track_display_object(&self, object: Arc<dyn DisplayObject>) -> Option<DisplayObjectId> {
        self.timed("track_display_object", || {
            let mut state = self.state.lock();
            if !state.accepting() {
                return None;
            }
            let id = DisplayObjectId::next();
            state.display_objects.insert(
                id,
                DisplayEntry {
                    object,
                    filters: Vec::new(),
                },
            );
            op_log!(self.config.log_level, %id, "display object tracked");
            Some(id)
        })
    }

    /// Track several display objects in one call
    pub fn track_display_object_batch(
        &self,
        objects: Vec<Arc<dyn DisplayObject>>,
    ) -> Vec<DisplayObjectId> {
        self.timed("track_display_object_batch", || {
            let mut state = self.state.lock();
            if !state.accepting() {
                return Vec::new();
            }
            let ids: Vec<DisplayObjectId> = objects
                .into_iter()
                .map(|object| {
                    let id = DisplayObjectId::next();
                    state.display_objects.insert(
                        id,
                        DisplayEntry {
                            object,
                            filters: Vec::new(),
                        },
                    );
                    id
                })
                .collect();
            state.batch.record(ids.len());
            op_log!(self.config.log_level, count = ids.len(), "display object batch tracked");
            ids
        })
    }

    /// Record that tracked filters are attached to a display object
    ///
    /// Untracked filter ids are ignored. Returns `false` if the display
    /// object is not tracked.
    pub fn attach_filters(&self, object: DisplayObjectId, filters: &[FilterId]) -> bool {
        let mut state = self.state.lock();
        let known: Vec<FilterId> = filters
            .iter()
            .copied()
            .filter(|id| state.filters.contains_key(id))
            .collect();
        let Some(entry) = state.display_objects.get_mut(&object) else {
            return false;
        };
        for filter_id in known {
            if !entry.filters.contains(&filter_id) {
                entry.filters.push(filter_id);
            }
        }
        true
    }

    /// Detach, release its filters and destroy one display object
    pub fn release_display_object(&self, id: DisplayObjectId) -> bool {
        self.timed("release_display_object", || {
            let (entry, filters) = {
                let mut state = self.state.lock();
                let Some(entry) = state.display_objects.remove(&id) else {
                    return false;
                };
                let filters: Vec<(FilterId, Arc<dyn Filter>)> = entry
                    .filters
                    .iter()
                    .filter_map(|fid| state.filters.remove(fid).map(|f| (*fid, f)))
                    .collect();
                (entry, filters)
            };
            self.destroy_display_object(&entry, filters);
            op_log!(self.config.log_level, %id, "display object released");
            true
        })
    }

    fn destroy_display_object(&self, entry: &DisplayEntry, filters: Vec<(FilterId, Arc<dyn Filter>)>) {
        self.report("display object parent link", entry.object.remove_from_parent());
        for (filter_id, filter) in filters {
            self.shaders.release_shader(filter_id);
            self.report("filter", filter.destroy());
        }
        self.report("display object", entry.object.destroy(DestroyOptions::KEEP_TEXTURES));
    }

    // --- Animations, apps, timers, listeners ----------------------------

    /// Track an animation
    ///
    /// A refused animation is killed immediately.
    pub fn track_animation(&self, animation: Arc<dyn Animation>) -> Option<AnimationId> {
        self.timed("track_animation", || {
            let refused = {
                let mut state = self.state.lock();
                if state.accepting() {
                    let id = AnimationId::next();
                    state.animations.insert(id, animation.clone());
                    op_log!(self.config.log_level, %id, "animation tracked");
                    return Some(id);
                }
                animation
            };
            refused.kill();
            None
        })
    }

    /// Track several animations in one call
    pub fn track_animation_batch(&self, animations: Vec<Arc<dyn Animation>>) -> Vec<AnimationId> {
        self.timed("track_animation_batch", || {
            let refused = {
                let mut state = self.state.lock();
                if state.accepting() {
                    let ids: Vec<AnimationId> = animations
                        .into_iter()
                        .map(|animation| {
                            let id = AnimationId::next();
                            state.animations.insert(id, animation);
                            id
                        })
                        .collect();
                    state.batch.record(ids.len());
                    op_log!(self.config.log_level, count = ids.len(), "animation batch tracked");
                    return ids;
                }
                animations
            };
            for animation in refused {
                animation.kill();
            }
            Vec::new()
        })
    }

    /// Kill and forget an animation
    pub fn release_animation(&self, id: AnimationId) -> bool {
        let removed = self.state.lock().animations.remove(&id);
        match removed {
            Some(animation) => {
                animation.kill();
                op_log!(self.config.log_level, %id, "animation released");
                true
            }
            None => false,
        }
    }

    /// Track an application instance
    pub fn track_app(&self, app: Arc<dyn RenderApp>) -> Option<AppId> {
        self.timed("track_app", || {
            let mut state = self.state.lock();
            if !state.accepting() {
                return None;
            }
            let id = AppId::next();
            state.apps.insert(id, app);
            op_log!(self.config.log_level, %id, "app tracked");
            Some(id)
        })
    }

    /// Track a timer
    pub fn track_timer(&self, timer: Arc<dyn Timer>) -> Option<TimerId> {
        let mut state = self.state.lock();
        if !state.accepting() {
            return None;
        }
        let id = TimerId::next();
        state.timers.insert(id, timer);
        op_log!(self.config.log_level, %id, "timer tracked");
        Some(id)
    }

    /// Track an event listener
    pub fn track_listener(&self, listener: Arc<dyn EventListener>) -> Option<ListenerId> {
        let mut state = self.state.lock();
        if !state.accepting() {
            return None;
        }
        let id = ListenerId::next();
        state.listeners.insert(id, listener);
        op_log!(self.config.log_level, %id, "listener tracked");
        Some(id)
    }

    // --- Lifecycle ------------------------------------------------------

    /// Refuse new tracking; disposal is still allowed
    pub fn mark_unmounting(&self) {
        self.state.lock().unmounting = true;
        op_log!(self.config.log_level, "resource manager unmounting");
    }

    /// `!disposed && !unmounting`
    pub fn is_active(&self) -> bool {
        self.state.lock().accepting()
    }

    /// Whether `dispose` has completed
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Tear everything down
    ///
    /// Order: animations, listeners, apps, filter neutralization on display
    /// objects, display objects (with their filters), unattached filters,
    /// textures, timers, shader-pool references. Calling it again is a
    /// no-op.
    pub fn dispose(&self) {
        let started = Instant::now();
        let taken = {
            let mut state = self.state.lock();
            if state.disposed || state.disposing {
                return;
            }
            let taken = std::mem::take(&mut *state);
            // Keep counters and flags visible while tearing down
            state.batch = taken.batch;
            state.unmounting = taken.unmounting;
            state.disposing = true;
            taken
        };

        let ManagerState {
            textures,
            mut filters,
            display_objects,
            animations,
            apps,
            timers,
            listeners,
            ..
        } = taken;

        for animation in animations.values() {
            animation.kill();
        }

        for listener in listeners.values() {
            listener.remove();
        }

        for app in apps.values() {
            self.report("app", app.destroy(DestroyOptions::KEEP_TEXTURES));
        }

        for entry in display_objects.values() {
            for filter_id in &entry.filters {
                if let Some(filter) = filters.get(filter_id) {
                    filter::disable_filter(filter.as_ref());
                }
            }
        }

        for entry in display_objects.values() {
            let attached: Vec<(FilterId, Arc<dyn Filter>)> = entry
                .filters
                .iter()
                .filter_map(|fid| filters.remove(fid).map(|f| (*fid, f)))
                .collect();
            self.destroy_display_object(entry, attached);
        }

        for filter in filters.values() {
            self.report("filter", filter.destroy());
        }

        for (key, entry) in &textures {
            if let Err(err) = entry.texture.destroy() {
                tracing::warn!(%key, %err, "failed to destroy texture");
            }
        }

        for timer in timers.values() {
            timer.clear();
        }

        for filter_id in filters.keys() {
            self.shaders.release_shader(*filter_id);
        }

        {
            let mut state = self.state.lock();
            state.disposing = false;
            state.disposed = true;
        }

        if self.config.enable_metrics {
            self.metrics.lock().record("dispose", started.elapsed());
        }
        op_log!(
            self.config.log_level,
            textures = textures.len(),
            display_objects = display_objects.len(),
            animations = animations.len(),
            "resource manager disposed"
        );
    }

    /// Run auto-cleanup if the configured interval has elapsed
    ///
    /// Returns `None` when cleanup is disabled, not due, or the manager is
    /// inactive. The first call only arms the clock.
    pub fn tick(&self, now: Instant) -> Option<CleanupReport> {
        let interval = self.config.auto_cleanup_interval?;
        {
            let mut state = self.state.lock();
            if !state.accepting() {
                return None;
            }
            let last = *state.last_cleanup.get_or_insert(now);
            if now.saturating_duration_since(last) < interval {
                return None;
            }
            state.last_cleanup = Some(now);
        }
        Some(self.run_cleanup())
    }

    /// Release textures with a count of zero or less and forget animations
    /// that report inactive
    pub fn run_cleanup(&self) -> CleanupReport {
        self.timed("cleanup", || {
            let (stale, animations) = {
                let mut state = self.state.lock();
                let stale_keys: Vec<String> = state
                    .textures
                    .iter()
                    .filter(|(_, entry)| entry.ref_count <= 0)
                    .map(|(key, _)| key.clone())
                    .collect();
                let stale: Vec<TextureEntry> = stale_keys
                    .iter()
                    .filter_map(|key| state.textures.remove(key))
                    .collect();
                let animations: Vec<(AnimationId, Arc<dyn Animation>)> = state
                    .animations
                    .iter()
                    .map(|(id, animation)| (*id, animation.clone()))
                    .collect();
                (stale, animations)
            };

            for entry in &stale {
                self.report("texture", entry.texture.destroy());
            }

            let finished: Vec<AnimationId> = animations
                .into_iter()
                .filter(|(_, animation)| !animation.is_active())
                .map(|(id, _)| id)
                .collect();
            {
                let mut state = self.state.lock();
                for id in &finished {
                    state.animations.remove(id);
                }
            }

            let report = CleanupReport {
                textures: stale.len(),
                animations: finished.len(),
            };
            if report != CleanupReport::default() {
                op_log!(
                    self.config.log_level,
                    textures = report.textures,
                    animations = report.animations,
                    "auto-cleanup"
                );
            }
            report
        })
    }

    // --- Reporting ------------------------------------------------------

    /// Resource counts, metrics and shader-pool stats
    pub fn stats(&self) -> ResourceStats {
        let operations = self
            .config
            .enable_metrics
            .then(|| self.metrics.lock().clone());
        let state = self.state.lock();
        ResourceStats {
            textures: state.textures.len(),
            texture_references: state.textures.values().map(|e| e.ref_count).sum(),
            filters: state.filters.len(),
            display_objects: state.display_objects.len(),
            animations: state.animations.len(),
            apps: state.apps.len(),
            timers: state.timers.len(),
            listeners: state.listeners.len(),
            active: state.accepting(),
            disposed: state.disposed,
            batch: state.batch,
            operations,
            shaders: self.shaders.stats(),
        }
    }

    /// Filter counts by kind and optimization candidates
    pub fn run_filter_diagnostics(&self) -> FilterDiagnostics {
        let filters: Vec<(FilterId, Arc<dyn Filter>)> = self
            .state
            .lock()
            .filters
            .iter()
            .map(|(id, filter)| (*id, filter.clone()))
            .collect();
        FilterDiagnostics::collect(filters.iter().map(|(id, filter)| (*id, filter.as_ref())))
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn insert_texture(state: &mut ManagerState, key: String, texture: Arc<dyn Texture>) -> i64 {
    let now = Instant::now();
    let entry = state.textures.entry(key).or_insert_with(|| TextureEntry {
        texture,
        ref_count: 0,
        last_used: now,
    });
    entry.ref_count += 1;
    entry.last_used = now;
    entry.ref_count
}
