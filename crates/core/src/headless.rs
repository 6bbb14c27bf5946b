//! In-memory engine backend
//!
//! Implements every handle trait without a GPU. Used by the simulator and
//! by tests to observe teardown; all handles created from one backend share
//! a set of counters.

use crate::animation::{AnimationEngine, GroupCallback, Timeline};
use crate::atlas::AssetLoader;
use crate::error::LoadError;
use carousel_resources::{
    Animation, DestroyOptions, DisplayObject, EventListener, Filter, FilterKind, HandleError, Knob,
    ProgramHandle, RenderApp, Texture, Timer,
};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    textures_created: AtomicUsize,
    textures_destroyed: AtomicUsize,
    filters_destroyed: AtomicUsize,
    programs_compiled: AtomicUsize,
    sprites_detached: AtomicUsize,
    sprites_destroyed: AtomicUsize,
    apps_destroyed: AtomicUsize,
    tweens_killed: AtomicUsize,
    timelines_created: AtomicUsize,
    timelines_killed: AtomicUsize,
    timers_cleared: AtomicUsize,
    listeners_removed: AtomicUsize,
    loads: AtomicUsize,
    program_ids: AtomicU64,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeadlessReport {
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub filters_destroyed: usize,
    pub programs_compiled: usize,
    pub sprites_detached: usize,
    pub sprites_destroyed: usize,
    pub apps_destroyed: usize,
    pub tweens_killed: usize,
    pub timelines_created: usize,
    pub timelines_killed: usize,
    pub timers_cleared: usize,
    pub listeners_removed: usize,
    pub loads: usize,
}

/// Factory for headless handles
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    counters: Arc<Counters>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&self, width: u32, height: u32) -> Arc<HeadlessTexture> {
        bump(&self.counters.textures_created);
        Arc::new(HeadlessTexture {
            size: (width, height),
            destroyed: AtomicBool::new(false),
            counters: self.counters.clone(),
        })
    }

    /// Filter builder; wrap in an `Arc` once configured
    pub fn filter(&self, kind: FilterKind) -> HeadlessFilter {
        HeadlessFilter {
            kind,
            shader_key: None,
            sources: None,
            quality: None,
            resolution: None,
            fail_program: false,
            knobs: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            counters: self.counters.clone(),
        }
    }

    pub fn sprite(&self) -> Arc<HeadlessSprite> {
        Arc::new(HeadlessSprite {
            attached: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            counters: self.counters.clone(),
        })
    }

    pub fn app(&self) -> Arc<HeadlessApp> {
        Arc::new(HeadlessApp {
            destroyed: AtomicBool::new(false),
            counters: self.counters.clone(),
        })
    }

    pub fn tween(&self) -> Arc<HeadlessTween> {
        Arc::new(HeadlessTween {
            killed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            counters: self.counters.clone(),
        })
    }

    pub fn timer(&self) -> Arc<HeadlessTimer> {
        Arc::new(HeadlessTimer {
            cleared: AtomicBool::new(false),
            counters: self.counters.clone(),
        })
    }

    pub fn listener(&self) -> Arc<HeadlessListener> {
        Arc::new(HeadlessListener {
            removed: AtomicBool::new(false),
            counters: self.counters.clone(),
        })
    }

    pub fn engine(&self) -> HeadlessEngine {
        HeadlessEngine {
            timelines: Mutex::new(Vec::new()),
            counters: self.counters.clone(),
        }
    }

    pub fn loader(&self) -> HeadlessLoader {
        HeadlessLoader {
            assets: Mutex::new(HashMap::new()),
            backend: self.clone(),
        }
    }

    pub fn snapshot(&self) -> HeadlessReport {
        let c = &self.counters;
        let get = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        HeadlessReport {
            textures_created: get(&c.textures_created),
            textures_destroyed: get(&c.textures_destroyed),
            filters_destroyed: get(&c.filters_destroyed),
            programs_compiled: get(&c.programs_compiled),
            sprites_detached: get(&c.sprites_detached),
            sprites_destroyed: get(&c.sprites_destroyed),
            apps_destroyed: get(&c.apps_destroyed),
            tweens_killed: get(&c.tweens_killed),
            timelines_created: get(&c.timelines_created),
            timelines_killed: get(&c.timelines_killed),
            timers_cleared: get(&c.timers_cleared),
            listeners_removed: get(&c.listeners_removed),
            loads: get(&c.loads),
        }
    }
}

/// Destroy once; a second call reports `AlreadyDestroyed`
fn destroy_once(flag: &AtomicBool, counter: &AtomicUsize) -> Result<(), HandleError> {
    if flag.swap(true, Ordering::AcqRel) {
        return Err(HandleError::AlreadyDestroyed);
    }
    bump(counter);
    Ok(())
}

pub struct HeadlessTexture {
    size: (u32, u32),
    destroyed: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessTexture {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Texture for HeadlessTexture {
    fn destroy(&self) -> Result<(), HandleError> {
        destroy_once(&self.destroyed, &self.counters.textures_destroyed)
    }

    fn size(&self) -> Option<(u32, u32)> {
        Some(self.size)
    }
}

pub struct HeadlessFilter {
    kind: FilterKind,
    shader_key: Option<String>,
    sources: Option<(String, String)>,
    quality: Option<f64>,
    resolution: Option<f64>,
    fail_program: bool,
    knobs: Mutex<HashMap<Knob, f64>>,
    destroyed: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessFilter {
    pub fn with_shader_key(mut self, key: impl Into<String>) -> Self {
        self.shader_key = Some(key.into());
        self
    }

    pub fn with_sources(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.sources = Some((vertex.into(), fragment.into()));
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Program extraction fails
    pub fn without_program(mut self) -> Self {
        self.fail_program = true;
        self
    }

    /// Last value written to a knob
    pub fn knob(&self, knob: Knob) -> Option<f64> {
        self.knobs.lock().get(&knob).copied()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Filter for HeadlessFilter {
    fn kind(&self) -> FilterKind {
        self.kind.clone()
    }

    fn set_knob(&self, knob: Knob, value: f64) -> Result<(), HandleError> {
        if self.is_destroyed() {
            return Err(HandleError::AlreadyDestroyed);
        }
        if !self.kind.knobs().contains(&knob) && knob != Knob::Enabled {
            return Err(HandleError::UnsupportedKnob(knob));
        }
        self.knobs.lock().insert(knob, value);
        Ok(())
    }

    fn program(&self) -> Result<ProgramHandle, HandleError> {
        if self.fail_program {
            return Err(HandleError::ProgramUnavailable(self.kind.to_string()));
        }
        bump(&self.counters.programs_compiled);
        let id = self.counters.program_ids.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(ProgramHandle::new(id, self.kind.to_string()))
    }

    fn shader_key(&self) -> Option<String> {
        self.shader_key.clone()
    }

    fn shader_sources(&self) -> Option<(String, String)> {
        self.sources.clone()
    }

    fn quality(&self) -> Option<f64> {
        self.quality
    }

    fn resolution(&self) -> Option<f64> {
        self.resolution
    }

    fn is_enabled(&self) -> bool {
        self.knob(Knob::Enabled).map_or(true, |value| value != 0.0)
    }

    fn destroy(&self) -> Result<(), HandleError> {
        destroy_once(&self.destroyed, &self.counters.filters_destroyed)
    }
}

pub struct HeadlessSprite {
    attached: AtomicBool,
    destroyed: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessSprite {
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl DisplayObject for HeadlessSprite {
    fn remove_from_parent(&self) -> Result<(), HandleError> {
        if self.attached.swap(false, Ordering::AcqRel) {
            bump(&self.counters.sprites_detached);
        }
        Ok(())
    }

    fn destroy(&self, _options: DestroyOptions) -> Result<(), HandleError> {
        destroy_once(&self.destroyed, &self.counters.sprites_destroyed)
    }
}

pub struct HeadlessApp {
    destroyed: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessApp {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl RenderApp for HeadlessApp {
    fn destroy(&self, _options: DestroyOptions) -> Result<(), HandleError> {
        destroy_once(&self.destroyed, &self.counters.apps_destroyed)
    }
}

pub struct HeadlessTween {
    killed: AtomicBool,
    finished: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessTween {
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Run to the end
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl Animation for HeadlessTween {
    fn kill(&self) {
        if !self.killed.swap(true, Ordering::AcqRel) {
            bump(&self.counters.tweens_killed);
        }
    }

    fn is_active(&self) -> bool {
        !self.is_killed() && !self.finished.load(Ordering::Acquire)
    }
}

pub struct HeadlessTimer {
    cleared: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessTimer {
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }
}

impl Timer for HeadlessTimer {
    fn clear(&self) {
        if !self.cleared.swap(true, Ordering::AcqRel) {
            bump(&self.counters.timers_cleared);
        }
    }
}

pub struct HeadlessListener {
    removed: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessListener {
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl EventListener for HeadlessListener {
    fn remove(&self) {
        if !self.removed.swap(true, Ordering::AcqRel) {
            bump(&self.counters.listeners_removed);
        }
    }
}

/// Timeline that completes only when told to
pub struct HeadlessTimeline {
    children: Mutex<Vec<(Arc<dyn Animation>, f64)>>,
    on_complete: Mutex<Option<GroupCallback>>,
    playing: AtomicBool,
    killed: AtomicBool,
    counters: Arc<Counters>,
}

impl HeadlessTimeline {
    /// Child start offsets in insertion order
    pub fn positions(&self) -> Vec<f64> {
        self.children.lock().iter().map(|(_, position)| *position).collect()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Finish playback and fire the completion callback
    ///
    /// Returns `false` for a killed or already completed timeline.
    pub fn complete(&self) -> bool {
        if self.is_killed() || !self.playing.swap(false, Ordering::AcqRel) {
            return false;
        }
        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

impl Timeline for HeadlessTimeline {
    fn add(&self, animation: Arc<dyn Animation>, position: f64) {
        self.children.lock().push((animation, position));
    }

    fn set_on_complete(&self, callback: GroupCallback) {
        *self.on_complete.lock() = Some(callback);
    }

    fn play(&self) {
        if !self.is_killed() {
            self.playing.store(true, Ordering::Release);
        }
    }

    fn kill(&self) {
        if !self.killed.swap(true, Ordering::AcqRel) {
            self.playing.store(false, Ordering::Release);
            self.on_complete.lock().take();
            bump(&self.counters.timelines_killed);
        }
    }

    fn is_active(&self) -> bool {
        self.is_playing() && !self.is_killed()
    }
}

/// Engine that records every timeline it creates
pub struct HeadlessEngine {
    timelines: Mutex<Vec<Arc<HeadlessTimeline>>>,
    counters: Arc<Counters>,
}

impl HeadlessEngine {
    pub fn last_timeline(&self) -> Option<Arc<HeadlessTimeline>> {
        self.timelines.lock().last().cloned()
    }

    pub fn timeline_count(&self) -> usize {
        self.timelines.lock().len()
    }

    /// Complete every playing timeline; returns how many completed
    pub fn complete_all(&self) -> usize {
        let timelines: Vec<Arc<HeadlessTimeline>> = self.timelines.lock().clone();
        timelines.iter().filter(|timeline| timeline.complete()).count()
    }
}

impl AnimationEngine for HeadlessEngine {
    fn create_timeline(&self) -> Arc<dyn Timeline> {
        bump(&self.counters.timelines_created);
        let timeline = Arc::new(HeadlessTimeline {
            children: Mutex::new(Vec::new()),
            on_complete: Mutex::new(None),
            playing: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            counters: self.counters.clone(),
        });
        self.timelines.lock().push(timeline.clone());
        timeline
    }
}

#[derive(Clone)]
enum Asset {
    Image { width: u32, height: u32 },
    Text(String),
}

/// Loader serving assets registered in memory
pub struct HeadlessLoader {
    assets: Mutex<HashMap<String, Asset>>,
    backend: HeadlessBackend,
}

impl HeadlessLoader {
    pub fn insert_image(&self, url: impl Into<String>, width: u32, height: u32) {
        self.assets.lock().insert(url.into(), Asset::Image { width, height });
    }

    pub fn insert_text(&self, url: impl Into<String>, text: impl Into<String>) {
        self.assets.lock().insert(url.into(), Asset::Text(text.into()));
    }

    fn fetch(&self, url: &str) -> Result<Asset, LoadError> {
        bump(&self.backend.counters.loads);
        self.assets
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(url.to_string()))
    }
}

impl AssetLoader for HeadlessLoader {
    fn load_texture(&self, url: &str) -> BoxFuture<'static, Result<Arc<dyn Texture>, LoadError>> {
        let result = self.fetch(url).and_then(|asset| match asset {
            Asset::Image { width, height } => {
                Ok(self.backend.texture(width, height) as Arc<dyn Texture>)
            }
            Asset::Text(_) => Err(LoadError::Decode {
                url: url.to_string(),
                reason: "not an image".to_string(),
            }),
        });
        future::ready(result).boxed()
    }

    fn load_text(&self, url: &str) -> BoxFuture<'static, Result<String, LoadError>> {
        let result = self.fetch(url).and_then(|asset| match asset {
            Asset::Text(text) => Ok(text),
            Asset::Image { .. } => Err(LoadError::Decode {
                url: url.to_string(),
                reason: "not text".to_string(),
            }),
        });
        future::ready(result).boxed()
    }
}
