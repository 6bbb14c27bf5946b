//! Sprite-sheet atlases and image texture loading
//!
//! Textures are cached by URL and handed to the [`ResourceManager`] for
//! ownership. Concurrent requests for one URL or atlas id share a single
//! in-flight load.

use crate::error::{AtlasError, LoadError};
use carousel_resources::{ResourceManager, Texture};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Fetches and decodes assets for the host engine
pub trait AssetLoader: Send + Sync {
    fn load_texture(&self, url: &str) -> BoxFuture<'static, Result<Arc<dyn Texture>, LoadError>>;

    fn load_text(&self, url: &str) -> BoxFuture<'static, Result<String, LoadError>>;
}

/// Pixel rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRect {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameData {
    pub frame: FrameRect,
    #[serde(default)]
    pub rotated: bool,
    #[serde(default)]
    pub trimmed: bool,
    #[serde(rename = "spriteSourceSize", default)]
    pub sprite_source_size: Option<FrameRect>,
    #[serde(rename = "sourceSize", default)]
    pub source_size: Option<FrameSize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasMeta {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub size: Option<FrameSize>,
    #[serde(default = "default_scale", deserialize_with = "deserialize_scale")]
    pub scale: f64,
}

impl Default for AtlasMeta {
    fn default() -> Self {
        Self {
            image: String::new(),
            size: None,
            scale: default_scale(),
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Scale is written as a number or a numeric string
fn deserialize_scale<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scale {
        Number(f64),
        Text(String),
    }

    match Scale::deserialize(deserializer)? {
        Scale::Number(value) => Ok(value),
        Scale::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid atlas scale {text:?}"))),
    }
}

#[derive(Deserialize)]
struct NamedFrame {
    filename: String,
    #[serde(flatten)]
    data: FrameData,
}

/// Frames keyed by name, or the array form with a `filename` per frame
#[derive(Deserialize)]
#[serde(untagged)]
enum Frames {
    Map(BTreeMap<String, FrameData>),
    List(Vec<NamedFrame>),
}

#[derive(Deserialize)]
struct RawDescriptor {
    frames: Frames,
    #[serde(default)]
    meta: AtlasMeta,
}

/// Parsed atlas JSON
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasDescriptor {
    pub frames: BTreeMap<String, FrameData>,
    pub meta: AtlasMeta,
}

impl AtlasDescriptor {
    pub fn parse(json: &str) -> Result<Self, AtlasError> {
        let raw: RawDescriptor = serde_json::from_str(json)?;
        let frames = match raw.frames {
            Frames::Map(frames) => frames,
            Frames::List(list) => list.into_iter().map(|f| (f.filename, f.data)).collect(),
        };
        if frames.is_empty() {
            return Err(AtlasError::Empty);
        }
        Ok(Self {
            frames,
            meta: raw.meta,
        })
    }

    /// Look up a frame by name
    ///
    /// Tries the exact key, then the trailing path segment of `name`, then
    /// any key whose trailing segment matches. Returns the stored key.
    pub fn find_frame(&self, name: &str) -> Option<(&str, &FrameData)> {
        if let Some((key, frame)) = self.frames.get_key_value(name) {
            return Some((key.as_str(), frame));
        }
        let file = file_name(name);
        if let Some((key, frame)) = self.frames.get_key_value(file) {
            return Some((key.as_str(), frame));
        }
        self.frames
            .iter()
            .find(|(key, _)| file_name(key) == file)
            .map(|(key, frame)| (key.as_str(), frame))
    }

    pub fn frame_names(&self) -> Vec<String> {
        self.frames.keys().cloned().collect()
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Resolve `image` relative to the directory of `json_url`
pub fn resolve_image_url(json_url: &str, image: &str) -> String {
    if image.contains("://") || image.starts_with('/') {
        return image.to_string();
    }
    match json_url.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{image}"),
        None => image.to_string(),
    }
}

/// Sub-texture view into an atlas image
#[derive(Clone)]
pub struct FrameTexture {
    pub atlas_id: String,
    pub name: String,
    pub frame: FrameRect,
    pub rotated: bool,
    pub trimmed: bool,
    /// Untrimmed size
    pub source_size: FrameSize,
    base: Arc<dyn Texture>,
}

impl FrameTexture {
    pub fn width(&self) -> u32 {
        self.frame.w
    }

    pub fn height(&self) -> u32 {
        self.frame.h
    }

    /// Atlas image the frame samples from
    pub fn base(&self) -> &Arc<dyn Texture> {
        &self.base
    }
}

impl fmt::Debug for FrameTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTexture")
            .field("atlas_id", &self.atlas_id)
            .field("name", &self.name)
            .field("frame", &self.frame)
            .field("rotated", &self.rotated)
            .finish_non_exhaustive()
    }
}

/// Load state of a URL or atlas id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum LoadStatus {
    NotLoaded,
    Loading,
    Loaded,
    Failed(String),
}

type SharedTexture = Shared<BoxFuture<'static, Result<Arc<dyn Texture>, LoadError>>>;
type SharedAtlas = Shared<BoxFuture<'static, Result<Arc<AtlasDescriptor>, AtlasError>>>;

struct AtlasEntry {
    descriptor: Arc<AtlasDescriptor>,
    image_url: String,
    texture: Arc<dyn Texture>,
}

#[derive(Default)]
struct AtlasState {
    textures: HashMap<String, Arc<dyn Texture>>,
    status: HashMap<String, LoadStatus>,
    texture_loads: HashMap<String, SharedTexture>,
    atlases: BTreeMap<String, AtlasEntry>,
    atlas_loads: HashMap<String, SharedAtlas>,
}

/// Atlas and texture cache for one slider
pub struct AtlasManager {
    loader: Arc<dyn AssetLoader>,
    resources: Arc<ResourceManager>,
    state: Mutex<AtlasState>,
}

impl AtlasManager {
    pub fn new(loader: Arc<dyn AssetLoader>, resources: Arc<ResourceManager>) -> Self {
        Self {
            loader,
            resources,
            state: Mutex::new(AtlasState::default()),
        }
    }

    /// Load an image texture, or return the cached one
    ///
    /// Every texture returned holds one registry reference for the caller,
    /// given back through [`AtlasManager::release_texture`]. Failures are
    /// logged and yield `None`. A load that resolves after unmount destroys
    /// its texture instead of tracking it.
    pub async fn load_texture(&self, url: &str) -> Option<Arc<dyn Texture>> {
        if !self.resources.is_active() {
            return None;
        }

        let load = {
            let mut state = self.state.lock();
            if let Some(texture) = state.textures.get(url).cloned() {
                if self.resources.has_texture(url) {
                    drop(state);
                    return self.acquire(url, texture);
                }
                // Released to zero behind the cache
                state.textures.remove(url);
                state.status.remove(url);
            }
            match state.texture_loads.get(url) {
                Some(load) => load.clone(),
                None => {
                    let load = self.loader.load_texture(url).shared();
                    state.texture_loads.insert(url.to_string(), load.clone());
                    state.status.insert(url.to_string(), LoadStatus::Loading);
                    tracing::debug!(url, "texture load started");
                    load
                }
            }
        };

        let result = load.await;
        self.finish_texture_load(url, result)
    }

    /// Take one registry reference on behalf of a caller
    fn acquire(&self, url: &str, texture: Arc<dyn Texture>) -> Option<Arc<dyn Texture>> {
        self.resources.track_texture_handle(url, texture.clone())?;
        Some(texture)
    }

    fn finish_texture_load(
        &self,
        url: &str,
        result: Result<Arc<dyn Texture>, LoadError>,
    ) -> Option<Arc<dyn Texture>> {
        let mut state = self.state.lock();
        let first = state.texture_loads.remove(url).is_some();

        match result {
            Ok(texture) => {
                if !self.resources.is_active() {
                    state.status.remove(url);
                    drop(state);
                    if first {
                        if let Err(err) = texture.destroy() {
                            tracing::warn!(url, %err, "failed to destroy late texture");
                        }
                        tracing::debug!(url, "texture resolved after unmount");
                    }
                    return None;
                }
                if first {
                    state.textures.insert(url.to_string(), texture.clone());
                    state.status.insert(url.to_string(), LoadStatus::Loaded);
                }
                drop(state);
                self.acquire(url, texture)
            }
            Err(err) => {
                if first {
                    tracing::warn!(url, %err, "texture load failed");
                    state.status.insert(url.to_string(), LoadStatus::Failed(err.to_string()));
                }
                None
            }
        }
    }

    /// Load an atlas JSON and its image under `atlas_id`
    ///
    /// `image_url` overrides the image named in the atlas meta, which is
    /// otherwise resolved relative to `json_url`.
    pub async fn load_atlas(
        &self,
        atlas_id: &str,
        json_url: &str,
        image_url: Option<&str>,
    ) -> Option<Arc<AtlasDescriptor>> {
        if !self.resources.is_active() {
            return None;
        }

        let load = {
            let mut state = self.state.lock();
            if let Some(entry) = state.atlases.get(atlas_id) {
                return Some(entry.descriptor.clone());
            }
            match state.atlas_loads.get(atlas_id) {
                Some(load) => load.clone(),
                None => {
                    let load = self
                        .loader
                        .load_text(json_url)
                        .map(|text| -> Result<Arc<AtlasDescriptor>, AtlasError> {
                            let text = text?;
                            AtlasDescriptor::parse(&text).map(Arc::new)
                        })
                        .boxed()
                        .shared();
                    state.atlas_loads.insert(atlas_id.to_string(), load.clone());
                    state.status.insert(atlas_id.to_string(), LoadStatus::Loading);
                    load
                }
            }
        };

        let descriptor = match load.await {
            Ok(descriptor) => descriptor,
            Err(err) => {
                let mut state = self.state.lock();
                if state.atlas_loads.remove(atlas_id).is_some() {
                    tracing::warn!(atlas_id, json_url, %err, "atlas load failed");
                    state.status.insert(atlas_id.to_string(), LoadStatus::Failed(err.to_string()));
                }
                return None;
            }
        };

        let image_url = match image_url {
            Some(url) => url.to_string(),
            None => resolve_image_url(json_url, &descriptor.meta.image),
        };
        let Some(texture) = self.load_texture(&image_url).await else {
            let mut state = self.state.lock();
            if state.atlas_loads.remove(atlas_id).is_some() {
                let status = match state.status.get(&image_url) {
                    Some(LoadStatus::Failed(reason)) => LoadStatus::Failed(reason.clone()),
                    _ => LoadStatus::Failed(format!("image unavailable: {image_url}")),
                };
                state.status.insert(atlas_id.to_string(), status);
            }
            return None;
        };

        let mut state = self.state.lock();
        state.atlas_loads.remove(atlas_id);
        if let Some(entry) = state.atlases.get(atlas_id) {
            let existing = entry.descriptor.clone();
            drop(state);
            // Another caller of the shared load registered the atlas first
            self.release_texture(&image_url);
            return Some(existing);
        }
        tracing::debug!(atlas_id, frames = descriptor.frames.len(), "atlas loaded");
        state.status.insert(atlas_id.to_string(), LoadStatus::Loaded);
        state.atlases.insert(
            atlas_id.to_string(),
            AtlasEntry {
                descriptor: descriptor.clone(),
                image_url,
                texture,
            },
        );
        Some(descriptor)
    }

    /// Frame of one atlas, with trailing-segment fallback
    pub fn get_frame_texture(&self, atlas_id: &str, frame_name: &str) -> Option<FrameTexture> {
        let state = self.state.lock();
        let Some(entry) = state.atlases.get(atlas_id) else {
            tracing::debug!(atlas_id, "atlas not loaded");
            return None;
        };
        let frame = frame_texture(atlas_id, entry, frame_name);
        if frame.is_none() {
            tracing::debug!(atlas_id, frame_name, "frame not found");
        }
        frame
    }

    /// Search every loaded atlas in id order
    pub fn find_frame_texture(&self, frame_name: &str) -> Option<FrameTexture> {
        let state = self.state.lock();
        state
            .atlases
            .iter()
            .find_map(|(atlas_id, entry)| frame_texture(atlas_id, entry, frame_name))
    }

    /// Status of a texture URL or atlas id
    pub fn load_status(&self, key: &str) -> LoadStatus {
        self.state
            .lock()
            .status
            .get(key)
            .cloned()
            .unwrap_or(LoadStatus::NotLoaded)
    }

    pub fn cached_texture(&self, url: &str) -> Option<Arc<dyn Texture>> {
        self.state.lock().textures.get(url).cloned()
    }

    /// Give back one reference taken by [`AtlasManager::load_texture`]
    ///
    /// The cache entry is dropped once the registry no longer tracks the
    /// texture.
    pub fn release_texture(&self, url: &str) -> bool {
        if !self.state.lock().textures.contains_key(url) {
            return false;
        }
        self.resources.release_texture(url);
        if !self.resources.has_texture(url) {
            let mut state = self.state.lock();
            state.textures.remove(url);
            state.status.remove(url);
        }
        true
    }

    /// Forget an atlas and release its reference to the image
    pub fn unload_atlas(&self, atlas_id: &str) -> bool {
        let entry = {
            let mut state = self.state.lock();
            state.status.remove(atlas_id);
            state.atlases.remove(atlas_id)
        };
        match entry {
            Some(entry) => {
                drop(entry.texture);
                self.release_texture(&entry.image_url);
                tracing::debug!(atlas_id, "atlas unloaded");
                true
            }
            None => false,
        }
    }

    pub fn atlas_ids(&self) -> Vec<String> {
        self.state.lock().atlases.keys().cloned().collect()
    }

    pub fn frame_names(&self, atlas_id: &str) -> Vec<String> {
        self.state
            .lock()
            .atlases
            .get(atlas_id)
            .map(|entry| entry.descriptor.frame_names())
            .unwrap_or_default()
    }

    pub fn texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Forget every cached entry without releasing registry references
    ///
    /// Used after the registry has been disposed. In-flight loads keep
    /// running and are discarded when they resolve.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.textures.clear();
        state.status.clear();
        state.atlases.clear();
    }
}

fn frame_texture(atlas_id: &str, entry: &AtlasEntry, frame_name: &str) -> Option<FrameTexture> {
    let (name, data) = entry.descriptor.find_frame(frame_name)?;
    Some(FrameTexture {
        atlas_id: atlas_id.to_string(),
        name: name.to_string(),
        frame: data.frame,
        rotated: data.rotated,
        trimmed: data.trimmed,
        source_size: data.source_size.unwrap_or(FrameSize {
            w: data.frame.w,
            h: data.frame.h,
        }),
        base: entry.texture.clone(),
    })
}
