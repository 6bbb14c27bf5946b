//! Carousel Core Library
//!
//! Slide residency, animation coordination, atlas loading and the runtime
//! context that wires them to the resource registry and render scheduler.

pub mod animation;
pub mod atlas;
pub mod config;
pub mod context;
pub mod error;
pub mod headless;
pub mod window;

pub use animation::{
    merge_groups, AnimationCategory, AnimationCoordinator, AnimationEngine, AnimationGroupConfig,
    CoordinatorStats, GroupCallback, GroupInfo, Timeline, FLUSH_TASK_ID,
};
pub use atlas::{
    resolve_image_url, AssetLoader, AtlasDescriptor, AtlasManager, AtlasMeta, FrameData,
    FrameRect, FrameSize, FrameTexture, LoadStatus,
};
pub use config::{AnimationConfig, CarouselConfig, WindowConfig};
pub use context::{Navigation, RuntimeContext, SliderInstance, SliderStats};
pub use error::{AtlasError, ConfigError, LoadError};
pub use window::{
    Direction, SlideInfo, SlideState, SlidingWindowManager, WindowDelta, WindowStats,
    DEFAULT_WINDOW_RADIUS,
};
