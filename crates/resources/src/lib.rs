//! Carousel Resources Library
//!
//! Ownership and teardown of GPU-backed handles for one mounted slider,
//! plus the shader program pool shared between sliders.

pub mod config;
pub mod diagnostics;
pub mod filter;
pub mod handle;
pub mod manager;
pub mod metrics;
pub mod shader;

pub use config::{LogLevel, ResourceConfig};
pub use diagnostics::{FilterDiagnostics, OptimizationCandidate, OptimizationHint};
pub use filter::{disable_filter, FilterKind, Knob};
pub use handle::{
    Animation, AnimationId, AppId, DestroyOptions, DisplayObject, DisplayObjectId, EventListener,
    Filter, FilterId, HandleError, ListenerId, ProgramHandle, RenderApp, Texture, Timer, TimerId,
};
pub use manager::{CleanupReport, ResourceManager, ResourceStats};
pub use metrics::{BatchStats, OperationMetrics, OperationStat};
pub use shader::{
    shader_hash, shader_key, ShaderEntryInfo, ShaderPoolConfig, ShaderPoolStats,
    ShaderResourceManager,
};
