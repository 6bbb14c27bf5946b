//! Engine handle traits and arena ids
//!
//! The rendering and animation engines are external collaborators. They are
//! reached through these capability traits; the managers own the strong
//! references and hand out copyable ids.

use crate::filter::{FilterKind, Knob};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Failure reported by an engine handle
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandleError {
    #[error("handle already destroyed")]
    AlreadyDestroyed,

    #[error("filter does not expose {0:?}")]
    UnsupportedKnob(Knob),

    #[error("shader program unavailable: {0}")]
    ProgramUnavailable(String),

    #[error("engine error: {0}")]
    Engine(String),
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
        pub struct $name(u64);

        impl $name {
            /// Allocate a fresh, process-unique id
            pub fn next() -> Self {
                Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
            }

            /// Raw id value
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

// Shared across id kinds: the shader pool outlives any single manager
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

arena_id!(
    /// Tracked filter
    FilterId
);
arena_id!(
    /// Tracked display object
    DisplayObjectId
);
arena_id!(
    /// Tracked animation or timeline
    AnimationId
);
arena_id!(
    /// Tracked application instance
    AppId
);
arena_id!(
    /// Tracked timer
    TimerId
);
arena_id!(
    /// Tracked event listener
    ListenerId
);

/// Options passed to `destroy` on display objects and applications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Destroy children recursively
    pub children: bool,

    /// Destroy the backing texture as well
    pub texture: bool,
}

impl DestroyOptions {
    /// Destroy children, keep shared textures alive
    pub const KEEP_TEXTURES: Self = Self {
        children: true,
        texture: false,
    };
}

/// Compiled shader program extracted from a filter
#[derive(Clone)]
pub struct ProgramHandle {
    id: u64,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ProgramHandle {
    /// Wrap an engine program
    pub fn new<T: Any + Send + Sync>(id: u64, program: T) -> Self {
        Self {
            id,
            inner: Arc::new(program),
        }
    }

    /// Engine program id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Downcast to the engine's program type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Whether two handles refer to the same program
    pub fn same_program(&self, other: &ProgramHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// GPU texture
pub trait Texture: Send + Sync {
    /// Release GPU memory
    fn destroy(&self) -> Result<(), HandleError>;

    /// Pixel size, if known
    fn size(&self) -> Option<(u32, u32)> {
        None
    }
}

/// Post-processing filter
pub trait Filter: Send + Sync {
    /// Filter kind, selects the neutralization knobs
    fn kind(&self) -> FilterKind;

    /// Write a numeric knob (`Enabled` takes 0.0 or 1.0)
    fn set_knob(&self, knob: Knob, value: f64) -> Result<(), HandleError>;

    /// Extract the compiled program
    fn program(&self) -> Result<ProgramHandle, HandleError>;

    /// Explicit pool key, if the filter was built from a known preset
    fn shader_key(&self) -> Option<String> {
        None
    }

    /// Vertex and fragment sources, if available
    fn shader_sources(&self) -> Option<(String, String)> {
        None
    }

    /// Sampling quality (read only)
    fn quality(&self) -> Option<f64> {
        None
    }

    /// Render resolution (read only)
    fn resolution(&self) -> Option<f64> {
        None
    }

    /// Whether the filter currently renders
    fn is_enabled(&self) -> bool {
        true
    }

    /// Release GPU resources
    fn destroy(&self) -> Result<(), HandleError>;
}

/// Scene-graph node (sprite, container, text)
pub trait DisplayObject: Send + Sync {
    /// Detach from the parent container
    fn remove_from_parent(&self) -> Result<(), HandleError>;

    /// Destroy the node
    fn destroy(&self, options: DestroyOptions) -> Result<(), HandleError>;
}

/// Rendering application (stage, renderer and ticker)
pub trait RenderApp: Send + Sync {
    /// Destroy the application and its stage
    fn destroy(&self, options: DestroyOptions) -> Result<(), HandleError>;
}

/// Tween or timeline owned by the animation engine
pub trait Animation: Send + Sync {
    /// Stop immediately without completing
    fn kill(&self);

    /// Whether the animation is still running
    fn is_active(&self) -> bool;
}

/// Pending timeout or interval
pub trait Timer: Send + Sync {
    /// Cancel the timer
    fn clear(&self);
}

/// Registered event listener
pub trait EventListener: Send + Sync {
    /// Unregister the listener
    fn remove(&self);
}
