//! Resource manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Severity used for resource-manager operation logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse a level name, case-insensitive
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(Self::Off),
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

/// Configuration for one [`ResourceManager`](crate::ResourceManager)
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfig {
    /// Severity of per-operation logs
    pub log_level: LogLevel,

    /// Record per-operation count and timing
    pub enable_metrics: bool,

    /// Auto-cleanup period; `None` disables it
    pub auto_cleanup_interval: Option<Duration>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            enable_metrics: false,
            auto_cleanup_interval: None,
        }
    }
}

impl ResourceConfig {
    /// Set the log severity
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Enable or disable operation metrics
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Set the auto-cleanup period
    pub fn with_auto_cleanup(mut self, interval: Duration) -> Self {
        self.auto_cleanup_interval = Some(interval);
        self
    }
}
