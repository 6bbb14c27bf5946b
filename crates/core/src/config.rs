//! Runtime configuration
//!
//! Loaded from TOML and overridden by environment variables:
//!
//! ```toml
//! [resources]
//! log_level = "debug"
//! enable_metrics = true
//! auto_cleanup_interval = "30s"
//!
//! [shaders]
//! max_pool_size = 50
//! retain_idle = false
//!
//! [throttle]
//! strategy = "adaptive"
//! target_fps = 60
//!
//! [window]
//! radius = 2
//!
//! [animation]
//! batch_window = "16ms"
//! ```

use crate::error::ConfigError;
use crate::window::DEFAULT_WINDOW_RADIUS;
use carousel_resources::{LogLevel, ResourceConfig, ShaderPoolConfig};
use carousel_scheduler::{ThrottleConfig, ThrottleStrategy};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable names
pub const ENV_TARGET_FPS: &str = "CAROUSEL_TARGET_FPS";
pub const ENV_THROTTLE: &str = "CAROUSEL_THROTTLE";
pub const ENV_WINDOW_RADIUS: &str = "CAROUSEL_WINDOW_RADIUS";
pub const ENV_METRICS: &str = "CAROUSEL_METRICS";
pub const ENV_LOG_LEVEL: &str = "CAROUSEL_LOG_LEVEL";

/// `[resources]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResourcesSection {
    pub log_level: LogLevel,
    pub enable_metrics: bool,
    /// Zero disables auto-cleanup
    #[serde(deserialize_with = "deserialize_duration_opt")]
    pub auto_cleanup_interval: Option<Duration>,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        let defaults = ResourceConfig::default();
        Self {
            log_level: defaults.log_level,
            enable_metrics: defaults.enable_metrics,
            auto_cleanup_interval: defaults.auto_cleanup_interval,
        }
    }
}

/// `[shaders]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShadersSection {
    pub max_pool_size: usize,
    pub prune_fraction: f64,
    pub retain_idle: bool,
}

impl Default for ShadersSection {
    fn default() -> Self {
        let defaults = ShaderPoolConfig::default();
        Self {
            max_pool_size: defaults.max_pool_size,
            prune_fraction: defaults.prune_fraction,
            retain_idle: defaults.retain_idle,
        }
    }
}

/// `[throttle]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThrottleSection {
    pub strategy: ThrottleStrategy,
    pub target_fps: f64,
    pub min_fps: f64,
    pub max_fps: f64,
    pub sample_window: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub adjust_interval: Duration,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            strategy: defaults.strategy,
            target_fps: defaults.target_fps,
            min_fps: defaults.min_fps,
            max_fps: defaults.max_fps,
            sample_window: defaults.sample_window,
            adjust_interval: defaults.adjust_interval,
        }
    }
}

/// `[window]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Slides kept resident on each side of the active slide
    pub radius: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            radius: DEFAULT_WINDOW_RADIUS,
        }
    }
}

/// `[animation]` section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// How long queued groups wait for merging when no scheduler drives
    /// the flush
    #[serde(deserialize_with = "deserialize_duration")]
    pub batch_window: Duration,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(16),
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CarouselConfig {
    pub resources: ResourcesSection,
    pub shaders: ShadersSection,
    pub throttle: ThrottleSection,
    pub window: WindowConfig,
    pub animation: AnimationConfig,
}

impl CarouselConfig {
    /// Parse a TOML document; unknown keys are ignored
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// File (or defaults), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CAROUSEL_*` environment overrides
    ///
    /// Environment variables:
    /// - `CAROUSEL_TARGET_FPS`: target frame rate
    /// - `CAROUSEL_THROTTLE`: `fixed_fps`, `adaptive`, `priority` or `none`
    /// - `CAROUSEL_WINDOW_RADIUS`: slides kept on each side
    /// - `CAROUSEL_METRICS`: `1`/`true` to record operation metrics
    /// - `CAROUSEL_LOG_LEVEL`: resource-manager log level
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var(ENV_TARGET_FPS) {
            self.throttle.target_fps = value
                .parse::<f64>()
                .map_err(|_| invalid(ENV_TARGET_FPS, &value))?;
        }

        if let Some(value) = env_var(ENV_THROTTLE) {
            self.throttle.strategy =
                ThrottleStrategy::parse(&value).ok_or_else(|| invalid(ENV_THROTTLE, &value))?;
        }

        if let Some(value) = env_var(ENV_WINDOW_RADIUS) {
            self.window.radius = value
                .parse::<usize>()
                .map_err(|_| invalid(ENV_WINDOW_RADIUS, &value))?;
        }

        if let Some(value) = env_var(ENV_METRICS) {
            self.resources.enable_metrics = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(invalid(ENV_METRICS, &value)),
            };
        }

        if let Some(value) = env_var(ENV_LOG_LEVEL) {
            self.resources.log_level =
                LogLevel::parse(&value).ok_or_else(|| invalid(ENV_LOG_LEVEL, &value))?;
        }

        Ok(())
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let throttle = &self.throttle;
        if !(throttle.target_fps.is_finite() && throttle.target_fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "throttle.target_fps must be positive, got {}",
                throttle.target_fps
            )));
        }
        if throttle.min_fps <= 0.0 || throttle.min_fps > throttle.max_fps {
            return Err(ConfigError::Invalid(format!(
                "throttle fps range [{}, {}] is empty",
                throttle.min_fps, throttle.max_fps
            )));
        }
        if throttle.sample_window == 0 {
            return Err(ConfigError::Invalid(
                "throttle.sample_window must be at least 1".into(),
            ));
        }
        if self.shaders.max_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "shaders.max_pool_size must be at least 1".into(),
            ));
        }
        if !(self.shaders.prune_fraction > 0.0 && self.shaders.prune_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "shaders.prune_fraction must be in (0, 1], got {}",
                self.shaders.prune_fraction
            )));
        }
        Ok(())
    }

    pub fn resource_config(&self) -> ResourceConfig {
        ResourceConfig {
            log_level: self.resources.log_level,
            enable_metrics: self.resources.enable_metrics,
            auto_cleanup_interval: self.resources.auto_cleanup_interval,
        }
    }

    pub fn shader_pool_config(&self) -> ShaderPoolConfig {
        ShaderPoolConfig {
            max_pool_size: self.shaders.max_pool_size,
            prune_fraction: self.shaders.prune_fraction,
            retain_idle: self.shaders.retain_idle,
        }
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            strategy: self.throttle.strategy,
            target_fps: self.throttle.target_fps,
            min_fps: self.throttle.min_fps,
            max_fps: self.throttle.max_fps,
            sample_window: self.throttle.sample_window,
            adjust_interval: self.throttle.adjust_interval,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = deserializer.deserialize_any(DurationVisitor)?;
    Ok(Some(duration).filter(|d| !d.is_zero()))
}

struct DurationVisitor;

impl<'de> de::Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a duration as number of seconds or human-readable string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        humantime::parse_duration(v).map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration must be non-negative"))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.is_nan() || v.is_sign_negative() || !v.is_finite() {
            return Err(E::custom("duration must be non-negative"));
        }
        Ok(Duration::from_secs_f64(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ALL_VARS: [&str; 5] = [
        ENV_TARGET_FPS,
        ENV_THROTTLE,
        ENV_WINDOW_RADIUS,
        ENV_METRICS,
        ENV_LOG_LEVEL,
    ];

    fn clear_env() {
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CarouselConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window.radius, 2);
        assert_eq!(config.throttle.strategy, ThrottleStrategy::FixedFps);
        assert_eq!(config.shader_pool_config(), ShaderPoolConfig::default());
        assert_eq!(config.resource_config(), ResourceConfig::default());
    }

    #[test]
    fn test_parse_all_sections() {
        let config = CarouselConfig::from_toml(
            r#"
            [resources]
            log_level = "debug"
            enable_metrics = true
            auto_cleanup_interval = "30s"

            [shaders]
            max_pool_size = 8
            retain_idle = true

            [throttle]
            strategy = "adaptive"
            target_fps = 90
            adjust_interval = 2

            [window]
            radius = 3

            [animation]
            batch_window = "20ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.resources.log_level, LogLevel::Debug);
        assert!(config.resources.enable_metrics);
        assert_eq!(config.resources.auto_cleanup_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.shaders.max_pool_size, 8);
        assert!(config.shaders.retain_idle);
        assert_eq!(config.shaders.prune_fraction, 0.2);
        assert_eq!(config.throttle.strategy, ThrottleStrategy::Adaptive);
        assert_eq!(config.throttle.target_fps, 90.0);
        assert_eq!(config.throttle.adjust_interval, Duration::from_secs(2));
        assert_eq!(config.window.radius, 3);
        assert_eq!(config.animation.batch_window, Duration::from_millis(20));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = CarouselConfig::from_toml(
            r#"
            theme = "dark"
            [window]
            radius = 1
            wrap = true
            "#,
        )
        .unwrap();
        assert_eq!(config.window.radius, 1);
    }

    #[test]
    fn test_zero_cleanup_interval_disables() {
        let config =
            CarouselConfig::from_toml("[resources]\nauto_cleanup_interval = 0\n").unwrap();
        assert_eq!(config.resources.auto_cleanup_interval, None);
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let err = CarouselConfig::from_toml("[animation]\nbatch_window = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = CarouselConfig::default();
        config.throttle.min_fps = 100.0;
        config.throttle.max_fps = 50.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CarouselConfig::default();
        config.shaders.prune_fraction = 0.0;
        assert!(config.validate().is_err());

        let mut config = CarouselConfig::default();
        config.throttle.target_fps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[throttle]\nstrategy = \"priority\"").unwrap();

        let config = CarouselConfig::from_file(file.path()).unwrap();
        assert_eq!(config.throttle.strategy, ThrottleStrategy::Priority);

        let missing = CarouselConfig::from_file("/nonexistent/carousel.toml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_TARGET_FPS, "30");
        std::env::set_var(ENV_THROTTLE, "none");
        std::env::set_var(ENV_WINDOW_RADIUS, "4");
        std::env::set_var(ENV_METRICS, "true");
        std::env::set_var(ENV_LOG_LEVEL, "trace");

        let config = CarouselConfig::load(None).unwrap();
        clear_env();

        assert_eq!(config.throttle.target_fps, 30.0);
        assert_eq!(config.throttle.strategy, ThrottleStrategy::None);
        assert_eq!(config.window.radius, 4);
        assert!(config.resources.enable_metrics);
        assert_eq!(config.resources.log_level, LogLevel::Trace);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value() {
        clear_env();
        std::env::set_var(ENV_WINDOW_RADIUS, "wide");
        let result = CarouselConfig::load(None);
        clear_env();

        match result {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, ENV_WINDOW_RADIUS);
                assert_eq!(value, "wide");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nradius = 1").unwrap();
        std::env::set_var(ENV_WINDOW_RADIUS, "5");

        let config = CarouselConfig::load(Some(file.path())).unwrap();
        clear_env();
        assert_eq!(config.window.radius, 5);
    }
}
