use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("config validation error: {message}")]
    Validation { message: String },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Configuration loaded from `mathmate.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MathmateConfig {
    pub cache: CacheConfig,
    pub kernel: KernelConfig,
    pub image: ImageConfig,
    pub render: RenderConfig,
}

impl MathmateConfig {
    /// Load config from a specific `mathmate.toml` file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate a config from a TOML string.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `./mathmate.toml` if it exists, otherwise return defaults.
    pub fn load_or_default() -> Self {
        let path = PathBuf::from("mathmate.toml");
        if path.exists() {
            match Self::load(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(%e, "failed to load mathmate.toml, falling back to defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Validate the config and return actionable error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.layout_file.trim().is_empty() {
            return Err(invalid("cache.layout_file must not be empty"));
        }
        if self.cache.yield_token.is_empty() {
            return Err(invalid("cache.yield_token must not be empty"));
        }

        if self.kernel.evaluate_timeout_seconds == Some(0) {
            return Err(invalid("kernel.evaluate_timeout_seconds must be > 0"));
        }
        if self.kernel.notification_capacity == 0 {
            return Err(invalid("kernel.notification_capacity must be > 0"));
        }
        if self.kernel.last_output_symbol.trim().is_empty() {
            return Err(invalid("kernel.last_output_symbol must not be empty"));
        }

        let ext = &self.image.extension;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Validation {
                message: format!("image.extension '{ext}' must be a non-empty alphanumeric suffix"),
            });
        }

        if self.render.interval_ms == Some(0) {
            return Err(invalid("render.interval_ms must be > 0"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared directory holding one subfolder per session plus the layout.
    pub root: PathBuf,
    /// Page template file name, relative to `root`.
    pub layout_file: String,
    /// Token in the layout replaced by the rendered transcript body.
    pub yield_token: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("mathmate"),
            layout_file: "layout.html".into(),
            yield_token: "<%= yield %>".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// KernelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Kernel program to launch.
    pub command: String,
    /// Connection arguments passed to the kernel program.
    pub args: Vec<String>,
    /// Operator-controlled limit on a single kernel request. Unbounded when absent.
    pub evaluate_timeout_seconds: Option<u64>,
    /// Capacity of the out-of-band notification queue.
    pub notification_capacity: usize,
    /// Symbol that holds the most recent result so it can be re-rendered as an image.
    pub last_output_symbol: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            command: "mathmate-kernel".into(),
            args: Vec::new(),
            evaluate_timeout_seconds: None,
            notification_capacity: 256,
            last_output_symbol: "MathMate`lastOutput".into(),
        }
    }
}

impl KernelConfig {
    pub fn evaluate_timeout(&self) -> Option<Duration> {
        self.evaluate_timeout_seconds.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// ImageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Requested width in pixels; 0 lets the kernel choose.
    pub width: u32,
    /// Requested height in pixels; 0 lets the kernel choose.
    pub height: u32,
    /// File extension given to captured images.
    pub extension: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            extension: "gif".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RenderConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Period for background re-rendering. Disabled when absent.
    pub interval_ms: Option<u64>,
}

impl RenderConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TOML: &str = r#"
[cache]
root = "/var/cache/mathmate"
layout_file = "page.html"
yield_token = "{{content}}"

[kernel]
command = "/usr/local/bin/wolfram-bridge"
args = ["-linkmode", "launch"]
evaluate_timeout_seconds = 120
notification_capacity = 64
last_output_symbol = "Session`last"

[image]
width = 640
height = 480
extension = "png"

[render]
interval_ms = 2000
"#;

    #[test]
    fn parse_full_toml() {
        let cfg = MathmateConfig::parse(FULL_TOML).expect("parse full TOML");
        assert_eq!(cfg.cache.root, PathBuf::from("/var/cache/mathmate"));
        assert_eq!(cfg.cache.layout_file, "page.html");
        assert_eq!(cfg.cache.yield_token, "{{content}}");
        assert_eq!(cfg.kernel.command, "/usr/local/bin/wolfram-bridge");
        assert_eq!(cfg.kernel.args, vec!["-linkmode", "launch"]);
        assert_eq!(
            cfg.kernel.evaluate_timeout(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(cfg.kernel.notification_capacity, 64);
        assert_eq!(cfg.image.width, 640);
        assert_eq!(cfg.image.extension, "png");
        assert_eq!(cfg.render.interval(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn parse_minimal_toml_gets_defaults() {
        let cfg = MathmateConfig::parse("").expect("parse empty TOML");
        assert_eq!(cfg.cache.layout_file, "layout.html");
        assert_eq!(cfg.cache.yield_token, "<%= yield %>");
        assert!(cfg.kernel.evaluate_timeout().is_none());
        assert_eq!(cfg.kernel.notification_capacity, 256);
        assert_eq!(cfg.kernel.last_output_symbol, "MathMate`lastOutput");
        assert_eq!(cfg.image.width, 0);
        assert_eq!(cfg.image.height, 0);
        assert_eq!(cfg.image.extension, "gif");
        assert!(cfg.render.interval().is_none());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut cfg = MathmateConfig::default();
        cfg.kernel.evaluate_timeout_seconds = Some(0);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("evaluate_timeout_seconds"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut cfg = MathmateConfig::default();
        cfg.kernel.notification_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("notification_capacity"));
    }

    #[test]
    fn validate_rejects_bad_extension() {
        let mut cfg = MathmateConfig::default();
        cfg.image.extension = "../gif".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("../gif"));
    }

    #[test]
    fn validate_rejects_empty_yield_token() {
        let mut cfg = MathmateConfig::default();
        cfg.cache.yield_token = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("yield_token"));
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let result = MathmateConfig::parse("this is not [valid toml");
        assert!(matches!(result, Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = MathmateConfig::load(Path::new("/nonexistent/mathmate.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mathmate.toml"));
    }

    #[test]
    fn serialization_round_trip() {
        let original = MathmateConfig::default();
        let toml_str = toml::to_string_pretty(&original).expect("serialize");
        let restored = MathmateConfig::parse(&toml_str).expect("deserialize");
        assert_eq!(original.cache.root, restored.cache.root);
        assert_eq!(original.image.extension, restored.image.extension);
    }
}
