//! Configuration loading and resolution
//!
//! Each setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: the client logs a warning and
//! starts with compiled defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::api::UploadContext;
use crate::{Error, Result};

/// Environment variable overriding the inference server URL
pub const ENV_SERVER_URL: &str = "COCOMD_SERVER_URL";
/// Environment variable overriding the config file location
pub const ENV_CONFIG_FILE: &str = "COCOMD_CONFIG";
/// Environment variable overriding the frame export directory
pub const ENV_EXPORT_DIR: &str = "COCOMD_EXPORT_DIR";

const APP_DIR: &str = "cocomd";

/// Configuration file contents
///
/// Every key is optional; absent keys fall back to `CompiledDefaults`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Base URL of the inference server (e.g. "http://127.0.0.1:8000")
    #[serde(default)]
    pub server_url: Option<String>,

    /// Location attached to uploads
    #[serde(default)]
    pub location: Option<String>,

    /// Device attached to uploads
    #[serde(default)]
    pub device: Option<String>,

    /// Directory receiving exported frames
    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    /// File name used for exported frames
    #[serde(default)]
    pub frame_file_name: Option<String>,

    /// Derive count increments from detection labels when `counts` is absent
    #[serde(default)]
    pub tally_detections: Option<bool>,

    /// Event bus buffer size
    #[serde(default)]
    pub event_capacity: Option<usize>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the config file, degrading to defaults when it is missing
    ///
    /// An explicitly given path that does not exist is still only a warning;
    /// a file that exists but fails to parse is an error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os(ENV_CONFIG_FILE)
                .map(PathBuf::from)
                .or_else(default_config_path),
        };

        match path {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Default config file path: `<config_dir>/cocomd/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Compiled fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub server_url: String,
    pub export_dir: PathBuf,
    pub frame_file_name: String,
    pub tally_detections: bool,
    pub event_capacity: usize,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let export_dir = dirs::data_local_dir()
            .map(|d| d.join(APP_DIR).join("frames"))
            .unwrap_or_else(|| PathBuf::from("./cocomd_frames"));

        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            export_dir,
            frame_file_name: "detected_frame.jpg".to_string(),
            tally_detections: false,
            event_capacity: 256,
        }
    }
}

/// Command-line overrides collected by the binary
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub location: Option<String>,
    pub device: Option<String>,
    pub export_dir: Option<PathBuf>,
}

/// Fully resolved client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub upload_context: UploadContext,
    pub export_dir: PathBuf,
    pub frame_file_name: String,
    pub tally_detections: bool,
    pub event_capacity: usize,
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Merge CLI, environment, file and compiled defaults
    pub fn resolve(cli: &CliOverrides, file: TomlConfig) -> Result<Self> {
        let defaults = CompiledDefaults::for_current_platform();

        let server_url = cli
            .server_url
            .clone()
            .or_else(|| env_non_empty(ENV_SERVER_URL))
            .or(file.server_url)
            .unwrap_or(defaults.server_url);

        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "server_url must start with http:// or https://, got {}",
                server_url
            )));
        }

        let export_dir = cli
            .export_dir
            .clone()
            .or_else(|| env_non_empty(ENV_EXPORT_DIR).map(PathBuf::from))
            .or(file.export_dir)
            .unwrap_or(defaults.export_dir);

        let frame_file_name = file
            .frame_file_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(defaults.frame_file_name);

        let event_capacity = file.event_capacity.unwrap_or(defaults.event_capacity);
        if event_capacity == 0 {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }

        Ok(Self {
            server_url,
            upload_context: UploadContext {
                location: cli.location.clone().or(file.location).unwrap_or_default(),
                device: cli.device.clone().or(file.device).unwrap_or_default(),
            },
            export_dir,
            frame_file_name,
            tally_detections: file.tally_detections.unwrap_or(defaults.tally_detections),
            event_capacity,
            logging: file.logging,
        })
    }

    /// Settings for talking to `server_url` with everything else defaulted
    pub fn for_server(server_url: impl Into<String>) -> Self {
        let defaults = CompiledDefaults::for_current_platform();
        Self {
            server_url: server_url.into(),
            upload_context: UploadContext::default(),
            export_dir: defaults.export_dir,
            frame_file_name: defaults.frame_file_name,
            tally_detections: defaults.tally_detections,
            event_capacity: defaults.event_capacity,
            logging: LoggingConfig::default(),
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = TomlConfig::parse(
            r#"
            server_url = "https://pi.local:8443"
            location = "Plot 7"
            device = "pi-cam-2"
            export_dir = "/tmp/frames"
            frame_file_name = "frame.jpg"
            tally_detections = true
            event_capacity = 64

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.server_url.as_deref(), Some("https://pi.local:8443"));
        assert_eq!(config.location.as_deref(), Some("Plot 7"));
        assert_eq!(config.tally_detections, Some(true));
        assert_eq!(config.event_capacity, Some(64));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_empty_file_uses_defaults() {
        let config = TomlConfig::parse("").unwrap();
        assert!(config.server_url.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = TomlConfig::parse("server_url = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_compiled_defaults() {
        let defaults = CompiledDefaults::for_current_platform();
        assert_eq!(defaults.server_url, "http://127.0.0.1:8000");
        assert_eq!(defaults.frame_file_name, "detected_frame.jpg");
        assert!(!defaults.tally_detections);
        assert!(!defaults.export_dir.as_os_str().is_empty());
    }
}
