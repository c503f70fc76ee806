//! Configuration for the CamOrder pipeline
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats; every section falls back to defaults rooted in
//! platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Output (default directory, program file extension)
//! - Program counter (store location, first number handed out)
//! - Post processing (default profile)
//! - Host interaction (completion poll interval)
//! - Logging (run log directory, level)
//! - Documents (close after processing)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// First program number handed out by a fresh counter store
pub const DEFAULT_INITIAL_PROGRAM_NUMBER: u64 = 1001;

/// Post-processor profile used when a component names none
pub const DEFAULT_POST_PROFILE: &str = "richauto";

fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("camorder")
}

/// Where generated programs go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Default output directory, used when an order names none
    pub directory: PathBuf,
    /// Program file extension, without the dot
    pub extension: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("camorder")
                .join("nc"),
            extension: "nc".to_string(),
        }
    }
}

/// Program counter store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSettings {
    /// File holding the next program number to hand out
    pub file: PathBuf,
    /// First number handed out when the store is absent or unreadable
    pub initial_value: u64,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            file: app_data_dir().join("program_counter.txt"),
            initial_value: DEFAULT_INITIAL_PROGRAM_NUMBER,
        }
    }
}

/// Post-processing defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSettings {
    pub default_profile: String,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            default_profile: DEFAULT_POST_PROFILE.to_string(),
        }
    }
}

/// Host interaction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Delay between completion polls while the host regenerates
    pub poll_interval_ms: u64,
}

impl HostSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

/// Run log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for per-run log files
    pub directory: PathBuf,
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: app_data_dir().join("logs"),
            level: "info".to_string(),
        }
    }
}

/// Document handling settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    /// Close documents the pipeline opened once their component is done
    pub close_after_processing: bool,
}

/// Complete pipeline configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output: OutputSettings,
    pub counter: CounterSettings,
    pub post: PostSettings,
    pub host: HostSettings,
    pub logging: LoggingSettings,
    pub documents: DocumentSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl PipelineConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.extension.trim().is_empty() {
            return Err(ConfigError::Empty("output.extension".to_string()));
        }

        if self.output.extension.contains(['.', '/', '\\']) {
            return Err(ConfigError::ValueOutOfRange {
                key: "output.extension".to_string(),
                value: self.output.extension.clone(),
            });
        }

        if self.counter.initial_value == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "counter.initial_value".to_string(),
                value: "0".to_string(),
            });
        }

        if self.post.default_profile.trim().is_empty() {
            return Err(ConfigError::Empty("post.default_profile".to_string()));
        }

        if self.host.poll_interval_ms == 0 || self.host.poll_interval_ms > 60_000 {
            return Err(ConfigError::ValueOutOfRange {
                key: "host.poll_interval_ms".to_string(),
                value: self.host.poll_interval_ms.to_string(),
            });
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Empty("logging.level".to_string()));
        }

        Ok(())
    }
}
