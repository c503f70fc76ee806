//! Error types for the settings crate.
//!
//! This module provides structured error types for pipeline configuration
//! and the program counter store.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The configuration file could not be loaded.
    #[error("Failed to load settings: {0}")]
    LoadError(String),

    /// The configuration file could not be saved.
    #[error("Failed to save settings: {0}")]
    SaveError(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// A configuration validation error occurred.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors related to configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file format is not supported.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A configuration value is out of valid range.
    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },

    /// A required value is empty.
    #[error("Configuration value '{0}' cannot be empty")]
    Empty(String),
}

/// Errors raised by the program counter store.
#[derive(Error, Debug)]
pub enum CounterError {
    /// The counter directory or file could not be accessed.
    #[error("Counter store {} is not accessible: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The updated value could not be made durable.
    #[error("Failed to persist counter {}: {message}", .path.display())]
    Persist { path: PathBuf, message: String },

    /// The counter has no numbers left to hand out.
    #[error("Program counter exhausted at {0}")]
    Exhausted(u64),
}

/// Result type alias for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for counter operations.
pub type CounterResult<T> = Result<T, CounterError>;
