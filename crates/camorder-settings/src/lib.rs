//! CamOrder Settings Crate
//!
//! Handles pipeline configuration and the persisted program counter.

pub mod config;
pub mod counter;
pub mod error;

pub use config::{
    CounterSettings, DocumentSettings, HostSettings, LoggingSettings, OutputSettings,
    PipelineConfig, PostSettings, DEFAULT_INITIAL_PROGRAM_NUMBER, DEFAULT_POST_PROFILE,
};
pub use counter::{FileCounterStore, MemoryCounterStore, ProgramCounterStore};
pub use error::{
    ConfigError, ConfigResult, CounterError, CounterResult, SettingsError, SettingsResult,
};
