//! Configuration Module
//!
//! Orchestrator limits, timers and notification switches, plus on-disk storage
//! of the configuration file.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, credentials_dir, ConfigStorage, StorageError};
pub use types::{ConfigError, OrchestratorConfig};
