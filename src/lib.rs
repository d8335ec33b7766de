pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::TomlConfig;

pub use adapters::{EngineSettings, LocalStorage, ProcessEngine, SqliteRegistry, StorageCache};
pub use crate::core::{orchestrator::Orchestrator, processor::ProjectProcessor};
pub use utils::error::{OrchestratorError, Result};
