pub mod batch;
pub mod export;
pub mod freshness;
pub mod ingest;
pub mod orchestrator;
pub mod processor;

pub use crate::domain::model::{Highlight, Project};
pub use crate::domain::ports::{ProjectRegistry, RegistrySession, ResultCache, ScoringEngine, Storage};
pub use crate::utils::error::Result;
