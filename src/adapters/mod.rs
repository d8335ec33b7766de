// Adapters layer: concrete implementations for external systems (registry, engine, storage, cache).

pub mod cache;
pub mod engine;
pub mod sqlite_registry;
pub mod storage;

pub use cache::StorageCache;
pub use engine::{EngineSettings, ProcessEngine};
pub use sqlite_registry::{SqliteRegistry, SqliteSession};
pub use storage::LocalStorage;
