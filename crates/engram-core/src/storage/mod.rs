//! Storage Module
//!
//! SQLite-based storage layer with:
//! - Separate reader/writer connections behind mutexes (`Send + Sync`)
//! - Versioned migrations recorded in `schema_migrations`
//! - Transactional pruning, archival, and consolidation commits
//! - Embedded vector storage (little-endian f32 blobs)

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, Migration, MIGRATIONS};
pub use sqlite::{
    AgeBuckets, ArchiveOutcome, ForgettingCounts, MemoryStore, PruneOutcome, Result, StoreError,
};
