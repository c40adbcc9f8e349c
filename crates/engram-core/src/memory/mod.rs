//! Memory Data Model
//!
//! The fundamental units persisted by the engine:
//! - `Memory`: a text unit with strength, salience, and sector classification
//! - `MemoryLink`: a weighted waypoint edge between two memories
//! - `ReinforcementEntry`: audit trail of strength boosts
//! - `ConsolidationRecord`: a committed cluster-to-summary compression
//! - `ArchivedMemory`: a memory moved out of the active set

mod record;

pub use record::{
    ArchivedMemory, ConsolidationRecord, EmbeddingStatus, LinkKind, Memory, MemoryInput,
    MemoryLink, ReinforcementEntry, ReinforcementKind, Sector,
};
