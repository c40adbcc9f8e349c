//! Archive Manager
//!
//! Moves memories between the active set and the archive. Archived memories
//! remain searchable and restore transparently when read through the
//! regular retrieve path.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::memory::{ArchivedMemory, Memory};
use crate::storage::{MemoryStore, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Archive error type
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The memory is not in the archive
    #[error("Not found in archive: {0}")]
    NotFoundInArchive(String),
    /// Bad caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ArchiveError {
    pub fn code(&self) -> &'static str {
        match self {
            ArchiveError::NotFoundInArchive(_) => "NOT_FOUND",
            ArchiveError::InvalidArgument(_) => "VALIDATION_ERROR",
            ArchiveError::Store(_) => "ARCHIVE_ERROR",
        }
    }
}

// ============================================================================
// CONFIG & RESULTS
// ============================================================================

/// Archival configuration.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveConfig {
    /// Memories older than this (by creation time) are archived by
    /// `archive_old`
    pub age_threshold_days: u32,
    /// Copy embedding vectors into the archive
    pub retain_embeddings: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            age_threshold_days: 90,
            retain_embeddings: true,
        }
    }
}

/// Result of an archive move.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    pub archived_count: u64,
    pub freed_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Result of a restore.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub restored_count: u64,
    pub memory_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A search hit from the archive. Always carries `isArchived = true`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveHit {
    #[serde(flatten)]
    pub memory: ArchivedMemory,
    pub is_archived: bool,
}

/// Archive usage for a user.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStats {
    pub count: i64,
    pub bytes_used: u64,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Age-/id-based archival with search and restore-on-access.
pub struct ArchiveManager {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl ArchiveManager {
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Move the given memories into the archive.
    pub fn archive_memories(
        &self,
        user_id: &str,
        ids: &[String],
        config: ArchiveConfig,
    ) -> Result<ArchiveResult, ArchiveError> {
        let now = self.clock.now();
        let outcome = self
            .store
            .archive(user_id, ids, config.retain_embeddings, now)?;
        tracing::info!(
            user_id,
            archived = outcome.archived_count,
            freed_bytes = outcome.freed_bytes,
            "archived memories"
        );
        Ok(ArchiveResult {
            archived_count: outcome.archived_count,
            freed_bytes: outcome.freed_bytes,
            timestamp: now,
        })
    }

    /// Archive every active memory older than the configured threshold.
    pub fn archive_old(
        &self,
        user_id: &str,
        config: ArchiveConfig,
    ) -> Result<ArchiveResult, ArchiveError> {
        if config.age_threshold_days == 0 {
            return Err(ArchiveError::InvalidArgument(
                "age threshold must be at least one day".to_string(),
            ));
        }
        let now = self.clock.now();
        let cutoff = now - Duration::days(i64::from(config.age_threshold_days));
        let ids = self.store.ids_older_than(user_id, cutoff)?;
        self.archive_memories(user_id, &ids, config)
    }

    /// Substring search over archived content.
    pub fn search_archive(
        &self,
        user_id: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<ArchiveHit>, ArchiveError> {
        let hits = self.store.search_archive(user_id, query, limit)?;
        Ok(hits
            .into_iter()
            .map(|memory| ArchiveHit {
                memory,
                is_archived: true,
            })
            .collect())
    }

    /// Atomically re-materialize an archived memory into the active set.
    pub fn restore(&self, user_id: &str, memory_id: &str) -> Result<RestoreResult, ArchiveError> {
        let now = self.clock.now();
        let restored = self
            .store
            .restore_from_archive(user_id, memory_id, now)?
            .ok_or_else(|| ArchiveError::NotFoundInArchive(memory_id.to_string()))?;
        tracing::info!(user_id, memory_id = %restored.id, "restored memory from archive");
        Ok(RestoreResult {
            restored_count: 1,
            memory_id: restored.id,
            timestamp: now,
        })
    }

    /// Transparent restore for the regular retrieve path: if the id is
    /// archived, restore it and return the re-materialized memory.
    pub fn restore_on_access(
        &self,
        user_id: &str,
        memory_id: &str,
    ) -> Result<Option<Memory>, ArchiveError> {
        let now = self.clock.now();
        Ok(self.store.restore_from_archive(user_id, memory_id, now)?)
    }

    /// Archive usage for a user.
    pub fn stats(&self, user_id: &str) -> Result<ArchiveStats, ArchiveError> {
        let (count, bytes_used) = self.store.archive_stats(user_id)?;
        Ok(ArchiveStats { count, bytes_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{MemoryInput, Sector};
    use tempfile::TempDir;

    fn manager() -> (ArchiveManager, Arc<MemoryStore>, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::open(&dir.path().join("test.db")).unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = ArchiveManager::new(store.clone(), clock.clone());
        (manager, store, clock, dir)
    }

    fn seed(store: &MemoryStore, content: &str, created_at: DateTime<Utc>) -> Memory {
        let memory = Memory::from_input(
            MemoryInput {
                user_id: "u1".to_string(),
                session_id: None,
                content: content.to_string(),
                sector: Sector::Episodic,
                salience: 0.5,
            },
            created_at,
        );
        store.insert_memory(&memory).unwrap();
        memory
    }

    #[test]
    fn test_archive_by_ids_and_stats() {
        let (manager, store, clock, _dir) = manager();
        let memory = seed(&store, "archive me", clock.now());

        let result = manager
            .archive_memories("u1", &[memory.id.clone()], ArchiveConfig::default())
            .unwrap();
        assert_eq!(result.archived_count, 1);
        assert!(result.freed_bytes > 0);

        let stats = manager.stats("u1").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.bytes_used, "archive me".len() as u64);
    }

    #[test]
    fn test_archive_old_respects_threshold() {
        let (manager, store, clock, _dir) = manager();
        let now = clock.now();
        let old = seed(&store, "ancient history", now - Duration::days(120));
        let recent = seed(&store, "fresh news", now - Duration::days(5));

        let result = manager
            .archive_old(
                "u1",
                ArchiveConfig {
                    age_threshold_days: 90,
                    retain_embeddings: false,
                },
            )
            .unwrap();
        assert_eq!(result.archived_count, 1);
        assert!(store.get_memory("u1", &old.id).unwrap().is_none());
        assert!(store.get_memory("u1", &recent.id).unwrap().is_some());
    }

    #[test]
    fn test_archive_old_zero_threshold_rejected() {
        let (manager, _store, _clock, _dir) = manager();
        let err = manager
            .archive_old(
                "u1",
                ArchiveConfig {
                    age_threshold_days: 0,
                    retain_embeddings: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_search_hits_flagged_archived() {
        let (manager, store, clock, _dir) = manager();
        let memory = seed(&store, "the library of alexandria", clock.now());
        manager
            .archive_memories("u1", &[memory.id.clone()], ArchiveConfig::default())
            .unwrap();

        let hits = manager.search_archive("u1", "alexandria", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_archived);
    }

    #[test]
    fn test_restore_round_trip() {
        let (manager, store, clock, _dir) = manager();
        let memory = seed(&store, "come back", clock.now());
        manager
            .archive_memories("u1", &[memory.id.clone()], ArchiveConfig::default())
            .unwrap();

        let result = manager.restore("u1", &memory.id).unwrap();
        assert_eq!(result.restored_count, 1);
        assert_eq!(result.memory_id, memory.id);
        assert!(store.get_memory("u1", &memory.id).unwrap().is_some());
    }

    #[test]
    fn test_restore_missing_fails() {
        let (manager, _store, _clock, _dir) = manager();
        let err = manager.restore("u1", "ghost").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_restore_on_access_transparent() {
        let (manager, store, clock, _dir) = manager();
        let memory = seed(&store, "lazy restore", clock.now());
        manager
            .archive_memories("u1", &[memory.id.clone()], ArchiveConfig::default())
            .unwrap();

        let restored = manager.restore_on_access("u1", &memory.id).unwrap();
        assert!(restored.is_some());
        // Not archived: nothing to do
        assert!(manager.restore_on_access("u1", &memory.id).unwrap().is_none());
        assert!(store.get_memory("u1", &memory.id).unwrap().is_some());
    }
}
