//! SQLite Storage Implementation
//!
//! The store exposes the transactional primitives the lifecycle engines
//! build on: strength writes, pruning with referential cleanup, archive
//! moves, and the all-or-nothing consolidation commit.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::memory::{
    ArchivedMemory, ConsolidationRecord, EmbeddingStatus, LinkKind, Memory, MemoryLink,
    ReinforcementEntry, ReinforcementKind, Sector,
};
use crate::vectors::{bytes_to_vector, vector_to_bytes};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// The underlying schema is missing a table.
    pub fn is_missing_table(&self) -> bool {
        matches!(self, StoreError::Database(e) if e.to_string().contains("no such table"))
    }

    /// The underlying schema is missing a column.
    pub fn is_missing_column(&self) -> bool {
        match self {
            StoreError::Database(e) => {
                let msg = e.to_string();
                msg.contains("no such column") || msg.contains("has no column")
            }
            _ => false,
        }
    }

    /// Connection-level failure (busy, locked, unopenable).
    pub fn is_connection(&self) -> bool {
        match self {
            StoreError::Io(_) | StoreError::Init(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }
}

// ============================================================================
// RESULT SHAPES
// ============================================================================

/// Outcome of a prune (or prune preview).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneOutcome {
    pub deleted_count: u64,
    pub freed_bytes: u64,
    pub orphaned_links_removed: u64,
}

/// Outcome of an archive move.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOutcome {
    pub archived_count: u64,
    pub freed_bytes: u64,
}

/// Memory counts bucketed by age (disjoint buckets).
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeBuckets {
    pub last_day: i64,
    pub last_week: i64,
    pub last_month: i64,
    pub older: i64,
}

/// Forgetting-candidate counts; `total` is the distinct union.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgettingCounts {
    pub low_strength: i64,
    pub old_age: i64,
    pub low_access: i64,
    pub total: i64,
}

// ============================================================================
// STORE
// ============================================================================

const MEMORY_COLUMNS: &str = "id, user_id, session_id, content, primary_sector, salience, \
     strength, decay_rate, access_count, created_at, last_accessed_at, \
     consolidated_into, embedding_status";

/// SQLite-backed memory store.
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making the store `Send + Sync` so the service
/// layer can share an `Arc<MemoryStore>`.
pub struct MemoryStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl MemoryStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at the given path and apply migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&mut writer)?;

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn read(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.reader.lock().expect("reader lock poisoned")
    }

    fn write(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().expect("writer lock poisoned")
    }

    // ========================================================================
    // MEMORIES
    // ========================================================================

    /// Insert a new memory row.
    pub fn insert_memory(&self, memory: &Memory) -> Result<()> {
        let conn = self.write();
        conn.execute(
            "INSERT INTO memories (id, user_id, session_id, content, primary_sector, salience, \
             strength, decay_rate, access_count, created_at, last_accessed_at, \
             consolidated_into, embedding_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                memory.id,
                memory.user_id,
                memory.session_id,
                memory.content,
                memory.primary_sector.as_str(),
                memory.salience,
                memory.strength,
                memory.decay_rate,
                memory.access_count,
                memory.created_at,
                memory.last_accessed_at,
                memory.consolidated_into,
                memory.embedding_status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a memory scoped to its owner.
    pub fn get_memory(&self, user_id: &str, id: &str) -> Result<Option<Memory>> {
        let conn = self.read();
        let memory = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND id = ?2"),
                params![user_id, id],
                memory_from_row,
            )
            .optional()?;
        Ok(memory)
    }

    /// Fetch a memory by id regardless of owner.
    pub fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.read();
        let memory = conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                memory_from_row,
            )
            .optional()?;
        Ok(memory)
    }

    /// Page through a user's memories, oldest first.
    pub fn memories_for_user(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<Memory>> {
        let conn = self.read();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 \
             ORDER BY created_at LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![user_id, limit, offset], memory_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All memory ids for a user, oldest first.
    pub fn memory_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.read();
        let mut stmt =
            conn.prepare("SELECT id FROM memories WHERE user_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fetch a set of memories by id, scoped to the owner.
    pub fn memories_by_ids(&self, user_id: &str, ids: &[String]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND id IN ({})",
            placeholders(ids.len(), 2)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bound: Vec<&dyn ToSql> = vec![&user_id];
        for id in ids {
            bound.push(id);
        }
        let rows = stmt.query_map(&bound[..], memory_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every user with at least one active memory.
    pub fn distinct_user_ids(&self) -> Result<Vec<String>> {
        let conn = self.read();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM memories ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record the embedding generation outcome for a memory.
    pub fn set_embedding_status(&self, id: &str, status: EmbeddingStatus) -> Result<()> {
        let conn = self.write();
        let changed = conn.execute(
            "UPDATE memories SET embedding_status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Active memory ids for a user created before the cutoff.
    pub fn ids_older_than(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.read();
        let mut stmt = conn.prepare(
            "SELECT id FROM memories WHERE user_id = ?1 AND created_at < ?2 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![user_id, cutoff], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========================================================================
    // STRENGTH WRITES
    // ========================================================================

    /// Apply a batch of strength updates in one transaction, re-baselining
    /// `last_accessed_at` so decay application is idempotent within a tick.
    ///
    /// All-or-nothing: any failure rolls the whole batch back.
    pub fn apply_strengths(
        &self,
        updates: &[(String, f64)],
        touched_at: DateTime<Utc>,
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.write();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE memories SET strength = ?2, last_accessed_at = ?3 WHERE id = ?1",
            )?;
            for (id, strength) in updates {
                stmt.execute(params![id, strength, touched_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Commit a reinforcement: strength write, optional access bump, and the
    /// history row, atomically.
    pub fn commit_reinforcement(
        &self,
        entry: &ReinforcementEntry,
        new_access_count: Option<i64>,
        last_accessed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.write();
        let tx = conn.transaction()?;

        let changed = match new_access_count {
            Some(count) => tx.execute(
                "UPDATE memories SET strength = ?2, access_count = ?3, last_accessed_at = ?4 \
                 WHERE id = ?1",
                params![entry.memory_id, entry.strength_after, count, last_accessed_at],
            )?,
            None => tx.execute(
                "UPDATE memories SET strength = ?2, last_accessed_at = ?3 WHERE id = ?1",
                params![entry.memory_id, entry.strength_after, last_accessed_at],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::NotFound(entry.memory_id.clone()));
        }

        tx.execute(
            "INSERT INTO reinforcement_history \
             (memory_id, timestamp, kind, boost, strength_before, strength_after) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.memory_id,
                entry.timestamp,
                entry.kind.as_str(),
                entry.boost,
                entry.strength_before,
                entry.strength_after,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Reinforcement history for a memory, oldest first.
    pub fn reinforcement_history(&self, memory_id: &str) -> Result<Vec<ReinforcementEntry>> {
        let conn = self.read();
        let mut stmt = conn.prepare(
            "SELECT memory_id, timestamp, kind, boost, strength_before, strength_after \
             FROM reinforcement_history WHERE memory_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![memory_id], |row| {
            let kind: String = row.get(2)?;
            Ok(ReinforcementEntry {
                memory_id: row.get(0)?,
                timestamp: row.get(1)?,
                kind: ReinforcementKind::from_name(&kind).unwrap_or(ReinforcementKind::Access),
                boost: row.get(3)?,
                strength_before: row.get(4)?,
                strength_after: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    /// Insert or replace an embedding vector.
    pub fn upsert_embedding(&self, memory_id: &str, sector: Sector, vector: &[f32]) -> Result<()> {
        let conn = self.write();
        conn.execute(
            "INSERT OR REPLACE INTO memory_embeddings (memory_id, sector, dimension, vector) \
             VALUES (?1, ?2, ?3, ?4)",
            params![memory_id, sector.as_str(), vector.len() as i64, vector_to_bytes(vector)],
        )?;
        Ok(())
    }

    /// Load one embedding vector.
    pub fn get_embedding(&self, memory_id: &str, sector: Sector) -> Result<Option<Vec<f32>>> {
        let conn = self.read();
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM memory_embeddings WHERE memory_id = ?1 AND sector = ?2",
                params![memory_id, sector.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| bytes_to_vector(&b)))
    }

    /// Every active, unconsolidated memory of the user with its semantic
    /// vector; used by similarity search.
    pub fn semantic_candidates(&self, user_id: &str) -> Result<Vec<(Memory, Vec<f32>)>> {
        let conn = self.read();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, e.vector FROM memories m \
             JOIN memory_embeddings e ON e.memory_id = m.id AND e.sector = 'semantic' \
             WHERE m.user_id = ?1 AND m.consolidated_into IS NULL",
            prefixed_memory_columns("m")
        ))?;
        let rows = stmt.query_map(params![user_id], |row| {
            let memory = memory_from_row(row)?;
            let bytes: Vec<u8> = row.get(13)?;
            Ok((memory, bytes))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (memory, bytes) = row?;
            if let Some(vector) = bytes_to_vector(&bytes) {
                out.push((memory, vector));
            }
        }
        Ok(out)
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Insert (or replace) a waypoint edge.
    pub fn insert_link(&self, link: &MemoryLink) -> Result<()> {
        let conn = self.write();
        conn.execute(
            "INSERT OR REPLACE INTO memory_links (source_id, target_id, kind, weight) \
             VALUES (?1, ?2, ?3, ?4)",
            params![link.source_id, link.target_id, link.kind.as_str(), link.weight],
        )?;
        Ok(())
    }

    /// Count links touching any of the given ids.
    pub fn links_touching(&self, ids: &[String]) -> Result<i64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.read();
        let marks = placeholders(ids.len(), 1);
        let marks_shifted = placeholders(ids.len(), ids.len() + 1);
        let sql = format!(
            "SELECT COUNT(*) FROM memory_links \
             WHERE source_id IN ({marks}) OR target_id IN ({marks_shifted})"
        );
        let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            bound.push(id);
        }
        for id in ids {
            bound.push(id);
        }
        let count = conn.query_row(&sql, &bound[..], |row| row.get(0))?;
        Ok(count)
    }

    /// All edges where the memory is source or target.
    pub fn links_for(&self, memory_id: &str) -> Result<Vec<MemoryLink>> {
        let conn = self.read();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, kind, weight FROM memory_links \
             WHERE source_id = ?1 OR target_id = ?1",
        )?;
        let rows = stmt.query_map(params![memory_id], |row| {
            let kind: String = row.get(2)?;
            Ok(MemoryLink {
                source_id: row.get(0)?,
                target_id: row.get(1)?,
                kind: LinkKind::from_name(&kind).unwrap_or(LinkKind::Similarity),
                weight: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========================================================================
    // METADATA (pruning cleanup surface)
    // ========================================================================

    /// Attach a metadata key/value to a memory.
    pub fn insert_metadata(&self, memory_id: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.write();
        conn.execute(
            "INSERT OR REPLACE INTO memory_metadata (memory_id, key, value) VALUES (?1, ?2, ?3)",
            params![memory_id, key, value],
        )?;
        Ok(())
    }

    /// Metadata row count for a memory.
    pub fn metadata_count(&self, memory_id: &str) -> Result<i64> {
        let conn = self.read();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memory_metadata WHERE memory_id = ?1",
            params![memory_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // PRUNING
    // ========================================================================

    /// Compute what a prune of `ids` would remove, without mutation.
    pub fn prune_stats(&self, user_id: &str, ids: &[String]) -> Result<PruneOutcome> {
        if ids.is_empty() {
            return Ok(PruneOutcome {
                deleted_count: 0,
                freed_bytes: 0,
                orphaned_links_removed: 0,
            });
        }
        let conn = self.read();
        let owned = owned_ids(&conn, user_id, ids)?;
        prune_measure(&conn, &owned)
    }

    /// Transactionally delete the given memories with referential cleanup.
    ///
    /// Removes links, embeddings, metadata, and tag associations (the tag
    /// table may be absent) before the memory rows themselves. Any failure
    /// rolls back the whole operation.
    pub fn prune(&self, user_id: &str, ids: &[String]) -> Result<PruneOutcome> {
        if ids.is_empty() {
            return Ok(PruneOutcome {
                deleted_count: 0,
                freed_bytes: 0,
                orphaned_links_removed: 0,
            });
        }

        let mut conn = self.write();
        let tx = conn.transaction()?;

        let owned = owned_ids(&tx, user_id, ids)?;
        let measured = prune_measure(&tx, &owned)?;

        if !owned.is_empty() {
            let marks = placeholders(owned.len(), 1);
            let marks_shifted = placeholders(owned.len(), owned.len() + 1);
            let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(owned.len() * 2);
            for id in &owned {
                bound.push(id);
            }
            for id in &owned {
                bound.push(id);
            }
            tx.execute(
                &format!(
                    "DELETE FROM memory_links \
                     WHERE source_id IN ({marks}) OR target_id IN ({marks_shifted})"
                ),
                &bound[..],
            )?;

            let single: Vec<&dyn ToSql> = owned.iter().map(|id| id as &dyn ToSql).collect();
            tx.execute(
                &format!("DELETE FROM memory_embeddings WHERE memory_id IN ({marks})"),
                &single[..],
            )?;
            tx.execute(
                &format!("DELETE FROM memory_metadata WHERE memory_id IN ({marks})"),
                &single[..],
            )?;

            // Tag table is optional in older schemas
            let tag_delete = tx.execute(
                &format!("DELETE FROM memory_tag_associations WHERE memory_id IN ({marks})"),
                &single[..],
            );
            if let Err(e) = tag_delete {
                let err = StoreError::Database(e);
                if !err.is_missing_table() {
                    return Err(err);
                }
            }

            let sql = format!(
                "DELETE FROM memories WHERE user_id = ?1 AND id IN ({})",
                placeholders(owned.len(), 2)
            );
            let mut bound: Vec<&dyn ToSql> = vec![&user_id];
            for id in &owned {
                bound.push(id);
            }
            let deleted = tx.execute(&sql, &bound[..])?;

            tx.commit()?;
            return Ok(PruneOutcome {
                deleted_count: deleted as u64,
                freed_bytes: measured.freed_bytes,
                orphaned_links_removed: measured.orphaned_links_removed,
            });
        }

        tx.commit()?;
        Ok(measured)
    }

    // ========================================================================
    // ARCHIVE
    // ========================================================================

    /// Move the given memories into the archive, transactionally.
    ///
    /// Embeddings are copied into the archive when `retain_embeddings` is
    /// set, and removed from the active tables either way. Links and
    /// metadata referencing the archived rows are cleaned up.
    pub fn archive(
        &self,
        user_id: &str,
        ids: &[String],
        retain_embeddings: bool,
        now: DateTime<Utc>,
    ) -> Result<ArchiveOutcome> {
        if ids.is_empty() {
            return Ok(ArchiveOutcome {
                archived_count: 0,
                freed_bytes: 0,
            });
        }

        let mut conn = self.write();
        let tx = conn.transaction()?;

        let owned = owned_ids(&tx, user_id, ids)?;
        if owned.is_empty() {
            tx.commit()?;
            return Ok(ArchiveOutcome {
                archived_count: 0,
                freed_bytes: 0,
            });
        }

        let measured = prune_measure(&tx, &owned)?;
        let marks = placeholders(owned.len(), 1);
        let marks_from_2 = placeholders(owned.len(), 2);
        let single: Vec<&dyn ToSql> = owned.iter().map(|id| id as &dyn ToSql).collect();

        let mut with_now: Vec<&dyn ToSql> = vec![&now];
        for id in &owned {
            with_now.push(id);
        }
        tx.execute(
            &format!(
                "INSERT INTO archived_memories \
                 (id, user_id, session_id, content, primary_sector, salience, strength, \
                  access_count, original_created_at, archived_at) \
                 SELECT id, user_id, session_id, content, primary_sector, salience, strength, \
                        access_count, created_at, ?1 \
                 FROM memories WHERE id IN ({marks_from_2})"
            ),
            &with_now[..],
        )?;

        if retain_embeddings {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO archived_embeddings \
                     (memory_id, sector, dimension, vector) \
                     SELECT memory_id, sector, dimension, vector \
                     FROM memory_embeddings WHERE memory_id IN ({marks})"
                ),
                &single[..],
            )?;
        }

        let marks_shifted = placeholders(owned.len(), owned.len() + 1);
        let mut both: Vec<&dyn ToSql> = Vec::with_capacity(owned.len() * 2);
        for id in &owned {
            both.push(id);
        }
        for id in &owned {
            both.push(id);
        }
        tx.execute(
            &format!(
                "DELETE FROM memory_links \
                 WHERE source_id IN ({marks}) OR target_id IN ({marks_shifted})"
            ),
            &both[..],
        )?;
        tx.execute(
            &format!("DELETE FROM memory_embeddings WHERE memory_id IN ({marks})"),
            &single[..],
        )?;
        tx.execute(
            &format!("DELETE FROM memory_metadata WHERE memory_id IN ({marks})"),
            &single[..],
        )?;

        let sql = format!(
            "DELETE FROM memories WHERE user_id = ?1 AND id IN ({})",
            placeholders(owned.len(), 2)
        );
        let mut bound: Vec<&dyn ToSql> = vec![&user_id];
        for id in &owned {
            bound.push(id);
        }
        let archived = tx.execute(&sql, &bound[..])?;

        tx.commit()?;
        Ok(ArchiveOutcome {
            archived_count: archived as u64,
            freed_bytes: measured.freed_bytes,
        })
    }

    /// Substring search over archived content.
    pub fn search_archive(
        &self,
        user_id: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<ArchivedMemory>> {
        let conn = self.read();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_id, content, primary_sector, salience, strength, \
             access_count, original_created_at, archived_at \
             FROM archived_memories \
             WHERE user_id = ?1 AND content LIKE '%' || ?2 || '%' \
             ORDER BY archived_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, query, limit], archived_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fetch one archived memory.
    pub fn get_archived(&self, user_id: &str, id: &str) -> Result<Option<ArchivedMemory>> {
        let conn = self.read();
        let row = conn
            .query_row(
                "SELECT id, user_id, session_id, content, primary_sector, salience, strength, \
                 access_count, original_created_at, archived_at \
                 FROM archived_memories WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
                archived_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Re-materialize an archived memory into the active set.
    ///
    /// Returns `None` when the id is not in the archive. Retained embeddings
    /// move back with it.
    pub fn restore_from_archive(
        &self,
        user_id: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Memory>> {
        let mut conn = self.write();
        let tx = conn.transaction()?;

        let archived = tx
            .query_row(
                "SELECT id, user_id, session_id, content, primary_sector, salience, strength, \
                 access_count, original_created_at, archived_at \
                 FROM archived_memories WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
                archived_from_row,
            )
            .optional()?;

        let Some(archived) = archived else {
            return Ok(None);
        };

        let has_embeddings: i64 = tx.query_row(
            "SELECT COUNT(*) FROM archived_embeddings WHERE memory_id = ?1 AND sector = 'semantic'",
            params![id],
            |row| row.get(0),
        )?;

        let memory = Memory {
            id: archived.id.clone(),
            user_id: archived.user_id.clone(),
            session_id: archived.session_id.clone(),
            content: archived.content.clone(),
            primary_sector: archived.primary_sector,
            salience: archived.salience,
            strength: archived.strength,
            decay_rate: None,
            access_count: archived.access_count,
            created_at: archived.original_created_at,
            last_accessed_at: now,
            consolidated_into: None,
            embedding_status: if has_embeddings > 0 {
                EmbeddingStatus::Complete
            } else {
                EmbeddingStatus::Pending
            },
        };

        tx.execute(
            "INSERT INTO memories (id, user_id, session_id, content, primary_sector, salience, \
             strength, decay_rate, access_count, created_at, last_accessed_at, \
             consolidated_into, embedding_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                memory.id,
                memory.user_id,
                memory.session_id,
                memory.content,
                memory.primary_sector.as_str(),
                memory.salience,
                memory.strength,
                memory.decay_rate,
                memory.access_count,
                memory.created_at,
                memory.last_accessed_at,
                memory.consolidated_into,
                memory.embedding_status.as_str(),
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO memory_embeddings (memory_id, sector, dimension, vector) \
             SELECT memory_id, sector, dimension, vector FROM archived_embeddings \
             WHERE memory_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM archived_embeddings WHERE memory_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM archived_memories WHERE user_id = ?1 AND id = ?2",
            params![user_id, id],
        )?;

        tx.commit()?;
        Ok(Some(memory))
    }

    /// Archive row count and content bytes for a user.
    pub fn archive_stats(&self, user_id: &str) -> Result<(i64, u64)> {
        let conn = self.read();
        let (count, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(content)), 0) \
             FROM archived_memories WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count, bytes.max(0) as u64))
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    /// Load episodic, unconsolidated, embedding-complete memories for
    /// clustering, bounded by `limit`.
    ///
    /// Falls back to a tolerant query when the schema predates the
    /// `consolidated_into` / `embedding_status` columns.
    pub fn load_consolidation_batch(&self, user_id: &str, limit: i64) -> Result<Vec<Memory>> {
        let strict = {
            let conn = self.read();
            let result = conn
                .prepare(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories \
                     WHERE user_id = ?1 AND primary_sector = 'episodic' \
                       AND consolidated_into IS NULL AND embedding_status = 'complete' \
                     ORDER BY created_at LIMIT ?2"
                ))
                .and_then(|mut stmt| {
                    stmt.query_map(params![user_id, limit], memory_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()
                });
            result.map_err(StoreError::Database)
        };

        match strict {
            Ok(memories) => Ok(memories),
            Err(e) if e.is_missing_column() => {
                tracing::warn!("consolidation columns missing, using tolerant query");
                let conn = self.read();
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, session_id, content, primary_sector, salience, \
                     strength, decay_rate, access_count, created_at, last_accessed_at \
                     FROM memories WHERE user_id = ?1 AND primary_sector = 'episodic' \
                     ORDER BY created_at LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![user_id, limit], |row| {
                    let sector: String = row.get(4)?;
                    Ok(Memory {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        session_id: row.get(2)?,
                        content: row.get(3)?,
                        primary_sector: Sector::from_name(&sector).unwrap_or_default(),
                        salience: row.get(5)?,
                        strength: row.get(6)?,
                        decay_rate: row.get(7)?,
                        access_count: row.get(8)?,
                        created_at: row.get(9)?,
                        last_accessed_at: row.get(10)?,
                        consolidated_into: None,
                        embedding_status: EmbeddingStatus::Complete,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            }
            Err(e) => Err(e),
        }
    }

    /// `(id, content)` pairs for the given ids, preserving request order
    /// where present.
    pub fn contents_for_ids(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read();
        let sql = format!(
            "SELECT id, content FROM memories WHERE id IN ({})",
            placeholders(ids.len(), 1)
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
        let rows = stmt.query_map(&bound[..], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut by_id: HashMap<String, String> = rows
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?
            .into_iter()
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id).map(|content| (id.clone(), content)))
            .collect())
    }

    /// Commit a consolidation atomically: summary memory (+embedding),
    /// bidirectional links, multiplicative strength reduction, terminal
    /// `consolidated_into` markers, and the history row.
    pub fn commit_consolidation(
        &self,
        summary: &Memory,
        summary_vector: Option<&[f32]>,
        source_ids: &[String],
        reduction_factor: f64,
        record: &ConsolidationRecord,
    ) -> Result<()> {
        let mut conn = self.write();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO memories (id, user_id, session_id, content, primary_sector, salience, \
             strength, decay_rate, access_count, created_at, last_accessed_at, \
             consolidated_into, embedding_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                summary.id,
                summary.user_id,
                summary.session_id,
                summary.content,
                summary.primary_sector.as_str(),
                summary.salience,
                summary.strength,
                summary.decay_rate,
                summary.access_count,
                summary.created_at,
                summary.last_accessed_at,
                summary.consolidated_into,
                summary.embedding_status.as_str(),
            ],
        )?;

        if let Some(vector) = summary_vector {
            tx.execute(
                "INSERT OR REPLACE INTO memory_embeddings (memory_id, sector, dimension, vector) \
                 VALUES (?1, 'semantic', ?2, ?3)",
                params![summary.id, vector.len() as i64, vector_to_bytes(vector)],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO memory_links (source_id, target_id, kind, weight) \
                 VALUES (?1, ?2, 'consolidation', 1.0)",
            )?;
            for source_id in source_ids {
                stmt.execute(params![summary.id, source_id])?;
                stmt.execute(params![source_id, summary.id])?;
            }
        }

        let marks = placeholders(source_ids.len(), 2);
        let mut bound: Vec<&dyn ToSql> = vec![&reduction_factor];
        for id in source_ids {
            bound.push(id);
        }
        tx.execute(
            &format!("UPDATE memories SET strength = strength * ?1 WHERE id IN ({marks})"),
            &bound[..],
        )?;

        let mut bound: Vec<&dyn ToSql> = vec![&summary.id];
        for id in source_ids {
            bound.push(id);
        }
        tx.execute(
            &format!("UPDATE memories SET consolidated_into = ?1 WHERE id IN ({marks})"),
            &bound[..],
        )?;

        tx.execute(
            "INSERT INTO consolidation_history (summary_id, source_ids, created_at, topic) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.summary_id,
                serde_json::to_string(&record.source_ids)
                    .map_err(|e| StoreError::Init(e.to_string()))?,
                record.created_at,
                record.topic,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Load the history row for a summary, if any.
    pub fn consolidation_record_for_summary(
        &self,
        summary_id: &str,
    ) -> Result<Option<ConsolidationRecord>> {
        let conn = self.read();
        let row = conn
            .query_row(
                "SELECT summary_id, source_ids, created_at, topic FROM consolidation_history \
                 WHERE summary_id = ?1",
                params![summary_id],
                |row| {
                    let raw: String = row.get(1)?;
                    Ok(ConsolidationRecord {
                        summary_id: row.get(0)?,
                        source_ids: serde_json::from_str(&raw).unwrap_or_default(),
                        created_at: row.get(2)?,
                        topic: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ========================================================================
    // HEALTH QUERIES
    // ========================================================================

    /// Total bytes used by a user: content bytes plus `dimension * 4` per
    /// embedding.
    pub fn storage_bytes(&self, user_id: &str) -> Result<u64> {
        let conn = self.read();
        let content: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        let embedding: i64 = conn.query_row(
            "SELECT COALESCE(SUM(e.dimension), 0) * 4 FROM memory_embeddings e \
             JOIN memories m ON m.id = e.memory_id WHERE m.user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok((content.max(0) + embedding.max(0)) as u64)
    }

    /// Active memory counts per sector.
    pub fn counts_by_sector(&self, user_id: &str) -> Result<HashMap<Sector, i64>> {
        let conn = self.read();
        let mut stmt = conn.prepare(
            "SELECT primary_sector, COUNT(*) FROM memories WHERE user_id = ?1 \
             GROUP BY primary_sector",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let sector: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((sector, count))
        })?;

        let mut counts: HashMap<Sector, i64> = Sector::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let (name, count) = row?;
            if let Some(sector) = Sector::from_name(&name) {
                counts.insert(sector, count);
            }
        }
        Ok(counts)
    }

    /// Disjoint age buckets over `created_at`.
    pub fn counts_by_age(&self, user_id: &str, now: DateTime<Utc>) -> Result<AgeBuckets> {
        let day = now - Duration::days(1);
        let week = now - Duration::days(7);
        let month = now - Duration::days(30);

        let conn = self.read();
        let buckets = conn.query_row(
            "SELECT \
               COALESCE(SUM(CASE WHEN created_at >= ?2 THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN created_at < ?2 AND created_at >= ?3 THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN created_at < ?3 AND created_at >= ?4 THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN created_at < ?4 THEN 1 ELSE 0 END), 0) \
             FROM memories WHERE user_id = ?1",
            params![user_id, day, week, month],
            |row| {
                Ok(AgeBuckets {
                    last_day: row.get(0)?,
                    last_week: row.get(1)?,
                    last_month: row.get(2)?,
                    older: row.get(3)?,
                })
            },
        )?;
        Ok(buckets)
    }

    /// Forgetting-candidate counts (low strength, old, low access) and the
    /// distinct union.
    pub fn forgetting_counts(&self, user_id: &str, now: DateTime<Utc>) -> Result<ForgettingCounts> {
        let cutoff = now - Duration::days(180);
        let conn = self.read();
        let counts = conn.query_row(
            "SELECT \
               COALESCE(SUM(CASE WHEN strength < 0.1 THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN created_at < ?2 THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN access_count <= 0 THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN strength < 0.1 OR created_at < ?2 \
                                   OR access_count <= 0 THEN 1 ELSE 0 END), 0) \
             FROM memories WHERE user_id = ?1",
            params![user_id, cutoff],
            |row| {
                Ok(ForgettingCounts {
                    low_strength: row.get(0)?,
                    old_age: row.get(1)?,
                    low_access: row.get(2)?,
                    total: row.get(3)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Episodic, unconsolidated memory count (the consolidation queue).
    pub fn consolidation_queue_count(&self, user_id: &str) -> Result<i64> {
        let conn = self.read();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE user_id = ?1 \
             AND primary_sector = 'episodic' AND consolidated_into IS NULL",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ============================================================================
// ROW MAPPING & SQL HELPERS
// ============================================================================

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let sector: String = row.get(4)?;
    let status: String = row.get(12)?;
    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        content: row.get(3)?,
        primary_sector: Sector::from_name(&sector).unwrap_or_default(),
        salience: row.get(5)?,
        strength: row.get(6)?,
        decay_rate: row.get(7)?,
        access_count: row.get(8)?,
        created_at: row.get(9)?,
        last_accessed_at: row.get(10)?,
        consolidated_into: row.get(11)?,
        embedding_status: EmbeddingStatus::from_name(&status),
    })
}

fn archived_from_row(row: &Row<'_>) -> rusqlite::Result<ArchivedMemory> {
    let sector: String = row.get(4)?;
    Ok(ArchivedMemory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        content: row.get(3)?,
        primary_sector: Sector::from_name(&sector).unwrap_or_default(),
        salience: row.get(5)?,
        strength: row.get(6)?,
        access_count: row.get(7)?,
        original_created_at: row.get(8)?,
        archived_at: row.get(9)?,
    })
}

/// `?n, ?n+1, ...` placeholder list starting at `start`.
fn placeholders(count: usize, start: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", start + i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve which of `ids` actually belong to `user_id`.
fn owned_ids(conn: &Connection, user_id: &str, ids: &[String]) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT id FROM memories WHERE user_id = ?1 AND id IN ({}) ORDER BY created_at",
        placeholders(ids.len(), 2)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn ToSql> = vec![&user_id];
    for id in ids {
        bound.push(id);
    }
    let rows = stmt.query_map(&bound[..], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Measure what deleting `owned` would free, without mutating.
fn prune_measure(conn: &Connection, owned: &[String]) -> Result<PruneOutcome> {
    if owned.is_empty() {
        return Ok(PruneOutcome {
            deleted_count: 0,
            freed_bytes: 0,
            orphaned_links_removed: 0,
        });
    }

    let marks = placeholders(owned.len(), 1);
    let single: Vec<&dyn ToSql> = owned.iter().map(|id| id as &dyn ToSql).collect();

    let content_bytes: i64 = conn.query_row(
        &format!("SELECT COALESCE(SUM(LENGTH(content)), 0) FROM memories WHERE id IN ({marks})"),
        &single[..],
        |row| row.get(0),
    )?;
    let embedding_bytes: i64 = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(dimension), 0) * 4 FROM memory_embeddings \
             WHERE memory_id IN ({marks})"
        ),
        &single[..],
        |row| row.get(0),
    )?;

    let marks_shifted = placeholders(owned.len(), owned.len() + 1);
    let mut both: Vec<&dyn ToSql> = Vec::with_capacity(owned.len() * 2);
    for id in owned {
        both.push(id);
    }
    for id in owned {
        both.push(id);
    }
    let links: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM memory_links \
             WHERE source_id IN ({marks}) OR target_id IN ({marks_shifted})"
        ),
        &both[..],
        |row| row.get(0),
    )?;

    Ok(PruneOutcome {
        deleted_count: owned.len() as u64,
        freed_bytes: (content_bytes.max(0) + embedding_bytes.max(0)) as u64,
        orphaned_links_removed: links.max(0) as u64,
    })
}

/// Memory column list with a table prefix, for joined queries.
fn prefixed_memory_columns(prefix: &str) -> String {
    MEMORY_COLUMNS
        .split(", ")
        .map(|col| format!("{prefix}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
