//! Pruning Service
//!
//! Identifies low-value memories and removes them with referential cleanup.
//! Candidates carry a single primary reason with fixed precedence
//! (low strength over old age over low access); deletion is transactional
//! and scrubs links, embeddings, metadata, and tag associations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::SectorConfig;
use crate::storage::{MemoryStore, PruneOutcome, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Pruning error type
#[derive(Debug, thiserror::Error)]
pub enum PruneError {
    /// Criteria out of range
    #[error("Invalid pruning criteria: {0}")]
    InvalidCriteria(String),
    /// Preview computation failed
    #[error("Preview failed: {0}")]
    Preview(#[source] StoreError),
    /// Transactional delete failed and was rolled back
    #[error("Prune failed: {0}")]
    Prune(#[source] StoreError),
    /// Other storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PruneError {
    pub fn code(&self) -> &'static str {
        match self {
            PruneError::InvalidCriteria(_) => "VALIDATION_ERROR",
            PruneError::Preview(_) => "PREVIEW_PRUNING_ERROR",
            PruneError::Prune(_) | PruneError::Store(_) => "PRUNE_ERROR",
        }
    }
}

// ============================================================================
// CRITERIA & CANDIDATES
// ============================================================================

/// Candidate selection criteria.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruningCriteria {
    /// Memories with strength below this are candidates
    pub min_strength: f64,
    /// Memories older than this many days are candidates
    pub max_age_days: f64,
    /// Memories accessed at most this many times are candidates
    pub min_access_count: i64,
}

impl Default for PruningCriteria {
    fn default() -> Self {
        Self {
            min_strength: 0.1,
            max_age_days: 180.0,
            min_access_count: 0,
        }
    }
}

impl PruningCriteria {
    pub fn validate(&self) -> Result<(), PruneError> {
        if !(0.0..=1.0).contains(&self.min_strength) {
            return Err(PruneError::InvalidCriteria(format!(
                "min strength must be in [0,1], got {}",
                self.min_strength
            )));
        }
        if self.max_age_days < 0.0 || !self.max_age_days.is_finite() {
            return Err(PruneError::InvalidCriteria(format!(
                "max age days must be non-negative, got {}",
                self.max_age_days
            )));
        }
        if self.min_access_count < 0 {
            return Err(PruneError::InvalidCriteria(format!(
                "min access count must be non-negative, got {}",
                self.min_access_count
            )));
        }
        Ok(())
    }
}

/// Why a memory was selected. Precedence: low strength > old age > low access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    LowStrength,
    OldAge,
    LowAccess,
}

impl PruneReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PruneReason::LowStrength => "low_strength",
            PruneReason::OldAge => "old_age",
            PruneReason::LowAccess => "low_access",
        }
    }
}

/// One pruning candidate with its single primary reason.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneCandidate {
    pub memory_id: String,
    pub reason: PruneReason,
    pub strength: f64,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of pruning all candidates at once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneAllOutcome {
    pub candidates: u64,
    #[serde(flatten)]
    pub outcome: PruneOutcome,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Identifies and removes low-value memories.
pub struct PruningService {
    store: Arc<MemoryStore>,
    config: Arc<SectorConfig>,
    clock: Arc<dyn Clock>,
}

impl PruningService {
    pub fn new(store: Arc<MemoryStore>, config: Arc<SectorConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Default criteria, with the strength cutoff taken from the live
    /// sector config's pruning threshold.
    pub fn default_criteria(&self) -> PruningCriteria {
        PruningCriteria {
            min_strength: self.config.get().pruning_threshold,
            ..Default::default()
        }
    }

    /// List pruning candidates, each with its primary reason.
    ///
    /// Ordered by reason group, then ascending strength, then ascending
    /// creation time.
    pub fn list_candidates(
        &self,
        user_id: &str,
        criteria: PruningCriteria,
    ) -> Result<Vec<PruneCandidate>, PruneError> {
        criteria.validate()?;
        let now = self.clock.now();
        let age_cutoff = now - Duration::milliseconds((criteria.max_age_days * 86_400_000.0) as i64);

        let mut candidates = Vec::new();
        let page_size = 500;
        let mut offset = 0;
        loop {
            let batch = self.store.memories_for_user(user_id, page_size, offset)?;
            let batch_len = batch.len();
            for memory in batch {
                // Consolidated memories are removed by their own cascade rules
                let reason = if memory.strength < criteria.min_strength {
                    Some(PruneReason::LowStrength)
                } else if memory.created_at < age_cutoff {
                    Some(PruneReason::OldAge)
                } else if memory.access_count <= criteria.min_access_count {
                    Some(PruneReason::LowAccess)
                } else {
                    None
                };
                if let Some(reason) = reason {
                    candidates.push(PruneCandidate {
                        memory_id: memory.id,
                        reason,
                        strength: memory.strength,
                        access_count: memory.access_count,
                        created_at: memory.created_at,
                    });
                }
            }
            if batch_len < page_size as usize {
                break;
            }
            offset += page_size;
        }

        candidates.sort_by(|a, b| {
            a.reason
                .cmp(&b.reason)
                .then(a.strength.total_cmp(&b.strength))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(candidates)
    }

    /// Compute what pruning `ids` would remove, without mutation.
    ///
    /// An empty id set yields all-zero results.
    pub fn preview_pruning(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<PruneOutcome, PruneError> {
        self.store
            .prune_stats(user_id, ids)
            .map_err(PruneError::Preview)
    }

    /// Transactionally delete the given memories with full cleanup.
    ///
    /// Empty `ids` short-circuits without opening a transaction.
    pub fn prune(&self, user_id: &str, ids: &[String]) -> Result<PruneOutcome, PruneError> {
        if ids.is_empty() {
            return Ok(PruneOutcome {
                deleted_count: 0,
                freed_bytes: 0,
                orphaned_links_removed: 0,
            });
        }
        let outcome = self.store.prune(user_id, ids).map_err(PruneError::Prune)?;
        tracing::info!(
            user_id,
            deleted = outcome.deleted_count,
            freed_bytes = outcome.freed_bytes,
            links = outcome.orphaned_links_removed,
            "pruned memories"
        );
        Ok(outcome)
    }

    /// List candidates under `criteria`, then prune them. Empty candidate
    /// lists are a no-op.
    pub fn prune_all_candidates(
        &self,
        user_id: &str,
        criteria: PruningCriteria,
    ) -> Result<PruneAllOutcome, PruneError> {
        let candidates = self.list_candidates(user_id, criteria)?;
        let ids: Vec<String> = candidates.iter().map(|c| c.memory_id.clone()).collect();
        let outcome = self.prune(user_id, &ids)?;
        Ok(PruneAllOutcome {
            candidates: ids.len() as u64,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{LinkKind, Memory, MemoryInput, MemoryLink, Sector};
    use tempfile::TempDir;

    fn service() -> (PruningService, Arc<MemoryStore>, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::open(&dir.path().join("test.db")).unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let svc = PruningService::new(
            store.clone(),
            Arc::new(SectorConfig::default()),
            clock.clone(),
        );
        (svc, store, clock, dir)
    }

    fn seed(
        store: &MemoryStore,
        user: &str,
        content: &str,
        strength: f64,
        age_days: i64,
        access: i64,
        now: DateTime<Utc>,
    ) -> Memory {
        let mut memory = Memory::from_input(
            MemoryInput {
                user_id: user.to_string(),
                session_id: None,
                content: content.to_string(),
                sector: Sector::Episodic,
                salience: 0.5,
            },
            now - Duration::days(age_days),
        );
        memory.strength = strength;
        memory.access_count = access;
        store.insert_memory(&memory).unwrap();
        memory
    }

    #[test]
    fn test_reason_precedence_ordering() {
        let (svc, store, clock, _dir) = service();
        let now = clock.now();
        // A: low strength wins even though young and accessed
        let a = seed(&store, "u1", "a", 0.05, 10, 5, now);
        // B: old age
        let b = seed(&store, "u1", "b", 0.5, 200, 10, now);
        // C: low access
        let c = seed(&store, "u1", "c", 0.5, 10, 0, now);

        let candidates = svc.list_candidates("u1", PruningCriteria::default()).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].memory_id, a.id);
        assert_eq!(candidates[0].reason, PruneReason::LowStrength);
        assert_eq!(candidates[1].memory_id, b.id);
        assert_eq!(candidates[1].reason, PruneReason::OldAge);
        assert_eq!(candidates[2].memory_id, c.id);
        assert_eq!(candidates[2].reason, PruneReason::LowAccess);
    }

    #[test]
    fn test_candidates_sorted_within_group() {
        let (svc, store, clock, _dir) = service();
        let now = clock.now();
        let weaker = seed(&store, "u1", "weaker", 0.01, 5, 3, now);
        let weak = seed(&store, "u1", "weak", 0.05, 5, 3, now);

        let candidates = svc.list_candidates("u1", PruningCriteria::default()).unwrap();
        assert_eq!(candidates[0].memory_id, weaker.id);
        assert_eq!(candidates[1].memory_id, weak.id);
    }

    #[test]
    fn test_invalid_criteria_rejected() {
        let (svc, _store, _clock, _dir) = service();
        let bad = PruningCriteria {
            min_strength: 1.5,
            ..Default::default()
        };
        let err = svc.list_candidates("u1", bad).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let bad = PruningCriteria {
            max_age_days: -1.0,
            ..Default::default()
        };
        assert!(svc.list_candidates("u1", bad).is_err());
    }

    #[test]
    fn test_preview_matches_prune() {
        let (svc, store, clock, _dir) = service();
        let now = clock.now();
        let memories: Vec<Memory> = (0..3)
            .map(|i| seed(&store, "u1", &format!("content-{i:03}"), 0.05, 5, 0, now))
            .collect();
        let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        store.upsert_embedding(&ids[0], Sector::Semantic, &[0.0; 8]).unwrap();
        store
            .insert_link(&MemoryLink {
                source_id: ids[0].clone(),
                target_id: ids[1].clone(),
                kind: LinkKind::Similarity,
                weight: 0.5,
            })
            .unwrap();

        let preview = svc.preview_pruning("u1", &ids).unwrap();
        let actual = svc.prune("u1", &ids).unwrap();
        assert_eq!(preview, actual);
        assert_eq!(actual.deleted_count, 3);
        // 3 * 11 content bytes + 8 dims * 4
        assert_eq!(actual.freed_bytes, 65);
        assert_eq!(actual.orphaned_links_removed, 1);
    }

    #[test]
    fn test_prune_empty_ids_short_circuits() {
        let (svc, _store, _clock, _dir) = service();
        let outcome = svc.prune("u1", &[]).unwrap();
        assert_eq!(outcome.deleted_count, 0);
    }

    #[test]
    fn test_prune_integrity_no_dangling_references() {
        let (svc, store, clock, _dir) = service();
        let now = clock.now();
        let doomed = seed(&store, "u1", "doomed", 0.01, 5, 0, now);
        let survivor = seed(&store, "u1", "survivor is strong", 0.9, 5, 3, now);
        store
            .insert_link(&MemoryLink {
                source_id: survivor.id.clone(),
                target_id: doomed.id.clone(),
                kind: LinkKind::Similarity,
                weight: 0.9,
            })
            .unwrap();
        store.upsert_embedding(&doomed.id, Sector::Semantic, &[1.0, 0.0]).unwrap();
        store.insert_metadata(&doomed.id, "k", "v").unwrap();

        svc.prune("u1", &[doomed.id.clone()]).unwrap();

        assert_eq!(store.links_touching(&[doomed.id.clone()]).unwrap(), 0);
        assert!(store.get_embedding(&doomed.id, Sector::Semantic).unwrap().is_none());
        assert_eq!(store.metadata_count(&doomed.id).unwrap(), 0);
        assert!(store.get_memory("u1", &survivor.id).unwrap().is_some());
    }

    #[test]
    fn test_prune_all_candidates_empty_is_noop() {
        let (svc, store, clock, _dir) = service();
        let now = clock.now();
        seed(&store, "u1", "healthy", 0.9, 1, 5, now);

        let result = svc
            .prune_all_candidates("u1", PruningCriteria::default())
            .unwrap();
        assert_eq!(result.candidates, 0);
        assert_eq!(result.outcome.deleted_count, 0);
    }
}
