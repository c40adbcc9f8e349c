//! Decay Engine
//!
//! Pure-math temporal decay with sector-specific rates, reinforcement with
//! history, and the maintenance sweep coordinator.
//!
//! Decay follows `strength * exp(-lambda * age_days)`, floored at the
//! configured minimum strength. The numeric paths never fail; I/O paths
//! surface `DecayError`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::SectorConfig;
use crate::memory::{Memory, ReinforcementEntry, ReinforcementKind};
use crate::pruning::{PruningCriteria, PruningService};
use crate::storage::{MemoryStore, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Decay engine error type
#[derive(Debug, thiserror::Error)]
pub enum DecayError {
    /// Memory not found
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// Bad caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Infrastructure failure during a maintenance run
    #[error("Maintenance failed ({context}): {source}")]
    Maintenance {
        context: &'static str,
        #[source]
        source: StoreError,
    },
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DecayError {
    pub fn code(&self) -> &'static str {
        match self {
            DecayError::NotFound(_) => "NOT_FOUND",
            DecayError::InvalidArgument(_) => "VALIDATION_ERROR",
            DecayError::Maintenance { .. } => "MAINTENANCE_ERROR",
            DecayError::Store(_) => "MAINTENANCE_ERROR",
        }
    }
}

// ============================================================================
// RESULT SHAPES
// ============================================================================

/// Per-id outcome of a batch decay pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDecayStatus {
    pub memory_id: String,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Options for a maintenance sweep.
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceOptions {
    /// Memories per decay transaction
    pub batch_size: usize,
    /// Prune candidates after the decay pass
    pub prune: bool,
    /// Criteria for the pruning pass
    pub criteria: PruningCriteria,
}

impl Default for MaintenanceOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            prune: false,
            criteria: PruningCriteria::default(),
        }
    }
}

/// Report of a maintenance sweep. Per-batch errors are collected, not thrown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub processed: u64,
    pub pruned: u64,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Numeric decay, reinforcement, and the maintenance sweep.
pub struct DecayEngine {
    store: Arc<MemoryStore>,
    config: Arc<SectorConfig>,
    clock: Arc<dyn Clock>,
    pruning: Arc<PruningService>,
}

impl DecayEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        config: Arc<SectorConfig>,
        clock: Arc<dyn Clock>,
        pruning: Arc<PruningService>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            pruning,
        }
    }

    // ========================================================================
    // PURE MATH
    // ========================================================================

    /// Strength of a memory at `now` under exponential decay.
    ///
    /// A `last_accessed_at` in the future clamps to the stored strength.
    /// The result is floored at the configured minimum strength and is
    /// monotonically non-increasing in age.
    pub fn decayed_strength(&self, memory: &Memory, now: DateTime<Utc>) -> f64 {
        if now < memory.last_accessed_at {
            return memory.strength;
        }

        let snapshot = self.config.get();
        let age_days =
            (now - memory.last_accessed_at).num_milliseconds().max(0) as f64 / 86_400_000.0;
        let lambda = memory.decay_rate.unwrap_or_else(|| {
            let multiplier = snapshot
                .sector_multipliers
                .get(&memory.primary_sector)
                .copied()
                .unwrap_or(1.0);
            snapshot.base_lambda * multiplier
        });

        (memory.strength * (-lambda * age_days).exp()).max(snapshot.minimum_strength)
    }

    // ========================================================================
    // WRITE PATHS
    // ========================================================================

    /// Recompute and persist one memory's strength.
    pub fn apply_decay(&self, user_id: &str, memory_id: &str) -> Result<f64, DecayError> {
        let now = self.clock.now();
        let memory = self
            .store
            .get_memory(user_id, memory_id)?
            .ok_or_else(|| DecayError::NotFound(memory_id.to_string()))?;
        let decayed = self.decayed_strength(&memory, now);
        self.store
            .apply_strengths(&[(memory.id.clone(), decayed)], now)?;
        Ok(decayed)
    }

    /// Recompute strengths for a batch of ids in a single transaction.
    ///
    /// Missing ids are reported per-id; a transaction failure rolls back
    /// every update and surfaces as `MaintenanceError`.
    pub fn batch_apply_decay(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<BatchDecayStatus>, DecayError> {
        let now = self.clock.now();
        let memories = self.store.memories_by_ids(user_id, ids)?;

        let mut updates = Vec::with_capacity(memories.len());
        let mut statuses: Vec<BatchDecayStatus> = Vec::with_capacity(ids.len());
        for id in ids {
            match memories.iter().find(|m| &m.id == id) {
                Some(memory) => {
                    let decayed = self.decayed_strength(memory, now);
                    updates.push((memory.id.clone(), decayed));
                    statuses.push(BatchDecayStatus {
                        memory_id: id.clone(),
                        applied: true,
                        strength: Some(decayed),
                        error: None,
                    });
                }
                None => statuses.push(BatchDecayStatus {
                    memory_id: id.clone(),
                    applied: false,
                    strength: None,
                    error: Some("not found".to_string()),
                }),
            }
        }

        self.store
            .apply_strengths(&updates, now)
            .map_err(|source| DecayError::Maintenance {
                context: "batch decay",
                source,
            })?;
        Ok(statuses)
    }

    /// Explicit reinforcement: `new = min(1, old + boost)`, recorded in
    /// history.
    pub fn reinforce(
        &self,
        user_id: &str,
        memory_id: &str,
        boost: f64,
    ) -> Result<ReinforcementEntry, DecayError> {
        self.apply_boost(user_id, memory_id, ReinforcementKind::Explicit, boost, false)
    }

    /// Access-path reinforcement: configured access boost plus an access
    /// count bump. Only boosts when strength < 1; the access is recorded
    /// either way.
    pub fn auto_reinforce_on_access(
        &self,
        user_id: &str,
        memory_id: &str,
    ) -> Result<Option<ReinforcementEntry>, DecayError> {
        let memory = self
            .store
            .get_memory(user_id, memory_id)?
            .ok_or_else(|| DecayError::NotFound(memory_id.to_string()))?;

        if memory.strength < 1.0 {
            let boost = self.config.get().reinforcement_boost;
            return self
                .apply_boost(user_id, memory_id, ReinforcementKind::Access, boost, true)
                .map(Some);
        }

        // Already at full strength; just record the access
        let now = self.clock.now();
        let entry = ReinforcementEntry {
            memory_id: memory.id.clone(),
            timestamp: now,
            kind: ReinforcementKind::Access,
            boost: 0.0,
            strength_before: memory.strength,
            strength_after: memory.strength,
        };
        self.store
            .commit_reinforcement(&entry, Some(memory.access_count + 1), now)?;
        Ok(None)
    }

    /// Typed reinforcement. `Access` uses the configured access boost,
    /// `Explicit` requires a caller-supplied boost, `Importance` uses the
    /// larger configured importance boost.
    pub fn reinforce_by_type(
        &self,
        user_id: &str,
        memory_id: &str,
        kind: ReinforcementKind,
        boost: Option<f64>,
    ) -> Result<ReinforcementEntry, DecayError> {
        let snapshot = self.config.get();
        let (boost, bump_access) = match kind {
            ReinforcementKind::Access => (snapshot.reinforcement_boost, true),
            ReinforcementKind::Explicit => {
                let boost = boost.ok_or_else(|| {
                    DecayError::InvalidArgument(
                        "explicit reinforcement requires a boost".to_string(),
                    )
                })?;
                (boost, false)
            }
            ReinforcementKind::Importance => (snapshot.importance_boost, false),
        };
        self.apply_boost(user_id, memory_id, kind, boost, bump_access)
    }

    fn apply_boost(
        &self,
        user_id: &str,
        memory_id: &str,
        kind: ReinforcementKind,
        boost: f64,
        bump_access: bool,
    ) -> Result<ReinforcementEntry, DecayError> {
        if boost < 0.0 || !boost.is_finite() {
            return Err(DecayError::InvalidArgument(format!(
                "boost must be non-negative, got {boost}"
            )));
        }

        let now = self.clock.now();
        let memory = self
            .store
            .get_memory(user_id, memory_id)?
            .ok_or_else(|| DecayError::NotFound(memory_id.to_string()))?;

        let strength_before = memory.strength.clamp(0.0, 1.0);
        let strength_after = (strength_before + boost).min(1.0);
        let entry = ReinforcementEntry {
            memory_id: memory.id.clone(),
            timestamp: now,
            kind,
            boost,
            strength_before,
            strength_after,
        };
        let new_access = bump_access.then(|| memory.access_count + 1);
        self.store.commit_reinforcement(&entry, new_access, now)?;
        Ok(entry)
    }

    // ========================================================================
    // MAINTENANCE SWEEP
    // ========================================================================

    /// Decay every memory of the user in batches, optionally pruning
    /// candidates afterwards.
    ///
    /// Per-batch errors are collected into the report; only infrastructure
    /// failure while listing ids aborts the run.
    pub fn run_maintenance(
        &self,
        user_id: &str,
        opts: MaintenanceOptions,
    ) -> Result<MaintenanceReport, DecayError> {
        let started = Instant::now();
        let batch_size = opts.batch_size.max(1);

        let ids = self
            .store
            .memory_ids_for_user(user_id)
            .map_err(|source| DecayError::Maintenance {
                context: "list memories",
                source,
            })?;

        let mut processed: u64 = 0;
        let mut errors = Vec::new();
        for chunk in ids.chunks(batch_size) {
            match self.batch_apply_decay(user_id, chunk) {
                Ok(statuses) => {
                    processed += statuses.iter().filter(|s| s.applied).count() as u64;
                }
                Err(e) => errors.push(format!("decay batch failed: {e}")),
            }
        }

        let mut pruned: u64 = 0;
        if opts.prune {
            match self.pruning.prune_all_candidates(user_id, opts.criteria) {
                Ok(result) => pruned = result.outcome.deleted_count,
                Err(e) => errors.push(format!("pruning failed: {e}")),
            }
        }

        let report = MaintenanceReport {
            processed,
            pruned,
            processing_time_ms: started.elapsed().as_millis() as u64,
            errors,
        };
        tracing::info!(
            user_id,
            processed = report.processed,
            pruned = report.pruned,
            elapsed_ms = report.processing_time_ms,
            "maintenance sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{MemoryInput, Sector};
    use chrono::Duration;
    use tempfile::TempDir;

    fn engine() -> (DecayEngine, Arc<MemoryStore>, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::open(&dir.path().join("test.db")).unwrap());
        let config = Arc::new(SectorConfig::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pruning = Arc::new(PruningService::new(
            store.clone(),
            config.clone(),
            clock.clone(),
        ));
        let engine = DecayEngine::new(store.clone(), config, clock.clone(), pruning);
        (engine, store, clock, dir)
    }

    fn seed(store: &MemoryStore, sector: Sector, now: DateTime<Utc>) -> Memory {
        let memory = Memory::from_input(
            MemoryInput {
                user_id: "u1".to_string(),
                session_id: None,
                content: "a memory".to_string(),
                sector,
                salience: 0.5,
            },
            now,
        );
        store.insert_memory(&memory).unwrap();
        memory
    }

    #[test]
    fn test_decay_math_episodic_two_days() {
        // strength 1.0, episodic (mult 1.5), base 0.02 => lambda 0.03
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let memory = seed(&store, Sector::Episodic, now);

        let decayed = engine.decayed_strength(&memory, now + Duration::days(2));
        let expected = (-0.03f64 * 2.0).exp();
        assert!((decayed - expected).abs() < 1e-6);
        assert!((decayed - 0.9418).abs() < 1e-3);
    }

    #[test]
    fn test_future_access_clamps() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let mut memory = seed(&store, Sector::Episodic, now);
        memory.strength = 0.8;
        memory.last_accessed_at = now + Duration::days(1);

        assert_eq!(engine.decayed_strength(&memory, now), 0.8);
    }

    #[test]
    fn test_decay_monotonic_and_floored() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let memory = seed(&store, Sector::Episodic, now);

        let mut previous = memory.strength;
        for days in [1, 10, 100, 1000, 10000] {
            let s = engine.decayed_strength(&memory, now + Duration::days(days));
            assert!(s <= previous + 1e-12);
            assert!(s >= 0.01);
            previous = s;
        }
        // Deep decay hits the floor exactly
        let deep = engine.decayed_strength(&memory, now + Duration::days(100_000));
        assert_eq!(deep, 0.01);
    }

    #[test]
    fn test_decay_rate_override_wins() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let mut memory = seed(&store, Sector::Episodic, now);
        memory.decay_rate = Some(0.0);

        let s = engine.decayed_strength(&memory, now + Duration::days(365));
        assert_eq!(s, 1.0);
    }

    #[test]
    fn test_apply_decay_idempotent_within_tick() {
        let (engine, store, clock, _dir) = engine();
        let memory = seed(&store, Sector::Episodic, clock.now());
        clock.advance(Duration::days(2));

        let first = engine.apply_decay("u1", &memory.id).unwrap();
        let second = engine.apply_decay("u1", &memory.id).unwrap();
        assert!((first - second).abs() < 1e-9);

        let stored = store.get_memory("u1", &memory.id).unwrap().unwrap();
        assert!((stored.strength - first).abs() < 1e-9);
    }

    #[test]
    fn test_apply_decay_missing_memory() {
        let (engine, _store, _clock, _dir) = engine();
        let err = engine.apply_decay("u1", "missing").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_batch_decay_reports_missing_ids() {
        let (engine, store, clock, _dir) = engine();
        let memory = seed(&store, Sector::Episodic, clock.now());
        clock.advance(Duration::days(1));

        let statuses = engine
            .batch_apply_decay("u1", &[memory.id.clone(), "ghost".to_string()])
            .unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].applied);
        assert!(!statuses[1].applied);
        assert_eq!(statuses[1].error.as_deref(), Some("not found"));
    }

    #[test]
    fn test_reinforce_bounds_and_history() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let mut memory = seed(&store, Sector::Episodic, now);
        memory.strength = 0.95;
        store.apply_strengths(&[(memory.id.clone(), 0.95)], now).unwrap();

        let entry = engine.reinforce("u1", &memory.id, 0.2).unwrap();
        assert_eq!(entry.strength_before, 0.95);
        assert_eq!(entry.strength_after, 1.0);
        assert_eq!(entry.kind, ReinforcementKind::Explicit);

        let history = store.reinforcement_history(&memory.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].strength_after >= history[0].strength_before);
    }

    #[test]
    fn test_reinforce_negative_boost_rejected() {
        let (engine, store, clock, _dir) = engine();
        let memory = seed(&store, Sector::Episodic, clock.now());
        let err = engine.reinforce("u1", &memory.id, -0.1).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_reinforce_by_type_explicit_requires_boost() {
        let (engine, store, clock, _dir) = engine();
        let memory = seed(&store, Sector::Episodic, clock.now());
        let err = engine
            .reinforce_by_type("u1", &memory.id, ReinforcementKind::Explicit, None)
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_reinforce_by_type_importance_uses_configured_boost() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let memory = seed(&store, Sector::Episodic, now);
        store.apply_strengths(&[(memory.id.clone(), 0.5)], now).unwrap();

        let entry = engine
            .reinforce_by_type("u1", &memory.id, ReinforcementKind::Importance, None)
            .unwrap();
        assert!((entry.boost - 0.25).abs() < 1e-12);
        assert!((entry.strength_after - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_auto_reinforce_bumps_access_count() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        let memory = seed(&store, Sector::Episodic, now);
        store.apply_strengths(&[(memory.id.clone(), 0.5)], now).unwrap();

        let entry = engine.auto_reinforce_on_access("u1", &memory.id).unwrap();
        assert!(entry.is_some());
        let stored = store.get_memory("u1", &memory.id).unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
        assert!((stored.strength - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_auto_reinforce_at_full_strength_only_counts() {
        let (engine, store, clock, _dir) = engine();
        let memory = seed(&store, Sector::Episodic, clock.now());

        let entry = engine.auto_reinforce_on_access("u1", &memory.id).unwrap();
        assert!(entry.is_none());
        let stored = store.get_memory("u1", &memory.id).unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
        assert_eq!(stored.strength, 1.0);
    }

    #[test]
    fn test_run_maintenance_decays_and_prunes() {
        let (engine, store, clock, _dir) = engine();
        let now = clock.now();
        for i in 0..5 {
            let mut healthy = Memory::from_input(
                MemoryInput {
                    user_id: "u1".to_string(),
                    session_id: None,
                    content: format!("healthy {i}"),
                    sector: Sector::Episodic,
                    salience: 0.5,
                },
                now,
            );
            healthy.access_count = 3;
            store.insert_memory(&healthy).unwrap();
        }
        let mut weak = Memory::from_input(
            MemoryInput {
                user_id: "u1".to_string(),
                session_id: None,
                content: "weak".to_string(),
                sector: Sector::Episodic,
                salience: 0.5,
            },
            now,
        );
        weak.strength = 0.02;
        weak.access_count = 3;
        store.insert_memory(&weak).unwrap();

        clock.advance(Duration::days(3));
        let report = engine
            .run_maintenance(
                "u1",
                MaintenanceOptions {
                    batch_size: 2,
                    prune: true,
                    criteria: PruningCriteria::default(),
                },
            )
            .unwrap();

        assert_eq!(report.processed, 6);
        assert!(report.errors.is_empty());
        // Only the weak memory fell below the strength threshold
        assert_eq!(report.pruned, 1);
        assert!(store.get_memory("u1", &weak.id).unwrap().is_none());
    }
}
