//! Memory lifecycle journeys: ingest, decay, reinforce, prune, archive,
//! consolidate, and the scheduler's gating behavior.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use engram_core::{
    ArchiveConfig, ArchiveManager, Clock, ConsolidationConfig, ConsolidationEngine,
    ConsolidationScheduler, DecayEngine, EmbeddingStatus, LinkKind, ManualClock, Memory,
    MemoryInput, MemoryLink, MemoryStore, PruningCriteria, PruningService, SchedulerConfig,
    SchedulerError, Sector, SectorConfig,
};
use engram_e2e_tests::ScriptedLlm;

struct Fixture {
    store: Arc<MemoryStore>,
    config: Arc<SectorConfig>,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self {
            store: Arc::new(MemoryStore::open(&dir.path().join("e2e.db")).unwrap()),
            config: Arc::new(SectorConfig::default()),
            clock: Arc::new(ManualClock::new(Utc::now())),
            _dir: dir,
        }
    }

    fn pruning(&self) -> Arc<PruningService> {
        Arc::new(PruningService::new(
            self.store.clone(),
            self.config.clone(),
            self.clock.clone(),
        ))
    }

    fn decay(&self) -> DecayEngine {
        DecayEngine::new(
            self.store.clone(),
            self.config.clone(),
            self.clock.clone(),
            self.pruning(),
        )
    }

    fn seed(&self, content: &str, sector: Sector) -> Memory {
        let memory = Memory::from_input(
            MemoryInput {
                user_id: "u1".to_string(),
                session_id: None,
                content: content.to_string(),
                sector,
                salience: 0.5,
            },
            self.clock.now(),
        );
        self.store.insert_memory(&memory).unwrap();
        memory
    }
}

#[test]
fn decay_journey_episodic_two_days() {
    let fx = Fixture::new();
    let decay = fx.decay();
    let memory = fx.seed("the deploy failed at the migration step", Sector::Episodic);

    fx.clock.advance(Duration::days(2));
    let strength = decay.apply_decay("u1", &memory.id).unwrap();
    // base 0.02 * episodic 1.5 over 2 days
    assert!((strength - (-0.03f64 * 2.0).exp()).abs() < 1e-6);
    assert!((strength - 0.9418).abs() < 1e-3);

    // Semantic memories fade slower than episodic ones
    let semantic = fx.seed("postgres uses mvcc", Sector::Semantic);
    fx.clock.advance(Duration::days(2));
    let semantic_strength = decay.apply_decay("u1", &semantic.id).unwrap();
    let episodic_strength = decay.apply_decay("u1", &memory.id).unwrap();
    assert!(semantic_strength > episodic_strength);
}

#[test]
fn reinforcement_recovers_decayed_strength() {
    let fx = Fixture::new();
    let decay = fx.decay();
    let memory = fx.seed("remember the incident review", Sector::Episodic);

    fx.clock.advance(Duration::days(30));
    let weakened = decay.apply_decay("u1", &memory.id).unwrap();
    assert!(weakened < 1.0);

    // Three accesses, each boosting by the configured access boost
    for _ in 0..3 {
        decay.auto_reinforce_on_access("u1", &memory.id).unwrap();
    }
    let recovered = fx.store.get_memory("u1", &memory.id).unwrap().unwrap();
    assert!(recovered.strength > weakened);
    assert!(recovered.strength <= 1.0);
    assert_eq!(recovered.access_count, 3);

    // History is monotone within each entry
    let history = fx.store.reinforcement_history(&memory.id).unwrap();
    assert_eq!(history.len(), 3);
    for entry in &history {
        assert!(entry.strength_after >= entry.strength_before);
        assert!((0.0..=1.0).contains(&entry.strength_after));
    }
}

#[test]
fn prune_preview_matches_actual_exactly() {
    // Three memories: 1500 content bytes, 3000 embedding bytes, 5 links
    let fx = Fixture::new();
    let pruning = fx.pruning();

    let ids: Vec<String> = (0..3)
        .map(|_| {
            let memory = fx.seed(&"x".repeat(500), Sector::Episodic);
            fx.store
                .upsert_embedding(&memory.id, Sector::Semantic, &vec![0.5f32; 250])
                .unwrap();
            memory.id
        })
        .collect();
    let keeper = fx.seed("stays behind", Sector::Episodic);
    for (i, (source, target)) in [
        (&ids[0], &ids[1]),
        (&ids[1], &ids[2]),
        (&ids[2], &ids[0]),
        (&ids[0], &keeper.id),
        (&keeper.id, &ids[1]),
    ]
    .iter()
    .enumerate()
    {
        fx.store
            .insert_link(&MemoryLink {
                source_id: (*source).clone(),
                target_id: (*target).clone(),
                kind: if i % 2 == 0 {
                    LinkKind::Similarity
                } else {
                    LinkKind::Consolidation
                },
                weight: 0.5,
            })
            .unwrap();
    }

    let preview = pruning.preview_pruning("u1", &ids).unwrap();
    assert_eq!(preview.deleted_count, 3);
    assert_eq!(preview.freed_bytes, 4500);
    assert_eq!(preview.orphaned_links_removed, 5);

    let actual = pruning.prune("u1", &ids).unwrap();
    assert_eq!(preview, actual);

    // Integrity: nothing references a pruned id
    for id in &ids {
        assert!(fx.store.get_memory("u1", id).unwrap().is_none());
        assert!(fx.store.get_embedding(id, Sector::Semantic).unwrap().is_none());
        assert_eq!(fx.store.links_touching(&[id.clone()]).unwrap(), 0);
    }
    assert!(fx.store.get_memory("u1", &keeper.id).unwrap().is_some());
}

#[test]
fn pruning_reason_precedence() {
    let fx = Fixture::new();
    let pruning = fx.pruning();
    let now = fx.clock.now();

    let mut low_strength = Memory::from_input(
        MemoryInput {
            user_id: "u1".to_string(),
            session_id: None,
            content: "A".to_string(),
            sector: Sector::Episodic,
            salience: 0.5,
        },
        now - Duration::days(10),
    );
    low_strength.strength = 0.05;
    low_strength.access_count = 5;
    fx.store.insert_memory(&low_strength).unwrap();

    let mut old = Memory::from_input(
        MemoryInput {
            user_id: "u1".to_string(),
            session_id: None,
            content: "B".to_string(),
            sector: Sector::Episodic,
            salience: 0.5,
        },
        now - Duration::days(200),
    );
    old.strength = 0.5;
    old.access_count = 10;
    fx.store.insert_memory(&old).unwrap();

    let mut unaccessed = Memory::from_input(
        MemoryInput {
            user_id: "u1".to_string(),
            session_id: None,
            content: "C".to_string(),
            sector: Sector::Episodic,
            salience: 0.5,
        },
        now - Duration::days(10),
    );
    unaccessed.strength = 0.5;
    unaccessed.access_count = 0;
    fx.store.insert_memory(&unaccessed).unwrap();

    let candidates = pruning
        .list_candidates("u1", PruningCriteria::default())
        .unwrap();
    let reasons: Vec<(&str, &str)> = candidates
        .iter()
        .map(|c| {
            let which = if c.memory_id == low_strength.id {
                "A"
            } else if c.memory_id == old.id {
                "B"
            } else {
                "C"
            };
            (which, c.reason.as_str())
        })
        .collect();
    assert_eq!(
        reasons,
        vec![("A", "low_strength"), ("B", "old_age"), ("C", "low_access")]
    );
}

#[test]
fn archive_search_restore_journey() {
    let fx = Fixture::new();
    let manager = ArchiveManager::new(fx.store.clone(), fx.clock.clone());

    let old = fx.seed("the summit happened in lisbon", Sector::Episodic);
    fx.store
        .upsert_embedding(&old.id, Sector::Semantic, &[0.1, 0.9])
        .unwrap();
    fx.clock.advance(Duration::days(120));
    let recent = fx.seed("yesterday's standup notes", Sector::Episodic);

    let archived = manager
        .archive_old(
            "u1",
            ArchiveConfig {
                age_threshold_days: 90,
                retain_embeddings: true,
            },
        )
        .unwrap();
    assert_eq!(archived.archived_count, 1);
    assert!(fx.store.get_memory("u1", &old.id).unwrap().is_none());
    assert!(fx.store.get_memory("u1", &recent.id).unwrap().is_some());

    let hits = manager.search_archive("u1", "lisbon", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].is_archived);

    // First read through the regular retrieve path restores transparently
    let restored = manager.restore_on_access("u1", &old.id).unwrap().unwrap();
    assert_eq!(restored.content, "the summit happened in lisbon");
    assert_eq!(restored.embedding_status, EmbeddingStatus::Complete);
    assert_eq!(manager.stats("u1").unwrap().count, 0);
    assert!(fx
        .store
        .get_embedding(&old.id, Sector::Semantic)
        .unwrap()
        .is_some());
}

fn seed_cluster(fx: &Fixture, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let memory = fx.seed(
                &format!("debugging the flaky integration test, attempt {i}"),
                Sector::Episodic,
            );
            fx.store
                .set_embedding_status(&memory.id, EmbeddingStatus::Complete)
                .unwrap();
            let mut vector = vec![1.0f32, 0.2, 0.0, 0.0];
            vector[1] += i as f32 * 0.01;
            fx.store
                .upsert_embedding(&memory.id, Sector::Semantic, &vector)
                .unwrap();
            memory.id
        })
        .collect()
}

#[tokio::test]
async fn consolidation_journey_commits_atomically() {
    let fx = Fixture::new();
    let llm = ScriptedLlm::new("the integration test is flaky because of timing");
    let engine = ConsolidationEngine::new(
        fx.store.clone(),
        Some(llm.clone()),
        None,
        fx.clock.clone(),
    );
    let ids = seed_cluster(&fx, 6);

    let clusters = engine
        .identify_clusters("u1", &ConsolidationConfig::default())
        .unwrap();
    assert_eq!(clusters.len(), 1);
    assert!(clusters[0].member_ids.len() >= 5);
    assert!(clusters[0].avg_similarity >= 0.75);
    assert!(clusters[0].topic.starts_with("debugging the flaky"));

    let report = engine
        .run_consolidation("u1", &ConsolidationConfig::default(), None)
        .await
        .unwrap();
    assert_eq!(report.clusters_consolidated, 1);
    assert_eq!(report.memories_consolidated, 6);
    assert!(report.errors.is_empty());

    // Every source is terminal, halved, and linked both ways
    let mut summary_id = None;
    for id in &ids {
        let source = fx.store.get_memory("u1", id).unwrap().unwrap();
        let target = source.consolidated_into.expect("source not consolidated");
        summary_id.get_or_insert(target.clone());
        assert_eq!(summary_id.as_ref(), Some(&target));
        assert!((source.strength - 0.5).abs() < 1e-9);
    }
    let summary_id = summary_id.unwrap();
    let summary = fx.store.get_memory("u1", &summary_id).unwrap().unwrap();
    assert_eq!(summary.primary_sector, Sector::Semantic);
    assert_eq!(
        summary.content,
        "the integration test is flaky because of timing"
    );
    assert_eq!(fx.store.links_touching(&[summary_id.clone()]).unwrap(), 12);
    let record = fx
        .store
        .consolidation_record_for_summary(&summary_id)
        .unwrap()
        .unwrap();
    assert_eq!(record.source_ids.len(), 6);

    // The consolidation queue drained
    assert_eq!(fx.store.consolidation_queue_count("u1").unwrap(), 0);

    // A second run finds nothing new
    let again = engine
        .run_consolidation("u1", &ConsolidationConfig::default(), None)
        .await
        .unwrap();
    assert_eq!(again.clusters_identified, 0);
}

#[tokio::test]
async fn undersized_cluster_never_consolidates() {
    let fx = Fixture::new();
    let llm = ScriptedLlm::new("should never be called");
    let engine =
        ConsolidationEngine::new(fx.store.clone(), Some(llm.clone()), None, fx.clock.clone());
    let ids = seed_cluster(&fx, 4);

    let clusters = engine
        .identify_clusters("u1", &ConsolidationConfig::default())
        .unwrap();
    assert!(clusters.is_empty());

    // No mutations anywhere
    for id in &ids {
        let memory = fx.store.get_memory("u1", id).unwrap().unwrap();
        assert!(memory.consolidated_into.is_none());
        assert_eq!(memory.strength, 1.0);
    }
    assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scheduler_load_gating_journey() {
    let fx = Fixture::new();
    let llm = ScriptedLlm::new("a summary");
    let engine = Arc::new(ConsolidationEngine::new(
        fx.store.clone(),
        Some(llm),
        None,
        fx.clock.clone(),
    ));
    seed_cluster(&fx, 6);

    // Overloaded system: scheduled runs skip, manual trigger errors
    let loaded = Arc::new(
        ConsolidationScheduler::new(
            engine.clone(),
            fx.store.clone(),
            Arc::new(|| 0.95),
            fx.clock.clone(),
            SchedulerConfig::default(),
        )
        .unwrap(),
    );
    loaded.run_scheduled_if_due().await; // primes the cron
    fx.clock.advance(Duration::days(2));
    loaded.run_scheduled_if_due().await;
    assert_eq!(
        loaded.last_error().as_deref(),
        Some("Skipped due to high system load")
    );
    let err = loaded.trigger_now("u1").await.unwrap_err();
    assert!(matches!(err, SchedulerError::LoadThresholdExceeded { .. }));
    assert_eq!(fx.store.consolidation_queue_count("u1").unwrap(), 6);

    // Idle system: the same trigger consolidates
    let idle = Arc::new(
        ConsolidationScheduler::new(
            engine,
            fx.store.clone(),
            Arc::new(|| 0.0),
            fx.clock.clone(),
            SchedulerConfig::default(),
        )
        .unwrap(),
    );
    let report = idle.trigger_now("u1").await.unwrap();
    assert_eq!(report.clusters_consolidated, 1);
    assert_eq!(fx.store.consolidation_queue_count("u1").unwrap(), 0);
}
