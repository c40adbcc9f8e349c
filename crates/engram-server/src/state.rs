//! Application State
//!
//! Explicit construction of the engine graph. Every component is built
//! here and injected where needed; there are no hidden globals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engram_core::{
    ArchiveManager, Clock, ConflictResolutionEngine, ConsolidationConfig, ConsolidationEngine,
    ConsolidationScheduler, DecayEngine, EmbeddingProvider, HashingEmbedder, HealthMonitor,
    LlmProvider, MemoryStore, PruningService, SchedulerConfig, SectorConfig, SessionStore,
    StreamCoordinator, SystemClock,
};

use crate::config::ServerConfig;
use crate::load;
use crate::sse::SseHub;

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<MemoryStore>,
    pub sector_config: Arc<SectorConfig>,
    pub clock: Arc<dyn Clock>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub decay: Arc<DecayEngine>,
    pub pruning: Arc<PruningService>,
    pub archive: Arc<ArchiveManager>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub scheduler: Arc<ConsolidationScheduler>,
    pub health: Arc<HealthMonitor>,
    pub conflicts: Arc<ConflictResolutionEngine>,
    pub coordinator: Arc<StreamCoordinator>,
    pub sessions: Arc<SessionStore>,
    pub hub: Arc<SseHub>,
}

pub type SharedState = Arc<AppState>;

/// Build the full engine graph from configuration.
///
/// `llm` is optional: without one, consolidation summaries fail with
/// `LLM_NOT_CONFIGURED` and reasoning streams run rule-based.
pub fn build(
    config: ServerConfig,
    llm: Option<Arc<dyn LlmProvider>>,
) -> anyhow::Result<SharedState> {
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./engram-data"));
    let store = Arc::new(MemoryStore::open(&data_dir.join("engram.db"))?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sector_config = Arc::new(SectorConfig::default());
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::default());

    let pruning = Arc::new(PruningService::new(
        store.clone(),
        sector_config.clone(),
        clock.clone(),
    ));
    let decay = Arc::new(DecayEngine::new(
        store.clone(),
        sector_config.clone(),
        clock.clone(),
        pruning.clone(),
    ));
    let archive = Arc::new(ArchiveManager::new(store.clone(), clock.clone()));
    let consolidation = Arc::new(ConsolidationEngine::new(
        store.clone(),
        llm.clone(),
        Some(embedder.clone()),
        clock.clone(),
    ));

    let scheduler_config = SchedulerConfig {
        cron_expression: config.scheduler_cron.clone(),
        enabled: config.scheduler_enabled,
        max_system_load: config.scheduler_max_load.clamp(0.0, 1.0),
        consolidation: ConsolidationConfig {
            batch_size: config.consolidation_batch_size.max(1),
            ..ConsolidationConfig::default()
        },
        ..SchedulerConfig::default()
    };
    let scheduler = Arc::new(ConsolidationScheduler::new(
        consolidation.clone(),
        store.clone(),
        Arc::new(load::system_load),
        clock.clone(),
        scheduler_config,
    )?);

    let health = Arc::new(HealthMonitor::new(
        store.clone(),
        Some(scheduler.clone()),
        clock.clone(),
        config.quota_bytes,
    ));
    let conflicts = Arc::new(ConflictResolutionEngine::new());
    let coordinator = Arc::new(StreamCoordinator::new(conflicts.clone()));
    let sessions = Arc::new(SessionStore::new(
        Duration::from_secs(config.session_ttl_secs),
        clock.clone(),
    ));
    let hub = Arc::new(SseHub::new());

    Ok(Arc::new(AppState {
        config,
        store,
        sector_config,
        clock,
        embedder,
        llm,
        decay,
        pruning,
        archive,
        consolidation,
        scheduler,
        health,
        conflicts,
        coordinator,
        sessions,
        hub,
    }))
}
