//! # Engram Core
//!
//! Cognitive memory and reasoning engine. Two tightly coupled subsystems:
//!
//! ## Memory lifecycle
//!
//! - **Temporal decay**: `strength * exp(-lambda * age_days)` with
//!   sector-specific rates and a configurable floor
//! - **Reinforcement**: access, explicit, and importance boosts with a
//!   full history trail
//! - **Pruning**: candidate identification with reason precedence and
//!   transactional deletion with graph cleanup
//! - **Consolidation**: similarity clustering of episodic memories into
//!   LLM-generated semantic summaries, committed atomically
//! - **Archival**: age-/id-based moves with search and restore-on-access
//! - **Scheduling**: cron-gated maintenance with retry, exponential
//!   backoff, and load-based suppression
//! - **Health**: per-user metrics, live consolidation progress, and
//!   rule-based recommendations
//!
//! ## Parallel reasoning
//!
//! - Four stream variants (analytical, creative, critical, synthetic)
//!   behind one capability trait
//! - A coordinator with a shared wall-clock budget and 25/50/75% sync
//!   checkpoints
//! - Synthesis with insight deduplication, prioritized recommendations,
//!   and quality scoring
//! - Conflict detection, classification, severity scoring, and
//!   per-kind resolution frameworks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{MemoryInput, MemoryStore, Sector};
//!
//! let store = std::sync::Arc::new(MemoryStore::open(path)?);
//! let memory = Memory::from_input(
//!     MemoryInput {
//!         user_id: "user-1".into(),
//!         content: "The deploy failed at the migration step".into(),
//!         sector: Sector::Episodic,
//!         ..Default::default()
//!     },
//!     chrono::Utc::now(),
//! );
//! store.insert_memory(&memory)?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod archive;
pub mod clock;
pub mod config;
pub mod consolidation;
pub mod decay;
pub mod health;
pub mod memory;
pub mod providers;
pub mod pruning;
pub mod reasoning;
pub mod session;
pub mod storage;
pub mod vectors;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Memory data model
pub use memory::{
    ArchivedMemory, ConsolidationRecord, EmbeddingStatus, LinkKind, Memory, MemoryInput,
    MemoryLink, ReinforcementEntry, ReinforcementKind, Sector,
};

// Configuration
pub use config::{ConfigError, DecayConfig, DecayConfigPatch, SectorConfig};

// Clock
pub use clock::{Clock, ManualClock, SystemClock};

// Storage layer
pub use storage::{
    AgeBuckets, ArchiveOutcome, ForgettingCounts, MemoryStore, PruneOutcome, StoreError,
};

// Lifecycle engines
pub use archive::{
    ArchiveConfig, ArchiveError, ArchiveHit, ArchiveManager, ArchiveResult, ArchiveStats,
    RestoreResult,
};
pub use decay::{
    BatchDecayStatus, DecayEngine, DecayError, MaintenanceOptions, MaintenanceReport,
};
pub use pruning::{
    PruneAllOutcome, PruneCandidate, PruneError, PruneReason, PruningCriteria, PruningService,
};

// Consolidation
pub use consolidation::{
    ConsolidationConfig, ConsolidationEngine, ConsolidationError, ConsolidationOutcome,
    ConsolidationPhase, ConsolidationProgress, ConsolidationRunReport, ConsolidationRunner,
    ConsolidationScheduler, CronSchedule, LoadProbe, MemoryCluster, ProgressTracker,
    SchedulerConfig, SchedulerError, UserSource, MIN_CLUSTER_SIZE_FOR_SUMMARY,
};

// Health
pub use health::{
    HealthError, HealthMonitor, HealthReport, Recommendation as HealthRecommendation,
    RecommendationKind, RecommendationPriority, StorageHealth, DEFAULT_QUOTA_BYTES,
};

// Providers
pub use providers::{
    EmbeddingProvider, HashingEmbedder, LlmProvider, ProviderError, DEFAULT_EMBEDDING_DIMENSION,
};

// Reasoning
pub use reasoning::{
    AnalyticalStream, Conflict, ConflictEvidence, ConflictKind, ConflictPattern,
    ConflictResolutionEngine, ConflictSeverity, CoordinatedOutcome, CoordinationMetrics,
    CreativeStream, CriticalStream, EventSink, Insight, QualityScores, ReasoningError,
    ReasoningEvent, ReasoningProblem, ReasoningStream, Recommendation, ResolutionFramework,
    StreamContext, StreamCoordinator, StreamOutput, StreamResult, StreamStatus, StreamType,
    SyntheticStream, SynthesizedInsight, SynthesizedResult, Synthesizer, streams_for_types,
};

// Sessions
pub use session::{Session, SessionKind, SessionStatus, SessionStore, SyncCheckpoints};

// Vector math
pub use vectors::{cosine_similarity, dot_product, mean_vector, normalize};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ArchiveManager, Clock, ConsolidationEngine, ConsolidationScheduler, DecayConfig,
        DecayEngine, EmbeddingProvider, HealthMonitor, LlmProvider, Memory, MemoryInput,
        MemoryStore, PruningService, ReasoningProblem, Sector, SectorConfig, SessionStore,
        StreamCoordinator, StreamType, SystemClock, SynthesizedResult,
    };
}
