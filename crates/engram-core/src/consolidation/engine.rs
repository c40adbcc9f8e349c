//! Consolidation Engine
//!
//! Compresses clusters of related episodic memories into a single semantic
//! summary memory. The commit is atomic: summary insert, bidirectional
//! links, strength reduction, terminal `consolidated_into` markers, and the
//! history row go in together or not at all.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::memory::{ConsolidationRecord, EmbeddingStatus, Memory, Sector};
use crate::providers::{EmbeddingProvider, LlmProvider, ProviderError};
use crate::storage::{MemoryStore, StoreError};

use super::cluster::{self, ClusterItem, MemoryCluster};
use super::progress::{ConsolidationPhase, ProgressTracker};

/// Clusters below this size never produce a summary.
pub const MIN_CLUSTER_SIZE_FOR_SUMMARY: usize = 5;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Consolidation error type
#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    /// Cluster has fewer members than the minimum
    #[error("Cluster too small: {size} members, need {min}")]
    ClusterTooSmall { size: usize, min: usize },
    /// No LLM wired up
    #[error("LLM provider not configured")]
    LlmNotConfigured,
    /// LLM call failed
    #[error("Summary generation failed: {0}")]
    LlmGeneration(String),
    /// Cluster members resolved to no content
    #[error("No memory contents found for cluster")]
    NoMemoryContents,
    /// No cluster member could be loaded for ownership
    #[error("Centroid memory not found")]
    CentroidNotFound,
    /// Clustering failed
    #[error("Clustering failed: {0}")]
    Clustering(String),
    /// Storage failure (transaction rolled back)
    #[error("Consolidation failed: {0}")]
    Store(#[from] StoreError),
}

impl ConsolidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ConsolidationError::ClusterTooSmall { .. } => "CLUSTER_TOO_SMALL",
            ConsolidationError::LlmNotConfigured => "LLM_NOT_CONFIGURED",
            ConsolidationError::LlmGeneration(_) => "LLM_GENERATION_ERROR",
            ConsolidationError::NoMemoryContents => "NO_MEMORY_CONTENTS",
            ConsolidationError::CentroidNotFound => "CENTROID_NOT_FOUND",
            ConsolidationError::Clustering(_) => "CLUSTERING_ERROR",
            ConsolidationError::Store(_) => "CONSOLIDATION_ERROR",
        }
    }
}

// ============================================================================
// CONFIG & RESULTS
// ============================================================================

/// Consolidation tuning.
#[derive(Debug, Clone, Copy)]
pub struct ConsolidationConfig {
    /// Cosine similarity needed to absorb a memory into a cluster
    pub similarity_threshold: f64,
    /// Minimum members for a cluster to survive
    pub min_cluster_size: usize,
    /// Maximum memories loaded per run
    pub batch_size: usize,
    /// Multiplicative strength reduction applied to consolidated sources
    pub strength_reduction_factor: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            min_cluster_size: MIN_CLUSTER_SIZE_FOR_SUMMARY,
            batch_size: 100,
            strength_reduction_factor: 0.5,
        }
    }
}

/// Result of consolidating one cluster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationOutcome {
    pub summary_id: String,
    pub source_count: usize,
    pub topic: String,
}

/// Report for a whole run. Per-cluster failures are collected; the run
/// continues past them.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationRunReport {
    pub clusters_identified: usize,
    pub clusters_consolidated: usize,
    pub memories_consolidated: usize,
    pub errors: Vec<String>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Cluster identification and LLM-backed summarization.
pub struct ConsolidationEngine {
    store: Arc<MemoryStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    clock: Arc<dyn Clock>,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        llm: Option<Arc<dyn LlmProvider>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            clock,
        }
    }

    /// Identify clusters of related episodic memories for a user.
    ///
    /// Schema problems and embedding load failures degrade to an empty or
    /// smaller result rather than failing the run.
    pub fn identify_clusters(
        &self,
        user_id: &str,
        config: &ConsolidationConfig,
    ) -> Result<Vec<MemoryCluster>, ConsolidationError> {
        let memories = match self
            .store
            .load_consolidation_batch(user_id, config.batch_size as i64)
        {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "consolidation batch load failed");
                return Ok(Vec::new());
            }
        };

        let mut items = Vec::with_capacity(memories.len());
        for memory in memories {
            match self.store.get_embedding(&memory.id, Sector::Semantic) {
                Ok(Some(vector)) => items.push(ClusterItem {
                    id: memory.id,
                    content: memory.content,
                    vector,
                }),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(memory_id = %memory.id, error = %e, "embedding load failed");
                }
            }
        }

        Ok(cluster::identify(
            &items,
            config.similarity_threshold,
            config.min_cluster_size,
        ))
    }

    /// Generate the summary text for a cluster via the LLM.
    pub async fn generate_summary(
        &self,
        cluster: &MemoryCluster,
    ) -> Result<String, ConsolidationError> {
        if cluster.member_ids.len() < MIN_CLUSTER_SIZE_FOR_SUMMARY {
            return Err(ConsolidationError::ClusterTooSmall {
                size: cluster.member_ids.len(),
                min: MIN_CLUSTER_SIZE_FOR_SUMMARY,
            });
        }
        let llm = self
            .llm
            .as_ref()
            .ok_or(ConsolidationError::LlmNotConfigured)?;

        let contents = self.store.contents_for_ids(&cluster.member_ids)?;
        if contents.is_empty() {
            return Err(ConsolidationError::NoMemoryContents);
        }

        let mut prompt = format!(
            "Consolidate the following {} related memories about \"{}\" into a single \
             concise summary that preserves the key facts:\n\n",
            contents.len(),
            cluster.topic
        );
        for (_, content) in &contents {
            prompt.push_str("- ");
            prompt.push_str(content);
            prompt.push('\n');
        }

        let summary = llm
            .generate(&prompt, "You are a memory consolidation assistant.")
            .await
            .map_err(|e: ProviderError| ConsolidationError::LlmGeneration(e.to_string()))?;
        Ok(summary.trim().to_string())
    }

    /// Consolidate one cluster: generate the summary and commit it with all
    /// side effects in one transaction.
    pub async fn consolidate(
        &self,
        cluster: &MemoryCluster,
        config: &ConsolidationConfig,
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        let summary_text = self.generate_summary(cluster).await?;

        // Owner lookup: centroid first, then any other member
        let mut owner: Option<Memory> = self.store.get_memory_by_id(&cluster.centroid_id)?;
        if owner.is_none() {
            for member_id in &cluster.member_ids {
                owner = self.store.get_memory_by_id(member_id)?;
                if owner.is_some() {
                    break;
                }
            }
        }
        let owner = owner.ok_or(ConsolidationError::CentroidNotFound)?;

        let summary_vector = self
            .embedder
            .as_ref()
            .and_then(|embedder| embedder.embed(&summary_text).ok());

        let now = self.clock.now();
        let summary = Memory {
            id: Uuid::new_v4().to_string(),
            user_id: owner.user_id.clone(),
            session_id: owner.session_id.clone(),
            content: summary_text,
            primary_sector: Sector::Semantic,
            salience: owner.salience,
            strength: 1.0,
            decay_rate: None,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
            consolidated_into: None,
            embedding_status: if summary_vector.is_some() {
                EmbeddingStatus::Complete
            } else {
                EmbeddingStatus::Pending
            },
        };
        let record = ConsolidationRecord {
            summary_id: summary.id.clone(),
            source_ids: cluster.member_ids.clone(),
            created_at: now,
            topic: cluster.topic.clone(),
        };

        self.store.commit_consolidation(
            &summary,
            summary_vector.as_deref(),
            &cluster.member_ids,
            config.strength_reduction_factor,
            &record,
        )?;

        tracing::info!(
            summary_id = %summary.id,
            sources = cluster.member_ids.len(),
            topic = %cluster.topic,
            "consolidated cluster"
        );
        Ok(ConsolidationOutcome {
            summary_id: summary.id,
            source_count: cluster.member_ids.len(),
            topic: cluster.topic.clone(),
        })
    }

    /// Identify clusters and consolidate each in sequence. A failed cluster
    /// is recorded and the remainder proceeds.
    pub async fn run_consolidation(
        &self,
        user_id: &str,
        config: &ConsolidationConfig,
        progress: Option<&ProgressTracker>,
    ) -> Result<ConsolidationRunReport, ConsolidationError> {
        if let Some(tracker) = progress {
            tracker.set_phase(ConsolidationPhase::IdentifyingClusters);
        }
        let clusters = self.identify_clusters(user_id, config)?;
        let memories_total: u64 = clusters.iter().map(|c| c.member_ids.len() as u64).sum();
        if let Some(tracker) = progress {
            tracker.set_clusters_identified(clusters.len() as u64, memories_total);
            tracker.set_phase(ConsolidationPhase::GeneratingSummaries);
        }

        let mut report = ConsolidationRunReport {
            clusters_identified: clusters.len(),
            ..Default::default()
        };

        for cluster in &clusters {
            if let Some(tracker) = progress {
                tracker.set_phase(ConsolidationPhase::Consolidating);
            }
            match self.consolidate(cluster, config).await {
                Ok(outcome) => {
                    report.clusters_consolidated += 1;
                    report.memories_consolidated += outcome.source_count;
                    if let Some(tracker) = progress {
                        tracker.record_cluster(outcome.source_count as u64);
                    }
                }
                Err(e) => {
                    tracing::warn!(topic = %cluster.topic, error = %e, "cluster consolidation failed");
                    report
                        .errors
                        .push(format!("cluster \"{}\": {e}", cluster.topic));
                    if let Some(tracker) = progress {
                        tracker.record_skipped(cluster.member_ids.len() as u64);
                    }
                }
            }
        }

        Ok(report)
    }
}
