//! Health Monitor
//!
//! Aggregates per-user storage, counts, forgetting candidates, the
//! consolidation queue, and live consolidation progress into one report,
//! with rule-based recommendations.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::consolidation::{ConsolidationProgress, ConsolidationScheduler};
use crate::memory::Sector;
use crate::storage::{AgeBuckets, ForgettingCounts, MemoryStore, StoreError};

/// Default per-user storage quota: 1 GiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 1024 * 1024 * 1024;

/// Assumed per-memory consolidation cost for the queue estimate.
const QUEUE_MS_PER_MEMORY: i64 = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Health error type, classified from storage failures.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    /// Schema has never been migrated
    #[error("Schema not initialized: {0}")]
    SchemaNotInitialized(String),
    /// Schema is older than the code expects
    #[error("Schema outdated: {0}")]
    SchemaOutdated(String),
    /// Connection-level failure
    #[error("Connection error: {0}")]
    Connection(String),
    /// Anything else
    #[error("Health check failed: {0}")]
    GetHealth(String),
}

impl HealthError {
    pub fn code(&self) -> &'static str {
        match self {
            HealthError::SchemaNotInitialized(_) => "SCHEMA_NOT_INITIALIZED",
            HealthError::SchemaOutdated(_) => "SCHEMA_OUTDATED",
            HealthError::Connection(_) => "CONNECTION_ERROR",
            HealthError::GetHealth(_) => "GET_HEALTH_ERROR",
        }
    }

    fn classify(error: StoreError) -> Self {
        if error.is_missing_table() {
            HealthError::SchemaNotInitialized(error.to_string())
        } else if error.is_missing_column() {
            HealthError::SchemaOutdated(error.to_string())
        } else if error.is_connection() {
            HealthError::Connection(error.to_string())
        } else {
            HealthError::GetHealth(error.to_string())
        }
    }
}

// ============================================================================
// REPORT SHAPES
// ============================================================================

/// Storage usage against quota.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    pub bytes_used: u64,
    pub quota_bytes: u64,
    /// Capped at 100, two-decimal precision
    pub usage_percent: f64,
}

/// Pending consolidation work.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationQueue {
    pub pending: i64,
    pub estimated_time_ms: i64,
}

/// Recommendation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Optimization,
    Pruning,
    Archiving,
    Consolidation,
}

/// Recommendation urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

/// One actionable recommendation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: RecommendationPriority,
    pub message: String,
}

/// The full health report for a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub storage: StorageHealth,
    pub counts_by_sector: HashMap<Sector, i64>,
    pub counts_by_age: AgeBuckets,
    pub forgetting_candidates: ForgettingCounts,
    pub consolidation_queue: ConsolidationQueue,
    pub active_consolidation: ConsolidationProgress,
    pub recommendations: Vec<Recommendation>,
}

// ============================================================================
// MONITOR
// ============================================================================

/// Fans out the health queries and assembles the report.
pub struct HealthMonitor {
    store: Arc<MemoryStore>,
    scheduler: Option<Arc<ConsolidationScheduler>>,
    clock: Arc<dyn Clock>,
    quota_bytes: u64,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<MemoryStore>,
        scheduler: Option<Arc<ConsolidationScheduler>>,
        clock: Arc<dyn Clock>,
        quota_bytes: u64,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            quota_bytes: quota_bytes.max(1),
        }
    }

    /// Collect the full report. Metric queries run concurrently.
    pub async fn get_health(&self, user_id: &str) -> Result<HealthReport, HealthError> {
        let now = self.clock.now();

        let (bytes_used, sectors, ages, forgetting, queue_count) = tokio::join!(
            async { self.store.storage_bytes(user_id) },
            async { self.store.counts_by_sector(user_id) },
            async { self.store.counts_by_age(user_id, now) },
            async { self.store.forgetting_counts(user_id, now) },
            async { self.store.consolidation_queue_count(user_id) },
        );

        let bytes_used = bytes_used.map_err(HealthError::classify)?;
        let counts_by_sector = sectors.map_err(HealthError::classify)?;
        let counts_by_age = ages.map_err(HealthError::classify)?;
        let forgetting_candidates = forgetting.map_err(HealthError::classify)?;
        let queue_count = queue_count.map_err(HealthError::classify)?;

        let usage_percent =
            ((bytes_used as f64 / self.quota_bytes as f64 * 100.0).min(100.0) * 100.0).round()
                / 100.0;
        let storage = StorageHealth {
            bytes_used,
            quota_bytes: self.quota_bytes,
            usage_percent,
        };
        let consolidation_queue = ConsolidationQueue {
            pending: queue_count,
            estimated_time_ms: queue_count * QUEUE_MS_PER_MEMORY,
        };
        let active_consolidation = self
            .scheduler
            .as_ref()
            .map(|s| s.progress())
            .unwrap_or_else(ConsolidationProgress::idle);

        let episodic = counts_by_sector.get(&Sector::Episodic).copied().unwrap_or(0);
        let recommendations = recommendations(
            storage.usage_percent,
            forgetting_candidates.total,
            counts_by_age.older,
            episodic,
        );

        Ok(HealthReport {
            storage,
            counts_by_sector,
            counts_by_age,
            forgetting_candidates,
            consolidation_queue,
            active_consolidation,
            recommendations,
        })
    }
}

/// Fixed recommendation rule set.
fn recommendations(
    usage_percent: f64,
    forgetting_total: i64,
    older: i64,
    episodic: i64,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    if usage_percent >= 80.0 {
        out.push(Recommendation {
            kind: RecommendationKind::Optimization,
            priority: if usage_percent >= 90.0 {
                RecommendationPriority::High
            } else {
                RecommendationPriority::Medium
            },
            message: format!("Storage is at {usage_percent:.2}% of quota; prune or archive memories"),
        });
    }

    if forgetting_total > 100 {
        out.push(Recommendation {
            kind: RecommendationKind::Pruning,
            priority: if forgetting_total > 500 {
                RecommendationPriority::High
            } else {
                RecommendationPriority::Medium
            },
            message: format!("{forgetting_total} memories are forgetting candidates"),
        });
    }

    if older > 100 {
        out.push(Recommendation {
            kind: RecommendationKind::Archiving,
            priority: if older > 500 {
                RecommendationPriority::Medium
            } else {
                RecommendationPriority::Low
            },
            message: format!("{older} memories are older than a month; consider archiving"),
        });
    }

    if episodic > 50 {
        out.push(Recommendation {
            kind: RecommendationKind::Consolidation,
            priority: if episodic > 200 {
                RecommendationPriority::Medium
            } else {
                RecommendationPriority::Low
            },
            message: format!("{episodic} episodic memories could be consolidated"),
        });
    }

    out
}
