//! Memory record types
//!
//! Each memory combines:
//! - Content and provenance
//! - A sector classification that drives its decay multiplier
//! - Strength (decays, reinforced on access) and salience (immutable)
//! - Consolidation state and embedding status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SECTORS
// ============================================================================

/// Memory sector classification.
///
/// The sector determines the decay multiplier applied on top of the base
/// lambda: episodic memories fade fast, procedural knowledge persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    /// A specific experience or event
    #[default]
    Episodic,
    /// Distilled general knowledge (consolidation summaries land here)
    Semantic,
    /// How-to knowledge and skills
    Procedural,
    /// Affect-laden content
    Emotional,
    /// Self-referential observations
    Reflective,
}

impl Sector {
    /// All sectors, in canonical order.
    pub const ALL: [Sector; 5] = [
        Sector::Episodic,
        Sector::Semantic,
        Sector::Procedural,
        Sector::Emotional,
        Sector::Reflective,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Episodic => "episodic",
            Sector::Semantic => "semantic",
            Sector::Procedural => "procedural",
            Sector::Emotional => "emotional",
            Sector::Reflective => "reflective",
        }
    }

    /// Parse from string name; `None` for unknown sectors.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "episodic" => Some(Sector::Episodic),
            "semantic" => Some(Sector::Semantic),
            "procedural" => Some(Sector::Procedural),
            "emotional" => Some(Sector::Emotional),
            "reflective" => Some(Sector::Reflective),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// EMBEDDING STATUS
// ============================================================================

/// Embedding generation state for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    /// Not yet embedded
    #[default]
    Pending,
    /// Semantic vector stored
    Complete,
    /// Provider failed; memory remains searchable by content only
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Complete => "complete",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s {
            "complete" => EmbeddingStatus::Complete,
            "failed" => EmbeddingStatus::Failed,
            _ => EmbeddingStatus::Pending,
        }
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A memory in the active set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Session the memory was captured in, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The actual content
    pub content: String,
    /// Primary sector classification
    pub primary_sector: Sector,
    /// Importance at creation, in [0,1]; immutable under decay
    pub salience: f64,
    /// Current strength in [0,1]; decays over time, boosted on access
    pub strength: f64,
    /// Per-memory decay lambda override; sector config applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay_rate: Option<f64>,
    /// Number of reinforcing accesses
    pub access_count: i64,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last accessed or reinforced
    pub last_accessed_at: DateTime<Utc>,
    /// Summary memory this was consolidated into; terminal once set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidated_into: Option<String>,
    /// Embedding generation state
    pub embedding_status: EmbeddingStatus,
}

impl Memory {
    /// Create a memory from validated input, stamping id and timestamps.
    pub fn from_input(input: MemoryInput, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: input.user_id,
            session_id: input.session_id,
            content: input.content,
            primary_sector: input.sector,
            salience: input.salience.clamp(0.0, 1.0),
            strength: 1.0,
            decay_rate: None,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
            consolidated_into: None,
            embedding_status: EmbeddingStatus::Pending,
        }
    }

    /// Whether the memory has been folded into a semantic summary.
    pub fn is_consolidated(&self) -> bool {
        self.consolidated_into.is_some()
    }

    /// Age in fractional days relative to `now`, floored at zero.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.created_at).num_milliseconds();
        (millis.max(0) as f64) / 86_400_000.0
    }
}

/// Input for creating a memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInput {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub sector: Sector,
    #[serde(default = "default_salience")]
    pub salience: f64,
}

fn default_salience() -> f64 {
    0.5
}

// ============================================================================
// LINKS
// ============================================================================

/// Kind of a waypoint edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Summary ↔ source edge written by consolidation
    Consolidation,
    /// Semantic proximity edge
    Similarity,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Consolidation => "consolidation",
            LinkKind::Similarity => "similarity",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "consolidation" => Some(LinkKind::Consolidation),
            "similarity" => Some(LinkKind::Similarity),
            _ => None,
        }
    }
}

/// A weighted edge between two memories.
///
/// Deleting either endpoint must delete the link; the pruning service and
/// consolidation cascade rules enforce this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryLink {
    pub source_id: String,
    pub target_id: String,
    pub kind: LinkKind,
    /// Edge weight in [0,1]
    pub weight: f64,
}

// ============================================================================
// REINFORCEMENT HISTORY
// ============================================================================

/// Why a strength boost was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReinforcementKind {
    /// Implicit boost on retrieval
    Access,
    /// Caller-supplied boost
    Explicit,
    /// Importance-driven boost (larger configured step)
    Importance,
}

impl ReinforcementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReinforcementKind::Access => "access",
            ReinforcementKind::Explicit => "explicit",
            ReinforcementKind::Importance => "importance",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "access" => Some(ReinforcementKind::Access),
            "explicit" => Some(ReinforcementKind::Explicit),
            "importance" => Some(ReinforcementKind::Importance),
            _ => None,
        }
    }
}

/// One recorded strength boost.
///
/// `strength_after >= strength_before`, both in [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinforcementEntry {
    pub memory_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ReinforcementKind,
    pub boost: f64,
    pub strength_before: f64,
    pub strength_after: f64,
}

// ============================================================================
// CONSOLIDATION RECORD
// ============================================================================

/// History row written when a cluster is consolidated.
///
/// Every source's `consolidated_into` equals `summary_id` once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationRecord {
    pub summary_id: String,
    pub source_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub topic: String,
}

// ============================================================================
// ARCHIVED MEMORY
// ============================================================================

/// A memory moved out of the active set.
///
/// Created by the archive manager; removed by restore (which re-materializes
/// an active memory) or by explicit purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedMemory {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub content: String,
    pub primary_sector: Sector,
    pub salience: f64,
    pub strength: f64,
    pub access_count: i64,
    pub original_created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}
