//! Parallel Reasoning Module
//!
//! Multi-stream reasoning over a problem:
//! - Four stream variants (analytical, creative, critical, synthetic)
//!   behind a narrow capability trait
//! - A coordinator with a shared deadline and 25/50/75% sync checkpoints
//! - A synthesizer merging stream outputs into one conclusion
//! - A conflict engine detecting, classifying, and scoring disagreements

mod conflict;
mod coordinator;
mod streams;
mod synthesis;

pub use conflict::{ConflictPattern, ConflictResolutionEngine};
pub use coordinator::{CoordinatedOutcome, CoordinationMetrics, StreamCoordinator};
pub use streams::{
    streams_for_types, AnalyticalStream, CreativeStream, CriticalStream, ReasoningStream,
    StreamContext, StreamOutput, SyntheticStream,
};
pub use synthesis::Synthesizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Reasoning error type
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReasoningError {
    /// The stream ran out of time
    #[error("Reasoning timed out")]
    Timeout,
    /// The caller cancelled
    #[error("Reasoning cancelled")]
    Cancelled,
    /// The stream failed
    #[error("Reasoning failed: {0}")]
    Failed(String),
}

impl ReasoningError {
    pub fn code(&self) -> &'static str {
        match self {
            ReasoningError::Timeout => "TIMEOUT",
            ReasoningError::Cancelled => "CANCELLED",
            ReasoningError::Failed(_) => "REASONING_ERROR",
        }
    }
}

// ============================================================================
// PROBLEM & STREAM TYPES
// ============================================================================

/// The problem handed to every stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningProblem {
    pub id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    /// Caller-supplied complexity hint in [0,1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
}

impl ReasoningProblem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            context: None,
            constraints: Vec::new(),
            goals: Vec::new(),
            complexity: None,
        }
    }
}

/// Reasoning mode of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Analytical,
    Creative,
    Critical,
    Synthetic,
}

impl StreamType {
    pub const ALL: [StreamType; 4] = [
        StreamType::Analytical,
        StreamType::Creative,
        StreamType::Critical,
        StreamType::Synthetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Analytical => "analytical",
            StreamType::Creative => "creative",
            StreamType::Critical => "critical",
            StreamType::Synthetic => "synthetic",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "analytical" => Some(StreamType::Analytical),
            "creative" => Some(StreamType::Creative),
            "critical" => Some(StreamType::Critical),
            "synthetic" => Some(StreamType::Synthetic),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal state of a stream run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Completed,
    TimedOut,
    Failed,
    Cancelled,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Completed => "completed",
            StreamStatus::TimedOut => "timed_out",
            StreamStatus::Failed => "failed",
            StreamStatus::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// One intermediate finding published by a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub content: String,
    pub confidence: f64,
    pub importance: f64,
    /// Stream that produced it
    pub source: String,
}

/// Final output of one stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResult {
    pub stream_id: String,
    pub stream_type: StreamType,
    pub conclusion: String,
    pub reasoning: Vec<String>,
    pub insights: Vec<Insight>,
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub status: StreamStatus,
}

impl StreamResult {
    /// Empty result for a stream that produced nothing.
    pub fn empty(stream_type: StreamType, status: StreamStatus, elapsed_ms: u64) -> Self {
        Self {
            stream_id: format!("{}-{}", stream_type.as_str(), Uuid::new_v4()),
            stream_type,
            conclusion: String::new(),
            reasoning: Vec::new(),
            insights: Vec::new(),
            confidence: 0.0,
            processing_time_ms: elapsed_ms,
            status,
        }
    }
}

/// An insight after synthesis, attributed to every contributing stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedInsight {
    pub content: String,
    pub confidence: f64,
    pub importance: f64,
    pub sources: Vec<String>,
}

/// Actionable recommendation derived from an insight.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub action: String,
    /// Integer priority in [1,10]
    pub priority: u8,
    pub confidence: f64,
}

/// Synthesis quality, each score in [0,1].
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScores {
    pub overall: f64,
    pub coherence: f64,
    pub completeness: f64,
    pub consistency: f64,
}

/// The merged result of a multi-stream run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedResult {
    pub conclusion: String,
    pub insights: Vec<SynthesizedInsight>,
    pub recommendations: Vec<Recommendation>,
    pub confidence: f64,
    pub quality: QualityScores,
    pub conflicts: Vec<Conflict>,
    /// Per-stream results retained for traceability
    pub stream_results: Vec<StreamResult>,
}

impl SynthesizedResult {
    /// Sentinel for a run where every stream failed. The facade uses this
    /// to drive a rule-based fallback; the coordinator never invents
    /// content.
    pub fn sentinel(stream_results: Vec<StreamResult>) -> Self {
        Self {
            conclusion: String::new(),
            insights: Vec::new(),
            recommendations: Vec::new(),
            confidence: 0.0,
            quality: QualityScores {
                overall: 0.0,
                coherence: 0.0,
                completeness: 0.0,
                consistency: 0.0,
            },
            conflicts: Vec::new(),
            stream_results,
        }
    }

    /// True when the facade should fall back to rule-based output.
    pub fn needs_fallback(&self) -> bool {
        self.confidence == 0.0 && self.insights.is_empty()
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

/// Classification of a disagreement between streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Factual,
    Logical,
    Methodological,
    Evaluative,
    Predictive,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Factual => "factual",
            ConflictKind::Logical => "logical",
            ConflictKind::Methodological => "methodological",
            ConflictKind::Evaluative => "evaluative",
            ConflictKind::Predictive => "predictive",
        }
    }
}

/// Conflict severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One stream's side of a conflict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEvidence {
    pub stream: String,
    pub claim: String,
    pub reasoning: String,
    pub confidence: f64,
}

/// How to resolve a conflict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionFramework {
    pub approach: String,
    pub steps: Vec<String>,
    pub considerations: Vec<String>,
    pub recommended_action: String,
}

/// A recorded disagreement between two streams.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub source_streams: Vec<String>,
    pub description: String,
    pub evidence: Vec<ConflictEvidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionFramework>,
    pub detected_at: DateTime<Utc>,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Progress events emitted during a coordinated run, bridged to SSE by the
/// facade.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReasoningEvent {
    StreamStarted {
        stream: StreamType,
    },
    StreamProgress {
        stream: StreamType,
        fraction: f64,
    },
    StreamInsight {
        stream: StreamType,
        insight: Insight,
    },
    StreamCompleted {
        stream: StreamType,
        status: StreamStatus,
        confidence: f64,
    },
    SyncCheckpoint {
        fraction: f64,
        reached: Vec<String>,
        elapsed_ms: u64,
    },
    SynthesisStarted,
    SynthesisCompleted {
        confidence: f64,
    },
}

/// Sink for reasoning events.
pub type EventSink = tokio::sync::mpsc::UnboundedSender<ReasoningEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_type_round_trip() {
        for stream_type in StreamType::ALL {
            assert_eq!(StreamType::from_name(stream_type.as_str()), Some(stream_type));
        }
        assert_eq!(StreamType::from_name("intuitive"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ConflictSeverity::Low < ConflictSeverity::Medium);
        assert!(ConflictSeverity::Medium < ConflictSeverity::High);
        assert!(ConflictSeverity::High < ConflictSeverity::Critical);
    }

    #[test]
    fn test_sentinel_needs_fallback() {
        let sentinel = SynthesizedResult::sentinel(vec![]);
        assert!(sentinel.needs_fallback());
    }
}
