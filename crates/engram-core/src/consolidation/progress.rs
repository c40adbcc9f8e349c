//! Consolidation Progress
//!
//! Shared, lock-protected progress state written by the engine during a run
//! and read live by the health monitor.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Phase of a consolidation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPhase {
    #[default]
    IdentifyingClusters,
    GeneratingSummaries,
    Consolidating,
    Complete,
}

impl ConsolidationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationPhase::IdentifyingClusters => "identifying_clusters",
            ConsolidationPhase::GeneratingSummaries => "generating_summaries",
            ConsolidationPhase::Consolidating => "consolidating",
            ConsolidationPhase::Complete => "complete",
        }
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationProgress {
    pub is_running: bool,
    pub phase: ConsolidationPhase,
    pub clusters_identified: u64,
    pub clusters_consolidated: u64,
    pub memories_processed: u64,
    pub memories_total: u64,
    pub percent_complete: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_remaining_ms: u64,
}

impl ConsolidationProgress {
    /// Zeroed snapshot for when no job is running.
    pub fn idle() -> Self {
        Self {
            is_running: false,
            phase: ConsolidationPhase::Complete,
            clusters_identified: 0,
            clusters_consolidated: 0,
            memories_processed: 0,
            memories_total: 0,
            percent_complete: 0.0,
            started_at: None,
            estimated_remaining_ms: 0,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    phase: ConsolidationPhase,
    clusters_identified: u64,
    clusters_consolidated: u64,
    memories_processed: u64,
    memories_total: u64,
    started_at: Option<DateTime<Utc>>,
}

/// Mutex-protected progress shared between the scheduler, the engine, and
/// the health monitor.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<State>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a run as started and reset counters.
    pub fn begin(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().expect("progress lock poisoned");
        *state = State {
            running: true,
            phase: ConsolidationPhase::IdentifyingClusters,
            started_at: Some(now),
            ..Default::default()
        };
    }

    pub fn set_phase(&self, phase: ConsolidationPhase) {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.phase = phase;
        if phase == ConsolidationPhase::Complete {
            state.running = false;
        }
    }

    pub fn set_clusters_identified(&self, clusters: u64, memories_total: u64) {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.clusters_identified = clusters;
        state.memories_total = memories_total;
    }

    /// Record one consolidated cluster of `members` memories.
    pub fn record_cluster(&self, members: u64) {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.clusters_consolidated += 1;
        state.memories_processed += members;
    }

    /// Record a skipped cluster's memories as processed.
    pub fn record_skipped(&self, members: u64) {
        let mut state = self.state.lock().expect("progress lock poisoned");
        state.memories_processed += members;
    }

    /// Snapshot the current state.
    ///
    /// `estimated_remaining_ms = elapsed / processed * remaining` when any
    /// memories have been processed, else 0.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ConsolidationProgress {
        let state = self.state.lock().expect("progress lock poisoned");
        if !state.running {
            return ConsolidationProgress::idle();
        }

        let percent = if state.memories_total > 0 {
            (state.memories_processed as f64 / state.memories_total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        let estimated_remaining_ms = match (state.started_at, state.memories_processed) {
            (Some(started), processed) if processed > 0 => {
                let elapsed = (now - started).num_milliseconds().max(0) as f64;
                let remaining = state.memories_total.saturating_sub(processed) as f64;
                (elapsed / processed as f64 * remaining) as u64
            }
            _ => 0,
        };

        ConsolidationProgress {
            is_running: true,
            phase: state.phase,
            clusters_identified: state.clusters_identified,
            clusters_consolidated: state.clusters_consolidated,
            memories_processed: state.memories_processed,
            memories_total: state.memories_total,
            percent_complete: percent,
            started_at: state.started_at,
            estimated_remaining_ms,
        }
    }
}
