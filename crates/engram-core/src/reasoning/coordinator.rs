//! Stream Coordinator
//!
//! Runs a set of reasoning streams concurrently under one wall-clock
//! deadline with synchronization checkpoints at 25/50/75% of elapsed time.
//! A stream that overruns its share is cancelled and marked timed out; a
//! stream that fails is isolated. Neither aborts the others. Coordination
//! overhead is measured and reported.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;

use super::streams::{SharedInsights, StreamContext};
use super::{
    ConflictResolutionEngine, EventSink, ReasoningError, ReasoningEvent, ReasoningProblem,
    ReasoningStream, StreamResult, StreamStatus, SynthesizedResult, Synthesizer,
};

/// Checkpoint fractions, in order.
const CHECKPOINTS: [f64; 3] = [0.25, 0.5, 0.75];

// ============================================================================
// METRICS
// ============================================================================

/// Timing of one coordinated run.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationMetrics {
    /// Milliseconds from start until each checkpoint completed
    pub sync25: u64,
    pub sync50: u64,
    pub sync75: u64,
    /// Time spent in checkpoint waits and result assembly
    pub total_coordination_time: u64,
    /// Whole-run wall time
    pub total_time: u64,
    /// `total_coordination_time / total_time`, as a percentage
    pub overhead_percentage: f64,
}

/// Result of a coordinated run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatedOutcome {
    pub result: SynthesizedResult,
    pub metrics: CoordinationMetrics,
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Supervises a set of streams with a shared budget and checkpoints.
pub struct StreamCoordinator {
    synthesizer: Synthesizer,
    conflicts: Arc<ConflictResolutionEngine>,
}

impl StreamCoordinator {
    pub fn new(conflicts: Arc<ConflictResolutionEngine>) -> Self {
        Self {
            synthesizer: Synthesizer::new(),
            conflicts,
        }
    }

    /// Run every stream concurrently under `timeout`, synchronize at the
    /// checkpoints, then synthesize and detect conflicts.
    pub async fn execute_streams(
        &self,
        problem: &ReasoningProblem,
        streams: Vec<Arc<dyn ReasoningStream>>,
        timeout: Duration,
        events: Option<EventSink>,
    ) -> CoordinatedOutcome {
        let started = Instant::now();
        let shared: SharedInsights = Arc::new(Mutex::new(Vec::new()));
        let problem = Arc::new(problem.clone());

        let mut handles = Vec::with_capacity(streams.len());
        let mut progress_rxs = Vec::with_capacity(streams.len());
        for stream in streams {
            let stream_type = stream.stream_type();
            if let Some(sink) = &events {
                let _ = sink.send(ReasoningEvent::StreamStarted {
                    stream: stream_type,
                });
            }

            let (progress_tx, progress_rx) = watch::channel(0.0f64);
            progress_rxs.push((stream_type, progress_rx));
            let ctx = StreamContext::new(
                stream_type,
                progress_tx,
                shared.clone(),
                events.clone(),
            );
            let problem = problem.clone();
            handles.push((
                stream_type,
                tokio::spawn(async move {
                    let stream_started = Instant::now();
                    let outcome =
                        tokio::time::timeout(timeout, stream.execute(&problem, &ctx)).await;
                    let elapsed = stream_started.elapsed().as_millis() as u64;
                    match outcome {
                        Ok(Ok(output)) => {
                            let mut result =
                                StreamResult::empty(stream_type, StreamStatus::Completed, elapsed);
                            result.conclusion = output.conclusion;
                            result.reasoning = output.reasoning;
                            result.insights = output.insights;
                            result.confidence = output.confidence.clamp(0.0, 1.0);
                            result
                        }
                        Ok(Err(ReasoningError::Timeout)) => {
                            StreamResult::empty(stream_type, StreamStatus::TimedOut, elapsed)
                        }
                        Ok(Err(ReasoningError::Cancelled)) => {
                            StreamResult::empty(stream_type, StreamStatus::Cancelled, elapsed)
                        }
                        Ok(Err(ReasoningError::Failed(reason))) => {
                            tracing::warn!(stream = stream_type.as_str(), reason, "stream failed");
                            StreamResult::empty(stream_type, StreamStatus::Failed, elapsed)
                        }
                        Err(_) => {
                            StreamResult::empty(stream_type, StreamStatus::TimedOut, elapsed)
                        }
                    }
                }),
            ));
        }

        // Checkpoint synchronization: wait for every stream to pass each
        // fraction, bounded by `timeout * fraction` from start. Streams that
        // miss a checkpoint are recorded as past it for ordering purposes.
        let mut coordination = Duration::ZERO;
        let mut sync_ms = [0u64; 3];
        for (slot, fraction) in CHECKPOINTS.iter().enumerate() {
            let wait_started = Instant::now();
            let deadline = started + timeout.mul_f64(*fraction);
            let mut reached = Vec::new();
            for (stream_type, rx) in progress_rxs.iter_mut() {
                if wait_until_fraction(rx, *fraction, deadline).await {
                    reached.push(stream_type.as_str().to_string());
                }
            }
            coordination += wait_started.elapsed();
            sync_ms[slot] = started.elapsed().as_millis() as u64;
            if let Some(sink) = &events {
                let _ = sink.send(ReasoningEvent::SyncCheckpoint {
                    fraction: *fraction,
                    reached,
                    elapsed_ms: sync_ms[slot],
                });
            }
        }

        // Collect terminal results; a panicked task is a failed stream
        let mut results = Vec::with_capacity(handles.len());
        for (stream_type, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(_) => StreamResult::empty(stream_type, StreamStatus::Failed, 0),
            };
            if let Some(sink) = &events {
                let _ = sink.send(ReasoningEvent::StreamCompleted {
                    stream: stream_type,
                    status: result.status,
                    confidence: result.confidence,
                });
            }
            results.push(result);
        }

        if let Some(sink) = &events {
            let _ = sink.send(ReasoningEvent::SynthesisStarted);
        }
        let assembly_started = Instant::now();
        let conflicts = self.conflicts.detect_conflicts(&results);
        let result = self.synthesizer.synthesize(problem.as_ref(), results, conflicts);
        coordination += assembly_started.elapsed();
        if let Some(sink) = &events {
            let _ = sink.send(ReasoningEvent::SynthesisCompleted {
                confidence: result.confidence,
            });
        }

        let total = started.elapsed();
        let metrics = CoordinationMetrics {
            sync25: sync_ms[0],
            sync50: sync_ms[1],
            sync75: sync_ms[2],
            total_coordination_time: coordination.as_millis() as u64,
            total_time: total.as_millis() as u64,
            overhead_percentage: if total.as_millis() > 0 {
                coordination.as_millis() as f64 / total.as_millis() as f64 * 100.0
            } else {
                0.0
            },
        };

        CoordinatedOutcome { result, metrics }
    }
}

/// Wait until the stream's progress reaches `fraction` or the deadline
/// passes. Returns whether the checkpoint was genuinely reached.
async fn wait_until_fraction(
    rx: &mut watch::Receiver<f64>,
    fraction: f64,
    deadline: Instant,
) -> bool {
    loop {
        if *rx.borrow() >= fraction {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        match tokio::time::timeout(deadline - now, rx.changed()).await {
            Ok(Ok(())) => continue,
            // Sender dropped: the stream terminated one way or another
            Ok(Err(_)) => return *rx.borrow() >= fraction,
            Err(_) => return false,
        }
    }
}
