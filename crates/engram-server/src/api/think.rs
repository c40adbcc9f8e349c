//! Think Endpoint
//!
//! Mode-mapped reasoning with memory-augmented context. On LLM timeout or
//! total stream failure the response degrades to a rule-based fallback
//! body marked `_meta.fallbackUsed = true`, still HTTP 200.

use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{
    cosine_similarity, CoordinatedOutcome, ReasoningProblem, SessionKind, StreamStatus,
    StreamType,
};

use crate::state::SharedState;

use super::envelope::{self, ApiError};
use super::reasoning::{parse_body, run_session, validate_problem};

/// Fallback confidence when the reasoning layer is unavailable.
const FALLBACK_CONFIDENCE: f64 = 0.3;

// ============================================================================
// REQUEST SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThinkRequest {
    problem: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Mode → stream set mapping.
fn streams_for_mode(mode: &str) -> Result<Vec<StreamType>, ApiError> {
    match mode {
        "intuitive" | "creative" => Ok(vec![StreamType::Creative, StreamType::Synthetic]),
        "deliberative" | "analytical" => Ok(vec![StreamType::Analytical, StreamType::Critical]),
        "balanced" => Ok(StreamType::ALL.to_vec()),
        other => Err(ApiError::validation(format!("unknown mode '{other}'"))),
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// `POST /api/v1/think`
pub async fn think(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: ThinkRequest = parse_body(body)?;
    validate_problem(&request.problem)?;
    let mode = request.mode.as_deref().unwrap_or("balanced").to_string();
    let types = streams_for_mode(&mode)?;
    let timeout = Duration::from_millis(state.config.effective_timeout_ms(request.timeout));

    // Memory-augmented problem description
    let (memory_context, memories_used) = match &request.user_id {
        Some(user_id) => recall_context(&state, user_id, &request.problem),
        None => (None, Vec::new()),
    };
    let mut problem = ReasoningProblem::new(request.problem.clone());
    problem.context = match (request.context, memory_context) {
        (Some(given), Some(recalled)) => Some(format!("{given}\n\n{recalled}")),
        (Some(given), None) => Some(given),
        (None, Some(recalled)) => Some(recalled),
        (None, None) => None,
    };

    let session = state.sessions.create_session(
        SessionKind::Think,
        types.iter().map(|t| t.as_str().to_string()).collect(),
    );
    state.hub.register(&session.id);

    let outcome = run_session(state.clone(), session.id.clone(), problem, types, timeout).await;

    if outcome.result.needs_fallback() {
        let reason = fallback_reason(&state, &outcome);
        tracing::warn!(session_id = %session.id, reason, "think falling back to rule-based output");
        let body = fallback_body(&request.problem, &mode, reason, started);
        return Ok(envelope::ok(body, started));
    }

    Ok(envelope::ok(
        think_body(&session.id, &mode, &outcome, memories_used, started),
        started,
    ))
}

/// `GET /api/v1/think/status/{session_id}`
pub async fn status(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown session '{session_id}'")))?;

    Ok(envelope::ok(
        json!({
            "status": session.status.as_str(),
            "progress": session.progress,
            "currentStage": session.stage,
            "activeStreams": session.active_streams,
        }),
        started,
    ))
}

// ============================================================================
// CONTEXT & RESPONSE ASSEMBLY
// ============================================================================

/// Pull the user's most similar memories into the problem context.
fn recall_context(
    state: &SharedState,
    user_id: &str,
    problem: &str,
) -> (Option<String>, Vec<String>) {
    let Ok(query) = state.embedder.embed(problem) else {
        return (None, Vec::new());
    };
    let Ok(candidates) = state.store.semantic_candidates(user_id) else {
        return (None, Vec::new());
    };

    let mut scored: Vec<(f64, _)> = candidates
        .into_iter()
        .map(|(memory, vector)| (cosine_similarity(&query, &vector), memory))
        .filter(|(score, _)| *score > 0.3)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(3);

    if scored.is_empty() {
        return (None, Vec::new());
    }
    let ids = scored.iter().map(|(_, m)| m.id.clone()).collect();
    let lines: Vec<String> = scored
        .iter()
        .map(|(_, m)| format!("- {}", m.content))
        .collect();
    (
        Some(format!("Relevant memories:\n{}", lines.join("\n"))),
        ids,
    )
}

fn think_body(
    session_id: &str,
    mode: &str,
    outcome: &CoordinatedOutcome,
    memories_used: Vec<String>,
    started: Instant,
) -> Value {
    let result = &outcome.result;
    let completed: Vec<_> = result
        .stream_results
        .iter()
        .filter(|r| r.status == StreamStatus::Completed)
        .collect();

    let thoughts: Vec<String> = completed
        .iter()
        .map(|r| format!("[{}] {}", r.stream_type, r.conclusion))
        .collect();
    let evidence_quality = if result.insights.is_empty() {
        0.0
    } else {
        result.insights.iter().map(|i| i.confidence).sum::<f64>()
            / result.insights.len() as f64
    };
    let uncertainty_type = if !result.conflicts.is_empty() {
        "ambiguity"
    } else if result.insights.len() < 3 {
        "epistemic"
    } else {
        "aleatoric"
    };
    let recommendations: Vec<String> = result
        .recommendations
        .iter()
        .take(5)
        .map(|r| r.action.clone())
        .collect();

    json!({
        "sessionId": session_id,
        "thoughts": thoughts,
        "confidence": result.confidence,
        "modeUsed": mode,
        "processingTimeMs": started.elapsed().as_millis() as u64,
        "metacognitiveAssessment": {
            "overallConfidence": result.confidence,
            "evidenceQuality": evidence_quality,
            "reasoningCoherence": result.quality.coherence,
            "completeness": result.quality.completeness,
            "uncertaintyLevel": 1.0 - result.confidence,
            "uncertaintyType": uncertainty_type,
            "factors": [
                format!("{} stream(s) completed", completed.len()),
                format!("{} conflict(s) detected", result.conflicts.len()),
            ],
        },
        "conclusion": result.conclusion,
        "recommendations": recommendations,
        "memoriesUsed": memories_used,
    })
}

fn fallback_reason(state: &SharedState, outcome: &CoordinatedOutcome) -> &'static str {
    let timed_out = outcome
        .result
        .stream_results
        .iter()
        .any(|r| r.status == StreamStatus::TimedOut);
    if timed_out && state.llm.is_some() {
        "LLM timeout"
    } else if timed_out {
        "Reasoning timeout"
    } else {
        "All reasoning streams failed"
    }
}

/// Rule-based body for when the reasoning layer is unavailable.
fn fallback_body(problem: &str, mode: &str, reason: &str, started: Instant) -> Value {
    let preview: String = problem.chars().take(80).collect();
    json!({
        "thoughts": [
            format!("Falling back to heuristic reasoning for: {preview}"),
            "Reasoning streams were unavailable; output below is rule-based".to_string(),
        ],
        "confidence": FALLBACK_CONFIDENCE,
        "modeUsed": mode,
        "processingTimeMs": started.elapsed().as_millis() as u64,
        "metacognitiveAssessment": {
            "overallConfidence": FALLBACK_CONFIDENCE,
            "evidenceQuality": 0.2,
            "reasoningCoherence": 0.5,
            "completeness": 0.3,
            "uncertaintyLevel": 0.7,
            "uncertaintyType": "epistemic",
            "factors": ["reasoning streams unavailable", reason],
        },
        "conclusion": format!(
            "Unable to run full multi-stream reasoning. Based on the problem statement alone: \
             break \"{preview}\" into smaller decisions and validate each against your \
             constraints before committing."
        ),
        "recommendations": [
            "Restate the problem with explicit constraints and goals",
            "Retry once the reasoning backend is reachable",
            "Start with the smallest reversible step",
        ],
        "_meta": {
            "fallbackUsed": true,
            "reason": reason,
            "suggestion": "Retry with a longer timeout or a simpler problem statement",
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mapping() {
        assert_eq!(
            streams_for_mode("intuitive").unwrap(),
            vec![StreamType::Creative, StreamType::Synthetic]
        );
        assert_eq!(
            streams_for_mode("deliberative").unwrap(),
            vec![StreamType::Analytical, StreamType::Critical]
        );
        assert_eq!(streams_for_mode("balanced").unwrap().len(), 4);
        assert_eq!(
            streams_for_mode("creative").unwrap(),
            vec![StreamType::Creative, StreamType::Synthetic]
        );
        assert_eq!(
            streams_for_mode("analytical").unwrap(),
            vec![StreamType::Analytical, StreamType::Critical]
        );
        assert!(streams_for_mode("psychic").is_err());
    }

    #[test]
    fn test_fallback_body_shape() {
        let body = fallback_body("why is the build slow", "balanced", "LLM timeout", Instant::now());
        assert_eq!(body["_meta"]["fallbackUsed"], true);
        assert_eq!(body["_meta"]["reason"], "LLM timeout");
        assert_eq!(body["confidence"], 0.3);
        assert_eq!(body["recommendations"].as_array().unwrap().len(), 3);
        assert_eq!(body["metacognitiveAssessment"]["uncertaintyType"], "epistemic");
    }
}
