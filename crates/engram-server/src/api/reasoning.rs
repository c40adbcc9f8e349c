//! Parallel Reasoning Endpoints
//!
//! `POST /reasoning/parallel` runs a stream set under a shared deadline,
//! synchronously or detached; progress flows to SSE subscribers per
//! session and per stream.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;

use engram_core::{
    streams_for_types, CoordinatedOutcome, ReasoningEvent, ReasoningProblem, SessionKind,
    SessionStatus, StreamType,
};

use crate::sse::{SseEvent, SseEventKind};
use crate::state::SharedState;

use super::envelope::{self, ApiError};

/// Maximum problem length accepted on the wire.
pub const MAX_PROBLEM_CHARS: usize = 10_000;

// ============================================================================
// REQUEST SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParallelRequest {
    problem: String,
    streams: Vec<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default, rename = "async")]
    run_async: bool,
}

pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::validation(format!("invalid body: {e}")))
}

pub(crate) fn validate_problem(problem: &str) -> Result<(), ApiError> {
    let length = problem.chars().count();
    if length == 0 {
        return Err(ApiError::validation("problem must not be empty"));
    }
    if length > MAX_PROBLEM_CHARS {
        return Err(ApiError::validation(format!(
            "problem exceeds {MAX_PROBLEM_CHARS} characters"
        )));
    }
    Ok(())
}

fn parse_streams(raw: &[String]) -> Result<Vec<StreamType>, ApiError> {
    if raw.is_empty() || raw.len() > 4 {
        return Err(ApiError::validation("streams must contain 1 to 4 entries"));
    }
    let mut types = Vec::new();
    for name in raw {
        let stream_type = StreamType::from_name(name)
            .ok_or_else(|| ApiError::validation(format!("unknown stream type '{name}'")))?;
        if !types.contains(&stream_type) {
            types.push(stream_type);
        }
    }
    Ok(types)
}

// ============================================================================
// EVENT BRIDGE
// ============================================================================

/// Key of a per-stream live channel.
pub(crate) fn live_key(session_id: &str, stream: StreamType) -> String {
    format!("{session_id}:{}", stream.as_str())
}

/// Forward coordinator events into the hub and the session record. The
/// returned handle completes once the coordinator drops its sender, so
/// callers can finalize after every event has been delivered.
pub(crate) fn spawn_event_bridge(
    state: SharedState,
    session_id: String,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ReasoningEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ReasoningEvent::StreamStarted { stream } => {
                    let data = json!({ "stream": stream.as_str() });
                    state
                        .hub
                        .broadcast(&session_id, SseEventKind::StreamStarted, data.clone());
                    state
                        .hub
                        .broadcast(&live_key(&session_id, stream), SseEventKind::StreamStarted, data);
                }
                ReasoningEvent::StreamProgress { stream, fraction } => {
                    let data = json!({ "stream": stream.as_str(), "fraction": fraction });
                    state
                        .hub
                        .broadcast(&session_id, SseEventKind::StreamProgress, data.clone());
                    state.hub.broadcast(
                        &live_key(&session_id, stream),
                        SseEventKind::StreamProgress,
                        data,
                    );
                }
                ReasoningEvent::StreamInsight { stream, insight } => {
                    let data = json!({ "stream": stream.as_str(), "insight": insight });
                    state
                        .hub
                        .broadcast(&session_id, SseEventKind::StreamInsight, data.clone());
                    state.hub.broadcast(
                        &live_key(&session_id, stream),
                        SseEventKind::StreamInsight,
                        data,
                    );
                }
                ReasoningEvent::StreamCompleted {
                    stream,
                    status,
                    confidence,
                } => {
                    let data = json!({
                        "stream": stream.as_str(),
                        "status": status.as_str(),
                        "confidence": confidence,
                    });
                    state
                        .hub
                        .broadcast(&session_id, SseEventKind::StreamCompleted, data.clone());
                    state.hub.complete(
                        &live_key(&session_id, stream),
                        SseEventKind::StreamCompleted,
                        data,
                    );
                }
                ReasoningEvent::SyncCheckpoint {
                    fraction,
                    reached,
                    elapsed_ms,
                } => {
                    state.hub.broadcast(
                        &session_id,
                        SseEventKind::SyncCheckpoint,
                        json!({
                            "fraction": fraction,
                            "reached": reached,
                            "elapsedMs": elapsed_ms,
                        }),
                    );
                    state.sessions.update(&session_id, |session| {
                        session.progress = fraction;
                        session.stage = "reasoning".to_string();
                        if (fraction - 0.25).abs() < f64::EPSILON {
                            session.checkpoints.sync25 = Some(elapsed_ms);
                        } else if (fraction - 0.5).abs() < f64::EPSILON {
                            session.checkpoints.sync50 = Some(elapsed_ms);
                        } else if (fraction - 0.75).abs() < f64::EPSILON {
                            session.checkpoints.sync75 = Some(elapsed_ms);
                        }
                    });
                }
                ReasoningEvent::SynthesisStarted => {
                    state
                        .hub
                        .broadcast(&session_id, SseEventKind::SynthesisStarted, json!({}));
                    state.sessions.update(&session_id, |session| {
                        session.stage = "synthesis".to_string();
                        session.progress = 0.9;
                    });
                }
                ReasoningEvent::SynthesisCompleted { confidence } => {
                    state.hub.broadcast(
                        &session_id,
                        SseEventKind::SynthesisCompleted,
                        json!({ "confidence": confidence }),
                    );
                }
            }
        }
    })
}

// ============================================================================
// SESSION EXECUTION
// ============================================================================

/// Run the coordinator for a session and finalize session + hub state.
pub(crate) async fn run_session(
    state: SharedState,
    session_id: String,
    problem: ReasoningProblem,
    types: Vec<StreamType>,
    timeout: Duration,
) -> CoordinatedOutcome {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let bridge = spawn_event_bridge(state.clone(), session_id.clone(), rx);

    let streams = streams_for_types(&types, state.llm.clone());
    let outcome = state
        .coordinator
        .execute_streams(&problem, streams, timeout, Some(tx))
        .await;

    // The coordinator dropped its sender; wait for the last event to land
    // so the terminal event stays last in the canonical order
    let _ = bridge.await;

    let payload = session_payload(&session_id, &outcome);
    if outcome.result.needs_fallback() {
        state
            .sessions
            .fail(&session_id, "all reasoning streams failed".to_string());
        state.hub.complete(
            &session_id,
            SseEventKind::SessionError,
            json!({ "error": "all reasoning streams failed" }),
        );
    } else {
        state.sessions.complete(&session_id, payload);
        state.hub.complete(
            &session_id,
            SseEventKind::SessionCompleted,
            json!({ "confidence": outcome.result.confidence }),
        );
    }
    outcome
}

/// The payload stored on the session and projected by the chain endpoint.
fn session_payload(session_id: &str, outcome: &CoordinatedOutcome) -> Value {
    json!({
        "sessionId": session_id,
        "streams": outcome.result.stream_results,
        "synthesis": {
            "conclusion": outcome.result.conclusion,
            "insights": outcome.result.insights,
            "recommendations": outcome.result.recommendations,
            "confidence": outcome.result.confidence,
            "quality": outcome.result.quality,
        },
        "conflictsResolved": outcome.result.conflicts,
        "coordinationMetrics": {
            "sync25": outcome.metrics.sync25,
            "sync50": outcome.metrics.sync50,
            "sync75": outcome.metrics.sync75,
            "totalCoordinationTime": outcome.metrics.total_coordination_time,
            "overheadPercentage": outcome.metrics.overhead_percentage,
        },
    })
}

// ============================================================================
// HANDLERS
// ============================================================================

/// `POST /api/v1/reasoning/parallel`
pub async fn parallel(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: ParallelRequest = parse_body(body)?;
    validate_problem(&request.problem)?;
    let types = parse_streams(&request.streams)?;
    if let Some(timeout) = request.timeout {
        if !(1_000..=60_000).contains(&timeout) {
            return Err(ApiError::validation(
                "timeout must be between 1000 and 60000 milliseconds",
            ));
        }
    }
    let timeout = Duration::from_millis(request.timeout.unwrap_or(30_000));

    let mut problem = ReasoningProblem::new(request.problem);
    problem.context = request.context;

    let session = state.sessions.create_session(
        SessionKind::Reasoning,
        types.iter().map(|t| t.as_str().to_string()).collect(),
    );
    state.hub.register(&session.id);
    for stream_type in &types {
        state.hub.register(&live_key(&session.id, *stream_type));
    }

    if request.run_async {
        let state = state.clone();
        let session_id = session.id.clone();
        tokio::spawn(run_session(state, session_id, problem, types, timeout));
        return Ok(envelope::with_status(
            StatusCode::ACCEPTED,
            json!({ "sessionId": session.id, "status": "processing" }),
            started,
        ));
    }

    let outcome = run_session(state.clone(), session.id.clone(), problem, types, timeout).await;
    Ok(envelope::ok(session_payload(&session.id, &outcome), started))
}

/// `GET /api/v1/reasoning/parallel/{session_id}/stream`: SSE
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    sse_for_channel(&state, &session_id)
}

/// `GET /api/v1/reasoning/live/{stream_id}`: SSE for one stream
pub async fn live_stream(
    State(state): State<SharedState>,
    Path(stream_id): Path<String>,
) -> Result<Response, ApiError> {
    if state.hub.has_channel(&stream_id) {
        return sse_for_channel(&state, &stream_id);
    }
    Err(ApiError::not_found(format!("unknown stream '{stream_id}'")))
}

fn sse_for_channel(state: &SharedState, channel_id: &str) -> Result<Response, ApiError> {
    if let Some(rx) = state.hub.subscribe(channel_id) {
        let stream = BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() })
            .map(|event: SseEvent| Ok::<Event, Infallible>(Event::default().data(event.to_json())));
        return Ok(Sse::new(stream).into_response());
    }

    // The channel is gone but the session may have finished; replay the
    // terminal event so late subscribers see a well-formed stream.
    if let Some(session) = state.sessions.get(channel_id) {
        let (kind, data) = match session.status {
            SessionStatus::Error => (
                SseEventKind::SessionError,
                json!({ "error": session.error.unwrap_or_default() }),
            ),
            _ => (
                SseEventKind::SessionCompleted,
                json!({ "status": session.status.as_str() }),
            ),
        };
        let event = SseEvent::new(kind, channel_id, data);
        let stream = futures::stream::once(async move {
            Ok::<Event, Infallible>(Event::default().data(event.to_json()))
        });
        return Ok(Sse::new(stream).into_response());
    }

    Err(ApiError::not_found(format!("unknown session '{channel_id}'")))
}

/// `GET /api/v1/reasoning/chain/{session_id}`
pub async fn chain(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("unknown session '{session_id}'")))?;

    // Minimal chain while processing; full projection once complete
    let chain = match &session.result {
        Some(result) => {
            let mut steps = Vec::new();
            let mut confidence_evolution = Vec::new();
            if let Some(streams) = result["streams"].as_array() {
                for stream in streams {
                    let label = stream["streamType"].as_str().unwrap_or("stream");
                    if let Some(reasoning) = stream["reasoning"].as_array() {
                        for step in reasoning {
                            steps.push(json!({
                                "stream": label,
                                "step": step,
                            }));
                        }
                    }
                    confidence_evolution.push(json!({
                        "stream": label,
                        "confidence": stream["confidence"],
                    }));
                }
            }
            let decision_points = result["conflictsResolved"].clone();
            json!({
                "chainId": session.id,
                "steps": steps,
                "branches": session.active_streams,
                "confidenceEvolution": confidence_evolution,
                "decisionPoints": decision_points,
            })
        }
        None => json!({
            "chainId": session.id,
            "steps": [{ "stream": "coordinator", "step": session.stage }],
            "branches": session.active_streams,
            "confidenceEvolution": [],
            "decisionPoints": [],
        }),
    };

    Ok(envelope::ok(chain, started))
}
