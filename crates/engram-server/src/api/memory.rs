//! Memory Endpoints
//!
//! Memory CRUD plus the lifecycle surface: search, health, maintenance,
//! pruning, archival, decay configuration, and consolidation triggers.
//! The retrieve path reinforces on access and restores transparently from
//! the archive.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{
    cosine_similarity, ArchiveConfig, DecayConfigPatch, EmbeddingStatus, MaintenanceOptions,
    Memory, MemoryInput, PruningCriteria, Sector,
};

use crate::state::SharedState;

use super::envelope::{self, ApiError};
use super::reasoning::parse_body;

/// Maximum memory content length accepted on the wire.
const MAX_CONTENT_CHARS: usize = 32_768;

// ============================================================================
// CREATE & RETRIEVE
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    user_id: String,
    content: String,
    #[serde(default)]
    sector: Option<String>,
    #[serde(default)]
    salience: Option<f64>,
    #[serde(default)]
    session_id: Option<String>,
}

/// `POST /api/v1/memory`
pub async fn create(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: CreateRequest = parse_body(body)?;
    if request.user_id.trim().is_empty() {
        return Err(ApiError::validation("userId must not be empty"));
    }
    let length = request.content.chars().count();
    if length == 0 || length > MAX_CONTENT_CHARS {
        return Err(ApiError::validation(format!(
            "content must be 1..{MAX_CONTENT_CHARS} characters"
        )));
    }
    let sector = match &request.sector {
        Some(name) => Sector::from_name(name)
            .ok_or_else(|| ApiError::validation(format!("unknown sector '{name}'")))?,
        None => Sector::Episodic,
    };
    if let Some(salience) = request.salience {
        if !(0.0..=1.0).contains(&salience) {
            return Err(ApiError::validation("salience must be in [0,1]"));
        }
    }

    let mut memory = Memory::from_input(
        MemoryInput {
            user_id: request.user_id,
            session_id: request.session_id,
            content: request.content,
            sector,
            salience: request.salience.unwrap_or(0.5),
        },
        state.clock.now(),
    );

    // Embed synchronously; a provider failure leaves the memory searchable
    // by content only
    match state.embedder.embed(&memory.content) {
        Ok(vector) => {
            memory.embedding_status = EmbeddingStatus::Complete;
            state.store.insert_memory(&memory)?;
            state
                .store
                .upsert_embedding(&memory.id, Sector::Semantic, &vector)?;
        }
        Err(e) => {
            tracing::warn!(error = %e, "embedding failed at ingest");
            memory.embedding_status = EmbeddingStatus::Failed;
            state.store.insert_memory(&memory)?;
        }
    }

    Ok(envelope::ok(serde_json::to_value(&memory).unwrap_or_default(), started))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: String,
}

/// `GET /api/v1/memory/{id}`: the regular retrieve path.
///
/// Restores transparently from the archive and reinforces on access.
pub async fn retrieve(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();

    // Archived memories restore on first read
    let restored = state.archive.restore_on_access(&query.user_id, &id)?;
    let was_archived = restored.is_some();

    let memory = match restored {
        Some(memory) => memory,
        None => state
            .store
            .get_memory(&query.user_id, &id)?
            .ok_or_else(|| ApiError::not_found(format!("unknown memory '{id}'")))?,
    };

    state.decay.auto_reinforce_on_access(&query.user_id, &id)?;
    let memory = state
        .store
        .get_memory(&query.user_id, &memory.id)?
        .ok_or_else(|| ApiError::not_found(format!("unknown memory '{id}'")))?;

    let mut data = serde_json::to_value(&memory).unwrap_or_default();
    if let Some(object) = data.as_object_mut() {
        object.insert("restoredFromArchive".to_string(), json!(was_archived));
    }
    Ok(envelope::ok(data, started))
}

// ============================================================================
// SEARCH
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub user_id: String,
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /api/v1/memory/search`: vector similarity over semantic
/// embeddings.
pub async fn search(
    State(state): State<SharedState>,
    Query(request): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    if request.query.trim().is_empty() {
        return Err(ApiError::validation("query must not be empty"));
    }
    let limit = request.limit.unwrap_or(10).clamp(1, 50);

    let query_vector = state.embedder.embed(&request.query)?;
    let candidates = state.store.semantic_candidates(&request.user_id)?;
    let mut scored: Vec<(f64, Memory)> = candidates
        .into_iter()
        .map(|(memory, vector)| (cosine_similarity(&query_vector, &vector), memory))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(limit);

    let memories: Vec<Value> = scored
        .iter()
        .map(|(score, memory)| {
            let mut value = serde_json::to_value(memory).unwrap_or_default();
            if let Some(object) = value.as_object_mut() {
                object.insert("similarity".to_string(), json!(score));
            }
            value
        })
        .collect();

    let count = memories.len();
    Ok(envelope::ok(
        json!({ "memories": memories, "count": count, "query": request.query }),
        started,
    ))
}

// ============================================================================
// HEALTH & MAINTENANCE
// ============================================================================

/// `GET /api/v1/memory/health`
pub async fn health(
    State(state): State<SharedState>,
    Query(query): Query<UserQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let report = state.health.get_health(&query.user_id).await?;
    Ok(envelope::ok(serde_json::to_value(&report).unwrap_or_default(), started))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceRequest {
    user_id: String,
    #[serde(default)]
    prune: bool,
    #[serde(default)]
    archive_old: bool,
}

/// `POST /api/v1/memory/maintenance`: manual maintenance trigger.
pub async fn maintenance(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: MaintenanceRequest = parse_body(body)?;

    let options = MaintenanceOptions {
        prune: request.prune,
        criteria: state.pruning.default_criteria(),
        ..MaintenanceOptions::default()
    };
    let report = state.decay.run_maintenance(&request.user_id, options)?;

    let archived = if request.archive_old {
        let config = ArchiveConfig {
            age_threshold_days: state.config.archive_age_days,
            retain_embeddings: true,
        };
        Some(state.archive.archive_old(&request.user_id, config)?)
    } else {
        None
    };

    let mut data = serde_json::to_value(&report).unwrap_or_default();
    if let (Some(object), Some(archived)) = (data.as_object_mut(), archived) {
        object.insert(
            "archived".to_string(),
            serde_json::to_value(&archived).unwrap_or_default(),
        );
    }
    Ok(envelope::ok(data, started))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PruneRequest {
    user_id: String,
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    dry_run: Option<bool>,
    #[serde(default)]
    min_strength: Option<f64>,
    #[serde(default)]
    max_age_days: Option<f64>,
    #[serde(default)]
    min_access_count: Option<i64>,
}

/// `POST /api/v1/memory/prune`: preview (default) or execute.
pub async fn prune(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: PruneRequest = parse_body(body)?;
    let dry_run = request.dry_run.unwrap_or(true);

    if let Some(ids) = request.ids {
        let outcome = if dry_run {
            state.pruning.preview_pruning(&request.user_id, &ids)?
        } else {
            state.pruning.prune(&request.user_id, &ids)?
        };
        return Ok(envelope::ok(
            json!({
                "dryRun": dry_run,
                "deletedCount": outcome.deleted_count,
                "freedBytes": outcome.freed_bytes,
                "orphanedLinksRemoved": outcome.orphaned_links_removed,
            }),
            started,
        ));
    }

    let defaults = state.pruning.default_criteria();
    let criteria = PruningCriteria {
        min_strength: request.min_strength.unwrap_or(defaults.min_strength),
        max_age_days: request.max_age_days.unwrap_or(defaults.max_age_days),
        min_access_count: request.min_access_count.unwrap_or(defaults.min_access_count),
    };

    if dry_run {
        let candidates = state.pruning.list_candidates(&request.user_id, criteria)?;
        return Ok(envelope::ok(
            json!({
                "dryRun": true,
                "candidateCount": candidates.len(),
                "candidates": candidates,
            }),
            started,
        ));
    }

    let result = state.pruning.prune_all_candidates(&request.user_id, criteria)?;
    Ok(envelope::ok(serde_json::to_value(&result).unwrap_or_default(), started))
}

// ============================================================================
// ARCHIVE
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveRequest {
    user_id: String,
    #[serde(default)]
    memory_ids: Option<Vec<String>>,
    #[serde(default)]
    age_threshold_days: Option<u32>,
    #[serde(default)]
    retain_embeddings: Option<bool>,
}

/// `POST /api/v1/memory/archive`
pub async fn archive(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: ArchiveRequest = parse_body(body)?;
    let config = ArchiveConfig {
        age_threshold_days: request
            .age_threshold_days
            .unwrap_or(state.config.archive_age_days),
        retain_embeddings: request.retain_embeddings.unwrap_or(true),
    };

    let result = match request.memory_ids {
        Some(ids) => state.archive.archive_memories(&request.user_id, &ids, config)?,
        None => state.archive.archive_old(&request.user_id, config)?,
    };
    Ok(envelope::ok(serde_json::to_value(&result).unwrap_or_default(), started))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSearchQuery {
    pub user_id: String,
    pub query: String,
}

/// `GET /api/v1/memory/archive/search`
pub async fn archive_search(
    State(state): State<SharedState>,
    Query(request): Query<ArchiveSearchQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let hits = state.archive.search_archive(&request.user_id, &request.query, 50)?;
    let count = hits.len();
    Ok(envelope::ok(
        json!({ "memories": hits, "count": count, "query": request.query }),
        started,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRequest {
    user_id: String,
    memory_id: String,
}

/// `POST /api/v1/memory/archive/restore`
pub async fn archive_restore(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: RestoreRequest = parse_body(body)?;
    let result = state.archive.restore(&request.user_id, &request.memory_id)?;
    Ok(envelope::ok(serde_json::to_value(&result).unwrap_or_default(), started))
}

/// `GET /api/v1/memory/archive/stats`
pub async fn archive_stats(
    State(state): State<SharedState>,
    Query(query): Query<UserQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let stats = state.archive.stats(&query.user_id)?;
    Ok(envelope::ok(serde_json::to_value(&stats).unwrap_or_default(), started))
}

// ============================================================================
// DECAY CONFIG & CONSOLIDATION
// ============================================================================

/// `GET /api/v1/config/decay`
pub async fn decay_config(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let snapshot = state.sector_config.get();
    Ok(envelope::ok(serde_json::to_value(&*snapshot).unwrap_or_default(), started))
}

/// `PUT /api/v1/config/decay`
pub async fn update_decay_config(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let patch: DecayConfigPatch = parse_body(body)?;
    let updated = state.sector_config.update(patch)?;
    Ok(envelope::ok(serde_json::to_value(&*updated).unwrap_or_default(), started))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest {
    user_id: String,
}

/// `POST /api/v1/consolidation/trigger`: synchronous manual trigger.
pub async fn trigger_consolidation(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request: TriggerRequest = parse_body(body)?;
    let report = state.scheduler.trigger_now(&request.user_id).await?;
    Ok(envelope::ok(serde_json::to_value(&report).unwrap_or_default(), started))
}

/// `GET /api/v1/consolidation/progress`
pub async fn consolidation_progress(
    State(state): State<SharedState>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let progress = state.scheduler.progress();
    Ok(envelope::ok(serde_json::to_value(&progress).unwrap_or_default(), started))
}
