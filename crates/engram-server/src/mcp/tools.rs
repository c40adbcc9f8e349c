//! MCP Tools
//!
//! Schema and execute pairs over the core engines. Each tool takes JSON
//! arguments and returns a JSON result; errors are plain strings surfaced
//! as JSON-RPC internal errors.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{
    cosine_similarity, ArchiveConfig, EmbeddingStatus, MaintenanceOptions, Memory, MemoryInput,
    ReasoningProblem, Sector, SessionKind, StreamType,
};

use crate::api::reasoning::{live_key, run_session};
use crate::state::SharedState;

/// Tool descriptors for `tools/list`.
pub fn list() -> Vec<Value> {
    vec![
        tool(
            "memory_store",
            "Store a memory with sector classification and salience",
            json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "content": { "type": "string" },
                    "sector": {
                        "type": "string",
                        "enum": ["episodic", "semantic", "procedural", "emotional", "reflective"],
                        "default": "episodic"
                    },
                    "salience": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                },
                "required": ["userId", "content"]
            }),
        ),
        tool(
            "memory_search",
            "Semantic similarity search over a user's memories",
            json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 50, "default": 10 }
                },
                "required": ["userId", "query"]
            }),
        ),
        tool(
            "memory_health",
            "Storage, sector, and forgetting metrics with recommendations",
            json!({
                "type": "object",
                "properties": { "userId": { "type": "string" } },
                "required": ["userId"]
            }),
        ),
        tool(
            "run_maintenance",
            "Apply decay across a user's memories, optionally pruning candidates",
            json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "prune": { "type": "boolean", "default": false }
                },
                "required": ["userId"]
            }),
        ),
        tool(
            "run_consolidation",
            "Trigger consolidation for a user (fails fast if a job is running)",
            json!({
                "type": "object",
                "properties": { "userId": { "type": "string" } },
                "required": ["userId"]
            }),
        ),
        tool(
            "prune_memories",
            "Preview (default) or delete low-value memories",
            json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "dryRun": { "type": "boolean", "default": true }
                },
                "required": ["userId"]
            }),
        ),
        tool(
            "archive_memories",
            "Move old memories to the archive",
            json!({
                "type": "object",
                "properties": {
                    "userId": { "type": "string" },
                    "ageThresholdDays": { "type": "integer", "minimum": 1 },
                    "retainEmbeddings": { "type": "boolean", "default": true }
                },
                "required": ["userId"]
            }),
        ),
        tool(
            "reason",
            "Run parallel multi-stream reasoning over a problem",
            json!({
                "type": "object",
                "properties": {
                    "problem": { "type": "string" },
                    "streams": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": ["analytical", "creative", "critical", "synthetic"]
                        }
                    },
                    "timeoutMs": { "type": "integer", "minimum": 1000, "maximum": 60000 }
                },
                "required": ["problem"]
            }),
        ),
    ]
}

fn tool(name: &str, description: &str, schema: Value) -> Value {
    json!({ "name": name, "description": description, "inputSchema": schema })
}

/// Dispatch a tool call by name.
pub async fn execute(state: &SharedState, name: &str, args: Option<Value>) -> Result<Value, String> {
    match name {
        "memory_store" => memory_store(state, args),
        "memory_search" => memory_search(state, args),
        "memory_health" => memory_health(state, args).await,
        "run_maintenance" => run_maintenance(state, args),
        "run_consolidation" => run_consolidation(state, args).await,
        "prune_memories" => prune_memories(state, args),
        "archive_memories" => archive_memories(state, args),
        "reason" => reason(state, args).await,
        other => Err(format!("Unknown tool: {other}")),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Option<Value>) -> Result<T, String> {
    match args {
        Some(value) => {
            serde_json::from_value(value).map_err(|e| format!("Invalid arguments: {e}"))
        }
        None => Err("Missing arguments".to_string()),
    }
}

// ============================================================================
// EXECUTE FUNCTIONS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreArgs {
    user_id: String,
    content: String,
    sector: Option<String>,
    salience: Option<f64>,
}

fn memory_store(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: StoreArgs = parse_args(args)?;
    if args.content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    let sector = match &args.sector {
        Some(name) => Sector::from_name(name).ok_or_else(|| format!("unknown sector '{name}'"))?,
        None => Sector::Episodic,
    };

    let mut memory = Memory::from_input(
        MemoryInput {
            user_id: args.user_id,
            session_id: None,
            content: args.content,
            sector,
            salience: args.salience.unwrap_or(0.5).clamp(0.0, 1.0),
        },
        state.clock.now(),
    );
    match state.embedder.embed(&memory.content) {
        Ok(vector) => {
            memory.embedding_status = EmbeddingStatus::Complete;
            state.store.insert_memory(&memory).map_err(|e| e.to_string())?;
            state
                .store
                .upsert_embedding(&memory.id, Sector::Semantic, &vector)
                .map_err(|e| e.to_string())?;
        }
        Err(_) => {
            memory.embedding_status = EmbeddingStatus::Failed;
            state.store.insert_memory(&memory).map_err(|e| e.to_string())?;
        }
    }

    Ok(json!({
        "tool": "memory_store",
        "memoryId": memory.id,
        "sector": memory.primary_sector.as_str(),
        "embeddingStatus": memory.embedding_status.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    user_id: String,
    query: String,
    limit: Option<usize>,
}

fn memory_search(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: SearchArgs = parse_args(args)?;
    let limit = args.limit.unwrap_or(10).clamp(1, 50);
    let query_vector = state.embedder.embed(&args.query).map_err(|e| e.to_string())?;
    let candidates = state
        .store
        .semantic_candidates(&args.user_id)
        .map_err(|e| e.to_string())?;

    let mut scored: Vec<(f64, Memory)> = candidates
        .into_iter()
        .map(|(memory, vector)| (cosine_similarity(&query_vector, &vector), memory))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(limit);

    let results: Vec<Value> = scored
        .iter()
        .map(|(score, memory)| {
            json!({
                "memoryId": memory.id,
                "content": memory.content,
                "sector": memory.primary_sector.as_str(),
                "strength": memory.strength,
                "similarity": score,
            })
        })
        .collect();
    Ok(json!({ "tool": "memory_search", "count": results.len(), "results": results }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserArgs {
    user_id: String,
}

async fn memory_health(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: UserArgs = parse_args(args)?;
    let report = state
        .health
        .get_health(&args.user_id)
        .await
        .map_err(|e| e.to_string())?;
    let mut value = serde_json::to_value(&report).map_err(|e| e.to_string())?;
    if let Some(object) = value.as_object_mut() {
        object.insert("tool".to_string(), json!("memory_health"));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceArgs {
    user_id: String,
    prune: Option<bool>,
}

fn run_maintenance(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: MaintenanceArgs = parse_args(args)?;
    let options = MaintenanceOptions {
        prune: args.prune.unwrap_or(false),
        criteria: state.pruning.default_criteria(),
        ..MaintenanceOptions::default()
    };
    let report = state
        .decay
        .run_maintenance(&args.user_id, options)
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "tool": "run_maintenance",
        "processed": report.processed,
        "pruned": report.pruned,
        "processingTimeMs": report.processing_time_ms,
        "errors": report.errors,
    }))
}

async fn run_consolidation(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: UserArgs = parse_args(args)?;
    let report = state
        .scheduler
        .trigger_now(&args.user_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "tool": "run_consolidation",
        "clustersIdentified": report.clusters_identified,
        "clustersConsolidated": report.clusters_consolidated,
        "memoriesConsolidated": report.memories_consolidated,
        "errors": report.errors,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PruneArgs {
    user_id: String,
    dry_run: Option<bool>,
}

fn prune_memories(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: PruneArgs = parse_args(args)?;
    let criteria = state.pruning.default_criteria();
    // Default to dry run for safety
    if args.dry_run.unwrap_or(true) {
        let candidates = state
            .pruning
            .list_candidates(&args.user_id, criteria)
            .map_err(|e| e.to_string())?;
        let sample: Vec<Value> = candidates
            .iter()
            .take(10)
            .map(|c| {
                json!({
                    "memoryId": c.memory_id,
                    "reason": c.reason.as_str(),
                    "strength": c.strength,
                })
            })
            .collect();
        return Ok(json!({
            "tool": "prune_memories",
            "dryRun": true,
            "candidateCount": candidates.len(),
            "sample": sample,
        }));
    }

    let result = state
        .pruning
        .prune_all_candidates(&args.user_id, criteria)
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "tool": "prune_memories",
        "dryRun": false,
        "deletedCount": result.outcome.deleted_count,
        "freedBytes": result.outcome.freed_bytes,
        "orphanedLinksRemoved": result.outcome.orphaned_links_removed,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveArgs {
    user_id: String,
    age_threshold_days: Option<u32>,
    retain_embeddings: Option<bool>,
}

fn archive_memories(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: ArchiveArgs = parse_args(args)?;
    let config = ArchiveConfig {
        age_threshold_days: args
            .age_threshold_days
            .unwrap_or(state.config.archive_age_days),
        retain_embeddings: args.retain_embeddings.unwrap_or(true),
    };
    let result = state
        .archive
        .archive_old(&args.user_id, config)
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "tool": "archive_memories",
        "archivedCount": result.archived_count,
        "freedBytes": result.freed_bytes,
        "timestamp": result.timestamp.to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReasonArgs {
    problem: String,
    streams: Option<Vec<String>>,
    timeout_ms: Option<u64>,
}

async fn reason(state: &SharedState, args: Option<Value>) -> Result<Value, String> {
    let args: ReasonArgs = parse_args(args)?;
    if args.problem.trim().is_empty() {
        return Err("problem must not be empty".to_string());
    }
    let types: Vec<StreamType> = match args.streams {
        Some(names) if !names.is_empty() => {
            let mut types = Vec::new();
            for name in &names {
                let stream_type = StreamType::from_name(name)
                    .ok_or_else(|| format!("unknown stream type '{name}'"))?;
                if !types.contains(&stream_type) {
                    types.push(stream_type);
                }
            }
            types
        }
        _ => StreamType::ALL.to_vec(),
    };
    let timeout =
        Duration::from_millis(state.config.effective_timeout_ms(args.timeout_ms));

    let session = state.sessions.create_session(
        SessionKind::Reasoning,
        types.iter().map(|t| t.as_str().to_string()).collect(),
    );
    state.hub.register(&session.id);
    for stream_type in &types {
        state.hub.register(&live_key(&session.id, *stream_type));
    }

    let problem = ReasoningProblem::new(args.problem);
    let outcome = run_session(
        state.clone(),
        session.id.clone(),
        problem,
        types,
        timeout,
    )
    .await;

    Ok(json!({
        "tool": "reason",
        "sessionId": session.id,
        "conclusion": outcome.result.conclusion,
        "confidence": outcome.result.confidence,
        "conflicts": outcome.result.conflicts.len(),
        "streams": outcome
            .result
            .stream_results
            .iter()
            .map(|r| json!({ "type": r.stream_type.as_str(), "status": r.status.as_str() }))
            .collect::<Vec<_>>(),
    }))
}
