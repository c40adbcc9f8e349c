//! HTTP surface: envelopes, validation mapping, the parallel reasoning
//! happy path, and the think fallback under a hung LLM.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use tempfile::TempDir;

use engram_server::api;
use engram_e2e_tests::{send, server_state, HangingLlm};

fn app(llm: Option<Arc<dyn engram_core::LlmProvider>>) -> (axum::Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let state = server_state(&dir, llm);
    (api::router(state), dir)
}

#[tokio::test]
async fn parallel_reasoning_happy_path() {
    let (app, _dir) = app(None);
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/reasoning/parallel",
        Some(json!({
            "problem": "Should we shard the database now or wait a quarter?",
            "streams": ["analytical", "creative", "critical", "synthetic"],
            "timeout": 30000
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert!(data["sessionId"].as_str().unwrap().starts_with("reasoning-"));
    assert_eq!(data["streams"].as_array().unwrap().len(), 4);
    let confidence = data["synthesis"]["confidence"].as_f64().unwrap();
    assert!(confidence > 0.0 && confidence <= 1.0);
    assert!(data["coordinationMetrics"]["overheadPercentage"].as_f64().unwrap() >= 0.0);
    assert!(body["meta"]["durationMs"].is_number());
}

#[tokio::test]
async fn parallel_reasoning_validation_errors() {
    let (app, _dir) = app(None);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/reasoning/parallel",
        Some(json!({ "problem": "", "streams": ["analytical"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/reasoning/parallel",
        Some(json!({ "problem": "x", "streams": ["telepathic"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(
        app,
        "POST",
        "/api/v1/reasoning/parallel",
        Some(json!({ "problem": "x", "streams": ["analytical"], "timeout": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn async_reasoning_returns_accepted() {
    let (app, _dir) = app(None);
    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/reasoning/parallel",
        Some(json!({
            "problem": "Plan the data center move",
            "streams": ["analytical", "critical"],
            "async": true
        })),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "processing");
    let session_id = body["data"]["sessionId"].as_str().unwrap().to_string();

    // The status endpoint sees the session immediately
    let (status, body) = send(
        app,
        "GET",
        &format!("/api/v1/think/status/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["status"].is_string());
    assert!(body["data"]["activeStreams"].is_array());
}

#[tokio::test]
async fn think_status_unknown_session_is_404() {
    let (app, _dir) = app(None);
    let (status, body) = send(app, "GET", "/api/v1/think/status/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn think_balanced_mode_succeeds() {
    let (app, _dir) = app(None);
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/think",
        Some(json!({
            "problem": "How should we roll out the new retry policy?",
            "mode": "balanced"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["modeUsed"], "balanced");
    assert!(data["confidence"].as_f64().unwrap() > 0.0);
    assert!(!data["thoughts"].as_array().unwrap().is_empty());
    assert!(data["metacognitiveAssessment"]["uncertaintyType"].is_string());
    assert!(data.get("_meta").is_none());
}

#[tokio::test]
async fn think_falls_back_when_llm_hangs() {
    // Rule-based fallback: 200, fallbackUsed, confidence 0.3, three
    // recommendations
    let (app, _dir) = app(Some(Arc::new(HangingLlm)));
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/think",
        Some(json!({
            "problem": "Is the rollout safe?",
            "mode": "balanced",
            "timeout": 1000
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["_meta"]["fallbackUsed"], true);
    assert_eq!(data["_meta"]["reason"], "LLM timeout");
    assert_eq!(data["confidence"], 0.3);
    assert_eq!(data["recommendations"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn memory_round_trip_over_http() {
    let (app, _dir) = app(None);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/memory",
        Some(json!({
            "userId": "u1",
            "content": "the feature flag dashboard lives at /flags",
            "sector": "procedural"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let memory_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["embeddingStatus"], "complete");

    // Retrieval reinforces on access
    let (status, body) = send(
        app.clone(),
        "GET",
        &format!("/api/v1/memory/{memory_id}?userId=u1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["accessCount"], 1);
    assert_eq!(body["data"]["restoredFromArchive"], false);

    // Similar queries find it
    let (status, body) = send(
        app.clone(),
        "GET",
        "/api/v1/memory/search?userId=u1&query=feature%20flag%20dashboard",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["count"].as_u64().unwrap() >= 1);
    assert_eq!(body["data"]["memories"][0]["id"], memory_id.as_str());

    // Unknown ids are 404 with the stable code
    let (status, body) = send(
        app,
        "GET",
        "/api/v1/memory/not-a-memory?userId=u1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn memory_validation_errors() {
    let (app, _dir) = app(None);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/memory",
        Some(json!({ "userId": "u1", "content": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(
        app,
        "POST",
        "/api/v1/memory",
        Some(json!({ "userId": "u1", "content": "ok", "sector": "intergalactic" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn archive_endpoints_round_trip() {
    let (app, _dir) = app(None);

    let (_, body) = send(
        app.clone(),
        "POST",
        "/api/v1/memory",
        Some(json!({ "userId": "u1", "content": "the old runbook said restart twice" })),
    )
    .await;
    let memory_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/memory/archive",
        Some(json!({ "userId": "u1", "memoryIds": [memory_id] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["archivedCount"], 1);
    assert!(body["data"]["freedBytes"].as_u64().unwrap() > 0);
    assert!(body["data"]["timestamp"].is_string());

    let (status, body) = send(
        app.clone(),
        "GET",
        "/api/v1/memory/archive/search?userId=u1&query=runbook",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["memories"][0]["isArchived"], true);

    let (status, body) = send(
        app.clone(),
        "GET",
        "/api/v1/memory/archive/stats?userId=u1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/api/v1/memory/archive/restore",
        Some(json!({ "userId": "u1", "memoryId": memory_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["restoredCount"], 1);

    // Restoring twice fails: the entry left the archive
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/memory/archive/restore",
        Some(json!({ "userId": "u1", "memoryId": body["data"]["memoryId"].clone() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn health_and_config_endpoints() {
    let (app, _dir) = app(None);

    let (status, body) = send(app.clone(), "GET", "/api/v1/memory/health?userId=u1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["storage"]["usagePercent"], 0.0);
    assert!(body["data"]["recommendations"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["activeConsolidation"]["isRunning"], false);

    // Config round trip with validation
    let (status, body) = send(
        app.clone(),
        "PUT",
        "/api/v1/config/decay",
        Some(json!({ "baseLambda": 0.05 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["baseLambda"], 0.05);

    let (status, body) = send(
        app.clone(),
        "PUT",
        "/api/v1/config/decay",
        Some(json!({ "baseLambda": -1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_CONFIG");

    // Failed update did not stick
    let (_, body) = send(app, "GET", "/api/v1/config/decay", None).await;
    assert_eq!(body["data"]["baseLambda"], 0.05);
}

#[tokio::test]
async fn mcp_tool_surface() {
    let (app, _dir) = app(None);

    let (status, body) = send(
        app.clone(),
        "POST",
        "/mcp",
        Some(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["serverInfo"]["name"], "engram");

    let (_, body) = send(
        app.clone(),
        "POST",
        "/mcp",
        Some(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })),
    )
    .await;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "memory_store"));
    assert!(tools.iter().any(|t| t["name"] == "reason"));

    let (_, body) = send(
        app.clone(),
        "POST",
        "/mcp",
        Some(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "memory_store",
                "arguments": { "userId": "u1", "content": "stored over mcp" }
            }
        })),
    )
    .await;
    assert_eq!(body["result"]["isError"], false);

    let (_, body) = send(
        app,
        "POST",
        "/mcp",
        Some(json!({ "jsonrpc": "2.0", "id": 4, "method": "no/such/method" })),
    )
    .await;
    assert_eq!(body["error"]["code"], -32601);
}
