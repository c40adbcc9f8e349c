//! End-to-end test harness
//!
//! Shared fixtures: throwaway stores, scripted providers, and an
//! in-process HTTP helper driving the real router via `tower::oneshot`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use clap::Parser;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use engram_core::{LlmProvider, ProviderError};
use engram_server::{ServerConfig, SharedState};

/// LLM double that answers instantly with a fixed summary.
pub struct ScriptedLlm {
    response: String,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, _prompt: &str, _system: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// LLM double that never answers; drives the timeout fallback paths.
pub struct HangingLlm;

#[async_trait]
impl LlmProvider for HangingLlm {
    async fn generate(&self, _prompt: &str, _system: &str) -> Result<String, ProviderError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Build server state against a temp store, scheduler disabled.
pub fn server_state(dir: &TempDir, llm: Option<Arc<dyn LlmProvider>>) -> SharedState {
    let config = ServerConfig::parse_from([
        "engram-server",
        "--data-dir",
        dir.path().to_str().unwrap(),
        "--scheduler-enabled",
        "false",
        "--llm-timeout-ms",
        "5000",
    ]);
    engram_server::build(config, llm).unwrap()
}

/// Drive one request through the real router.
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
