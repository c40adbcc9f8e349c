//! Response Envelope
//!
//! Every success body is `{success, data, meta{requestId, durationMs}}`;
//! every failure is `{success:false, error{code, message, details?}}` with
//! the HTTP status derived from the stable error code.

use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

/// Wrap a success payload.
pub fn ok(data: Value, started: Instant) -> Response {
    with_status(StatusCode::OK, data, started)
}

/// Wrap a success payload with a non-200 status (e.g. 202 for async).
pub fn with_status(status: StatusCode, data: Value, started: Instant) -> Response {
    (
        status,
        Json(json!({
            "success": true,
            "data": data,
            "meta": {
                "requestId": Uuid::new_v4().to_string(),
                "durationMs": started.elapsed().as_millis() as u64,
            },
        })),
    )
        .into_response()
}

/// A wire-level error with a stable code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (
            self.status,
            Json(json!({ "success": false, "error": error })),
        )
            .into_response()
    }
}

/// HTTP status for a stable error code.
fn status_for(code: &str) -> StatusCode {
    match code {
        "VALIDATION_ERROR" | "INVALID_CONFIG" | "UNKNOWN_SECTOR" | "INVALID_ARGUMENT" => {
            StatusCode::BAD_REQUEST
        }
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "JOB_IN_PROGRESS" => StatusCode::CONFLICT,
        "CLUSTER_TOO_SMALL" | "LLM_NOT_CONFIGURED" | "NO_MEMORY_CONTENTS" => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        "LOAD_THRESHOLD_EXCEEDED" | "CONNECTION_ERROR" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

macro_rules! impl_from_core_error {
    ($($error:ty),+ $(,)?) => {
        $(
            impl From<$error> for ApiError {
                fn from(error: $error) -> Self {
                    ApiError::new(error.code(), error.to_string())
                }
            }
        )+
    };
}

impl_from_core_error!(
    engram_core::ArchiveError,
    engram_core::ConfigError,
    engram_core::ConsolidationError,
    engram_core::DecayError,
    engram_core::HealthError,
    engram_core::PruneError,
    engram_core::ProviderError,
    engram_core::SchedulerError,
);

impl From<engram_core::StoreError> for ApiError {
    fn from(error: engram_core::StoreError) -> Self {
        match error {
            engram_core::StoreError::NotFound(what) => ApiError::not_found(what),
            other => ApiError::new("STORE_ERROR", other.to_string()),
        }
    }
}
