//! Session Store
//!
//! In-process map of session id to session state for think-sessions and
//! parallel-reasoning sessions. Mutex-protected, copy-on-write updates, and
//! a periodic sweep that expires sessions past their TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;

// ============================================================================
// SESSION TYPES
// ============================================================================

/// Kind of reasoning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Think,
    Reasoning,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Think => "think",
            SessionKind::Reasoning => "reasoning",
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Processing,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Processing => "processing",
            SessionStatus::Complete => "complete",
            SessionStatus::Error => "error",
        }
    }
}

/// Which sync checkpoints the coordinator has passed, in elapsed ms.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoints {
    pub sync25: Option<u64>,
    pub sync50: Option<u64>,
    pub sync75: Option<u64>,
}

/// One reasoning session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    /// Fraction complete in [0,1]
    pub progress: f64,
    pub stage: String,
    pub active_streams: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checkpoints: SyncCheckpoints,
    /// Terminal result payload, shape owned by the facade
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

// ============================================================================
// STORE
// ============================================================================

/// Mutex-protected session map with TTL expiry.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::milliseconds(ttl.as_millis() as i64),
            clock,
        }
    }

    /// Create a session with a fresh `<kind>-<timestampMs>-<hex6>` id.
    pub fn create_session(&self, kind: SessionKind, active_streams: Vec<String>) -> Session {
        let now = self.clock.now();
        let suffix: u32 = rand::random::<u32>() & 0xff_ffff;
        let id = format!("{}-{}-{:06x}", kind.as_str(), now.timestamp_millis(), suffix);

        let session = Session {
            id: id.clone(),
            kind,
            status: SessionStatus::Processing,
            progress: 0.0,
            stage: "created".to_string(),
            active_streams,
            started_at: now,
            completed_at: None,
            error: None,
            checkpoints: SyncCheckpoints::default(),
            result: None,
        };
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(id, session.clone());
        session
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(id)
            .cloned()
    }

    /// Copy-on-write update. Returns false for an unknown id.
    pub fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        match sessions.get(id) {
            Some(current) => {
                let mut updated = current.clone();
                mutate(&mut updated);
                sessions.insert(id.to_string(), updated);
                true
            }
            None => false,
        }
    }

    /// Mark a session complete with its result payload.
    pub fn complete(&self, id: &str, result: serde_json::Value) -> bool {
        let now = self.clock.now();
        self.update(id, |session| {
            session.status = SessionStatus::Complete;
            session.progress = 1.0;
            session.stage = "complete".to_string();
            session.completed_at = Some(now);
            session.result = Some(result);
        })
    }

    /// Mark a session failed.
    pub fn fail(&self, id: &str, error: String) -> bool {
        let now = self.clock.now();
        self.update(id, |session| {
            session.status = SessionStatus::Error;
            session.stage = "error".to_string();
            session.completed_at = Some(now);
            session.error = Some(error);
        })
    }

    /// Remove sessions started longer than the TTL ago. Returns the number
    /// removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.ttl;
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, session| session.started_at >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic TTL sweeper.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                store.sweep();
            }
        })
    }
}
