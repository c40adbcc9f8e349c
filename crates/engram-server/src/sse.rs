//! SSE Hub
//!
//! Per-session fan-out of progress, insight, and checkpoint events over
//! tokio broadcast channels, bridged to `text/event-stream` responses.
//! Every session channel gets a 15-second heartbeat; terminal events close
//! the channel, which ends every subscriber's stream. Disconnected clients
//! drop their receivers and cost nothing further.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Heartbeat period per the wire contract.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Buffered events per channel before slow consumers lose history.
const CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// EVENTS
// ============================================================================

/// Wire event types, in canonical per-session order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseEventKind {
    StreamStarted,
    StreamProgress,
    StreamInsight,
    StreamCompleted,
    SyncCheckpoint,
    SynthesisStarted,
    SynthesisCompleted,
    SessionCompleted,
    SessionError,
    Heartbeat,
}

impl SseEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SseEventKind::StreamStarted => "stream_started",
            SseEventKind::StreamProgress => "stream_progress",
            SseEventKind::StreamInsight => "stream_insight",
            SseEventKind::StreamCompleted => "stream_completed",
            SseEventKind::SyncCheckpoint => "sync_checkpoint",
            SseEventKind::SynthesisStarted => "synthesis_started",
            SseEventKind::SynthesisCompleted => "synthesis_completed",
            SseEventKind::SessionCompleted => "session_completed",
            SseEventKind::SessionError => "session_error",
            SseEventKind::Heartbeat => "heartbeat",
        }
    }
}

/// One event as sent to clients: `{type, timestamp, data{sessionId, ...}}`.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub kind: SseEventKind,
    pub payload: Value,
}

impl SseEvent {
    pub fn new(kind: SseEventKind, session_id: &str, mut data: Value) -> Self {
        if let Some(object) = data.as_object_mut() {
            object.insert("sessionId".to_string(), json!(session_id));
        }
        Self {
            kind,
            payload: json!({
                "type": kind.as_str(),
                "timestamp": Utc::now().to_rfc3339(),
                "data": data,
            }),
        }
    }

    /// Serialized JSON for the `data:` line.
    pub fn to_json(&self) -> String {
        self.payload.to_string()
    }
}

// ============================================================================
// HUB
// ============================================================================

struct Channel {
    tx: broadcast::Sender<SseEvent>,
    closed: Arc<AtomicBool>,
}

/// Session id → broadcast channel registry.
#[derive(Default)]
pub struct SseHub {
    channels: Mutex<HashMap<String, Channel>>,
}

impl SseHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel for a session (idempotent) and start its
    /// heartbeat.
    pub fn register(self: &Arc<Self>, session_id: &str) {
        let mut channels = self.channels.lock().expect("hub lock poisoned");
        if channels.contains_key(session_id) {
            return;
        }

        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        channels.insert(
            session_id.to_string(),
            Channel {
                tx: tx.clone(),
                closed: closed.clone(),
            },
        );

        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await; // first tick is immediate; skip it
            loop {
                tick.tick().await;
                if closed.load(Ordering::Relaxed) {
                    break;
                }
                let event = SseEvent::new(SseEventKind::Heartbeat, &session_id, json!({}));
                let _ = tx.send(event);
            }
        });
    }

    /// Subscribe to a session's events. `None` for unknown sessions.
    pub fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<SseEvent>> {
        self.channels
            .lock()
            .expect("hub lock poisoned")
            .get(session_id)
            .map(|channel| channel.tx.subscribe())
    }

    /// Whether a channel exists for the session.
    pub fn has_channel(&self, session_id: &str) -> bool {
        self.channels
            .lock()
            .expect("hub lock poisoned")
            .contains_key(session_id)
    }

    /// Broadcast one event to a session's subscribers.
    pub fn broadcast(&self, session_id: &str, kind: SseEventKind, data: Value) {
        let channels = self.channels.lock().expect("hub lock poisoned");
        if let Some(channel) = channels.get(session_id) {
            let _ = channel.tx.send(SseEvent::new(kind, session_id, data));
        }
    }

    /// Send a terminal event, stop the heartbeat, and close the channel.
    /// Dropping the sender ends every subscriber's stream.
    pub fn complete(&self, session_id: &str, kind: SseEventKind, data: Value) {
        let channel = self
            .channels
            .lock()
            .expect("hub lock poisoned")
            .remove(session_id);
        if let Some(channel) = channel {
            channel.closed.store(true, Ordering::Relaxed);
            let _ = channel.tx.send(SseEvent::new(kind, session_id, data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_subscribe_broadcast() {
        let hub = Arc::new(SseHub::new());
        hub.register("s1");
        let mut rx = hub.subscribe("s1").unwrap();

        hub.broadcast("s1", SseEventKind::StreamStarted, json!({"stream": "analytical"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SseEventKind::StreamStarted);
        assert_eq!(event.payload["data"]["sessionId"], "s1");
        assert_eq!(event.payload["data"]["stream"], "analytical");
        assert_eq!(event.payload["type"], "stream_started");
        assert!(event.payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_register_idempotent() {
        let hub = Arc::new(SseHub::new());
        hub.register("s1");
        let mut rx = hub.subscribe("s1").unwrap();
        hub.register("s1");

        // Original subscription still receives
        hub.broadcast("s1", SseEventKind::StreamProgress, json!({}));
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let hub = Arc::new(SseHub::new());
        assert!(hub.subscribe("nope").is_none());
        // Broadcasting to an unknown session is a quiet no-op
        hub.broadcast("nope", SseEventKind::Heartbeat, json!({}));
    }

    #[tokio::test]
    async fn test_complete_sends_terminal_and_closes() {
        let hub = Arc::new(SseHub::new());
        hub.register("s1");
        let mut rx = hub.subscribe("s1").unwrap();

        hub.complete("s1", SseEventKind::SessionCompleted, json!({"ok": true}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SseEventKind::SessionCompleted);
        // Channel closed afterwards
        assert!(rx.recv().await.is_err());
        assert!(!hub.has_channel("s1"));
    }
}
