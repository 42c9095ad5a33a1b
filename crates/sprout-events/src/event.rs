// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current wall-clock time as epoch milliseconds (the wire timestamp unit).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Every kind of event the runtime emits during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    Perceive,
    Recall,
    PlanStart,
    PlanEnd,
    ActStart,
    ActEnd,
    PrimitiveStart,
    PrimitiveEnd,
    Verify,
    LearnSignal,
    LearnStart,
    LearnEnd,
    LearnMutation,
    Steering,
    Warning,
    Interrupted,
    Compaction,
    SessionEnd,
}

/// One structured event, serialized as a single JSONL record:
/// `{kind, timestamp, agent_id, depth, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub agent_id: String,
    pub depth: u32,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl SessionEvent {
    pub fn new(kind: EventKind, agent_id: impl Into<String>, depth: u32, data: Value) -> Self {
        let data = match data {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("value".into(), other);
                m
            }
        };
        Self { kind, timestamp: now_ms(), agent_id: agent_id.into(), depth, data }
    }

    /// Shorthand accessor for a string field in `data`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::PrimitiveEnd).unwrap();
        assert_eq!(json, "\"primitive_end\"");
        let json = serde_json::to_string(&EventKind::SessionStart).unwrap();
        assert_eq!(json, "\"session_start\"");
    }

    #[test]
    fn event_round_trips() {
        let e = SessionEvent::new(EventKind::Perceive, "root", 0, json!({"goal": "G"}));
        let line = serde_json::to_string(&e).unwrap();
        let back: SessionEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.kind, EventKind::Perceive);
        assert_eq!(back.agent_id, "root");
        assert_eq!(back.data_str("goal"), Some("G"));
    }

    #[test]
    fn non_object_data_is_wrapped() {
        let e = SessionEvent::new(EventKind::Warning, "a", 1, json!("plain"));
        assert_eq!(e.data_str("value"), Some("plain"));
    }

    #[test]
    fn null_data_is_empty_map() {
        let e = SessionEvent::new(EventKind::Verify, "a", 0, Value::Null);
        assert!(e.data.is_empty());
    }

    #[test]
    fn timestamp_is_recent() {
        let e = SessionEvent::new(EventKind::SessionEnd, "a", 0, json!({}));
        assert!((now_ms() - e.timestamp).abs() < 5_000);
    }
}
