// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sprout_primitives::PrimitiveResult;

/// Turn counts above this are classified as inefficiency stumbles.
pub const INEFFICIENCY_TURN_THRESHOLD: u32 = 10;

/// The packaged outcome of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActResult {
    pub agent_name: String,
    pub goal: String,
    pub output: String,
    pub success: bool,
    pub stumbles: u32,
    pub turns: u32,
    pub timed_out: bool,
}

/// Classification of an imperfect outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Failure,
    Timeout,
    Error,
    Inefficiency,
    Retry,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Inefficiency => "inefficiency",
            Self::Retry => "retry",
        }
    }
}

/// A classified post-action outcome fed to the Learn process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnSignal {
    pub kind: SignalKind,
    pub goal: String,
    pub agent_name: String,
    pub details: ActResult,
    pub session_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl LearnSignal {
    pub fn new(kind: SignalKind, details: ActResult, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            goal: details.goal.clone(),
            agent_name: details.agent_name.clone(),
            details,
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// What the loop records about a verified result.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyResult {
    pub success: bool,
    pub stumbled: bool,
    pub output: String,
}

/// Classify an agent run outcome into {clean, stumbled} and an optional
/// learn signal.
///
/// Precedence: timeout > failure > error (internal stumbles) > inefficiency.
pub fn verify_act(act: &ActResult, session_id: &str) -> (VerifyResult, Option<LearnSignal>) {
    let kind = if !act.success && act.timed_out {
        Some(SignalKind::Timeout)
    } else if !act.success {
        Some(SignalKind::Failure)
    } else if act.stumbles > 0 {
        Some(SignalKind::Error)
    } else if act.turns > INEFFICIENCY_TURN_THRESHOLD {
        Some(SignalKind::Inefficiency)
    } else {
        None
    };

    let result = VerifyResult {
        success: act.success,
        stumbled: kind.is_some(),
        output: act.output.clone(),
    };
    let signal = kind.map(|k| LearnSignal::new(k, act.clone(), session_id));
    (result, signal)
}

/// Classify a primitive outcome.  A failure is one stumble; with a session
/// id present it also produces an `error` signal whose agent name is the
/// tool name.
pub fn verify_primitive(
    result: &PrimitiveResult,
    tool_name: &str,
    goal: &str,
    session_id: Option<&str>,
) -> (bool, Option<LearnSignal>) {
    let stumbled = !result.success;
    let signal = match (stumbled, session_id) {
        (true, Some(sid)) => {
            let details = ActResult {
                agent_name: tool_name.to_string(),
                goal: goal.to_string(),
                output: result.content().to_string(),
                success: false,
                stumbles: 1,
                turns: 0,
                timed_out: false,
            };
            Some(LearnSignal::new(SignalKind::Error, details, sid))
        }
        _ => None,
    };
    (stumbled, signal)
}

/// Count redundant tool calls: each repeat of a `(name, canonical-args)`
/// signature after the first is one retry.
pub fn detect_retries(call_history: &[(String, Value)]) -> u32 {
    let mut seen = std::collections::HashMap::new();
    let mut retries = 0u32;
    for (name, args) in call_history {
        let signature = format!("{name}:{}", canonical_json(args));
        let count = seen.entry(signature).or_insert(0u32);
        if *count > 0 {
            retries += 1;
        }
        *count += 1;
    }
    retries
}

/// Deterministic JSON rendering: object keys sorted recursively.
fn canonical_json(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn act(success: bool, stumbles: u32, turns: u32, timed_out: bool) -> ActResult {
        ActResult {
            agent_name: "worker".into(),
            goal: "do it".into(),
            output: "out".into(),
            success,
            stumbles,
            turns,
            timed_out,
        }
    }

    // ── verify_act ────────────────────────────────────────────────────────────

    #[test]
    fn timeout_takes_precedence_over_failure() {
        let (vr, sig) = verify_act(&act(false, 0, 1, true), "s1");
        assert!(vr.stumbled);
        assert_eq!(sig.unwrap().kind, SignalKind::Timeout);
    }

    #[test]
    fn failure_without_timeout() {
        let (_, sig) = verify_act(&act(false, 0, 1, false), "s1");
        assert_eq!(sig.unwrap().kind, SignalKind::Failure);
    }

    #[test]
    fn success_with_stumbles_is_error() {
        let (vr, sig) = verify_act(&act(true, 2, 1, false), "s1");
        assert!(vr.success);
        assert!(vr.stumbled);
        assert_eq!(sig.unwrap().kind, SignalKind::Error);
    }

    #[test]
    fn many_turns_is_inefficiency() {
        let (_, sig) = verify_act(&act(true, 0, INEFFICIENCY_TURN_THRESHOLD + 1, false), "s1");
        assert_eq!(sig.unwrap().kind, SignalKind::Inefficiency);
    }

    #[test]
    fn threshold_turns_is_clean() {
        let (vr, sig) = verify_act(&act(true, 0, INEFFICIENCY_TURN_THRESHOLD, false), "s1");
        assert!(!vr.stumbled);
        assert!(sig.is_none());
    }

    #[test]
    fn signal_carries_session_and_details() {
        let (_, sig) = verify_act(&act(false, 1, 3, false), "sess-9");
        let sig = sig.unwrap();
        assert_eq!(sig.session_id, "sess-9");
        assert_eq!(sig.agent_name, "worker");
        assert_eq!(sig.details.turns, 3);
    }

    // ── verify_primitive ──────────────────────────────────────────────────────

    #[test]
    fn primitive_success_is_clean() {
        let r = PrimitiveResult::ok("fine");
        let (stumbled, sig) = verify_primitive(&r, "read_file", "g", Some("s"));
        assert!(!stumbled);
        assert!(sig.is_none());
    }

    #[test]
    fn primitive_failure_names_the_tool() {
        let r = PrimitiveResult::fail("no such file");
        let (stumbled, sig) = verify_primitive(&r, "read_file", "g", Some("s"));
        assert!(stumbled);
        let sig = sig.unwrap();
        assert_eq!(sig.kind, SignalKind::Error);
        assert_eq!(sig.agent_name, "read_file");
    }

    #[test]
    fn primitive_failure_without_session_id_has_no_signal() {
        let r = PrimitiveResult::fail("boom");
        let (stumbled, sig) = verify_primitive(&r, "exec", "g", None);
        assert!(stumbled);
        assert!(sig.is_none());
    }

    // ── detect_retries ────────────────────────────────────────────────────────

    #[test]
    fn no_repeats_no_retries() {
        let calls = vec![
            ("read_file".to_string(), json!({"path": "a"})),
            ("read_file".to_string(), json!({"path": "b"})),
        ];
        assert_eq!(detect_retries(&calls), 0);
    }

    #[test]
    fn each_repeat_after_first_counts() {
        let call = ("read_file".to_string(), json!({"path": "foo"}));
        let calls = vec![call.clone(), call.clone(), call];
        assert_eq!(detect_retries(&calls), 2);
    }

    #[test]
    fn key_order_does_not_matter() {
        let calls = vec![
            ("exec".to_string(), json!({"command": "ls", "timeout_ms": 5})),
            ("exec".to_string(), json!({"timeout_ms": 5, "command": "ls"})),
        ];
        assert_eq!(detect_retries(&calls), 1);
    }

    #[test]
    fn different_tools_same_args_are_distinct() {
        let calls = vec![
            ("grep".to_string(), json!({"pattern": "x"})),
            ("glob".to_string(), json!({"pattern": "x"})),
        ];
        assert_eq!(detect_retries(&calls), 0);
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let a = canonical_json(&json!({"b": {"y": 1, "x": 2}, "a": 3}));
        let b = canonical_json(&json!({"a": 3, "b": {"x": 2, "y": 1}}));
        assert_eq!(a, b);
    }
}
