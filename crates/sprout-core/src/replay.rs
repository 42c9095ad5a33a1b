// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use sprout_events::{EventKind, SessionEvent};
use sprout_model::Message;

/// Rebuild conversation history from a session's JSONL event log.
///
/// Only depth-0 events contribute.  Translation:
/// - `perceive.goal` and `steering.text` → user messages
/// - `plan_end.assistant_message` → assistant message
/// - `primitive_end.tool_result_message` / `act_end.tool_result_message` → tool messages
/// - `compaction.summary` → discard all prior history and seed with a single
///   user message containing the summary (idempotent checkpoint)
///
/// Unparseable lines and unrelated kinds are skipped.
pub fn replay_event_log(log_text: &str) -> Vec<Message> {
    let mut history: Vec<Message> = Vec::new();

    for line in log_text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<SessionEvent>(line) else {
            continue;
        };
        if event.depth != 0 {
            continue;
        }
        match event.kind {
            EventKind::Perceive => {
                if let Some(goal) = event.data_str("goal") {
                    history.push(Message::user(goal));
                }
            }
            EventKind::Steering => {
                if let Some(text) = event.data_str("text") {
                    history.push(Message::user(text));
                }
            }
            EventKind::PlanEnd => {
                if let Some(value) = event.data.get("assistant_message") {
                    if let Ok(msg) = serde_json::from_value::<Message>(value.clone()) {
                        history.push(msg);
                    }
                }
            }
            EventKind::PrimitiveEnd | EventKind::ActEnd => {
                if let Some(value) = event.data.get("tool_result_message") {
                    if let Ok(msg) = serde_json::from_value::<Message>(value.clone()) {
                        history.push(msg);
                    }
                }
            }
            EventKind::Compaction => {
                if let Some(summary) = event.data_str("summary") {
                    history.clear();
                    history.push(Message::user(summary));
                }
            }
            _ => {}
        }
    }

    history
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use sprout_model::{ContentPart, Role};

    fn line(kind: EventKind, depth: u32, data: serde_json::Value) -> String {
        serde_json::to_string(&SessionEvent::new(kind, "root", depth, data)).unwrap()
    }

    #[test]
    fn replays_the_spec_sequence() {
        let assistant = Message::assistant_parts(vec![
            ContentPart::Text { text: "I'll run a cmd".into() },
            ContentPart::ToolCall {
                id: "c1".into(),
                name: "exec".into(),
                arguments: json!({"command": "echo hello"}),
            },
        ]);
        let tool = Message::tool_result("c1", "hello\n", false);
        let done = Message::assistant("Done");

        let log = [
            line(EventKind::Perceive, 0, json!({"goal": "G"})),
            line(EventKind::PlanEnd, 0, json!({"assistant_message": assistant})),
            line(EventKind::PrimitiveEnd, 0, json!({"tool_result_message": tool})),
            line(EventKind::PlanEnd, 0, json!({"assistant_message": done})),
            // depth-1 noise that must be ignored
            line(EventKind::Perceive, 1, json!({"goal": "child goal"})),
        ]
        .join("\n");

        let history = replay_event_log(&log);
        assert_eq!(history.len(), 4);
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(history[0].text(), "G");
        assert_eq!(history[1].tool_calls()[0].name, "exec");
        assert_eq!(history[3].text(), "Done");
    }

    #[test]
    fn steering_becomes_user_message() {
        let log = [
            line(EventKind::Perceive, 0, json!({"goal": "G"})),
            line(EventKind::Steering, 0, json!({"text": "focus on tests"})),
        ]
        .join("\n");
        let history = replay_event_log(&log);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text(), "focus on tests");
    }

    #[test]
    fn compaction_discards_prior_history() {
        let log = [
            line(EventKind::Perceive, 0, json!({"goal": "G"})),
            line(EventKind::PlanEnd, 0, json!({"assistant_message": Message::assistant("a1")})),
            line(EventKind::Compaction, 0, json!({"summary": "everything so far"})),
            line(EventKind::PlanEnd, 0, json!({"assistant_message": Message::assistant("a2")})),
        ]
        .join("\n");
        let history = replay_event_log(&log);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text(), "everything so far");
        assert_eq!(history[1].text(), "a2");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let log = format!(
            "not json\n{}\n{{\"half\":",
            line(EventKind::Perceive, 0, json!({"goal": "G"}))
        );
        let history = replay_event_log(&log);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn unrelated_kinds_do_not_contribute() {
        let log = [
            line(EventKind::SessionStart, 0, json!({"goal": "G"})),
            line(EventKind::PlanStart, 0, json!({})),
            line(EventKind::Verify, 0, json!({})),
        ]
        .join("\n");
        assert!(replay_event_log(&log).is_empty());
    }
}
