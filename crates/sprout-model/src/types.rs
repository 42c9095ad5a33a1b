// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single typed part of a conversation message.
///
/// Messages are ordered lists of parts; an assistant message may mix text,
/// thinking, and tool calls in one turn.  Tool results reference the `id` of
/// a prior tool call in the same conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Parsed JSON argument object.
        arguments: Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        text: String,
    },
    /// Provider-encrypted reasoning passed back verbatim on later turns.
    RedactedThinking {
        data: String,
    },
    Image {
        media_type: String,
        /// Base64-encoded image bytes.
        data: String,
    },
}

/// A tool invocation requested by the model, extracted from an assistant
/// message's `ToolCall` parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, parts: vec![ContentPart::Text { text: text.into() }] }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, parts: vec![ContentPart::Text { text: text.into() }] }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, parts: vec![ContentPart::Text { text: text.into() }] }
    }

    /// Assistant message with arbitrary parts (text + thinking + tool calls).
    pub fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::Assistant, parts }
    }

    /// Tool-result message referencing a prior tool call.
    pub fn tool_result(
        id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![ContentPart::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Concatenated text of all `Thinking` parts.
    pub fn thinking_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Thinking { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool calls requested by this message, in part order.
    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, name, arguments } => Some(ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Approximate token count (4-chars-per-token heuristic) used for the
    /// context window estimate reported in `plan_end` events.
    pub fn approx_tokens(&self) -> usize {
        let chars: usize = self
            .parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } | ContentPart::Thinking { text } => text.len(),
                ContentPart::ToolCall { name, arguments, .. } => {
                    name.len() + arguments.to_string().len()
                }
                ContentPart::ToolResult { content, .. } => content.len(),
                ContentPart::RedactedThinking { data } => data.len(),
                ContentPart::Image { data, .. } => data.len() / 32,
            })
            .sum();
        (chars / 4).max(1)
    }
}

// ─── Request / response types ─────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

/// How the model may choose tools for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    /// Force a specific tool by name.
    Tool(String),
}

/// Request sent to an LLM client.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    /// Provider hint when the client fronts several providers.
    pub provider: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
    /// Opaque provider-specific options forwarded verbatim.
    pub provider_options: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// Why the model stopped, with the provider's raw reason preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishReason {
    pub reason: StopKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl FinishReason {
    pub fn stop() -> Self {
        Self { reason: StopKind::Stop, raw: None }
    }

    pub fn tool_calls() -> Self {
        Self { reason: StopKind::ToolCalls, raw: None }
    }

    pub fn of(reason: StopKind, raw: impl Into<String>) -> Self {
        Self { reason, raw: Some(raw.into()) }
    }
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A full (non-streamed) completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub message: Message,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// Incremental tool-call fragment; `arguments` accumulates JSON text.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage(Usage),
    Done,
    /// A recoverable error (non-fatal warning)
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
