// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::client::EventStream;
use crate::{
    ChatRequest, ChatResponse, ContentPart, FinishReason, LlmClient, Message, Role, StopKind,
    StreamEvent, ToolChoice, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Native Anthropic Messages API adapter.
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn providers(&self) -> Vec<String> {
        vec!["anthropic".into()]
    }

    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let body = build_request_body(&req);
        debug!(model = %req.model, "anthropic completion request");

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("reading anthropic response")?;
        if !status.is_success() {
            anyhow::bail!("anthropic error {status}: {text}");
        }
        let value: Value =
            serde_json::from_str(&text).context("parsing anthropic response JSON")?;
        parse_response_body(&value)
    }

    /// Native SSE streaming over the Messages API.
    async fn stream(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let mut body = build_request_body(&req);
        body["stream"] = json!(true);

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic stream request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("anthropic error {status}: {text}");
        }

        let mut bytes = resp.bytes_stream();
        let stream = async_stream_events(move |tx| async move {
            let mut buffer = String::new();
            let mut usage = Usage::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Ok(StreamEvent::Error(e.to_string())));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                // SSE frames are separated by a blank line.
                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    for event in parse_sse_frame(&frame, &mut usage) {
                        let done = matches!(event, StreamEvent::Done);
                        let _ = tx.send(Ok(event));
                        if done {
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(Ok(StreamEvent::Usage(usage)));
            let _ = tx.send(Ok(StreamEvent::Done));
        });
        Ok(stream)
    }
}

/// Bridge a producer task into a boxed event stream.
fn async_stream_events<F, Fut>(producer: F) -> EventStream
where
    F: FnOnce(tokio::sync::mpsc::UnboundedSender<anyhow::Result<StreamEvent>>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(producer(tx));
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// Translate one SSE frame (`event: …\ndata: {…}`) into zero or more
/// [`StreamEvent`]s.  Output-token usage accumulates across `message_delta`
/// frames and is flushed by the caller.
fn parse_sse_frame(frame: &str, usage: &mut Usage) -> Vec<StreamEvent> {
    let mut data = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim());
        }
    }
    let Some(data) = data else { return Vec::new() };
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return vec![StreamEvent::Error(format!("unparseable SSE data: {data}"))];
    };

    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            usage.input_tokens = v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            Vec::new()
        }
        "content_block_start" => match v["content_block"]["type"].as_str().unwrap_or("") {
            "tool_use" => vec![StreamEvent::ToolCallDelta {
                index: v["index"].as_u64().unwrap_or(0) as u32,
                id: v["content_block"]["id"].as_str().unwrap_or("").to_string(),
                name: v["content_block"]["name"].as_str().unwrap_or("").to_string(),
                arguments: String::new(),
            }],
            _ => Vec::new(),
        },
        "content_block_delta" => match v["delta"]["type"].as_str().unwrap_or("") {
            "text_delta" => {
                vec![StreamEvent::TextDelta(v["delta"]["text"].as_str().unwrap_or("").to_string())]
            }
            "thinking_delta" => vec![StreamEvent::ThinkingDelta(
                v["delta"]["thinking"].as_str().unwrap_or("").to_string(),
            )],
            "input_json_delta" => vec![StreamEvent::ToolCallDelta {
                index: v["index"].as_u64().unwrap_or(0) as u32,
                id: String::new(),
                name: String::new(),
                arguments: v["delta"]["partial_json"].as_str().unwrap_or("").to_string(),
            }],
            _ => Vec::new(),
        },
        "message_delta" => {
            usage.output_tokens = v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
            Vec::new()
        }
        "message_stop" => vec![StreamEvent::Usage(*usage), StreamEvent::Done],
        "error" => vec![StreamEvent::Error(
            v["error"]["message"].as_str().unwrap_or("stream error").to_string(),
        )],
        _ => Vec::new(),
    }
}

/// Map the request into the Messages API wire shape.
///
/// System messages collapse into the top-level `system` string; tool-role
/// messages become user messages carrying `tool_result` blocks, which is the
/// only place the API accepts them.
fn build_request_body(req: &ChatRequest) -> Value {
    let mut system = String::new();
    let mut messages: Vec<Value> = Vec::new();

    for m in &req.messages {
        match m.role {
            Role::System => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&m.text());
            }
            Role::User | Role::Tool => {
                let blocks = parts_to_blocks(&m.parts);
                if !blocks.is_empty() {
                    messages.push(json!({"role": "user", "content": blocks}));
                }
            }
            Role::Assistant => {
                let blocks = parts_to_blocks(&m.parts);
                if !blocks.is_empty() {
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
            }
        }
    }

    let mut body = json!({
        "model": req.model,
        "max_tokens": req.max_tokens.unwrap_or(4096),
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
        body["tool_choice"] = match &req.tool_choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::None => json!({"type": "none"}),
            ToolChoice::Required => json!({"type": "any"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        };
    }
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = json!(p);
    }
    if !req.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(req.stop_sequences);
    }
    if let Some(extra) = &req.provider_options {
        if let (Some(dst), Some(src)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
    }
    body
}

fn parts_to_blocks(parts: &[ContentPart]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentPart::ToolCall { id, name, arguments } => Some(json!({
                "type": "tool_use", "id": id, "name": name, "input": arguments,
            })),
            ContentPart::ToolResult { tool_call_id, content, is_error } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
                "is_error": is_error,
            })),
            ContentPart::Thinking { text } => {
                Some(json!({"type": "thinking", "thinking": text}))
            }
            ContentPart::RedactedThinking { data } => {
                Some(json!({"type": "redacted_thinking", "data": data}))
            }
            ContentPart::Image { media_type, data } => Some(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            })),
        })
        .collect()
}

fn parse_response_body(v: &Value) -> anyhow::Result<ChatResponse> {
    let mut parts: Vec<ContentPart> = Vec::new();
    for block in v["content"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
        match block["type"].as_str().unwrap_or("") {
            "text" => parts.push(ContentPart::Text {
                text: block["text"].as_str().unwrap_or("").to_string(),
            }),
            "tool_use" => parts.push(ContentPart::ToolCall {
                id: block["id"].as_str().unwrap_or("").to_string(),
                name: block["name"].as_str().unwrap_or("").to_string(),
                arguments: block["input"].clone(),
            }),
            "thinking" => parts.push(ContentPart::Thinking {
                text: block["thinking"].as_str().unwrap_or("").to_string(),
            }),
            "redacted_thinking" => parts.push(ContentPart::RedactedThinking {
                data: block["data"].as_str().unwrap_or("").to_string(),
            }),
            other => debug!(block_type = other, "ignoring unknown content block"),
        }
    }

    let raw_stop = v["stop_reason"].as_str().unwrap_or("").to_string();
    let reason = match raw_stop.as_str() {
        "end_turn" | "stop_sequence" => StopKind::Stop,
        "max_tokens" => StopKind::Length,
        "tool_use" => StopKind::ToolCalls,
        "refusal" => StopKind::ContentFilter,
        _ => StopKind::Other,
    };

    Ok(ChatResponse {
        id: v["id"].as_str().unwrap_or("").to_string(),
        model: v["model"].as_str().unwrap_or("").to_string(),
        provider: "anthropic".into(),
        message: Message { role: Role::Assistant, parts },
        finish_reason: FinishReason { reason, raw: Some(raw_stop) },
        usage: Usage {
            input_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        },
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
