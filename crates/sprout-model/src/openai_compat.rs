// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::EventStream;
use crate::{
    ChatRequest, ChatResponse, ContentPart, FinishReason, LlmClient, Message, Role, StopKind,
    StreamEvent, ToolChoice, Usage,
};

/// Adapter for any OpenAI-compatible chat-completions endpoint.
///
/// Serves both OpenAI itself and Gemini, which exposes the same wire format
/// on its `openai/` compatibility path.
pub struct OpenAiCompatClient {
    provider_name: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        provider_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn openai(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self::new(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
        )
    }

    pub fn gemini(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self::new(
            "gemini",
            api_key,
            base_url.unwrap_or_else(|| {
                "https://generativelanguage.googleapis.com/v1beta/openai".into()
            }),
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn providers(&self) -> Vec<String> {
        vec![self.provider_name.clone()]
    }

    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let body = build_request_body(&req);
        debug!(provider = %self.provider_name, model = %req.model, "chat completion request");

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider_name))?;

        let status = resp.status();
        let text = resp.text().await.context("reading completion response")?;
        if !status.is_success() {
            anyhow::bail!("{} error {status}: {text}", self.provider_name);
        }
        let value: Value = serde_json::from_str(&text).context("parsing completion JSON")?;
        parse_response_body(&value, &self.provider_name)
    }

    /// Native SSE streaming over `chat/completions`.
    async fn stream(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let mut body = build_request_body(&req);
        body["stream"] = json!(true);

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} stream request failed", self.provider_name))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("{} error {status}: {text}", self.provider_name);
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut bytes = resp.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = String::new();
            let mut usage = Usage::default();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Ok(StreamEvent::Error(e.to_string())));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    for event in parse_sse_frame(&frame, &mut usage) {
                        let done = matches!(event, StreamEvent::Done);
                        let _ = tx.send(Ok(event));
                        if done {
                            break 'outer;
                        }
                    }
                }
            }
        });
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

/// Translate one SSE frame into zero or more [`StreamEvent`]s.
/// `data: [DONE]` flushes the accumulated usage and ends the stream.
fn parse_sse_frame(frame: &str, usage: &mut Usage) -> Vec<StreamEvent> {
    let mut data = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim());
        }
    }
    let Some(data) = data else { return Vec::new() };
    if data == "[DONE]" {
        return vec![StreamEvent::Usage(*usage), StreamEvent::Done];
    }
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        return vec![StreamEvent::Error(format!("unparseable SSE data: {data}"))];
    };

    if let Some(u) = v["usage"].as_object() {
        usage.input_tokens = u
            .get("prompt_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(usage.input_tokens as u64) as u32;
        usage.output_tokens = u
            .get("completion_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(usage.output_tokens as u64) as u32;
    }

    let delta = &v["choices"][0]["delta"];
    let mut events = Vec::new();
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta(text.to_string()));
        }
    }
    for call in delta["tool_calls"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
        events.push(StreamEvent::ToolCallDelta {
            index: call["index"].as_u64().unwrap_or(0) as u32,
            id: call["id"].as_str().unwrap_or("").to_string(),
            name: call["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: call["function"]["arguments"].as_str().unwrap_or("").to_string(),
        });
    }
    events
}

fn build_request_body(req: &ChatRequest) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    for m in &req.messages {
        match m.role {
            Role::System => messages.push(json!({"role": "system", "content": m.text()})),
            Role::User => messages.push(json!({"role": "user", "content": m.text()})),
            Role::Assistant => {
                let calls: Vec<Value> = m
                    .tool_calls()
                    .into_iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                let mut msg = json!({"role": "assistant"});
                let text = m.text();
                // The wire format wants `content: null` for pure tool-call turns.
                msg["content"] = if text.is_empty() { Value::Null } else { json!(text) };
                if !calls.is_empty() {
                    msg["tool_calls"] = Value::Array(calls);
                }
                messages.push(msg);
            }
            Role::Tool => {
                for p in &m.parts {
                    if let ContentPart::ToolResult { tool_call_id, content, .. } = p {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
            }
        }
    }

    let mut body = json!({"model": req.model, "messages": messages});
    if let Some(mt) = req.max_tokens {
        body["max_tokens"] = json!(mt);
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect(),
        );
        body["tool_choice"] = match &req.tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::None => json!("none"),
            ToolChoice::Required => json!("required"),
            ToolChoice::Tool(name) => {
                json!({"type": "function", "function": {"name": name}})
            }
        };
    }
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = json!(p);
    }
    if !req.stop_sequences.is_empty() {
        body["stop"] = json!(req.stop_sequences);
    }
    body
}

fn parse_response_body(v: &Value, provider: &str) -> anyhow::Result<ChatResponse> {
    let choice = &v["choices"][0];
    let msg = &choice["message"];

    let mut parts: Vec<ContentPart> = Vec::new();
    if let Some(text) = msg["content"].as_str() {
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.to_string() });
        }
    }
    for call in msg["tool_calls"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
        let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
        let arguments: Value = serde_json::from_str(raw_args).unwrap_or_else(|e| {
            warn!(error = %e, "tool call arguments were not valid JSON; substituting {{}}");
            json!({})
        });
        parts.push(ContentPart::ToolCall {
            id: call["id"].as_str().unwrap_or("").to_string(),
            name: call["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments,
        });
    }

    let raw_finish = choice["finish_reason"].as_str().unwrap_or("").to_string();
    let reason = match raw_finish.as_str() {
        "stop" => StopKind::Stop,
        "length" => StopKind::Length,
        "tool_calls" | "function_call" => StopKind::ToolCalls,
        "content_filter" => StopKind::ContentFilter,
        _ => StopKind::Other,
    };

    Ok(ChatResponse {
        id: v["id"].as_str().unwrap_or("").to_string(),
        model: v["model"].as_str().unwrap_or("").to_string(),
        provider: provider.to_string(),
        message: Message { role: Role::Assistant, parts },
        finish_reason: FinishReason { reason, raw: Some(raw_finish) },
        usage: Usage {
            input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        },
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
