// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    ChatRequest, ChatResponse, ContentPart, FinishReason, LlmClient, Message, Usage,
};

/// Deterministic mock client for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockClient;

#[async_trait]
impl LlmClient for MockClient {
    fn providers(&self) -> Vec<String> {
        vec!["mock".into()]
    }

    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == crate::Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "[no input]".into());
        Ok(ChatResponse {
            id: "mock-1".into(),
            model: req.model,
            provider: "mock".into(),
            message: Message::assistant(format!("MOCK: {reply}")),
            finish_reason: FinishReason::stop(),
            usage: Usage { input_tokens: 10, output_tokens: 10 },
        })
    }
}

/// A pre-scripted client.  Each call to `complete` pops the next response
/// from the front of the queue, letting tests specify exact turn sequences —
/// including tool calls — without network access.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<ChatResponse>>,
    /// Artificial latency before each response; lets tests race cancellation
    /// against an in-flight model call.
    delay: Option<Duration>,
    /// Every `ChatRequest` seen by this client, in call order.
    /// Tests inspect this to assert what was sent.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep this long inside every `complete` call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Convenience: client that always answers with a single text turn.
    pub fn always_text(text: impl Into<String>) -> Self {
        Self::new(vec![Self::text_response(text)])
    }

    /// Build a plain-text assistant response.
    pub fn text_response(text: impl Into<String>) -> ChatResponse {
        ChatResponse {
            id: "scripted".into(),
            model: "mock-model".into(),
            provider: "mock".into(),
            message: Message::assistant(text),
            finish_reason: FinishReason::stop(),
            usage: Usage { input_tokens: 5, output_tokens: 5 },
        }
    }

    /// Build an assistant response carrying the given tool calls
    /// (and optional leading text).
    pub fn tool_call_response(
        text: Option<&str>,
        calls: Vec<(&str, &str, Value)>,
    ) -> ChatResponse {
        let mut parts: Vec<ContentPart> = Vec::new();
        if let Some(t) = text {
            parts.push(ContentPart::Text { text: t.into() });
        }
        for (id, name, arguments) in calls {
            parts.push(ContentPart::ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            });
        }
        ChatResponse {
            id: "scripted".into(),
            model: "mock-model".into(),
            provider: "mock".into(),
            message: Message::assistant_parts(parts),
            finish_reason: FinishReason::tool_calls(),
            usage: Usage { input_tokens: 5, output_tokens: 5 },
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn providers(&self) -> Vec<String> {
        vec!["mock".into()]
    }

    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(req);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| Self::text_response("[no more scripts]")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
