// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{ChatRequest, ChatResponse, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// The seam between the runtime and any LLM backend.
///
/// The agent loop plans with [`complete`]; [`stream`] exists for hosts that
/// want incremental output.  Implementations must be cheap to share behind an
/// `Arc` — one client instance serves the whole agent tree.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider names this client can route to (e.g. `["anthropic"]`).
    fn providers(&self) -> Vec<String>;

    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: ChatRequest) -> anyhow::Result<ChatResponse>;

    /// Send a completion request and return a streaming response.
    ///
    /// The default implementation degrades to [`complete`] and replays the
    /// finished message as a short event sequence; native adapters may
    /// override with true incremental streaming.
    async fn stream(&self, req: ChatRequest) -> anyhow::Result<EventStream> {
        let resp = self.complete(req).await?;
        let mut events: Vec<anyhow::Result<StreamEvent>> = Vec::new();
        let thinking = resp.message.thinking_text();
        if !thinking.is_empty() {
            events.push(Ok(StreamEvent::ThinkingDelta(thinking)));
        }
        let text = resp.message.text();
        if !text.is_empty() {
            events.push(Ok(StreamEvent::TextDelta(text)));
        }
        for (i, call) in resp.message.tool_calls().into_iter().enumerate() {
            events.push(Ok(StreamEvent::ToolCallDelta {
                index: i as u32,
                id: call.id,
                name: call.name,
                arguments: call.arguments.to_string(),
            }));
        }
        events.push(Ok(StreamEvent::Usage(resp.usage)));
        events.push(Ok(StreamEvent::Done));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
