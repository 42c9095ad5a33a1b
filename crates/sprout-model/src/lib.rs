// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
mod anthropic;
mod client;
mod mock;
mod openai_compat;
mod registry;
mod types;

pub use anthropic::AnthropicClient;
pub use client::{EventStream, LlmClient};
pub use mock::{MockClient, ScriptedClient};
pub use openai_compat::OpenAiCompatClient;
pub use registry::{available_providers, client_from_config};
pub use types::*;
