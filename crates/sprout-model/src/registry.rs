// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use anyhow::bail;
use tracing::debug;

use sprout_config::ModelConfig;

use crate::{AnthropicClient, LlmClient, MockClient, OpenAiCompatClient};

/// (provider name, conventional API key environment variable)
const PROVIDER_ENV_KEYS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
];

/// Providers whose API key is present in the environment, in preference order.
pub fn available_providers() -> Vec<String> {
    PROVIDER_ENV_KEYS
        .iter()
        .filter(|(_, env)| std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Construct a boxed [`LlmClient`] from configuration.
///
/// The provider is taken from config when set, otherwise the first provider
/// with an API key in the environment wins.  `mock` is always constructible
/// (no key required) for offline runs and tests.
pub fn client_from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let provider = match &cfg.provider {
        Some(p) => p.clone(),
        None => match available_providers().into_iter().next() {
            Some(p) => p,
            None => bail!(
                "no LLM provider configured; set ANTHROPIC_API_KEY, OPENAI_API_KEY, \
                 or GEMINI_API_KEY (or model.provider: mock)"
            ),
        },
    };
    debug!(provider = %provider, "constructing LLM client");

    if provider == "mock" {
        return Ok(Arc::new(MockClient));
    }

    let env_name = cfg.api_key_env.clone().unwrap_or_else(|| {
        PROVIDER_ENV_KEYS
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, env)| env.to_string())
            .unwrap_or_default()
    });
    let key = std::env::var(&env_name).unwrap_or_default();
    if key.is_empty() {
        bail!("provider {provider:?} selected but {env_name} is not set");
    }

    let client: Arc<dyn LlmClient> = match provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(key, cfg.base_url.clone())),
        "openai" => Arc::new(OpenAiCompatClient::openai(key, cfg.base_url.clone())),
        "gemini" => Arc::new(OpenAiCompatClient::gemini(key, cfg.base_url.clone())),
        other => bail!("unknown provider {other:?}"),
    };
    Ok(client)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
