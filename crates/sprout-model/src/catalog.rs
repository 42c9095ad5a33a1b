// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::bail;

/// Symbolic model tier used in agent specs instead of concrete model ids.
///
/// Tiers keep the genome portable across providers: a spec saying `fast`
/// resolves to whatever the selected provider's cheap model is at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Good,
    Best,
}

impl ModelTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(Self::Fast),
            "good" => Some(Self::Good),
            "best" => Some(Self::Best),
            _ => None,
        }
    }
}

/// Per-provider tier table.  Ordered (fast, good, best).
fn tier_table(provider: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match provider {
        "anthropic" => Some((
            "claude-haiku-4-5",
            "claude-sonnet-4-5",
            "claude-opus-4-5",
        )),
        "openai" => Some(("gpt-4o-mini", "gpt-4o", "o3")),
        "gemini" => Some((
            "gemini-2.5-flash-lite",
            "gemini-2.5-flash",
            "gemini-2.5-pro",
        )),
        "mock" => Some(("mock-model", "mock-model", "mock-model")),
        _ => None,
    }
}

/// Resolve an agent-spec model selector to `(provider, model_id)`.
///
/// Accepts either a symbolic tier (`fast` | `good` | `best`) resolved against
/// `default_provider`, or a concrete `provider:model-id` pair which wins
/// regardless of the default.
pub fn resolve(selector: &str, default_provider: &str) -> anyhow::Result<(String, String)> {
    if let Some((provider, model)) = selector.split_once(':') {
        if provider.is_empty() || model.is_empty() {
            bail!("malformed model selector: {selector:?}");
        }
        return Ok((provider.to_string(), model.to_string()));
    }
    let Some(tier) = ModelTier::parse(selector) else {
        bail!("unknown model selector {selector:?}; expected fast|good|best or provider:model");
    };
    let Some((fast, good, best)) = tier_table(default_provider) else {
        bail!("no tier table for provider {default_provider:?}");
    };
    let model = match tier {
        ModelTier::Fast => fast,
        ModelTier::Good => good,
        ModelTier::Best => best,
    };
    Ok((default_provider.to_string(), model.to_string()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
