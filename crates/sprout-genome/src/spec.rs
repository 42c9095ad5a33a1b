// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

fn default_max_turns() -> u32 {
    12
}

fn default_max_depth() -> u32 {
    3
}

/// Execution limits and permissions for one agent.
///
/// `timeout_ms = 0` disables the wall-clock limit.  `max_depth = 0` never
/// blocks construction but disables spawning for this agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub can_spawn: bool,
    #[serde(default)]
    pub can_learn: bool,
    /// Glob patterns of paths this agent may read.  `None` = unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_read_paths: Option<Vec<String>>,
    /// Glob patterns of paths this agent may write.  `None` = unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_write_paths: Option<Vec<String>>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_depth: default_max_depth(),
            timeout_ms: 0,
            can_spawn: false,
            can_learn: true,
            allowed_read_paths: None,
            allowed_write_paths: None,
        }
    }
}

/// The versioned identity of an agent.
///
/// Serialized to `agents/<name>.yaml`; field order here fixes the YAML field
/// order on disk.  `capabilities` entries name either other agents or
/// registered primitives; unresolvable entries (including self-references)
/// are ignored at load time by the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Symbolic tier (`fast` | `good` | `best`) or `provider:model-id`.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub system_prompt: String,
    /// Monotonically increasing; bumped by `GenomeStore::update_agent`.
    #[serde(default)]
    pub version: u64,
}

fn default_model() -> String {
    "good".into()
}

impl AgentSpec {
    /// Minimal spec for tests and bootstrap tooling.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: default_model(),
            capabilities: Vec::new(),
            constraints: Constraints::default(),
            tags: Vec::new(),
            system_prompt: String::new(),
            version: 1,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
