// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

fn default_model_selector() -> String {
    "good".into()
}

fn default_root_agent() -> String {
    "root".into()
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub genome: GenomeConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub learn: LearnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model selector: a symbolic tier (`fast` | `good` | `best`) or a
    /// concrete provider-qualified id such as `anthropic:claude-sonnet-4-5`.
    #[serde(default = "default_model_selector")]
    pub selector: String,
    /// Force a specific provider even when several API keys are present.
    /// Common values: "anthropic" | "openai" | "gemini" | "mock"
    pub provider: Option<String>,
    /// Environment variable holding the API key (read at runtime).
    /// Defaults to the provider's conventional variable
    /// (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`).
    pub api_key_env: Option<String>,
    /// Base URL override.  Useful for local proxies or gateways; the
    /// correct default is auto-selected per provider.
    pub base_url: Option<String>,
    /// Maximum output tokens per completion request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            selector: default_model_selector(),
            provider: None,
            api_key_env: None,
            base_url: None,
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeConfig {
    /// Root directory of the genome repository.
    /// Overridable with `SPROUT_GENOME_DIR`; defaults to `~/.sprout/genome`.
    pub dir: Option<PathBuf>,
    /// Directory of bootstrap agent specs loaded into an empty genome.
    pub bootstrap_dir: Option<PathBuf>,
}

impl Default for GenomeConfig {
    fn default() -> Self {
        Self { dir: None, bootstrap_dir: None }
    }
}

impl GenomeConfig {
    /// Resolve the genome directory: explicit config, then
    /// `SPROUT_GENOME_DIR`, then `~/.sprout/genome`.
    pub fn resolved_dir(&self) -> PathBuf {
        if let Some(d) = &self.dir {
            return d.clone();
        }
        if let Ok(d) = std::env::var("SPROUT_GENOME_DIR") {
            if !d.is_empty() {
                return PathBuf::from(d);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sprout")
            .join("genome")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Name of the agent that receives the root goal.
    #[serde(default = "default_root_agent")]
    pub root_agent: String,
    /// Working directory exposed to primitives (defaults to the process cwd).
    pub workdir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { root_agent: default_root_agent(), workdir: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnConfig {
    /// Master switch for the Learn process.  Agents with `can_learn` still
    /// produce signals when this is off, but nothing consumes them.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_good_tier() {
        let c = Config::default();
        assert_eq!(c.model.selector, "good");
    }

    #[test]
    fn default_root_agent_is_root() {
        let c = Config::default();
        assert_eq!(c.runtime.root_agent, "root");
    }

    #[test]
    fn learn_enabled_by_default() {
        let c = Config::default();
        assert!(c.learn.enabled);
    }

    #[test]
    fn empty_yaml_deserializes_to_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.model.selector, "good");
        assert!(c.learn.enabled);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let c: Config = serde_yaml::from_str("model:\n  selector: fast\n").unwrap();
        assert_eq!(c.model.selector, "fast");
        assert_eq!(c.model.max_tokens, 4096);
        assert_eq!(c.runtime.root_agent, "root");
    }

    #[test]
    fn learn_can_be_disabled() {
        let c: Config = serde_yaml::from_str("learn:\n  enabled: false\n").unwrap();
        assert!(!c.learn.enabled);
    }

    #[test]
    fn genome_dir_explicit_wins() {
        let g = GenomeConfig { dir: Some(PathBuf::from("/tmp/g")), bootstrap_dir: None };
        assert_eq!(g.resolved_dir(), PathBuf::from("/tmp/g"));
    }
}
