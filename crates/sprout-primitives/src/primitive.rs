// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sprout_genome::GenomeStore;

/// The uniform result of executing a primitive.
///
/// Failures are data, not `Err`: the agent loop surfaces them to the model
/// as error tool-results and continues on the next turn.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveResult {
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
}

impl PrimitiveResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { output: output.into(), success: true, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { output: String::new(), success: false, error: Some(error.into()) }
    }

    /// Failure that still carries partial output (e.g. a timed-out command's
    /// captured stdout/stderr).
    pub fn fail_with_output(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self { output: output.into(), success: false, error: Some(error.into()) }
    }

    /// Text shown to the model: the error when present, otherwise the output.
    pub fn content(&self) -> &str {
        match &self.error {
            Some(e) if self.output.is_empty() => e,
            _ => &self.output,
        }
    }
}

/// Genome context for workspace-scoped primitives (`save_tool`, `save_file`).
#[derive(Clone)]
pub struct WorkspaceContext {
    pub store: Arc<GenomeStore>,
    pub agent_name: String,
}

/// Ambient execution environment handed to every primitive.
#[derive(Clone, Default)]
pub struct ExecEnv {
    /// Working directory for relative paths and spawned commands.
    pub workdir: Option<PathBuf>,
    /// Present only when the owning agent runs against a genome; gates the
    /// workspace-scoped primitives.
    pub workspace: Option<WorkspaceContext>,
}

impl ExecEnv {
    /// Resolve a possibly-relative path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            return p;
        }
        match &self.workdir {
            Some(wd) => wd.join(p),
            None => p,
        }
    }
}

/// A built-in tool with a typed schema and a uniform execute contract.
///
/// Primitives are safe to invoke sequentially; long-running ones (`exec`)
/// must honor `cancel` promptly.
#[async_trait]
pub trait Primitive: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn parameters_schema(&self) -> Value;
    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        cancel: &CancellationToken,
    ) -> PrimitiveResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
