// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::builtin::{
    ApplyPatchPrimitive, EditFilePrimitive, ExecPrimitive, FetchPrimitive, GlobPrimitive,
    GrepPrimitive, ReadFilePrimitive, SaveFilePrimitive, SaveToolPrimitive, WriteFilePrimitive,
};
use crate::policy::PathPolicy;
use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};
use crate::truncate::{budget_for, truncate_output};

/// A primitive schema handed to the planning layer — plain data, no code.
#[derive(Debug, Clone)]
pub struct PrimitiveSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Namespace of typed tools with a uniform execute contract.
///
/// `execute` dispatches by name, consults the caller's path policy, and
/// post-truncates output using the per-primitive budget.
pub struct PrimitiveRegistry {
    prims: HashMap<String, Arc<dyn Primitive>>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self { prims: HashMap::new() }
    }

    /// Registry with every core primitive.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register(ReadFilePrimitive);
        reg.register(WriteFilePrimitive);
        reg.register(EditFilePrimitive);
        reg.register(ApplyPatchPrimitive);
        reg.register(ExecPrimitive);
        reg.register(GrepPrimitive);
        reg.register(GlobPrimitive);
        reg.register(FetchPrimitive);
        reg
    }

    /// Core primitives plus the workspace-scoped ones (`save_tool`,
    /// `save_file`).  Use when the executing environment carries a genome.
    pub fn builtin_with_workspace() -> Self {
        let mut reg = Self::builtin();
        reg.register(SaveToolPrimitive);
        reg.register(SaveFilePrimitive);
        reg
    }

    pub fn register(&mut self, p: impl Primitive + 'static) {
        self.prims.insert(p.name().to_string(), Arc::new(p));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prims.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prims.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schema_for(&self, name: &str) -> Option<PrimitiveSchema> {
        self.prims.get(name).map(|p| PrimitiveSchema {
            name: p.name().to_string(),
            description: p.description().to_string(),
            parameters: p.parameters_schema(),
        })
    }

    pub fn schemas(&self) -> Vec<PrimitiveSchema> {
        let mut schemas: Vec<PrimitiveSchema> = self
            .prims
            .values()
            .map(|p| PrimitiveSchema {
                name: p.name().to_string(),
                description: p.description().to_string(),
                parameters: p.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Dispatch by name and truncate the output to the primitive's budget.
    pub async fn execute(
        &self,
        name: &str,
        args: &Value,
        env: &ExecEnv,
        cancel: &CancellationToken,
    ) -> PrimitiveResult {
        self.execute_policed(name, args, env, cancel, &PathPolicy::unrestricted())
            .await
    }

    /// Like [`execute`], but short-circuits with an access-denied result
    /// when the caller's path policy forbids the touched paths.
    pub async fn execute_policed(
        &self,
        name: &str,
        args: &Value,
        env: &ExecEnv,
        cancel: &CancellationToken,
        policy: &PathPolicy,
    ) -> PrimitiveResult {
        let Some(prim) = self.prims.get(name) else {
            return PrimitiveResult::fail(format!("unknown primitive: {name}"));
        };
        if let Err(denied) = policy.check(name, args) {
            return PrimitiveResult::fail(denied);
        }
        let mut result = prim.execute(args, env, cancel).await;
        let budget = budget_for(name);
        result.output = truncate_output(&result.output, budget);
        result
    }
}

impl Default for PrimitiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builtin_registers_the_core_set() {
        let reg = PrimitiveRegistry::builtin();
        for name in ["read_file", "write_file", "edit_file", "apply_patch", "exec", "grep", "glob", "fetch"]
        {
            assert!(reg.contains(name), "missing {name}");
        }
        assert!(!reg.contains("save_tool"));
    }

    #[test]
    fn workspace_variant_adds_save_primitives() {
        let reg = PrimitiveRegistry::builtin_with_workspace();
        assert!(reg.contains("save_tool"));
        assert!(reg.contains("save_file"));
    }

    #[tokio::test]
    async fn unknown_primitive_fails() {
        let reg = PrimitiveRegistry::builtin();
        let r = reg
            .execute("teleport", &json!({}), &ExecEnv::default(), &CancellationToken::new())
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("unknown primitive"));
    }

    #[tokio::test]
    async fn dispatch_reaches_the_primitive() {
        let reg = PrimitiveRegistry::builtin();
        let r = reg
            .execute(
                "exec",
                &json!({"command": "echo dispatched"}),
                &ExecEnv::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(r.success);
        assert!(r.output.contains("dispatched"));
    }

    #[tokio::test]
    async fn output_is_truncated_to_budget() {
        let reg = PrimitiveRegistry::builtin();
        let r = reg
            .execute(
                "exec",
                &json!({"command": "seq 1 2000"}),
                &ExecEnv::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(r.success);
        assert!(r.output.contains("omitted"), "expected truncation marker");
    }

    #[tokio::test]
    async fn policy_short_circuits_before_execution() {
        let reg = PrimitiveRegistry::builtin();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never.txt");
        let policy = PathPolicy::new(None, Some(vec!["/allowed/**".into()]));
        let r = reg
            .execute_policed(
                "write_file",
                &json!({"path": target.to_str().unwrap(), "content": "x"}),
                &ExecEnv::default(),
                &CancellationToken::new(),
                &policy,
            )
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("access denied"));
        assert!(!target.exists(), "file must not be written");
    }

    #[test]
    fn schemas_are_sorted_and_complete() {
        let reg = PrimitiveRegistry::builtin();
        let schemas = reg.schemas();
        assert_eq!(schemas.len(), 8);
        let names: Vec<_> = schemas.iter().map(|s| s.name.clone()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(schemas.iter().all(|s| s.parameters.is_object()));
    }
}
