// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

/// Persist a reusable tool script into the calling agent's genome workspace.
/// Only registered when the agent runs against a genome.
pub struct SaveToolPrimitive;

#[async_trait]
impl Primitive for SaveToolPrimitive {
    fn name(&self) -> &str {
        "save_tool"
    }

    fn description(&self) -> &str {
        "Save a reusable tool script to your workspace. The script is stored\n\
         with a name, description, and interpreter (default bash), made\n\
         executable, and committed. Saved tools survive across sessions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Tool name (also the file name)"
                },
                "description": {
                    "type": "string",
                    "description": "One-line description of what the tool does"
                },
                "script": {
                    "type": "string",
                    "description": "Script body"
                },
                "interpreter": {
                    "type": "string",
                    "description": "Interpreter to run the script with (default bash)"
                }
            },
            "required": ["name", "description", "script"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        _cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(ctx) = &env.workspace else {
            return PrimitiveResult::fail("save_tool requires a genome workspace");
        };
        let (Some(name), Some(description), Some(script)) = (
            args.get("name").and_then(|v| v.as_str()),
            args.get("description").and_then(|v| v.as_str()),
            args.get("script").and_then(|v| v.as_str()),
        ) else {
            return PrimitiveResult::fail("missing required parameter(s): name, description, script");
        };
        let interpreter = args.get("interpreter").and_then(|v| v.as_str());

        debug!(agent = %ctx.agent_name, tool = name, "save_tool");
        match ctx
            .store
            .save_agent_tool(&ctx.agent_name, name, description, script, interpreter)
            .await
        {
            Ok(path) => PrimitiveResult::ok(format!("Saved tool {name} to {}", path.display())),
            Err(e) => PrimitiveResult::fail(format!("save_tool failed: {e}")),
        }
    }
}

/// Persist a file into the calling agent's genome workspace.
pub struct SaveFilePrimitive;

#[async_trait]
impl Primitive for SaveFilePrimitive {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> &str {
        "Save a file to your workspace (notes, templates, reference data).\n\
         The file is committed and survives across sessions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "File name"
                },
                "content": {
                    "type": "string",
                    "description": "File content"
                }
            },
            "required": ["name", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        _cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(ctx) = &env.workspace else {
            return PrimitiveResult::fail("save_file requires a genome workspace");
        };
        let (Some(name), Some(content)) = (
            args.get("name").and_then(|v| v.as_str()),
            args.get("content").and_then(|v| v.as_str()),
        ) else {
            return PrimitiveResult::fail("missing required parameter(s): name, content");
        };

        debug!(agent = %ctx.agent_name, file = name, "save_file");
        match ctx.store.save_agent_file(&ctx.agent_name, name, content).await {
            Ok(path) => PrimitiveResult::ok(format!("Saved file {name} to {}", path.display())),
            Err(e) => PrimitiveResult::fail(format!("save_file failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::primitive::WorkspaceContext;
    use sprout_genome::GenomeStore;

    async fn env_with_genome() -> (tempfile::TempDir, ExecEnv) {
        let dir = tempfile::tempdir().unwrap();
        let store = GenomeStore::new(dir.path());
        store.init().await.unwrap();
        let env = ExecEnv {
            workdir: None,
            workspace: Some(WorkspaceContext {
                store: Arc::new(store),
                agent_name: "worker".into(),
            }),
        };
        (dir, env)
    }

    #[tokio::test]
    async fn save_tool_without_genome_fails() {
        let r = SaveToolPrimitive
            .execute(
                &json!({"name": "t", "description": "d", "script": "true"}),
                &ExecEnv::default(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("genome workspace"));
    }

    #[tokio::test]
    async fn save_tool_persists_to_workspace() {
        let (_d, env) = env_with_genome().await;
        let r = SaveToolPrimitive
            .execute(
                &json!({"name": "hello", "description": "says hi", "script": "echo hi\n"}),
                &env,
                &CancellationToken::new(),
            )
            .await;
        assert!(r.success, "{:?}", r.error);

        let ctx = env.workspace.as_ref().unwrap();
        let tools = ctx.store.load_agent_tools("worker").await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "hello");
    }

    #[tokio::test]
    async fn save_file_persists_to_workspace() {
        let (_d, env) = env_with_genome().await;
        let r = SaveFilePrimitive
            .execute(
                &json!({"name": "notes.md", "content": "remember"}),
                &env,
                &CancellationToken::new(),
            )
            .await;
        assert!(r.success, "{:?}", r.error);

        let ctx = env.workspace.as_ref().unwrap();
        let files = ctx.store.list_agent_files("worker").await.unwrap();
        assert_eq!(files, vec!["notes.md"]);
    }
}
