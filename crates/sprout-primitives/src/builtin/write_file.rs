// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

pub struct WriteFilePrimitive;

#[async_trait]
impl Primitive for WriteFilePrimitive {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed.\n\
         Overwrites the file if it exists. For surgical changes to an existing\n\
         file prefer edit_file or apply_patch."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Destination path"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        _cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'path'");
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'content'");
        };

        debug!(path, bytes = content.len(), "write_file");

        let resolved = env.resolve(path);
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return PrimitiveResult::fail(format!("mkdir error: {e}"));
                }
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => PrimitiveResult::ok(format!(
                "Wrote {} bytes to {}",
                content.len(),
                resolved.display()
            )),
            Err(e) => PrimitiveResult::fail(format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
