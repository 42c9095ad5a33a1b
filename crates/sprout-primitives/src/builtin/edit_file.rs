// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

pub struct EditFilePrimitive;

#[async_trait]
impl Primitive for EditFilePrimitive {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace exact text in a file. old_string must match the file exactly\n\
         (including whitespace). With replace_all=false (default) the match\n\
         must be unique — multiple occurrences fail as ambiguous; extend\n\
         old_string with surrounding context to disambiguate."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default false)"
                }
            },
            "required": ["path", "old_string", "new_string"],
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
        let Some(old_string) = args.get("old_string").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'old_string'");
        };
        let Some(new_string) = args.get("new_string").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'new_string'");
        };
        let replace_all = args.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        if old_string.is_empty() {
            return PrimitiveResult::fail("old_string must not be empty");
        }

        debug!(path, replace_all, "edit_file");

        let resolved = env.resolve(path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return PrimitiveResult::fail(format!("read error: {e}")),
        };

        let count = text.matches(old_string).count();
        if count == 0 {
            return PrimitiveResult::fail(format!("old_string not found in {path}"));
        }
        if count > 1 && !replace_all {
            return PrimitiveResult::fail(format!(
                "Ambiguous match: {count} occurrences of old_string in {path}; \
                 pass replace_all=true or add more context"
            ));
        }

        let new_text = if replace_all {
            text.replace(old_string, new_string)
        } else {
            text.replacen(old_string, new_string, 1)
        };
        let replaced = if replace_all { count } else { 1 };

        match tokio::fs::write(&resolved, new_text).await {
            Ok(()) => PrimitiveResult::ok(format!("Edited {path} ({replaced} replacement(s))")),
            Err(e) => PrimitiveResult::fail(format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
