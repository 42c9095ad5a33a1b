// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

/// Default number of lines returned when the caller does not specify a limit.
const DEFAULT_LINE_LIMIT: usize = 200;

pub struct ReadFilePrimitive;

#[async_trait]
impl Primitive for ReadFilePrimitive {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return line-numbered content (L{n}:, 1-indexed).\n\
         offset: 1-indexed line to start from (default 1). limit: max lines (default 200).\n\
         When more lines exist, a pagination notice shows the next offset.\n\
         Pull only the region you need — use grep first on large files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
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
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path, offset, limit, "read_file");

        let resolved = env.resolve(path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return PrimitiveResult::fail(format!("read error: {e}")),
        };

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let start = offset - 1;
        if start >= total && total > 0 {
            return PrimitiveResult::fail(format!(
                "offset {offset} is past the end of the file ({total} lines)"
            ));
        }

        let slice = &lines[start.min(total)..(start + limit).min(total)];
        let mut out = String::new();
        for (i, line) in slice.iter().enumerate() {
            out.push_str(&format!("L{}:{}\n", offset + i, line));
        }
        let last = start + slice.len();
        if last < total {
            out.push_str(&format!(
                "...[{} more lines — use offset={} to continue]\n",
                total - last,
                last + 1
            ));
        }
        PrimitiveResult::ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn read(args: Value) -> PrimitiveResult {
        ReadFilePrimitive
            .execute(&args, &ExecEnv::default(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn numbers_lines_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, "alpha\nbeta\n").unwrap();
        let r = read(json!({"path": p.to_str().unwrap()})).await;
        assert!(r.success);
        assert!(r.output.contains("L1:alpha"));
        assert!(r.output.contains("L2:beta"));
    }

    #[tokio::test]
    async fn offset_is_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, "a\nb\nc\n").unwrap();
        let r = read(json!({"path": p.to_str().unwrap(), "offset": 2})).await;
        assert!(r.output.starts_with("L2:b"));
        assert!(!r.output.contains("L1:"));
    }

    #[tokio::test]
    async fn limit_adds_pagination_notice() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, "1\n2\n3\n4\n5\n").unwrap();
        let r = read(json!({"path": p.to_str().unwrap(), "limit": 2})).await;
        assert!(r.output.contains("L1:1"));
        assert!(r.output.contains("offset=3"));
    }

    #[tokio::test]
    async fn missing_file_is_failure() {
        let r = read(json!({"path": "/nonexistent/nope.txt"})).await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("read error"));
    }

    #[tokio::test]
    async fn missing_path_param_is_failure() {
        let r = read(json!({})).await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn relative_path_resolves_against_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rel.txt"), "content\n").unwrap();
        let env = ExecEnv { workdir: Some(dir.path().to_path_buf()), workspace: None };
        let r = ReadFilePrimitive
            .execute(&json!({"path": "rel.txt"}), &env, &CancellationToken::new())
            .await;
        assert!(r.success, "{:?}", r.error);
        assert!(r.output.contains("content"));
    }
}
