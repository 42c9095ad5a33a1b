// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::policy::glob_match;
use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

const DEFAULT_MAX_RESULTS: usize = 200;

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub struct GlobPrimitive;

#[async_trait]
impl Primitive for GlobPrimitive {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, newest first (by mtime).\n\
         Patterns: *.rs | **/*.rs | src/**/*.c | Cargo.toml\n\
         path: root to search from (default '.'). Excludes .git/, target/,\n\
         node_modules/. For content search use grep."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern matched against paths relative to the root"
                },
                "path": {
                    "type": "string",
                    "description": "Root directory to search from (default '.')"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        _cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'pattern'");
        };
        let root = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        debug!(pattern, root, "glob");

        // A bare filename pattern searches the whole tree.
        let pattern = if pattern.contains('/') {
            pattern.to_string()
        } else {
            format!("**/{pattern}")
        };
        let resolved_root = env.resolve(root);

        let result = tokio::task::spawn_blocking(move || {
            let mut hits: Vec<(SystemTime, String)> = Vec::new();
            let walker = WalkDir::new(&resolved_root)
                .into_iter()
                .filter_entry(|e| {
                    !(e.file_type().is_dir()
                        && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
                });
            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&resolved_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                if !glob_match(&pattern, &rel) {
                    continue;
                }
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                hits.push((mtime, entry.path().to_string_lossy().into_owned()));
            }
            // Newest first.
            hits.sort_by(|a, b| b.0.cmp(&a.0));
            hits.truncate(DEFAULT_MAX_RESULTS);
            hits.into_iter().map(|(_, p)| p).collect::<Vec<_>>()
        })
        .await;

        match result {
            Ok(paths) => PrimitiveResult::ok(paths.join("\n")),
            Err(e) => PrimitiveResult::fail(format!("glob failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn glob(args: Value) -> PrimitiveResult {
        GlobPrimitive
            .execute(&args, &ExecEnv::default(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn bare_extension_pattern_searches_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/b.rs"), "y").unwrap();
        std::fs::write(dir.path().join("c.txt"), "z").unwrap();

        let r = glob(json!({"pattern": "*.rs", "path": dir.path().to_str().unwrap()})).await;
        assert!(r.success);
        assert!(r.output.contains("a.rs"));
        assert!(r.output.contains("b.rs"));
        assert!(!r.output.contains("c.txt"));
    }

    #[tokio::test]
    async fn newest_first_ordering() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.log"), "1").unwrap();
        // Make mtimes distinct without sleeping long.
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("new.log"), "2").unwrap();

        let r = glob(json!({"pattern": "*.log", "path": dir.path().to_str().unwrap()})).await;
        let lines: Vec<&str> = r.output.lines().collect();
        assert!(lines[0].ends_with("new.log"), "{lines:?}");
        assert!(lines[1].ends_with("old.log"));
    }

    #[tokio::test]
    async fn no_matches_is_success_with_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let r = glob(json!({"pattern": "*.zig", "path": dir.path().to_str().unwrap()})).await;
        assert!(r.success);
        assert_eq!(r.output, "");
    }

    #[tokio::test]
    async fn directory_scoped_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        std::fs::write(dir.path().join("src/deep/m.rs"), "x").unwrap();
        std::fs::write(dir.path().join("top.rs"), "y").unwrap();

        let r = glob(json!({"pattern": "src/**/*.rs", "path": dir.path().to_str().unwrap()})).await;
        assert!(r.output.contains("m.rs"));
        assert!(!r.output.contains("top.rs"));
    }
}
