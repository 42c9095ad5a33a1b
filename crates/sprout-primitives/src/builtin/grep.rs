// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::policy::glob_match;
use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

const DEFAULT_MAX_RESULTS: usize = 100;

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub struct GrepPrimitive;

#[async_trait]
impl Primitive for GrepPrimitive {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Regex search over a file tree. Returns path:line:text matches.\n\
         path: root to search (default '.'). glob_filter: only files matching\n\
         the glob (e.g. '**/*.rs'). max_results: cap (default 100).\n\
         An empty result is success with empty output.\n\
         Skips .git/, target/, node_modules/, and binary files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Root directory or file (default '.')"
                },
                "glob_filter": {
                    "type": "string",
                    "description": "Glob restricting which files are searched"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum matches returned (default 100)"
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
        let glob_filter = args
            .get("glob_filter")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS as u64) as usize;

        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return PrimitiveResult::fail(format!("invalid regex: {e}")),
        };

        debug!(pattern, root, "grep");
        let resolved_root = env.resolve(root);

        // File IO here is deliberately synchronous inside spawn_blocking:
        // walking a big tree with async fs calls is slower and the registry
        // runs primitives sequentially anyway.
        let result = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let walker = WalkDir::new(&resolved_root)
                .into_iter()
                .filter_entry(|e| {
                    !(e.file_type().is_dir()
                        && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
                });
            for entry in walker.flatten() {
                if matches.len() >= max_results {
                    break;
                }
                if !entry.file_type().is_file() {
                    continue;
                }
                let display_path = entry
                    .path()
                    .strip_prefix(&resolved_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                if let Some(g) = &glob_filter {
                    if !glob_match(g, &display_path) {
                        continue;
                    }
                }
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue; // unreadable or non-UTF8
                };
                if content.contains('\0') {
                    continue; // binary
                }
                for (lineno, line) in content.lines().enumerate() {
                    if re.is_match(line) {
                        matches.push(format!("{display_path}:{}:{line}", lineno + 1));
                        if matches.len() >= max_results {
                            break;
                        }
                    }
                }
            }
            matches
        })
        .await;

        match result {
            Ok(matches) => PrimitiveResult::ok(matches.join("\n")),
            Err(e) => PrimitiveResult::fail(format!("search failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
