// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

pub struct ApplyPatchPrimitive;

#[async_trait]
impl Primitive for ApplyPatchPrimitive {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a patch to add, delete, update, or move files.\n\
         Format:\n\
         *** Begin Patch\n\
         *** Add File: path/to/new_file\n\
         +content line\n\
         *** Delete File: path/to/old_file\n\
         *** Update File: path/to/existing\n\
         *** Move to: path/to/renamed        (optional)\n\
         @@ context_hint\n\
          context line (space prefix)\n\
         -removed line\n\
         +added line\n\
         *** End Patch\n\
         Context matching tolerates trailing whitespace. Returns a summary of\n\
         applied changes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patch": {
                    "type": "string",
                    "description": "The full patch text including *** Begin Patch and *** End Patch markers"
                }
            },
            "required": ["patch"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        _cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(patch) = args.get("patch").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'patch'");
        };
        debug!("apply_patch");
        match apply_patch(patch, env).await {
            Ok(summary) => PrimitiveResult::ok(summary),
            Err(e) => PrimitiveResult::fail(format!("patch error: {e}")),
        }
    }
}

#[derive(Debug, PartialEq)]
enum FileOp {
    Add { path: String, content: String },
    Delete { path: String },
    Update { path: String, move_to: Option<String>, hunks: Vec<Hunk> },
}

#[derive(Debug, PartialEq)]
struct Hunk {
    /// Text after `@@ ` — an anchor line searched before the hunk body.
    context_hint: Option<String>,
    /// `(' ' | '-' | '+', line)` in patch order.
    lines: Vec<(char, String)>,
}

async fn apply_patch(input: &str, env: &ExecEnv) -> anyhow::Result<String> {
    let ops = parse_patch(input)?;
    let mut summary = Vec::new();

    for op in ops {
        match op {
            FileOp::Add { path, content } => {
                let resolved = env.resolve(&path);
                if let Some(parent) = resolved.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                tokio::fs::write(&resolved, content).await?;
                summary.push(format!("A {path}"));
            }
            FileOp::Delete { path } => {
                let resolved = env.resolve(&path);
                if tokio::fs::metadata(&resolved).await.is_ok() {
                    tokio::fs::remove_file(&resolved).await?;
                }
                summary.push(format!("D {path}"));
            }
            FileOp::Update { path, move_to, hunks } => {
                let resolved = env.resolve(&path);
                let content = tokio::fs::read_to_string(&resolved)
                    .await
                    .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;
                let updated = apply_hunks(&content, &hunks)
                    .map_err(|e| anyhow::anyhow!("hunk failed for {path}: {e}"))?;
                match move_to {
                    Some(dest) => {
                        let dest_resolved = env.resolve(&dest);
                        if let Some(parent) = dest_resolved.parent() {
                            if !parent.as_os_str().is_empty() {
                                tokio::fs::create_dir_all(parent).await?;
                            }
                        }
                        tokio::fs::write(&dest_resolved, updated).await?;
                        tokio::fs::remove_file(&resolved).await?;
                        summary.push(format!("M {path} -> {dest}"));
                    }
                    None => {
                        tokio::fs::write(&resolved, updated).await?;
                        summary.push(format!("M {path}"));
                    }
                }
            }
        }
    }

    if summary.is_empty() {
        Ok("(no changes applied)".into())
    } else {
        Ok(summary.join("\n"))
    }
}

fn parse_patch(input: &str) -> anyhow::Result<Vec<FileOp>> {
    let begin = input
        .find("*** Begin Patch")
        .ok_or_else(|| anyhow::anyhow!("'*** Begin Patch' not found"))?;
    let end = input
        .find("*** End Patch")
        .ok_or_else(|| anyhow::anyhow!("'*** End Patch' not found"))?;
    if end <= begin {
        anyhow::bail!("'*** End Patch' appears before '*** Begin Patch'");
    }

    let body = &input[begin + "*** Begin Patch".len()..end];
    let mut lines = body.lines().peekable();
    let mut ops: Vec<FileOp> = Vec::new();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(path) = line.strip_prefix("*** Add File: ") {
            let mut content_lines = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("*** ") {
                    break;
                }
                let raw = lines.next().unwrap();
                content_lines.push(raw.strip_prefix('+').unwrap_or(raw).to_string());
            }
            let mut content = content_lines.join("\n");
            if !content.ends_with('\n') {
                content.push('\n');
            }
            ops.push(FileOp::Add { path: path.trim().to_string(), content });
        } else if let Some(path) = line.strip_prefix("*** Delete File: ") {
            ops.push(FileOp::Delete { path: path.trim().to_string() });
        } else if let Some(path) = line.strip_prefix("*** Update File: ") {
            let mut move_to = None;
            if let Some(next) = lines.peek() {
                if let Some(dest) = next.strip_prefix("*** Move to: ") {
                    move_to = Some(dest.trim().to_string());
                    lines.next();
                }
            }
            let mut hunks = Vec::new();
            while let Some(next) = lines.peek() {
                if next.starts_with("*** ") {
                    break;
                }
                if let Some(hint) = next.strip_prefix("@@") {
                    let hint = hint.trim().to_string();
                    lines.next();
                    let mut hunk_lines = Vec::new();
                    while let Some(inner) = lines.peek() {
                        if inner.starts_with("*** ") || inner.starts_with("@@") {
                            break;
                        }
                        let raw = lines.next().unwrap();
                        if let Some(rest) = raw.strip_prefix('+') {
                            hunk_lines.push(('+', rest.to_string()));
                        } else if let Some(rest) = raw.strip_prefix('-') {
                            hunk_lines.push(('-', rest.to_string()));
                        } else if let Some(rest) = raw.strip_prefix(' ') {
                            hunk_lines.push((' ', rest.to_string()));
                        } else if raw.trim().is_empty() {
                            hunk_lines.push((' ', String::new()));
                        }
                    }
                    hunks.push(Hunk {
                        context_hint: (!hint.is_empty()).then_some(hint),
                        lines: hunk_lines,
                    });
                } else {
                    lines.next();
                }
            }
            if hunks.is_empty() && move_to.is_none() {
                anyhow::bail!("update for {path} has no hunks");
            }
            ops.push(FileOp::Update { path: path.trim().to_string(), move_to, hunks });
        }
    }
    Ok(ops)
}

fn apply_hunks(content: &str, hunks: &[Hunk]) -> anyhow::Result<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let had_trailing_newline = content.ends_with('\n');

    for hunk in hunks {
        // Lines the file must currently contain, in order: context + deletions.
        let expected: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|(c, _)| *c == ' ' || *c == '-')
            .map(|(_, l)| l.as_str())
            .collect();

        let start = find_hunk_position(&lines, hunk.context_hint.as_deref(), &expected)
            .ok_or_else(|| anyhow::anyhow!("could not find hunk context in file"))?;

        let mut replacement: Vec<String> = Vec::new();
        let mut cursor = start;
        for (c, line) in &hunk.lines {
            match c {
                ' ' => {
                    replacement.push(line.clone());
                    cursor += 1;
                }
                '-' => {
                    cursor += 1;
                }
                '+' => replacement.push(line.clone()),
                _ => {}
            }
        }
        lines.splice(start..cursor, replacement);
    }

    let mut result = lines.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    Ok(result)
}

/// Whitespace-tolerant comparison: trailing whitespace is ignored.
fn lines_eq(a: &str, b: &str) -> bool {
    a.trim_end() == b.trim_end()
}

fn lines_match_at(lines: &[String], start: usize, expected: &[&str]) -> bool {
    if start + expected.len() > lines.len() {
        return false;
    }
    expected
        .iter()
        .enumerate()
        .all(|(i, exp)| lines_eq(&lines[start + i], exp))
}

fn find_hunk_position(
    lines: &[String],
    context_hint: Option<&str>,
    expected: &[&str],
) -> Option<usize> {
    if let Some(hint) = context_hint {
        // The hint is an anchor: the hunk body must match at or after the
        // first line equal to the hint.
        for (i, line) in lines.iter().enumerate() {
            if lines_eq(line, hint) {
                for start in i..lines.len() {
                    if lines_match_at(lines, start, expected) {
                        return Some(start);
                    }
                }
                return None;
            }
        }
        return None;
    }
    (0..=lines.len().saturating_sub(expected.len()))
        .find(|&i| lines_match_at(lines, i, expected))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
