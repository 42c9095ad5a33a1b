// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use anyhow::Context;
use tracing::debug;

/// Commit identity used for all genome commits.
const GIT_USER: &str = "sprout";
const GIT_EMAIL: &str = "sprout@localhost";

/// Run one git command in `root` and return trimmed stdout.
/// A non-zero exit is an error carrying stderr.
pub(crate) async fn git(root: &Path, args: &[&str]) -> anyhow::Result<String> {
    debug!(args = ?args, "git");
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .with_context(|| format!("spawning git {args:?}"))?;
    if !output.status.success() {
        anyhow::bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Initialize a repository in `root` if none exists, and pin the commit
/// identity.  Safe to call repeatedly.
pub(crate) async fn ensure_repo(root: &Path) -> anyhow::Result<()> {
    if !root.join(".git").exists() {
        git(root, &["init", "-q"]).await?;
    }
    git(root, &["config", "user.name", GIT_USER]).await?;
    git(root, &["config", "user.email", GIT_EMAIL]).await?;
    Ok(())
}

/// Stage everything and commit with `message`.
///
/// A clean tree commits nothing (keeps `init()` idempotent); any other
/// failure propagates — callers treat a commit error as fatal for the
/// mutation that produced it.
pub(crate) async fn commit_all(root: &Path, message: &str) -> anyhow::Result<()> {
    git(root, &["add", "-A"]).await?;
    let dirty = git(root, &["status", "--porcelain"]).await?;
    if dirty.is_empty() {
        return Ok(());
    }
    git(root, &["commit", "-q", "-m", message]).await?;
    Ok(())
}

/// Hash of HEAD.
pub(crate) async fn head_hash(root: &Path) -> anyhow::Result<String> {
    git(root, &["rev-parse", "HEAD"]).await
}

/// Revert one commit; the revert is itself a commit.
pub(crate) async fn revert(root: &Path, hash: &str) -> anyhow::Result<()> {
    git(root, &["revert", "--no-edit", hash]).await?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
