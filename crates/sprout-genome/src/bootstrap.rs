// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in default agents for a fresh genome.
//!
//! A brand-new genome has no agents, so a root goal would fail immediately.
//! These defaults give it a working colony: a spawning `root` router plus
//! leaf specialists with primitive capabilities.  They are ordinary specs —
//! once seeded, Learn evolves them like anything else.

use crate::{AgentSpec, GenomeStore};

/// The default agent colony.
pub fn default_specs() -> Vec<AgentSpec> {
    let mut root = AgentSpec::named("root");
    root.description = "Routes goals to specialist agents and assembles their results".into();
    root.model = "good".into();
    root.capabilities = vec!["worker".into(), "researcher".into()];
    root.constraints.can_spawn = true;
    root.constraints.max_depth = 3;
    root.constraints.max_turns = 16;
    root.system_prompt = "You coordinate a small colony of specialist agents. \
         Break the goal into sub-goals, delegate each to the best-matching \
         specialist, and synthesize their outputs into one final answer. \
         Do not do specialist work yourself."
        .into();
    root.tags = vec!["router".into()];

    let mut worker = AgentSpec::named("worker");
    worker.description = "Executes filesystem and shell work".into();
    worker.model = "good".into();
    worker.capabilities = vec![
        "read_file".into(),
        "write_file".into(),
        "edit_file".into(),
        "exec".into(),
        "grep".into(),
        "glob".into(),
    ];
    worker.constraints.max_turns = 20;
    worker.system_prompt = "You do hands-on work: read and write files, run \
         commands, search code. Verify your changes before reporting done \
         (read the file back, run the command). Report concrete results."
        .into();
    worker.tags = vec!["leaf".into(), "filesystem".into(), "shell".into()];

    let mut researcher = AgentSpec::named("researcher");
    researcher.description = "Gathers information from the web and local files".into();
    researcher.model = "fast".into();
    researcher.capabilities =
        vec!["fetch".into(), "read_file".into(), "grep".into(), "glob".into()];
    researcher.constraints.max_turns = 14;
    researcher.system_prompt = "You gather information. Fetch pages, read files, \
         and search; then distill what you found into a short, sourced summary. \
         Never modify anything."
        .into();
    researcher.tags = vec!["leaf".into(), "research".into()];

    vec![root, worker, researcher]
}

/// Seed the default colony into an *empty* genome (one commit).
/// Returns the names added; a genome that already has agents is untouched.
pub async fn seed_defaults(genome: &GenomeStore) -> anyhow::Result<Vec<String>> {
    if !genome.agents().is_empty() {
        return Ok(Vec::new());
    }
    let mut added = Vec::new();
    for spec in default_specs() {
        added.push(spec.name.clone());
        genome.add_agent(spec).await?;
    }
    Ok(added)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_can_spawn_and_leaves_cannot() {
        let specs = default_specs();
        let root = specs.iter().find(|s| s.name == "root").unwrap();
        assert!(root.constraints.can_spawn);
        assert!(root.constraints.max_depth > 0);
        for leaf in specs.iter().filter(|s| s.name != "root") {
            assert!(!leaf.constraints.can_spawn, "{} must be a leaf", leaf.name);
        }
    }

    #[test]
    fn root_capabilities_reference_default_agents() {
        let specs = default_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let root = specs.iter().find(|s| s.name == "root").unwrap();
        for cap in &root.capabilities {
            assert!(names.contains(&cap.as_str()), "unknown capability {cap}");
        }
    }

    #[test]
    fn leaf_capabilities_are_primitives() {
        const PRIMITIVES: &[&str] = &[
            "read_file", "write_file", "edit_file", "apply_patch", "exec", "grep", "glob",
            "fetch",
        ];
        for leaf in default_specs().into_iter().filter(|s| s.name != "root") {
            for cap in &leaf.capabilities {
                assert!(PRIMITIVES.contains(&cap.as_str()), "{}: {cap}", leaf.name);
            }
        }
    }

    #[tokio::test]
    async fn seeding_is_one_time() {
        let dir = tempfile::tempdir().unwrap();
        let genome = GenomeStore::new(dir.path());
        genome.init().await.unwrap();

        let added = seed_defaults(&genome).await.unwrap();
        assert_eq!(added.len(), 3);
        assert!(genome.get_agent("root").is_some());

        // Already populated: a second seed adds nothing.
        let again = seed_defaults(&genome).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn seeded_specs_round_trip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let genome = GenomeStore::new(dir.path());
        genome.init().await.unwrap();
        seed_defaults(&genome).await.unwrap();

        let reloaded = GenomeStore::new(dir.path());
        reloaded.load_from_disk().await.unwrap();
        assert_eq!(reloaded.agents(), genome.agents());
    }
}
