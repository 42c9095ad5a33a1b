// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::{AgentSpec, GenomeStore, Memory, RoutingRule};

/// Number of memories surfaced by default.
pub const DEFAULT_RECALL_K: usize = 5;

/// What recall hands the agent for inclusion in its system prompt.
#[derive(Debug, Clone, Default)]
pub struct RecallResult {
    pub agents: Vec<AgentSpec>,
    pub memories: Vec<Memory>,
    pub routing_hints: Vec<RoutingRule>,
}

/// Keyword-rank the genome's memories and routing rules for a goal.
///
/// A memory's score is the number of goal-token occurrences in its content
/// or tags, multiplied by its effective (time-decayed) confidence; the top
/// `k` scorers are returned.  Routing hints come from
/// [`GenomeStore::match_routing_rules`].
pub fn recall(genome: &GenomeStore, goal: &str, k: usize, now: i64) -> RecallResult {
    let tokens: Vec<String> = goal
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut scored: Vec<(f64, Memory)> = genome
        .memories()
        .into_iter()
        .filter_map(|m| {
            let score = score_memory(&m, &tokens, now);
            (score > 0.0).then_some((score, m))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    RecallResult {
        agents: genome.agents(),
        memories: scored.into_iter().take(k).map(|(_, m)| m).collect(),
        routing_hints: genome.match_routing_rules(goal),
    }
}

fn score_memory(memory: &Memory, tokens: &[String], now: i64) -> f64 {
    let content = memory.content.to_lowercase();
    let tags: Vec<String> = memory.tags.iter().map(|t| t.to_lowercase()).collect();
    let occurrences: usize = tokens
        .iter()
        .map(|t| content.matches(t.as_str()).count() + tags.iter().filter(|tag| tag.contains(t.as_str())).count())
        .sum();
    occurrences as f64 * memory.effective_confidence(now)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
