// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use sprout_genome::{AgentSpec, AgentTool, Memory, RecallResult};

use crate::LearnSignal;

/// Assemble the system prompt for one agent run: the spec's own prompt plus
/// environment context, the recall block, and any saved workspace tools.
pub fn system_prompt(
    spec: &AgentSpec,
    recall: &RecallResult,
    workdir: Option<&Path>,
    delegation_menu: &[String],
    saved_tools: &[AgentTool],
    tools_dir: Option<&Path>,
) -> String {
    let mut out = String::new();

    if !spec.system_prompt.is_empty() {
        out.push_str(&spec.system_prompt);
        out.push_str("\n\n");
    } else {
        out.push_str(&format!(
            "You are {}, an autonomous agent. Work toward the given goal using \
             the tools available to you, then reply with a concise final answer.\n\n",
            spec.name
        ));
    }

    out.push_str("## Environment\n");
    if let Some(wd) = workdir {
        out.push_str(&format!("Working directory: {}\n", wd.display()));
    }
    out.push_str(&format!("Platform: {}\n", std::env::consts::OS));
    out.push_str(&format!("Date: {}\n", chrono::Utc::now().format("%Y-%m-%d")));
    out.push('\n');

    if !recall.memories.is_empty() {
        out.push_str("## Relevant experience\n");
        for m in &recall.memories {
            out.push_str(&format!("- {}\n", m.content));
        }
        out.push('\n');
    }

    if !recall.routing_hints.is_empty() {
        out.push_str("## Routing hints\n");
        for r in &recall.routing_hints {
            out.push_str(&format!(
                "- prefer `{}` when the goal involves: {}\n",
                r.preference, r.condition
            ));
        }
        out.push('\n');
    }

    if !saved_tools.is_empty() {
        out.push_str("## Saved workspace tools\n");
        out.push_str("Tools you saved in earlier sessions; run them with exec.\n");
        for t in saved_tools {
            match tools_dir {
                Some(dir) => out.push_str(&format!(
                    "- {} ({}): {} — {}\n",
                    t.name,
                    t.interpreter,
                    t.description,
                    dir.join(&t.name).display()
                )),
                None => out.push_str(&format!(
                    "- {} ({}): {}\n",
                    t.name, t.interpreter, t.description
                )),
            }
        }
        out.push('\n');
    }

    if !delegation_menu.is_empty() {
        out.push_str("## Agents you can delegate to\n");
        for name in delegation_menu {
            match recall.agents.iter().find(|a| &a.name == name) {
                Some(a) if !a.description.is_empty() => {
                    out.push_str(&format!("- {}: {}\n", a.name, a.description));
                }
                _ => out.push_str(&format!("- {name}\n")),
            }
        }
        out.push_str(
            "\nUse the `delegate` tool to hand a sub-goal to one of these agents. \
             Delegate work that matches an agent's specialty; do the rest yourself.\n",
        );
        out.push('\n');
    }

    out.push_str(&format!(
        "## Limits\nYou have at most {} turns{} for this goal.\n",
        spec.constraints.max_turns,
        if spec.constraints.timeout_ms > 0 {
            format!(" and {} ms of wall-clock time", spec.constraints.timeout_ms)
        } else {
            String::new()
        }
    ));

    out
}

/// Prompt for the Learn process: embed the runtime's current shape and the
/// signal, and ask for exactly one JSON mutation object.
pub fn learn_prompt(
    signal: &LearnSignal,
    agents: &[AgentSpec],
    memories: &[Memory],
    target_system_prompt: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str(
        "You improve a colony of LLM agents by analyzing their failures and \
         proposing exactly one small mutation.\n\n",
    );

    out.push_str("## Existing agents\n");
    for a in agents {
        out.push_str(&format!("- {} ({}): {}\n", a.name, a.model, a.description));
    }
    out.push('\n');

    if !memories.is_empty() {
        out.push_str("## Recent memories\n");
        for m in memories.iter().rev().take(10) {
            out.push_str(&format!("- [{}] {}\n", m.tags.join(","), m.content));
        }
        out.push('\n');
    }

    if let Some(prompt) = target_system_prompt {
        out.push_str(&format!(
            "## Current system prompt of `{}`\n{}\n\n",
            signal.agent_name, prompt
        ));
    }

    out.push_str(&format!(
        "## Signal\nkind: {}\nagent: {}\ngoal: {}\noutput: {}\nsuccess: {}, stumbles: {}, turns: {}, timed_out: {}\n\n",
        signal.kind.as_str(),
        signal.agent_name,
        signal.goal,
        signal.details.output,
        signal.details.success,
        signal.details.stumbles,
        signal.details.turns,
        signal.details.timed_out,
    ));

    out.push_str(
        "Respond with a single JSON object and nothing else. Choose one of:\n\
         {\"type\": \"create_memory\", \"content\": \"...\", \"tags\": [\"...\"]}\n\
         {\"type\": \"update_agent\", \"agent_name\": \"...\", \"system_prompt\": \"...\"}\n\
         {\"type\": \"create_agent\", \"name\": \"...\", \"description\": \"...\", \"system_prompt\": \"...\", \"capabilities\": [\"...\"]}\n\
         {\"type\": \"create_routing_rule\", \"condition\": \"keywords\", \"preference\": \"agent\", \"strength\": 0.7}\n\
         {\"type\": \"skip\"}\n\
         Prefer skip over speculative changes.\n",
    );

    out
}

/// Extract the JSON payload from a model reply that may wrap it in a
/// markdown fence (```json ... ```), or return the trimmed text as-is.
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip an optional language tag on the fence line.
        let body = match after.find('\n') {
            Some(nl) if after[..nl].chars().all(|c| c.is_ascii_alphanumeric()) => &after[nl + 1..],
            _ => after,
        };
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    trimmed
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
