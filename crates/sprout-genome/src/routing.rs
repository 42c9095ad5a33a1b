// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::MemorySource;

/// Biases delegation selection: when the goal matches `condition` keywords,
/// recall surfaces a hint preferring `preference`.
///
/// Stored as an array element of `routing/rules.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    /// Free-text keyword bag; any keyword appearing in the query matches.
    pub condition: String,
    /// Agent name to prefer.
    pub preference: String,
    /// In `[0, 1]`; higher-strength hints sort first.
    pub strength: f64,
    pub source: MemorySource,
}

impl RoutingRule {
    /// Case-insensitive keyword-substring match against a query.
    pub fn matches(&self, query_lower: &str) -> bool {
        self.condition
            .split_whitespace()
            .any(|kw| query_lower.contains(&kw.to_lowercase()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(condition: &str, preference: &str, strength: f64) -> RoutingRule {
        RoutingRule {
            id: "r1".into(),
            condition: condition.into(),
            preference: preference.into(),
            strength,
            source: MemorySource::Learn,
        }
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let r = rule("Python script", "coder", 0.9);
        assert!(r.matches("write a python program"));
        assert!(r.matches("SCRIPT something".to_lowercase().as_str()));
    }

    #[test]
    fn any_keyword_suffices() {
        let r = rule("deploy kubernetes helm", "ops", 0.5);
        assert!(r.matches("upgrade the helm chart"));
    }

    #[test]
    fn no_keyword_no_match() {
        let r = rule("database sql", "dba", 0.5);
        assert!(!r.matches("write a poem"));
    }

    #[test]
    fn yaml_array_round_trip() {
        let rules = vec![rule("a b", "x", 0.3), rule("c", "y", 0.8)];
        let yaml = serde_yaml::to_string(&rules).unwrap();
        let back: Vec<RoutingRule> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, rules);
    }
}
