// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

const DECAY_HALF_WINDOW_DAYS: f64 = 30.0;
const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Bootstrap,
    Learn,
    User,
}

/// One learned or seeded fact, stored as a line of `memories/memories.jsonl`.
///
/// The stored `confidence` is authoritative for pruning; the *effective*
/// confidence used for recall ranking decays with time since last use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: MemorySource,
    /// Epoch milliseconds.
    pub created: i64,
    /// Epoch milliseconds.
    pub last_used: i64,
    #[serde(default)]
    pub use_count: u64,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl Memory {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        tags: Vec<String>,
        source: MemorySource,
        now: i64,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            tags,
            source,
            created: now,
            last_used: now,
            use_count: 0,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Confidence weighted by recency: `confidence * exp(-age_days / 30)`,
    /// with age measured from `last_used`.
    pub fn effective_confidence(&self, now: i64) -> f64 {
        let age_days = ((now - self.last_used).max(0) as f64) / MS_PER_DAY;
        self.confidence * (-age_days / DECAY_HALF_WINDOW_DAYS).exp()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
