// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Current wall-clock time as epoch milliseconds.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Action,
    Stumble,
}

/// One line of the metrics JSONL file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "type")]
    pub record_type: RecordKind,
    pub agent_name: String,
    /// Stumble kind; absent for actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub timestamp: i64,
}

#[derive(Default)]
struct Counters {
    actions: HashMap<String, u64>,
    stumbles: HashMap<String, u64>,
    by_kind: HashMap<(String, String), u64>,
}

type WarnCallback = Box<dyn Fn(String) + Send + Sync>;

/// Append-only action/stumble log with in-memory counters.
///
/// The in-memory increment happens *before* the disk append returns to the
/// caller, so a read sequenced after `record_*` always observes it.  The
/// JSONL file is the durable source of truth for time-windowed queries,
/// which scan it with inclusive timestamp bounds.
pub struct MetricsStore {
    path: PathBuf,
    state: Mutex<Counters>,
    on_warning: Mutex<Option<WarnCallback>>,
}

impl MetricsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(Counters::default()),
            on_warning: Mutex::new(None),
        }
    }

    /// Install a callback invoked when a disk append fails.  The session
    /// controller wires this to a `warning` event; failures never panic and
    /// never lose the in-memory increment.
    pub fn on_warning(&self, f: impl Fn(String) + Send + Sync + 'static) {
        *self.on_warning.lock().unwrap() = Some(Box::new(f));
    }

    pub async fn record_action(&self, agent: &str) {
        self.record_action_at(agent, now_ms()).await;
    }

    pub async fn record_action_at(&self, agent: &str, timestamp: i64) {
        {
            let mut state = self.state.lock().unwrap();
            *state.actions.entry(agent.to_string()).or_insert(0) += 1;
        }
        self.append(MetricRecord {
            record_type: RecordKind::Action,
            agent_name: agent.to_string(),
            kind: None,
            timestamp,
        })
        .await;
    }

    pub async fn record_stumble(&self, agent: &str, kind: &str) {
        self.record_stumble_at(agent, kind, now_ms()).await;
    }

    pub async fn record_stumble_at(&self, agent: &str, kind: &str, timestamp: i64) {
        {
            let mut state = self.state.lock().unwrap();
            *state.stumbles.entry(agent.to_string()).or_insert(0) += 1;
            *state
                .by_kind
                .entry((agent.to_string(), kind.to_string()))
                .or_insert(0) += 1;
        }
        self.append(MetricRecord {
            record_type: RecordKind::Stumble,
            agent_name: agent.to_string(),
            kind: Some(kind.to_string()),
            timestamp,
        })
        .await;
    }

    pub fn total_actions(&self, agent: &str) -> u64 {
        self.state.lock().unwrap().actions.get(agent).copied().unwrap_or(0)
    }

    pub fn total_stumbles(&self, agent: &str) -> u64 {
        self.state.lock().unwrap().stumbles.get(agent).copied().unwrap_or(0)
    }

    pub fn stumble_count(&self, agent: &str, kind: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .by_kind
            .get(&(agent.to_string(), kind.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Stumbles / actions, or 0 when the agent has no actions.
    pub fn stumble_rate(&self, agent: &str) -> f64 {
        let state = self.state.lock().unwrap();
        let actions = state.actions.get(agent).copied().unwrap_or(0);
        if actions == 0 {
            return 0.0;
        }
        let stumbles = state.stumbles.get(agent).copied().unwrap_or(0);
        stumbles as f64 / actions as f64
    }

    /// Warm the in-memory counters from the JSONL file, replacing whatever
    /// the counters currently hold.  Call once at startup so threshold
    /// checks see history from prior sessions; a missing file resets to
    /// empty counters.
    pub async fn load_from_disk(&self) -> anyhow::Result<()> {
        let records = self.scan().await?;
        let mut counters = Counters::default();
        for r in &records {
            match r.record_type {
                RecordKind::Action => {
                    *counters.actions.entry(r.agent_name.clone()).or_insert(0) += 1;
                }
                RecordKind::Stumble => {
                    *counters.stumbles.entry(r.agent_name.clone()).or_insert(0) += 1;
                    if let Some(kind) = &r.kind {
                        *counters
                            .by_kind
                            .entry((r.agent_name.clone(), kind.clone()))
                            .or_insert(0) += 1;
                    }
                }
            }
        }
        *self.state.lock().unwrap() = counters;
        Ok(())
    }

    /// Actions for `agent` with `timestamp >= since` (disk scan).
    pub async fn action_count_since(&self, agent: &str, since: i64) -> anyhow::Result<u64> {
        let records = self.scan().await?;
        Ok(records
            .iter()
            .filter(|r| {
                r.record_type == RecordKind::Action
                    && r.agent_name == agent
                    && r.timestamp >= since
            })
            .count() as u64)
    }

    /// Stumble rate for `agent` over `[since, until]` (inclusive, disk scan).
    /// `until = None` means now.
    pub async fn stumble_rate_for_period(
        &self,
        agent: &str,
        since: i64,
        until: Option<i64>,
    ) -> anyhow::Result<f64> {
        let until = until.unwrap_or_else(now_ms);
        let records = self.scan().await?;
        let mut actions = 0u64;
        let mut stumbles = 0u64;
        for r in records
            .iter()
            .filter(|r| r.agent_name == agent && r.timestamp >= since && r.timestamp <= until)
        {
            match r.record_type {
                RecordKind::Action => actions += 1,
                RecordKind::Stumble => stumbles += 1,
            }
        }
        if actions == 0 {
            return Ok(0.0);
        }
        Ok(stumbles as f64 / actions as f64)
    }

    async fn append(&self, record: MetricRecord) {
        let result: anyhow::Result<()> = async {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "metric append failed");
            if let Some(cb) = self.on_warning.lock().unwrap().as_ref() {
                cb(format!("metric write failed: {e}"));
            }
        }
    }

    async fn scan(&self) -> anyhow::Result<Vec<MetricRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, MetricsStore) {
        let dir = tempfile::tempdir().unwrap();
        let s = MetricsStore::new(dir.path().join("metrics/actions.jsonl"));
        (dir, s)
    }

    #[tokio::test]
    async fn record_action_increments_before_returning() {
        let (_d, s) = store();
        s.record_action("root").await;
        assert_eq!(s.total_actions("root"), 1);
    }

    #[tokio::test]
    async fn stumble_counts_by_kind() {
        let (_d, s) = store();
        s.record_stumble("root", "error").await;
        s.record_stumble("root", "error").await;
        s.record_stumble("root", "timeout").await;
        assert_eq!(s.stumble_count("root", "error"), 2);
        assert_eq!(s.stumble_count("root", "timeout"), 1);
        assert_eq!(s.total_stumbles("root"), 3);
    }

    #[tokio::test]
    async fn stumble_rate_is_zero_without_actions() {
        let (_d, s) = store();
        s.record_stumble("root", "error").await;
        assert_eq!(s.stumble_rate("root"), 0.0);
    }

    #[tokio::test]
    async fn stumble_rate_divides() {
        let (_d, s) = store();
        for _ in 0..4 {
            s.record_action("root").await;
        }
        s.record_stumble("root", "failure").await;
        assert!((s.stumble_rate("root") - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn windowed_queries_scan_disk_inclusively() {
        let (_d, s) = store();
        s.record_action_at("root", 100).await;
        s.record_action_at("root", 200).await;
        s.record_action_at("root", 300).await;
        s.record_stumble_at("root", "error", 250).await;

        assert_eq!(s.action_count_since("root", 200).await.unwrap(), 2);
        // [200, 300]: 2 actions, 1 stumble
        let rate = s.stumble_rate_for_period("root", 200, Some(300)).await.unwrap();
        assert!((rate - 0.5).abs() < 1e-9);
        // boundary inclusivity: since == timestamp counts
        assert_eq!(s.action_count_since("root", 300).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn windowed_query_on_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let s = MetricsStore::new(dir.path().join("never-written.jsonl"));
        assert_eq!(s.action_count_since("x", 0).await.unwrap(), 0);
        assert_eq!(s.stumble_rate_for_period("x", 0, None).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn records_are_separated_per_agent() {
        let (_d, s) = store();
        s.record_action("a").await;
        s.record_action("b").await;
        s.record_stumble("b", "failure").await;
        assert_eq!(s.total_actions("a"), 1);
        assert_eq!(s.total_actions("b"), 1);
        assert_eq!(s.total_stumbles("a"), 0);
        assert_eq!(s.total_stumbles("b"), 1);
    }

    #[tokio::test]
    async fn load_from_disk_warms_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.jsonl");
        {
            let s = MetricsStore::new(&path);
            s.record_action("root").await;
            s.record_action("root").await;
            s.record_stumble("root", "error").await;
        }
        // Fresh store over the same file: counters start empty, then warm.
        let s = MetricsStore::new(&path);
        assert_eq!(s.total_actions("root"), 0);
        s.load_from_disk().await.unwrap();
        assert_eq!(s.total_actions("root"), 2);
        assert_eq!(s.stumble_count("root", "error"), 1);
    }

    #[tokio::test]
    async fn jsonl_lines_match_wire_format() {
        let (dir, s) = store();
        s.record_stumble_at("leaf", "timeout", 42).await;
        let text =
            std::fs::read_to_string(dir.path().join("metrics/actions.jsonl")).unwrap();
        let v: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(v["type"], "stumble");
        assert_eq!(v["agent_name"], "leaf");
        assert_eq!(v["kind"], "timeout");
        assert_eq!(v["timestamp"], 42);
    }

    #[tokio::test]
    async fn action_lines_omit_kind() {
        let (dir, s) = store();
        s.record_action_at("leaf", 1).await;
        let text =
            std::fs::read_to_string(dir.path().join("metrics/actions.jsonl")).unwrap();
        assert!(!text.contains("\"kind\""));
    }
}
