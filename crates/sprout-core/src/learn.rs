// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, warn};

use sprout_events::{EventBus, EventKind};
use sprout_genome::{AgentSpec, GenomeStore, Memory, MemorySource, RoutingRule};
use sprout_metrics::MetricsStore;
use sprout_model::{catalog, ChatRequest, LlmClient, Message};

use crate::prompts;
use crate::verify::{LearnSignal, SignalKind};

/// Minimum post-mutation actions before an improvement can be judged.
pub const MIN_ACTIONS_FOR_EVALUATION: u64 = 5;

/// Stumble-rate delta beyond which a mutation is judged harmful (or, with
/// the opposite sign, helpful).
pub const HARMFUL_DELTA: f64 = 0.05;

/// Primitive names a learned agent may never claim.
const PRIMITIVE_NAMES: &[&str] = &[
    "read_file", "write_file", "edit_file", "apply_patch", "exec", "grep", "glob", "fetch",
];

/// Kernel names a learned agent may never claim.
const KERNEL_NAMES: &[&str] = &["learn", "kernel", "perceive", "recall", "plan", "act", "verify"];

/// Agent id used for events emitted by the Learn process itself.
const LEARN_AGENT_ID: &str = "learn";

/// One applied mutation awaiting enough post-mutation data to judge.
/// Persisted to `metrics/pending-evaluations.json` between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvaluation {
    pub agent_name: String,
    pub mutation_type: String,
    /// Epoch milliseconds at application time.
    pub timestamp: i64,
    pub commit_hash: String,
    pub description: String,
}

/// The mutation shapes the reasoning model may select.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    CreateMemory {
        content: String,
        #[serde(default)]
        tags: Vec<String>,
    },
    UpdateAgent {
        agent_name: String,
        system_prompt: String,
    },
    CreateAgent {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        system_prompt: String,
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        model: Option<String>,
    },
    CreateRoutingRule {
        condition: String,
        preference: String,
        #[serde(default)]
        strength: Option<f64>,
    },
    Skip,
}

/// The asynchronous Learn process: a single-consumer queue of
/// [`LearnSignal`]s processed concurrently with the agent loop.
///
/// `push` records the stumble metric in memory before its disk append
/// returns, enqueues, and wakes the background loop (park-until-notified).
/// The queue and pending-evaluation list are mutated only by the background
/// loop and the evaluation entry point.
pub struct LearnProcess {
    genome: Arc<GenomeStore>,
    metrics: Arc<MetricsStore>,
    bus: Arc<EventBus>,
    llm: Arc<dyn LlmClient>,
    provider: String,
    queue: Mutex<VecDeque<LearnSignal>>,
    notify: Notify,
    stop_requested: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    recent_improvements: Mutex<HashSet<String>>,
    pending: tokio::sync::Mutex<Vec<PendingEvaluation>>,
    pending_path: PathBuf,
}

impl LearnProcess {
    /// Construct against a genome; previously persisted pending evaluations
    /// are loaded immediately (they are the durable analog of the in-memory
    /// `recent_improvements` set, which is not preserved across sessions).
    pub fn new(
        genome: Arc<GenomeStore>,
        metrics: Arc<MetricsStore>,
        bus: Arc<EventBus>,
        llm: Arc<dyn LlmClient>,
        provider: impl Into<String>,
    ) -> Self {
        let pending_path = genome.metrics_dir().join("pending-evaluations.json");
        let pending = std::fs::read_to_string(&pending_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            genome,
            metrics,
            bus,
            llm,
            provider: provider.into(),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
            task: Mutex::new(None),
            recent_improvements: Mutex::new(HashSet::new()),
            pending: tokio::sync::Mutex::new(pending),
            pending_path,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub async fn pending_evaluations(&self) -> Vec<PendingEvaluation> {
        self.pending.lock().await.clone()
    }

    /// Enqueue a signal.  The stumble metric's in-memory increment is
    /// observable before this returns; the disk append rides along.
    pub async fn push(&self, signal: LearnSignal) {
        self.metrics
            .record_stumble(&signal.agent_name, signal.kind.as_str())
            .await;
        self.queue.lock().unwrap().push_back(signal);
        self.notify.notify_one();
    }

    /// Start the background consumer.  Idempotent.
    pub fn start_background(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            this.background_loop().await;
        }));
    }

    /// Request stop, wake the loop, and resolve once remaining signals are
    /// drained and the task has quiesced.
    pub async fn stop_background(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn background_loop(self: Arc<Self>) {
        loop {
            while let Some(signal) = self.pop() {
                self.process_signal(signal).await;
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            self.notify.notified().await;
        }
        debug!("learn background loop stopped");
    }

    fn pop(&self) -> Option<LearnSignal> {
        self.queue.lock().unwrap().pop_front()
    }

    fn emit(&self, kind: EventKind, data: serde_json::Value) {
        self.bus.emit(kind, LEARN_AGENT_ID, 0, data);
    }

    /// Filter: failures always pass; recently-improved (agent, kind) pairs
    /// skip; errors need at least 2 occurrences; anything else needs 3.
    pub fn should_learn(&self, signal: &LearnSignal) -> bool {
        if signal.kind == SignalKind::Failure {
            return true;
        }
        let key = format!("{}:{}", signal.agent_name, signal.kind.as_str());
        if self.recent_improvements.lock().unwrap().contains(&key) {
            return false;
        }
        let count = self.metrics.stumble_count(&signal.agent_name, signal.kind.as_str());
        if signal.kind == SignalKind::Error && count < 2 {
            return false;
        }
        count >= 3
    }

    async fn process_signal(&self, signal: LearnSignal) {
        if !self.should_learn(&signal) {
            debug!(agent = %signal.agent_name, kind = signal.kind.as_str(), "signal filtered");
            return;
        }

        self.emit(
            EventKind::LearnStart,
            json!({"agent_name": signal.agent_name, "kind": signal.kind.as_str()}),
        );

        let result = match self.reason_about(&signal).await {
            Ok(Some(mutation)) => match self.apply_mutation(mutation, &signal).await {
                Ok(Some(description)) => {
                    self.emit(
                        EventKind::LearnEnd,
                        json!({"result": "applied", "description": description}),
                    );
                    return;
                }
                Ok(None) => "skipped",
                Err(e) => {
                    warn!(error = %e, "mutation failed");
                    "error"
                }
            },
            Ok(None) => "skipped",
            Err(e) => {
                warn!(error = %e, "learn reasoning failed");
                "error"
            }
        };
        self.emit(EventKind::LearnEnd, json!({"result": result}));
    }

    /// Ask the model for one mutation.  Parse failures are a skip, not an
    /// error — a chatty model must not break the loop.
    async fn reason_about(&self, signal: &LearnSignal) -> anyhow::Result<Option<Mutation>> {
        let agents = self.genome.agents();
        let memories = self.genome.memories();
        let target_prompt = self
            .genome
            .get_agent(&signal.agent_name)
            .map(|s| s.system_prompt);

        let prompt = prompts::learn_prompt(signal, &agents, &memories, target_prompt.as_deref());
        let (provider, model) = catalog::resolve("good", &self.provider)?;
        let request = ChatRequest {
            model,
            provider: Some(provider),
            messages: vec![Message::user(prompt)],
            temperature: Some(0.3),
            max_tokens: Some(1024),
            ..Default::default()
        };
        let response = self.llm.complete(request).await?;
        let text = response.message.text();
        let payload = prompts::extract_json_block(&text);
        match serde_json::from_str::<Mutation>(payload) {
            Ok(Mutation::Skip) => Ok(None),
            Ok(m) => Ok(Some(m)),
            Err(e) => {
                debug!(error = %e, "unparseable mutation; treating as skip");
                Ok(None)
            }
        }
    }

    /// Apply one mutation to the genome, record the pending evaluation, and
    /// emit `learn_mutation`.  Returns the human-readable description, or
    /// `None` for skip-equivalent outcomes.
    pub async fn apply_mutation(
        &self,
        mutation: Mutation,
        signal: &LearnSignal,
    ) -> anyhow::Result<Option<String>> {
        let now = chrono::Utc::now().timestamp_millis();
        let suffix = ulid::Ulid::new().to_string().to_lowercase();

        let (mutation_type, agent_name, description) = match mutation {
            Mutation::Skip => return Ok(None),
            Mutation::CreateMemory { content, tags } => {
                let id = format!("learn-{now}-{}", &suffix[suffix.len() - 6..]);
                let memory = Memory::new(&id, &content, tags, MemorySource::Learn, now, 0.8);
                self.genome.add_memory(memory).await?;
                ("create_memory".to_string(), signal.agent_name.clone(), format!("memory {id}"))
            }
            Mutation::UpdateAgent { agent_name, system_prompt } => {
                let mut spec = self
                    .genome
                    .get_agent(&agent_name)
                    .ok_or_else(|| anyhow::anyhow!("unknown agent {agent_name:?}"))?;
                spec.system_prompt = system_prompt;
                self.genome.update_agent(spec).await?;
                (
                    "update_agent".to_string(),
                    agent_name.clone(),
                    format!("updated system prompt of {agent_name}"),
                )
            }
            Mutation::CreateAgent { name, description, system_prompt, capabilities, model } => {
                if PRIMITIVE_NAMES.contains(&name.as_str()) || KERNEL_NAMES.contains(&name.as_str())
                {
                    anyhow::bail!("reserved agent name {name:?}");
                }
                let mut spec = AgentSpec::named(&name);
                spec.description = description;
                spec.system_prompt = system_prompt;
                spec.capabilities = capabilities;
                if let Some(m) = model {
                    spec.model = m;
                }
                spec.constraints.can_spawn = false;
                self.genome.add_agent(spec).await?;
                ("create_agent".to_string(), name.clone(), format!("created agent {name}"))
            }
            Mutation::CreateRoutingRule { condition, preference, strength } => {
                let id = format!("learn-rule-{now}-{}", &suffix[suffix.len() - 6..]);
                let rule = RoutingRule {
                    id: id.clone(),
                    condition,
                    preference,
                    strength: strength.unwrap_or(0.5).clamp(0.0, 1.0),
                    source: MemorySource::Learn,
                };
                self.genome.add_routing_rule(rule).await?;
                ("create_routing_rule".to_string(), signal.agent_name.clone(), format!("rule {id}"))
            }
        };

        let commit_hash = self.genome.last_commit_hash().await?;
        {
            let mut pending = self.pending.lock().await;
            pending.push(PendingEvaluation {
                agent_name: agent_name.clone(),
                mutation_type: mutation_type.clone(),
                timestamp: now,
                commit_hash: commit_hash.clone(),
                description: description.clone(),
            });
            self.save_pending(&pending).await;
        }
        self.recent_improvements
            .lock()
            .unwrap()
            .insert(format!("{}:{}", signal.agent_name, signal.kind.as_str()));

        self.emit(
            EventKind::LearnMutation,
            json!({
                "mutation_type": mutation_type,
                "agent_name": agent_name,
                "description": description,
                "commit_hash": commit_hash,
            }),
        );
        Ok(Some(description))
    }

    /// Judge every pending mutation that has accumulated enough actions:
    /// compare the stumble rate before and after application; roll back
    /// harmful changes.  Entries exit pending regardless of verdict.
    pub async fn evaluate_pending_improvements(&self) -> anyhow::Result<()> {
        let mut pending = self.pending.lock().await;
        let mut remaining = Vec::new();

        for entry in pending.drain(..) {
            let actions = self
                .metrics
                .action_count_since(&entry.agent_name, entry.timestamp)
                .await?;
            if actions < MIN_ACTIONS_FOR_EVALUATION {
                remaining.push(entry);
                continue;
            }

            let before = self
                .metrics
                .stumble_rate_for_period(&entry.agent_name, 0, Some(entry.timestamp - 1))
                .await?;
            let after = self
                .metrics
                .stumble_rate_for_period(&entry.agent_name, entry.timestamp, None)
                .await?;
            let delta = after - before;
            let verdict = if delta > HARMFUL_DELTA {
                "harmful"
            } else if delta < -HARMFUL_DELTA {
                "helpful"
            } else {
                "neutral"
            };

            self.emit(
                EventKind::LearnMutation,
                json!({
                    "mutation_type": "evaluation",
                    "agent_name": entry.agent_name,
                    "verdict": verdict,
                    "delta": delta,
                    "commit_hash": entry.commit_hash,
                }),
            );

            if verdict == "harmful" {
                match self.genome.rollback_commit(&entry.commit_hash).await {
                    Ok(()) => self.emit(
                        EventKind::LearnMutation,
                        json!({
                            "mutation_type": "rollback",
                            "agent_name": entry.agent_name,
                            "commit_hash": entry.commit_hash,
                        }),
                    ),
                    Err(e) => {
                        warn!(error = %e, commit = %entry.commit_hash, "rollback failed");
                        self.emit(
                            EventKind::Warning,
                            json!({"message": format!("rollback of {} failed: {e}", entry.commit_hash)}),
                        );
                    }
                }
            }
        }

        self.save_pending(&remaining).await;
        *pending = remaining;
        Ok(())
    }

    async fn save_pending(&self, pending: &[PendingEvaluation]) {
        let result: anyhow::Result<()> = async {
            if let Some(parent) = self.pending_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let text = serde_json::to_string_pretty(pending)?;
            tokio::fs::write(&self.pending_path, text).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to persist pending evaluations");
            self.emit(
                EventKind::Warning,
                json!({"message": format!("pending-evaluation write failed: {e}")}),
            );
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::ActResult;
    use sprout_model::ScriptedClient;

    async fn harness() -> (tempfile::TempDir, Arc<LearnProcess>) {
        harness_with(vec![]).await
    }

    async fn harness_with(
        responses: Vec<sprout_model::ChatResponse>,
    ) -> (tempfile::TempDir, Arc<LearnProcess>) {
        let dir = tempfile::tempdir().unwrap();
        let genome = Arc::new(GenomeStore::new(dir.path()));
        genome.init().await.unwrap();
        let metrics = Arc::new(MetricsStore::new(genome.metrics_dir().join("actions.jsonl")));
        let bus = Arc::new(EventBus::new());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(responses));
        let learn = Arc::new(LearnProcess::new(genome, metrics, bus, llm, "mock"));
        (dir, learn)
    }

    fn signal(kind: SignalKind, agent: &str) -> LearnSignal {
        LearnSignal::new(
            kind,
            ActResult {
                agent_name: agent.into(),
                goal: "g".into(),
                output: "o".into(),
                success: false,
                stumbles: 1,
                turns: 1,
                timed_out: false,
            },
            "sess",
        )
    }

    // ── Filtering ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn failures_always_pass() {
        let (_d, learn) = harness().await;
        assert!(learn.should_learn(&signal(SignalKind::Failure, "a")));
    }

    #[tokio::test]
    async fn single_error_is_one_off() {
        let (_d, learn) = harness().await;
        let s = signal(SignalKind::Error, "a");
        learn.push(s.clone()).await; // count = 1
        assert!(!learn.should_learn(&s));
    }

    #[tokio::test]
    async fn three_stumbles_pass() {
        let (_d, learn) = harness().await;
        let s = signal(SignalKind::Timeout, "a");
        for _ in 0..3 {
            learn.push(s.clone()).await;
        }
        assert!(learn.should_learn(&s));
    }

    #[tokio::test]
    async fn recent_improvement_suppresses() {
        let (_d, learn) = harness().await;
        let s = signal(SignalKind::Timeout, "a");
        for _ in 0..3 {
            learn.push(s.clone()).await;
        }
        learn
            .recent_improvements
            .lock()
            .unwrap()
            .insert("a:timeout".into());
        assert!(!learn.should_learn(&s));
    }

    #[tokio::test]
    async fn push_records_stumble_metric_synchronously() {
        let (_d, learn) = harness().await;
        learn.push(signal(SignalKind::Failure, "worker")).await;
        assert_eq!(learn.metrics().stumble_count("worker", "failure"), 1);
        assert_eq!(learn.queue_size(), 1);
    }

    // ── Mutations ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_memory_records_pending_evaluation() {
        let (_d, learn) = harness().await;
        let desc = learn
            .apply_mutation(
                Mutation::CreateMemory { content: "lesson".into(), tags: vec!["t".into()] },
                &signal(SignalKind::Failure, "worker"),
            )
            .await
            .unwrap();
        assert!(desc.is_some());
        assert_eq!(learn.genome.memories().len(), 1);
        assert_eq!(learn.genome.memories()[0].confidence, 0.8);

        let pending = learn.pending_evaluations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].agent_name, "worker");
        assert_eq!(pending[0].mutation_type, "create_memory");
        assert!(!pending[0].commit_hash.is_empty());
    }

    #[tokio::test]
    async fn pending_evaluations_persist_camel_case() {
        let (dir, learn) = harness().await;
        learn
            .apply_mutation(
                Mutation::CreateMemory { content: "x".into(), tags: vec![] },
                &signal(SignalKind::Failure, "w"),
            )
            .await
            .unwrap();
        let text =
            std::fs::read_to_string(dir.path().join("metrics/pending-evaluations.json")).unwrap();
        assert!(text.contains("agentName"));
        assert!(text.contains("mutationType"));
        assert!(text.contains("commitHash"));
    }

    #[tokio::test]
    async fn update_agent_bumps_version_and_fails_on_unknown() {
        let (_d, learn) = harness().await;
        learn.genome.add_agent(AgentSpec::named("root")).await.unwrap();
        learn
            .apply_mutation(
                Mutation::UpdateAgent { agent_name: "root".into(), system_prompt: "np".into() },
                &signal(SignalKind::Failure, "root"),
            )
            .await
            .unwrap();
        let spec = learn.genome.get_agent("root").unwrap();
        assert_eq!(spec.system_prompt, "np");
        assert_eq!(spec.version, 2);

        let err = learn
            .apply_mutation(
                Mutation::UpdateAgent { agent_name: "ghost".into(), system_prompt: "x".into() },
                &signal(SignalKind::Failure, "ghost"),
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn reserved_agent_names_are_fatal() {
        let (_d, learn) = harness().await;
        for name in ["exec", "verify", "learn", "read_file"] {
            let err = learn
                .apply_mutation(
                    Mutation::CreateAgent {
                        name: name.into(),
                        description: String::new(),
                        system_prompt: String::new(),
                        capabilities: vec![],
                        model: None,
                    },
                    &signal(SignalKind::Failure, "w"),
                )
                .await;
            assert!(err.is_err(), "{name} should be reserved");
        }
    }

    #[tokio::test]
    async fn created_agents_cannot_spawn() {
        let (_d, learn) = harness().await;
        learn
            .apply_mutation(
                Mutation::CreateAgent {
                    name: "specialist".into(),
                    description: "d".into(),
                    system_prompt: "p".into(),
                    capabilities: vec!["read_file".into()],
                    model: None,
                },
                &signal(SignalKind::Failure, "w"),
            )
            .await
            .unwrap();
        let spec = learn.genome.get_agent("specialist").unwrap();
        assert!(!spec.constraints.can_spawn);
    }

    #[tokio::test]
    async fn routing_rule_ids_carry_learn_prefix() {
        let (_d, learn) = harness().await;
        learn
            .apply_mutation(
                Mutation::CreateRoutingRule {
                    condition: "python".into(),
                    preference: "coder".into(),
                    strength: Some(0.9),
                },
                &signal(SignalKind::Failure, "w"),
            )
            .await
            .unwrap();
        let rules = learn.genome.routing_rules();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].id.starts_with("learn-rule-"));
    }

    // ── Mutation parsing ──────────────────────────────────────────────────────

    #[test]
    fn mutation_json_parses_tagged_shapes() {
        let m: Mutation =
            serde_json::from_str(r#"{"type":"create_memory","content":"c"}"#).unwrap();
        assert!(matches!(m, Mutation::CreateMemory { .. }));
        let m: Mutation = serde_json::from_str(r#"{"type":"skip"}"#).unwrap();
        assert_eq!(m, Mutation::Skip);
    }

    #[test]
    fn unknown_mutation_type_fails_parse() {
        assert!(serde_json::from_str::<Mutation>(r#"{"type":"explode"}"#).is_err());
    }

    // ── Background loop ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_background_drains_queue() {
        // A scripted "skip" for every signal that passes the filter.
        let (_d, learn) = harness_with(vec![
            ScriptedClient::text_response(r#"{"type":"skip"}"#),
            ScriptedClient::text_response(r#"{"type":"skip"}"#),
        ])
        .await;
        learn.start_background();
        learn.push(signal(SignalKind::Failure, "a")).await;
        learn.push(signal(SignalKind::Failure, "b")).await;
        learn.stop_background().await;
        assert_eq!(learn.queue_size(), 0);
    }

    #[tokio::test]
    async fn background_loop_applies_scripted_mutation() {
        let (_d, learn) = harness_with(vec![ScriptedClient::text_response(
            "```json\n{\"type\":\"create_memory\",\"content\":\"check exit codes\",\"tags\":[\"shell\"]}\n```",
        )])
        .await;
        learn.start_background();
        learn.push(signal(SignalKind::Failure, "worker")).await;
        learn.stop_background().await;

        let memories = learn.genome.memories();
        assert_eq!(memories.len(), 1);
        assert!(memories[0].id.starts_with("learn-"));
        assert_eq!(memories[0].content, "check exit codes");
        assert_eq!(learn.pending_evaluations().await.len(), 1);

        let events = learn.bus.collected();
        assert!(events.iter().any(|e| e.kind == EventKind::LearnStart));
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::LearnEnd && e.data_str("result") == Some("applied")));
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::LearnMutation
                && e.data_str("mutation_type") == Some("create_memory")));
    }

    #[tokio::test]
    async fn start_background_is_idempotent() {
        let (_d, learn) = harness().await;
        learn.start_background();
        learn.start_background();
        learn.stop_background().await;
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn too_few_actions_defers() {
        let (_d, learn) = harness().await;
        learn
            .apply_mutation(
                Mutation::CreateMemory { content: "m".into(), tags: vec![] },
                &signal(SignalKind::Failure, "root"),
            )
            .await
            .unwrap();
        learn.evaluate_pending_improvements().await.unwrap();
        assert_eq!(learn.pending_evaluations().await.len(), 1, "entry should defer");
    }

    #[tokio::test]
    async fn harmful_mutation_rolls_back() {
        let (_d, learn) = harness().await;
        let genome = Arc::clone(&learn.genome);
        let metrics = Arc::clone(learn.metrics());

        let mut root = AgentSpec::named("root");
        root.system_prompt = "original prompt".into();
        genome.add_agent(root).await.unwrap();

        // Before the mutation: 10 actions, 1 stumble.
        let t0 = chrono::Utc::now().timestamp_millis() - 10_000;
        for i in 0..10 {
            metrics.record_action_at("root", t0 + i).await;
        }
        metrics.record_stumble_at("root", "error", t0 + 3).await;

        learn
            .apply_mutation(
                Mutation::UpdateAgent {
                    agent_name: "root".into(),
                    system_prompt: "bad prompt".into(),
                },
                &signal(SignalKind::Failure, "root"),
            )
            .await
            .unwrap();

        // After: 10 actions, 5 stumbles — a clear regression.
        let t1 = chrono::Utc::now().timestamp_millis() + 1_000;
        for i in 0..10 {
            metrics.record_action_at("root", t1 + i).await;
        }
        for i in 0..5 {
            metrics.record_stumble_at("root", "error", t1 + i).await;
        }

        learn.evaluate_pending_improvements().await.unwrap();

        // Entry removed, rollback applied, prompt restored.
        assert!(learn.pending_evaluations().await.is_empty());
        assert_eq!(genome.get_agent("root").unwrap().system_prompt, "original prompt");

        let events = learn.bus.collected();
        let evaluation = events.iter().find(|e| {
            e.kind == EventKind::LearnMutation && e.data_str("mutation_type") == Some("evaluation")
        });
        assert_eq!(evaluation.unwrap().data_str("verdict"), Some("harmful"));
        assert!(events.iter().any(|e| {
            e.kind == EventKind::LearnMutation && e.data_str("mutation_type") == Some("rollback")
        }));
    }

    #[tokio::test]
    async fn neutral_mutation_exits_pending_without_rollback() {
        let (_d, learn) = harness().await;
        let genome = Arc::clone(&learn.genome);
        let metrics = Arc::clone(learn.metrics());
        genome.add_agent(AgentSpec::named("root")).await.unwrap();

        let t0 = chrono::Utc::now().timestamp_millis() - 10_000;
        for i in 0..10 {
            metrics.record_action_at("root", t0 + i).await;
        }
        metrics.record_stumble_at("root", "error", t0).await;

        learn
            .apply_mutation(
                Mutation::CreateMemory { content: "m".into(), tags: vec![] },
                &signal(SignalKind::Failure, "root"),
            )
            .await
            .unwrap();

        let t1 = chrono::Utc::now().timestamp_millis() + 1_000;
        for i in 0..10 {
            metrics.record_action_at("root", t1 + i).await;
        }
        metrics.record_stumble_at("root", "error", t1).await;

        learn.evaluate_pending_improvements().await.unwrap();
        assert!(learn.pending_evaluations().await.is_empty());
        let events = learn.bus.collected();
        assert!(!events.iter().any(|e| e.data_str("mutation_type") == Some("rollback")));
    }
}
