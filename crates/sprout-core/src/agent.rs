// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use async_recursion::async_recursion;
use serde_json::{json, Value};
use tracing::warn;

use sprout_events::{EventBus, EventKind, EventLog};
use sprout_genome::{recall, AgentSpec, GenomeStore, DEFAULT_RECALL_K};
use sprout_model::{
    catalog, ChatRequest, LlmClient, Message, Role, ToolCallRequest, ToolChoice, ToolSchema,
};
use sprout_primitives::{
    budget_for, truncate_output, ExecEnv, PathPolicy, PrimitiveRegistry, WorkspaceContext,
};

use crate::learn::LearnProcess;
use crate::prompts;
use crate::verify::{
    detect_retries, verify_act, verify_primitive, ActResult, LearnSignal, SignalKind,
};

/// Name of the delegation meta-tool exposed to spawning agents.
const DELEGATE_TOOL: &str = "delegate";

/// Output-token ceiling for planning calls.
const PLAN_MAX_TOKENS: u32 = 4096;

/// Shared services threaded through the whole agent tree.  Children receive
/// a clone: same Bus, Genome, Learn, client, session id, and cancel token.
#[derive(Clone)]
pub struct AgentServices {
    pub bus: Arc<EventBus>,
    pub genome: Arc<GenomeStore>,
    pub llm: Arc<dyn LlmClient>,
    pub primitives: Arc<PrimitiveRegistry>,
    pub learn: Option<Arc<LearnProcess>>,
    pub session_id: String,
    pub cancel: tokio_util::sync::CancellationToken,
    /// Default provider, used for model-tier resolution and capability
    /// alignment (`edit_file` ↔ `apply_patch`).
    pub provider: String,
    pub workdir: Option<PathBuf>,
}

/// Thread-safe handle for injecting steering messages into a running agent.
/// Queued strings are consumed exactly once at the top of the next turn.
#[derive(Clone)]
pub struct SteeringHandle(Arc<Mutex<Vec<String>>>);

impl SteeringHandle {
    pub fn push(&self, text: impl Into<String>) {
        self.0.lock().unwrap().push(text.into());
    }
}

/// One LLM-requested sub-goal handed to another agent.
#[derive(Debug, Clone)]
struct Delegation {
    agent_name: String,
    call_id: String,
    goal: String,
    hints: Vec<String>,
}

struct ToolSet {
    schemas: Vec<ToolSchema>,
    /// Delegatable agent names; non-empty only for spawning agents.
    menu: Vec<String>,
}

/// A bounded perceive → recall → plan → act → verify loop for one goal.
///
/// Single-threaded cooperative at the scope of one agent: turns execute
/// sequentially, but sibling delegations within a turn run concurrently and
/// their results are appended in the original tool-call order — the ordering
/// every provider requires.
pub struct Agent {
    spec: AgentSpec,
    depth: u32,
    services: AgentServices,
    /// Snapshot of known agents taken at construction.
    available: HashMap<String, AgentSpec>,
    steering: Arc<Mutex<Vec<String>>>,
    log: Option<EventLog>,
    log_base: Option<PathBuf>,
    history: Vec<Message>,
    call_history: Vec<(String, Value)>,
    stumbles: u32,
    turns: u32,
}

impl Agent {
    /// Construct an agent at `depth`.  Fails when the spec's `max_depth` is
    /// positive and already reached; `max_depth = 0` never blocks
    /// construction (but disables spawning).
    pub fn new(
        spec: AgentSpec,
        depth: u32,
        services: AgentServices,
        log_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let c = &spec.constraints;
        if c.max_depth > 0 && depth >= c.max_depth {
            anyhow::bail!(
                "depth exceeded: agent {:?} at depth {depth} (max_depth {})",
                spec.name,
                c.max_depth
            );
        }
        let available: HashMap<String, AgentSpec> = services
            .genome
            .agents()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        let (log, log_base) = match log_path {
            Some(path) => {
                let base = path.with_extension("");
                (Some(EventLog::create(&path)?), Some(base))
            }
            None => (None, None),
        };
        Ok(Self {
            spec,
            depth,
            services,
            available,
            steering: Arc::new(Mutex::new(Vec::new())),
            log,
            log_base,
            history: Vec::new(),
            call_history: Vec::new(),
            stumbles: 0,
            turns: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Handle for cross-thread steering; callable at any time.
    pub fn steering_handle(&self) -> SteeringHandle {
        SteeringHandle(Arc::clone(&self.steering))
    }

    /// Pre-load conversation history (resume).  System messages are
    /// stripped — the correct system prompt is rebuilt on `run`.
    pub fn seed_history(&mut self, messages: Vec<Message>) {
        self.history = messages.into_iter().filter(|m| m.role != Role::System).collect();
    }

    fn emit(&self, kind: EventKind, data: Value) {
        let event = self.services.bus.emit(kind, &self.spec.name, self.depth, data);
        if let Some(log) = &self.log {
            log.append(&event);
        }
    }

    /// Compute the tool set exposed to the LLM.  Spawning agents with a
    /// non-empty delegation menu get the single delegation meta-tool and no
    /// primitives — primitives belong to leaf agents.  Leaf capabilities are
    /// filtered through provider alignment (`edit_file` ↔ `apply_patch`).
    fn build_toolset(&self) -> ToolSet {
        let menu: Vec<String> = self
            .spec
            .capabilities
            .iter()
            .filter(|c| c.as_str() != self.spec.name)
            .filter(|c| self.available.contains_key(c.as_str()))
            .cloned()
            .collect();
        let spawning =
            self.spec.constraints.can_spawn && self.spec.constraints.max_depth > 0 && !menu.is_empty();
        if spawning {
            return ToolSet { schemas: vec![delegation_tool_schema(&menu)], menu };
        }

        let mut schemas = Vec::new();
        let mut seen = HashSet::new();
        for cap in &self.spec.capabilities {
            let aligned = align_capability(cap, &self.services.provider);
            if !seen.insert(aligned.clone()) {
                continue;
            }
            if let Some(s) = self.services.primitives.schema_for(&aligned) {
                schemas.push(ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                });
            }
        }
        ToolSet { schemas, menu: Vec::new() }
    }

    fn classify(&self, call: &ToolCallRequest) -> Option<Delegation> {
        let (agent_name, args) = if call.name == DELEGATE_TOOL {
            let agent = call
                .arguments
                .get("agent")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            (agent, &call.arguments)
        } else if call.name != self.spec.name && self.available.contains_key(&call.name) {
            // Defensive: some models call the target agent by name directly.
            (call.name.clone(), &call.arguments)
        } else {
            return None;
        };
        let goal = args.get("goal").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let hints = args
            .get("hints")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Some(Delegation { agent_name, call_id: call.id.clone(), goal, hints })
    }

    /// Run the loop for one goal.  Returns normally for turn-limit, timeout,
    /// and cancellation; only construction and LLM transport errors are
    /// `Err` (fatal to the session).
    pub async fn run(&mut self, goal: &str) -> anyhow::Result<ActResult> {
        let started = Instant::now();
        let constraints = self.spec.constraints.clone();

        self.emit(
            EventKind::SessionStart,
            json!({
                "agent": self.spec.name,
                "goal": goal,
                "session_id": self.services.session_id,
            }),
        );

        // PERCEIVE
        self.emit(EventKind::Perceive, json!({"goal": goal}));
        self.history.push(Message::user(goal));

        // RECALL
        let now = chrono::Utc::now().timestamp_millis();
        let recalled = recall(&self.services.genome, goal, DEFAULT_RECALL_K, now);
        let memory_ids: Vec<String> = recalled.memories.iter().map(|m| m.id.clone()).collect();
        if !memory_ids.is_empty() {
            if let Err(e) = self.services.genome.mark_memories_used(&memory_ids).await {
                warn!(error = %e, "failed to mark memories used");
            }
        }
        self.emit(
            EventKind::Recall,
            json!({
                "memories": memory_ids,
                "routing_hints": recalled
                    .routing_hints
                    .iter()
                    .map(|r| r.preference.clone())
                    .collect::<Vec<_>>(),
            }),
        );

        // Tools saved to the workspace in earlier sessions are surfaced in
        // the prompt; the agent runs them through exec.
        let saved_tools = self
            .services
            .genome
            .load_agent_tools(&self.spec.name)
            .await
            .unwrap_or_default();
        let tools_dir = self
            .services
            .genome
            .agents_dir()
            .join(&self.spec.name)
            .join("tools");

        let toolset = self.build_toolset();
        let system = prompts::system_prompt(
            &self.spec,
            &recalled,
            self.services.workdir.as_deref(),
            &toolset.menu,
            &saved_tools,
            Some(&tools_dir),
        );
        let (provider, model) = catalog::resolve(&self.spec.model, &self.services.provider)
            .with_context(|| format!("resolving model for agent {:?}", self.spec.name))?;

        let mut output = String::new();

        loop {
            // 1. Steering drain — queued messages enter between turns, never
            //    mid-turn, and are consumed exactly once.
            let queued: Vec<String> = std::mem::take(&mut *self.steering.lock().unwrap());
            for text in queued {
                self.emit(EventKind::Steering, json!({"text": text}));
                self.history.push(Message::user(text));
            }

            // 2. Budget checks at the turn boundary.
            if constraints.timeout_ms > 0
                && started.elapsed().as_millis() as u64 >= constraints.timeout_ms
            {
                self.emit(EventKind::Warning, json!({"message": "timeout reached"}));
                break;
            }
            if self.turns >= constraints.max_turns {
                break;
            }

            // 3. Cancellation check.
            if self.services.cancel.is_cancelled() {
                self.emit(EventKind::Interrupted, json!({"turns": self.turns}));
                break;
            }

            // 4. Plan — the LLM call races the cancel token.
            self.emit(EventKind::PlanStart, json!({"turn": self.turns + 1}));
            let mut messages = Vec::with_capacity(self.history.len() + 1);
            messages.push(Message::system(system.clone()));
            messages.extend(self.history.iter().cloned());
            let context_tokens: usize = messages.iter().map(|m| m.approx_tokens()).sum();
            let request = ChatRequest {
                model: model.clone(),
                provider: Some(provider.clone()),
                messages,
                tools: toolset.schemas.clone(),
                tool_choice: ToolChoice::Auto,
                max_tokens: Some(PLAN_MAX_TOKENS),
                ..Default::default()
            };
            let completed = tokio::select! {
                biased;
                _ = self.services.cancel.cancelled() => None,
                r = self.services.llm.complete(request) => Some(r),
            };
            let response = match completed {
                None => {
                    self.emit(EventKind::Interrupted, json!({"turns": self.turns}));
                    break;
                }
                Some(r) => r.context("model completion failed")?,
            };
            self.turns += 1;

            let assistant = response.message.clone();
            self.emit(
                EventKind::PlanEnd,
                json!({
                    "finish_reason": response.finish_reason,
                    "usage": {
                        "input_tokens": response.usage.input_tokens,
                        "output_tokens": response.usage.output_tokens,
                    },
                    "text": assistant.text(),
                    "reasoning": assistant.thinking_text(),
                    "context_tokens": context_tokens,
                    "assistant_message": assistant,
                }),
            );

            // 5. Append the assistant message to history.
            self.history.push(assistant.clone());

            // 6. A tool-free reply terminates the loop; its text is the output.
            let calls = assistant.tool_calls();
            if calls.is_empty() {
                output = assistant.text();
                break;
            }
            let text = assistant.text();
            if !text.is_empty() {
                output = text;
            }

            // 7-9. Dispatch, verify, record.
            self.dispatch(&calls, goal).await;
        }

        // POST_PROCESS
        let retry_count = detect_retries(&self.call_history);
        self.stumbles += retry_count;
        if retry_count > 0 {
            self.emit(
                EventKind::LearnSignal,
                json!({"kind": "retry", "agent_name": self.spec.name, "count": retry_count}),
            );
            if constraints.can_learn {
                if let Some(learn) = &self.services.learn {
                    let details = ActResult {
                        agent_name: self.spec.name.clone(),
                        goal: goal.to_string(),
                        output: format!("{retry_count} redundant tool calls"),
                        success: true,
                        stumbles: retry_count,
                        turns: self.turns,
                        timed_out: false,
                    };
                    learn
                        .push(LearnSignal::new(
                            SignalKind::Retry,
                            details,
                            &self.services.session_id,
                        ))
                        .await;
                }
            }
        }

        let hit_turn_limit = self.turns >= constraints.max_turns;
        let timed_out = constraints.timeout_ms > 0
            && started.elapsed().as_millis() as u64 >= constraints.timeout_ms;
        let success = !hit_turn_limit && !timed_out;
        self.stumbles += u32::from(hit_turn_limit) + u32::from(timed_out);

        self.emit(
            EventKind::SessionEnd,
            json!({
                "success": success,
                "stumbles": self.stumbles,
                "turns": self.turns,
                "timed_out": timed_out,
                "output": output,
            }),
        );
        if let Some(log) = &self.log {
            log.flush().await;
        }

        Ok(ActResult {
            agent_name: self.spec.name.clone(),
            goal: goal.to_string(),
            output,
            success,
            stumbles: self.stumbles,
            turns: self.turns,
            timed_out,
        })
    }

    /// Dispatch one turn's tool calls: delegations concurrently, primitives
    /// sequentially; results are appended in the original tool-call order.
    async fn dispatch(&mut self, calls: &[ToolCallRequest], goal: &str) {
        for call in calls {
            self.call_history.push((call.name.clone(), call.arguments.clone()));
        }

        let mut results: HashMap<String, (Message, u32)> = HashMap::new();
        let mut spawned: Vec<(String, tokio::task::JoinHandle<(Message, u32)>)> = Vec::new();

        for call in calls {
            if let Some(delegation) = self.classify(call) {
                let ctx = DelegationContext {
                    services: self.services.clone(),
                    available: self.available.clone(),
                    parent_depth: self.depth,
                    parent_name: self.spec.name.clone(),
                    parent_log_base: self.log_base.clone(),
                    parent_log: self.log.clone(),
                    can_learn: self.spec.constraints.can_learn,
                };
                spawned.push((call.id.clone(), tokio::spawn(execute_delegation(ctx, delegation))));
            }
        }

        for call in calls {
            if self.classify(call).is_some() {
                continue;
            }
            let (msg, stumble) = self.execute_primitive(call, goal).await;
            results.insert(call.id.clone(), (msg, stumble));
        }

        for (id, handle) in spawned {
            let (msg, stumble) = match handle.await {
                Ok(r) => r,
                Err(e) => (
                    Message::tool_result(&id, format!("delegation task failed: {e}"), true),
                    1,
                ),
            };
            results.insert(id, (msg, stumble));
        }

        for call in calls {
            let (msg, stumble) = results
                .remove(&call.id)
                .unwrap_or_else(|| (Message::tool_result(&call.id, "missing result", true), 1));
            self.history.push(msg);
            self.stumbles += stumble;
            if let Some(learn) = &self.services.learn {
                learn.metrics().record_action(&self.spec.name).await;
            }
        }
    }

    async fn execute_primitive(&mut self, call: &ToolCallRequest, goal: &str) -> (Message, u32) {
        self.emit(
            EventKind::PrimitiveStart,
            json!({"name": call.name, "arguments": call.arguments}),
        );
        let env = ExecEnv {
            workdir: self.services.workdir.clone(),
            workspace: Some(WorkspaceContext {
                store: Arc::clone(&self.services.genome),
                agent_name: self.spec.name.clone(),
            }),
        };
        let policy = PathPolicy::new(
            self.spec.constraints.allowed_read_paths.clone(),
            self.spec.constraints.allowed_write_paths.clone(),
        );
        let result = self
            .services
            .primitives
            .execute_policed(&call.name, &call.arguments, &env, &self.services.cancel, &policy)
            .await;

        // Cancellation is a control signal, not a stumble: a primitive killed
        // by the shared token (exec exit 130, fetch abort) must not count as
        // a stumble nor feed Learn.  A primitive that finished cleanly before
        // the token tripped is still verified normally.
        if self.services.cancel.is_cancelled() && !result.success {
            let msg = Message::tool_result(&call.id, result.content(), true);
            self.emit(
                EventKind::PrimitiveEnd,
                json!({
                    "name": call.name,
                    "success": false,
                    "interrupted": true,
                    "tool_result_message": msg,
                }),
            );
            return (msg, 0);
        }

        let (stumbled, signal) =
            verify_primitive(&result, &call.name, goal, Some(&self.services.session_id));
        self.emit(
            EventKind::Verify,
            json!({"subject": call.name, "success": result.success, "stumbled": stumbled}),
        );
        if let Some(sig) = signal {
            self.emit(
                EventKind::LearnSignal,
                json!({"kind": sig.kind.as_str(), "agent_name": sig.agent_name, "goal": sig.goal}),
            );
            if self.spec.constraints.can_learn {
                if let Some(learn) = &self.services.learn {
                    learn.push(sig).await;
                }
            }
        }

        let msg = Message::tool_result(&call.id, result.content(), !result.success);
        self.emit(
            EventKind::PrimitiveEnd,
            json!({"name": call.name, "success": result.success, "tool_result_message": msg}),
        );
        (msg, u32::from(stumbled))
    }
}

/// Everything a spawned delegation task needs from its parent.
struct DelegationContext {
    services: AgentServices,
    available: HashMap<String, AgentSpec>,
    parent_depth: u32,
    parent_name: String,
    parent_log_base: Option<PathBuf>,
    parent_log: Option<EventLog>,
    can_learn: bool,
}

impl DelegationContext {
    fn emit(&self, kind: EventKind, data: Value) {
        let event = self.services.bus.emit(kind, &self.parent_name, self.parent_depth, data);
        if let Some(log) = &self.parent_log {
            log.append(&event);
        }
    }
}

/// Run one delegation: resolve the target spec (genome first, then the
/// construction-time snapshot), build the sub-goal, construct and run the
/// child with `depth + 1` and the shared cancel token, verify the result.
/// Failures surface as failed tool-results with one stumble.
#[async_recursion]
async fn execute_delegation(ctx: DelegationContext, d: Delegation) -> (Message, u32) {
    ctx.emit(EventKind::ActStart, json!({"agent_name": d.agent_name, "goal": d.goal}));

    let spec = ctx
        .services
        .genome
        .get_agent(&d.agent_name)
        .or_else(|| ctx.available.get(&d.agent_name).cloned());
    let Some(spec) = spec else {
        let msg = Message::tool_result(&d.call_id, format!("unknown agent: {}", d.agent_name), true);
        ctx.emit(
            EventKind::ActEnd,
            json!({"agent_name": d.agent_name, "success": false, "tool_result_message": msg}),
        );
        return (msg, 1);
    };

    let mut sub_goal = d.goal.clone();
    if !d.hints.is_empty() {
        sub_goal.push_str("\n\nHints:\n");
        for hint in &d.hints {
            sub_goal.push_str(&format!("- {hint}\n"));
        }
    }

    let child_log = ctx
        .parent_log_base
        .as_ref()
        .map(|base| base.join("subagents").join(format!("{}.jsonl", ulid::Ulid::new())));

    let act = match Agent::new(spec, ctx.parent_depth + 1, ctx.services.clone(), child_log) {
        Ok(mut child) => child.run(&sub_goal).await,
        Err(e) => Err(e),
    };

    match act {
        Ok(act) => {
            // Cancellation carve-out: an interrupted child returns normally
            // carrying whatever stumbles it accrued, but the interruption
            // itself is a control signal — no learn signal for the child, no
            // stumble charged to the parent, and the truncated sub-result is
            // marked as an error so the model does not mistake it for a
            // completed sub-goal.
            if ctx.services.cancel.is_cancelled() {
                let content = truncate_output(&act.output, budget_for(DELEGATE_TOOL));
                let msg = Message::tool_result(&d.call_id, content, true);
                ctx.emit(
                    EventKind::ActEnd,
                    json!({
                        "agent_name": act.agent_name,
                        "success": false,
                        "interrupted": true,
                        "stumbles": act.stumbles,
                        "turns": act.turns,
                        "tool_result_message": msg,
                    }),
                );
                return (msg, 0);
            }

            let (vr, signal) = verify_act(&act, &ctx.services.session_id);
            ctx.emit(
                EventKind::Verify,
                json!({"subject": act.agent_name, "success": vr.success, "stumbled": vr.stumbled}),
            );
            if let Some(sig) = signal {
                ctx.emit(
                    EventKind::LearnSignal,
                    json!({"kind": sig.kind.as_str(), "agent_name": sig.agent_name, "goal": sig.goal}),
                );
                if ctx.can_learn {
                    if let Some(learn) = &ctx.services.learn {
                        learn.push(sig).await;
                    }
                }
            }
            let content = truncate_output(&act.output, budget_for(DELEGATE_TOOL));
            let msg = Message::tool_result(&d.call_id, content, !act.success);
            ctx.emit(
                EventKind::ActEnd,
                json!({
                    "agent_name": act.agent_name,
                    "success": act.success,
                    "stumbles": act.stumbles,
                    "turns": act.turns,
                    "tool_result_message": msg,
                }),
            );
            (msg, u32::from(vr.stumbled))
        }
        Err(e) => {
            let msg = Message::tool_result(&d.call_id, format!("delegation failed: {e}"), true);
            ctx.emit(
                EventKind::ActEnd,
                json!({"agent_name": d.agent_name, "success": false, "tool_result_message": msg}),
            );
            (msg, 1)
        }
    }
}

fn delegation_tool_schema(menu: &[String]) -> ToolSchema {
    ToolSchema {
        name: DELEGATE_TOOL.into(),
        description: "Delegate a sub-goal to another agent and receive its final output. \
                      Pick the agent whose specialty matches the sub-goal."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "enum": menu,
                    "description": "Target agent"
                },
                "goal": {
                    "type": "string",
                    "description": "The sub-goal for the agent to accomplish"
                },
                "hints": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional hints passed along with the goal"
                }
            },
            "required": ["agent", "goal"]
        }),
    }
}

/// Providers differ in which edit surface their models are trained on:
/// OpenAI models expect `apply_patch`, Anthropic and Gemini models expect
/// `edit_file`.  Swap the capability accordingly.
fn align_capability(cap: &str, provider: &str) -> String {
    match (cap, provider) {
        ("edit_file", "openai") => "apply_patch".to_string(),
        ("apply_patch", p) if p != "openai" => "edit_file".to_string(),
        _ => cap.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn alignment_swaps_by_provider() {
        assert_eq!(align_capability("edit_file", "openai"), "apply_patch");
        assert_eq!(align_capability("apply_patch", "anthropic"), "edit_file");
        assert_eq!(align_capability("apply_patch", "gemini"), "edit_file");
        assert_eq!(align_capability("edit_file", "anthropic"), "edit_file");
        assert_eq!(align_capability("apply_patch", "openai"), "apply_patch");
        assert_eq!(align_capability("exec", "openai"), "exec");
    }

    #[test]
    fn delegation_schema_carries_the_menu() {
        let schema = delegation_tool_schema(&["leaf".to_string(), "coder".to_string()]);
        assert_eq!(schema.name, "delegate");
        let menu = schema.parameters["properties"]["agent"]["enum"].as_array().unwrap();
        assert_eq!(menu.len(), 2);
        let required = schema.parameters["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "goal"));
    }
}
