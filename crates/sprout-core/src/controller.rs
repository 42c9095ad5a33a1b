// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sprout_events::{EventBus, SessionEvent, Subscription};
use sprout_genome::GenomeStore;
use sprout_model::{LlmClient, Message};
use sprout_primitives::PrimitiveRegistry;

use crate::agent::{Agent, AgentServices, SteeringHandle};
use crate::learn::LearnProcess;
use crate::replay::replay_event_log;
use crate::verify::ActResult;

/// Orchestrates one root-agent run: wires the shared services, bridges the
/// Bus into a pull-based event stream, runs Learn alongside the agent, and
/// evaluates pending improvements at the session boundary.
pub struct SessionController {
    bus: Arc<EventBus>,
    genome: Arc<GenomeStore>,
    llm: Arc<dyn LlmClient>,
    primitives: Arc<PrimitiveRegistry>,
    learn: Option<Arc<LearnProcess>>,
    root_agent: String,
    provider: String,
    workdir: Option<PathBuf>,
}

impl SessionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        genome: Arc<GenomeStore>,
        llm: Arc<dyn LlmClient>,
        primitives: Arc<PrimitiveRegistry>,
        learn: Option<Arc<LearnProcess>>,
        root_agent: impl Into<String>,
        provider: impl Into<String>,
        workdir: Option<PathBuf>,
    ) -> Self {
        Self {
            bus,
            genome,
            llm,
            primitives,
            learn,
            root_agent: root_agent.into(),
            provider: provider.into(),
            workdir,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Submit a goal to the root agent and return a handle carrying the
    /// live event stream, steering, and cancellation.
    pub fn submit_goal(&self, goal: &str) -> anyhow::Result<SessionRun> {
        self.submit_goal_with_history(goal, Vec::new())
    }

    /// Like [`submit_goal`], seeding prior conversation history first
    /// (resume).
    pub fn submit_goal_with_history(
        &self,
        goal: &str,
        initial_history: Vec<Message>,
    ) -> anyhow::Result<SessionRun> {
        let session_id = ulid::Ulid::new().to_string();
        let cancel = CancellationToken::new();

        let spec = self
            .genome
            .get_agent(&self.root_agent)
            .with_context(|| format!("missing root agent {:?}", self.root_agent))?;

        // Subscribe before the agent starts so no event is missed.
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.bus.subscribe(move |event: &SessionEvent| {
            let _ = tx.send(event.clone());
        });

        let services = AgentServices {
            bus: Arc::clone(&self.bus),
            genome: Arc::clone(&self.genome),
            llm: Arc::clone(&self.llm),
            primitives: Arc::clone(&self.primitives),
            learn: self.learn.clone(),
            session_id: session_id.clone(),
            cancel: cancel.clone(),
            provider: self.provider.clone(),
            workdir: self.workdir.clone(),
        };
        let log_path = self.genome.logs_dir().join(format!("{session_id}.jsonl"));
        let mut agent = Agent::new(spec, 0, services, Some(log_path.clone()))?;
        if !initial_history.is_empty() {
            agent.seed_history(initial_history);
        }
        let steering = agent.steering_handle();

        // Learn runs alongside the agent and is stopped (drained) after.
        if let Some(learn) = &self.learn {
            learn.start_background();
        }
        let learn = self.learn.clone();
        let goal = goal.to_string();
        let handle = tokio::spawn(async move {
            let result = agent.run(&goal).await;
            if let Some(learn) = &learn {
                learn.stop_background().await;
                if let Err(e) = learn.evaluate_pending_improvements().await {
                    debug!(error = %e, "pending-improvement evaluation failed");
                }
            }
            result
        });

        Ok(SessionRun {
            session_id,
            log_path,
            events: rx,
            handle,
            bus: Arc::clone(&self.bus),
            subscription: Some(subscription),
            steering,
            cancel,
        })
    }

    /// Rebuild initial history by replaying a prior session's event log,
    /// then submit.
    pub async fn resume(&self, log_path: &Path, goal: &str) -> anyhow::Result<SessionRun> {
        let text = tokio::fs::read_to_string(log_path)
            .await
            .with_context(|| format!("reading session log {}", log_path.display()))?;
        let history = replay_event_log(&text);
        debug!(messages = history.len(), "resumed history from log");
        self.submit_goal_with_history(goal, history)
    }
}

/// A running session: an async event stream plus steering and cancellation.
///
/// Events arrive in emission order.  [`finish`] re-throws agent errors only
/// after the buffered events have been drained.
pub struct SessionRun {
    pub session_id: String,
    pub log_path: PathBuf,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    handle: tokio::task::JoinHandle<anyhow::Result<ActResult>>,
    bus: Arc<EventBus>,
    subscription: Option<Subscription>,
    steering: SteeringHandle,
    cancel: CancellationToken,
}

impl SessionRun {
    /// Inject a steering message; consumed at the top of the agent's next turn.
    pub fn steer(&self, text: impl Into<String>) {
        self.steering.push(text);
    }

    /// Trip the shared cancel token.  Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stream events through `f` until the agent completes, then drain the
    /// remaining buffer and return the result.
    pub async fn for_each_event(
        mut self,
        mut f: impl FnMut(&SessionEvent),
    ) -> anyhow::Result<ActResult> {
        let joined = loop {
            tokio::select! {
                biased;
                maybe = self.events.recv() => {
                    match maybe {
                        Some(event) => f(&event),
                        // All senders dropped — cannot happen before
                        // unsubscribe, but end cleanly if it does.
                        None => break None,
                    }
                }
                joined = &mut self.handle => break Some(joined),
            }
        };
        let joined = match joined {
            Some(j) => j,
            None => (&mut self.handle).await,
        };

        if let Some(sub) = self.subscription.take() {
            self.bus.unsubscribe(sub);
        }
        while let Ok(event) = self.events.try_recv() {
            f(&event);
        }
        joined.map_err(|e| anyhow::anyhow!("agent task panicked: {e}"))?
    }

    /// Wait for completion, returning `(buffered events, result)`.  The
    /// events vector holds everything not yet consumed from the stream, in
    /// emission order; the result is re-thrown only after the buffer drains.
    pub async fn finish(mut self) -> (Vec<SessionEvent>, anyhow::Result<ActResult>) {
        let joined = (&mut self.handle).await;
        if let Some(sub) = self.subscription.take() {
            self.bus.unsubscribe(sub);
        }
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        let result = match joined {
            Ok(r) => r,
            Err(e) => Err(anyhow::anyhow!("agent task panicked: {e}")),
        };
        (events, result)
    }
}

/// Pull-based event stream: the subscriber callback is bridged into the
/// channel, and this impl exposes it as a `futures::Stream`.
impl futures::Stream for SessionRun {
    type Item = SessionEvent;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}
