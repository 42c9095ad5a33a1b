// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Full-stack integration: controller + genome + learn wired the same way
//! the binary wires them, driven by the scripted mock client.

use std::sync::Arc;

use serde_json::json;

use sprout_core::{LearnProcess, SessionController};
use sprout_events::{EventBus, EventKind};
use sprout_genome::{AgentSpec, GenomeStore};
use sprout_metrics::MetricsStore;
use sprout_model::{LlmClient, ScriptedClient};
use sprout_primitives::PrimitiveRegistry;

async fn genome_with_agents(dir: &std::path::Path) -> Arc<GenomeStore> {
    let genome = Arc::new(GenomeStore::new(dir));
    genome.init().await.unwrap();

    let mut root = AgentSpec::named("root");
    root.description = "routes goals to specialists".into();
    root.capabilities = vec!["leaf".into()];
    root.constraints.can_spawn = true;
    root.constraints.max_depth = 3;
    genome.add_agent(root).await.unwrap();

    let mut leaf = AgentSpec::named("leaf");
    leaf.description = "does filesystem work".into();
    leaf.capabilities = vec!["write_file".into(), "read_file".into(), "exec".into()];
    genome.add_agent(leaf).await.unwrap();

    genome
}

fn build_controller(
    genome: Arc<GenomeStore>,
    llm: Arc<dyn LlmClient>,
    with_learn: bool,
) -> (Arc<EventBus>, SessionController) {
    let bus = Arc::new(EventBus::new());
    let learn = with_learn.then(|| {
        let metrics = Arc::new(MetricsStore::new(genome.metrics_dir().join("actions.jsonl")));
        Arc::new(LearnProcess::new(
            Arc::clone(&genome),
            metrics,
            Arc::clone(&bus),
            Arc::clone(&llm),
            "mock",
        ))
    });
    let controller = SessionController::new(
        Arc::clone(&bus),
        genome,
        llm,
        Arc::new(PrimitiveRegistry::builtin_with_workspace()),
        learn,
        "root",
        "mock",
        None,
    );
    (bus, controller)
}

#[tokio::test]
async fn delegated_goal_writes_the_file() {
    let genome_dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let target = work.path().join("greet.py");
    let genome = genome_with_agents(genome_dir.path()).await;

    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(vec![
        ScriptedClient::tool_call_response(
            Some("delegating to leaf"),
            vec![(
                "d1",
                "delegate",
                json!({"agent": "leaf", "goal": format!("Create greet.py at {}", work.path().display())}),
            )],
        ),
        ScriptedClient::tool_call_response(
            None,
            vec![(
                "c1",
                "write_file",
                json!({"path": target.to_str().unwrap(), "content": "print('Sprout')\n"}),
            )],
        ),
        ScriptedClient::text_response("created greet.py"),
        ScriptedClient::text_response("Done."),
    ]));

    let (bus, controller) = build_controller(genome, llm, true);
    let run = controller.submit_goal("Create greet.py").unwrap();
    let (_, result) = run.finish().await;
    let result = result.unwrap();

    assert!(result.success);
    assert!(std::fs::read_to_string(&target).unwrap().contains("Sprout"));

    let events = bus.collected();
    assert!(events.iter().any(|e| e.kind == EventKind::ActStart));
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::ActEnd && e.data["success"] == json!(true)));
    // One session_end per agent in the tree, root last at depth 0.
    let ends: Vec<_> = events.iter().filter(|e| e.kind == EventKind::SessionEnd).collect();
    assert_eq!(ends.len(), 2);
    assert_eq!(ends.last().unwrap().depth, 0);
}

#[tokio::test]
async fn session_log_supports_resume() {
    let genome_dir = tempfile::tempdir().unwrap();
    let genome = genome_with_agents(genome_dir.path()).await;

    let llm: Arc<dyn LlmClient> =
        Arc::new(ScriptedClient::new(vec![ScriptedClient::text_response("first answer")]));
    let (_bus, c1) = build_controller(Arc::clone(&genome), llm, false);
    let run = c1.submit_goal("remember this").unwrap();
    let log_path = run.log_path.clone();
    let (_, result) = run.finish().await;
    result.unwrap();
    assert!(log_path.exists());

    let llm2 = Arc::new(ScriptedClient::new(vec![ScriptedClient::text_response("second")]));
    let requests = Arc::clone(&llm2.requests);
    let (_bus2, c2) = build_controller(genome, llm2, false);
    let run2 = c2.resume(&log_path, "and continue").await.unwrap();
    let (_, result2) = run2.finish().await;
    assert_eq!(result2.unwrap().output, "second");

    let reqs = requests.lock().unwrap();
    let all_text: String =
        reqs[0].messages.iter().map(|m| m.text()).collect::<Vec<_>>().join("\n");
    assert!(all_text.contains("remember this"));
    assert!(all_text.contains("first answer"));
    assert!(all_text.contains("and continue"));
}

#[tokio::test]
async fn failures_produce_learn_signals_and_metrics() {
    let genome_dir = tempfile::tempdir().unwrap();
    let genome = genome_with_agents(genome_dir.path()).await;

    // The leaf-only agent is the root for this run so failures land directly.
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(vec![
        ScriptedClient::tool_call_response(
            None,
            vec![("c1", "read_file", json!({"path": "/no/such/file"}))],
        ),
        ScriptedClient::text_response("could not read it"),
        // Learn reasoning reply (if the signal passes the filter).
        ScriptedClient::text_response(r#"{"type":"skip"}"#),
    ]));

    let bus = Arc::new(EventBus::new());
    let metrics = Arc::new(MetricsStore::new(genome.metrics_dir().join("actions.jsonl")));
    let learn = Arc::new(LearnProcess::new(
        Arc::clone(&genome),
        Arc::clone(&metrics),
        Arc::clone(&bus),
        Arc::clone(&llm),
        "mock",
    ));
    let controller = SessionController::new(
        Arc::clone(&bus),
        genome,
        llm,
        Arc::new(PrimitiveRegistry::builtin_with_workspace()),
        Some(learn),
        "leaf",
        "mock",
        None,
    );

    let run = controller.submit_goal("read a missing file").unwrap();
    let (_, result) = run.finish().await;
    let result = result.unwrap();

    assert!(result.success, "primitive failure is recoverable");
    assert!(result.stumbles >= 1);
    assert_eq!(metrics.stumble_count("read_file", "error"), 1);
    assert_eq!(metrics.total_actions("leaf"), 1);
    assert!(bus.collected().iter().any(|e| e.kind == EventKind::LearnSignal));
}
