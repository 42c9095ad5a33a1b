// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, GenomeCommands};
use sprout_core::{LearnProcess, SessionController};
use sprout_events::{EventBus, EventKind, SessionEvent};
use sprout_genome::GenomeStore;
use sprout_metrics::MetricsStore;
use sprout_model::{available_providers, client_from_config};
use sprout_primitives::PrimitiveRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::ListProviders => {
            let providers = available_providers();
            if providers.is_empty() {
                println!("no providers configured; set ANTHROPIC_API_KEY, OPENAI_API_KEY, or GEMINI_API_KEY");
            } else {
                for p in providers {
                    println!("{p}");
                }
            }
            Ok(())
        }
        Commands::Genome { command } => run_genome_command(&cli, command).await,
        Commands::Run { goal, model, provider, agent, no_learn, json } => {
            let mut config = sprout_config::load(cli.config.as_deref())?;
            if let Some(m) = model {
                config.model.selector = m.clone();
            }
            if let Some(p) = provider {
                config.model.provider = Some(p.clone());
            }
            if let Some(a) = agent {
                config.runtime.root_agent = a.clone();
            }
            if *no_learn {
                config.learn.enabled = false;
            }
            let controller = build_controller(&cli, &config).await?;
            let run = controller.submit_goal(goal)?;
            eprintln!("session {} (log: {})", run.session_id, run.log_path.display());
            let json = *json;
            let result = run
                .for_each_event(|event| print_event(event, json))
                .await?;
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Resume { log, goal, json } => {
            let config = sprout_config::load(cli.config.as_deref())?;
            let controller = build_controller(&cli, &config).await?;
            let run = controller.resume(log, goal).await?;
            let json = *json;
            let result = run
                .for_each_event(|event| print_event(event, json))
                .await?;
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "sprout=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn genome_dir(cli: &Cli, config: &sprout_config::Config) -> std::path::PathBuf {
    cli.genome_dir
        .clone()
        .unwrap_or_else(|| config.genome.resolved_dir())
}

async fn open_genome(cli: &Cli, config: &sprout_config::Config) -> anyhow::Result<Arc<GenomeStore>> {
    let genome = Arc::new(GenomeStore::new(genome_dir(cli, config)));
    genome.init().await?;
    genome.load_from_disk().await?;
    if let Some(bootstrap) = &config.genome.bootstrap_dir {
        let added = genome.sync_bootstrap(bootstrap).await?;
        if !added.is_empty() {
            eprintln!("bootstrap: added {}", added.join(", "));
        }
    } else {
        // A fresh genome gets the built-in default colony so the first
        // `sprout run` has a root agent to talk to.
        let seeded = sprout_genome::seed_defaults(&genome).await?;
        if !seeded.is_empty() {
            eprintln!("seeded default agents: {}", seeded.join(", "));
        }
    }
    Ok(genome)
}

async fn build_controller(
    cli: &Cli,
    config: &sprout_config::Config,
) -> anyhow::Result<SessionController> {
    let genome = open_genome(cli, config).await?;
    let llm = client_from_config(&config.model).context("constructing LLM client")?;
    let provider = config
        .model
        .provider
        .clone()
        .or_else(|| llm.providers().into_iter().next())
        .unwrap_or_else(|| "anthropic".into());
    let bus = Arc::new(EventBus::new());
    let primitives = Arc::new(PrimitiveRegistry::builtin_with_workspace());

    let learn = if config.learn.enabled {
        let metrics = Arc::new(MetricsStore::new(genome.metrics_dir().join("actions.jsonl")));
        metrics.load_from_disk().await?;
        // Metric-write failures surface as warning events, never as errors.
        let warn_bus = Arc::clone(&bus);
        metrics.on_warning(move |message| {
            warn_bus.emit(EventKind::Warning, "metrics", 0, serde_json::json!({"message": message}));
        });
        Some(Arc::new(LearnProcess::new(
            Arc::clone(&genome),
            metrics,
            Arc::clone(&bus),
            Arc::clone(&llm),
            provider.clone(),
        )))
    } else {
        None
    };

    Ok(SessionController::new(
        bus,
        genome,
        llm,
        primitives,
        learn,
        config.runtime.root_agent.clone(),
        provider,
        config.runtime.workdir.clone(),
    ))
}

async fn run_genome_command(cli: &Cli, command: &GenomeCommands) -> anyhow::Result<()> {
    let config = sprout_config::load(cli.config.as_deref())?;
    match command {
        GenomeCommands::Init => {
            let genome = GenomeStore::new(genome_dir(cli, &config));
            genome.init().await?;
            println!("genome initialized at {}", genome.root().display());
            Ok(())
        }
        GenomeCommands::Sync { dir } => {
            let genome = open_genome(cli, &config).await?;
            let added = genome.sync_bootstrap(dir).await?;
            if added.is_empty() {
                println!("nothing to add");
            } else {
                println!("added: {}", added.join(", "));
            }
            Ok(())
        }
        GenomeCommands::Show => {
            let genome = open_genome(cli, &config).await?;
            println!("agents:");
            for a in genome.agents() {
                println!("  {} v{} ({}) — {}", a.name, a.version, a.model, a.description);
            }
            println!("memories: {}", genome.memories().len());
            println!("routing rules: {}", genome.routing_rules().len());
            Ok(())
        }
        GenomeCommands::Prune { min_confidence } => {
            let genome = open_genome(cli, &config).await?;
            let pruned = genome.prune_memories(*min_confidence).await?;
            println!("pruned {pruned} memories below confidence {min_confidence}");
            Ok(())
        }
    }
}

/// Render one event for the terminal.  `--json` prints the raw JSONL record.
fn print_event(event: &SessionEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    let indent = "  ".repeat(event.depth as usize);
    let who = &event.agent_id;
    match event.kind {
        EventKind::SessionStart => {
            if let Some(goal) = event.data_str("goal") {
                println!("{indent}▶ {who}: {goal}");
            }
        }
        EventKind::PlanEnd => {
            if let Some(text) = event.data_str("text") {
                if !text.is_empty() {
                    println!("{indent}{who}: {text}");
                }
            }
        }
        EventKind::PrimitiveStart => {
            if let Some(name) = event.data_str("name") {
                println!("{indent}{who} → {name}");
            }
        }
        EventKind::ActStart => {
            if let (Some(agent), Some(goal)) =
                (event.data_str("agent_name"), event.data_str("goal"))
            {
                println!("{indent}{who} ⇒ {agent}: {goal}");
            }
        }
        EventKind::Steering => {
            if let Some(text) = event.data_str("text") {
                println!("{indent}✎ steering: {text}");
            }
        }
        EventKind::Warning => {
            if let Some(message) = event.data_str("message") {
                eprintln!("{indent}⚠ {message}");
            }
        }
        EventKind::Interrupted => println!("{indent}✋ {who} interrupted"),
        EventKind::LearnMutation => {
            if let Some(mt) = event.data_str("mutation_type") {
                println!("{indent}✦ learn: {mt}");
            }
        }
        EventKind::SessionEnd => {
            let success = event.data.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
            let stumbles = event.data.get("stumbles").and_then(|v| v.as_u64()).unwrap_or(0);
            println!(
                "{indent}■ {who}: {} ({} stumbles)",
                if success { "done" } else { "failed" },
                stumbles
            );
        }
        _ => {}
    }
}
