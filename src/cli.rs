// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "sprout",
    about = "A self-improving hierarchical AI agent runtime",
    version
)]
pub struct Cli {
    /// Explicit config file (searched locations are used otherwise)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Genome directory override (also: SPROUT_GENOME_DIR)
    #[arg(long, global = true)]
    pub genome_dir: Option<PathBuf>,

    /// Verbose tracing to stderr (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a goal to the root agent and stream events
    Run {
        /// The goal to accomplish
        goal: String,
        /// Model selector override: fast | good | best | provider:model-id
        #[arg(long)]
        model: Option<String>,
        /// Provider override: anthropic | openai | gemini | mock
        #[arg(long)]
        provider: Option<String>,
        /// Root agent name (default from config, usually "root")
        #[arg(long)]
        agent: Option<String>,
        /// Disable the Learn process for this session
        #[arg(long)]
        no_learn: bool,
        /// Print raw JSONL events instead of the human-readable stream
        #[arg(long)]
        json: bool,
    },
    /// Resume from a prior session log and submit a new goal
    Resume {
        /// Path to the session's JSONL event log
        log: PathBuf,
        /// The follow-up goal
        goal: String,
        #[arg(long)]
        json: bool,
    },
    /// List providers with API keys available in the environment
    ListProviders,
    /// Genome maintenance
    Genome {
        #[command(subcommand)]
        command: GenomeCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum GenomeCommands {
    /// Create the genome layout and git repository (idempotent)
    Init,
    /// Add missing bootstrap agents from a directory of spec YAMLs
    Sync {
        /// Directory of bootstrap agent specs
        dir: PathBuf,
    },
    /// Show agents, memories, and routing rules
    Show,
    /// Remove low-confidence memories
    Prune {
        /// Confidence threshold; memories below it are removed
        #[arg(long, default_value_t = 0.2)]
        min_confidence: f64,
    },
}
