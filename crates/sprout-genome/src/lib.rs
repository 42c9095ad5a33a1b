// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bootstrap;
mod git;
mod memory;
mod recall;
mod routing;
mod spec;
mod store;

pub use bootstrap::{default_specs, seed_defaults};
pub use memory::{Memory, MemorySource};
pub use recall::{recall, RecallResult, DEFAULT_RECALL_K};
pub use routing::RoutingRule;
pub use spec::{AgentSpec, Constraints};
pub use store::{AgentTool, GenomeStore, DEFAULT_PRUNE_CONFIDENCE};
