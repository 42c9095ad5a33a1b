// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod controller;
mod learn;
mod prompts;
mod replay;
mod verify;


pub use agent::{Agent, AgentServices, SteeringHandle};
pub use controller::{SessionController, SessionRun};
pub use learn::{
    LearnProcess, Mutation, PendingEvaluation, HARMFUL_DELTA, MIN_ACTIONS_FOR_EVALUATION,
};
pub use replay::replay_event_log;
pub use verify::{
    detect_retries, verify_act, verify_primitive, ActResult, LearnSignal, SignalKind,
    VerifyResult, INEFFICIENCY_TURN_THRESHOLD,
};
