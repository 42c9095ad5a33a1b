// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::{EventKind, EventLog, SessionEvent};

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; pass back to `unsubscribe`.
#[derive(Debug)]
pub struct Subscription(u64);

struct Inner {
    listeners: Vec<(u64, Listener)>,
    buffer: Vec<SessionEvent>,
    next_id: u64,
}

/// Process-wide fan-out channel for session events.
///
/// `emit` is synchronous and non-blocking: it invokes every current
/// subscriber in registration order, appends the event to the collected
/// buffer, and queues the JSONL line on the log's write chain (when a log
/// file is set).  The listener list and buffer share one short critical
/// section, so the buffer is a prefix-complete record of everything any
/// subscriber saw, in emission order.
///
/// Listeners must not call back into the bus; hand work to a channel instead.
pub struct EventBus {
    inner: Mutex<Inner>,
    log: Mutex<Option<EventLog>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { listeners: Vec::new(), buffer: Vec::new(), next_id: 0 }),
            log: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, f: impl Fn(&SessionEvent) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(f)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(id, _)| *id != sub.0);
    }

    /// Emit one event: fan out to subscribers, record, and log.
    pub fn emit(&self, kind: EventKind, agent_id: &str, depth: u32, data: Value) -> SessionEvent {
        let event = SessionEvent::new(kind, agent_id, depth, data);
        {
            let mut inner = self.inner.lock().unwrap();
            for (_, listener) in &inner.listeners {
                listener(&event);
            }
            inner.buffer.push(event.clone());
        }
        if let Some(log) = self.log.lock().unwrap().as_ref() {
            log.append(&event);
        }
        event
    }

    /// Every event emitted so far, in emission order.
    pub fn collected(&self) -> Vec<SessionEvent> {
        self.inner.lock().unwrap().buffer.clone()
    }

    /// Install a JSONL log file; subsequent events are appended in emission
    /// order.  Replaces any previously configured log.
    pub fn set_log_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let log = EventLog::create(path.as_ref())?;
        *self.log.lock().unwrap() = Some(log);
        Ok(())
    }

    /// Wait for the log write chain to drain.  No-op without a log file.
    ///
    /// The log handle is cloned out of the lock so the critical section is
    /// never held across an await point.
    pub async fn flush(&self) {
        let log = self.log.lock().unwrap().clone();
        if let Some(log) = log {
            log.flush().await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
