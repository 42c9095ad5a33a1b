// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::SessionEvent;

enum WriteMsg {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Append-only JSONL event log backed by a dedicated writer task.
///
/// Appends are chained through an in-order channel so that file order equals
/// append order.  Write errors are swallowed (with a `warn!`) — logging must
/// never fail the agent loop.  `flush` round-trips a marker through the
/// channel and resolves once everything queued before it is on disk.
///
/// Clones share the same writer task and file.
#[derive(Clone)]
pub struct EventLog {
    tx: mpsc::UnboundedSender<WriteMsg>,
    path: PathBuf,
}

impl EventLog {
    /// Open (or create) the log file and start the writer task.
    /// Parent directories are created as needed.
    pub fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(path.clone(), rx));
        Ok(Self { tx, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue one event for appending.  Non-blocking; errors are swallowed.
    pub fn append(&self, event: &SessionEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                let _ = self.tx.send(WriteMsg::Line(line));
            }
            Err(e) => warn!(error = %e, "failed to serialize event for log"),
        }
    }

    /// Wait until every append queued before this call has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriteMsg>) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open event log; entries will be dropped");
            None
        }
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            WriteMsg::Line(line) => {
                if let Some(f) = file.as_mut() {
                    let mut buf = line.into_bytes();
                    buf.push(b'\n');
                    if let Err(e) = f.write_all(&buf).await {
                        warn!(path = %path.display(), error = %e, "event log write failed");
                    }
                }
            }
            WriteMsg::Flush(ack) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush().await;
                }
                let _ = ack.send(());
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::EventKind;

    fn event(kind: EventKind, n: u32) -> SessionEvent {
        SessionEvent::new(kind, "a", 0, json!({"n": n}))
    }

    #[tokio::test]
    async fn appends_are_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let log = EventLog::create(&path).unwrap();
        for n in 0..50 {
            log.append(&event(EventKind::Perceive, n));
        }
        log.flush().await;

        let text = std::fs::read_to_string(&path).unwrap();
        let ns: Vec<u64> = text
            .lines()
            .map(|l| serde_json::from_str::<SessionEvent>(l).unwrap())
            .map(|e| e.data["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, (0..50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/log.jsonl");
        let log = EventLog::create(&path).unwrap();
        log.append(&event(EventKind::SessionStart, 1));
        log.flush().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn flush_on_empty_log_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::create(dir.path().join("x.jsonl")).unwrap();
        log.flush().await; // must not hang
    }
}
