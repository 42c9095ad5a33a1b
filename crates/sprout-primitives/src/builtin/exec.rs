// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::primitive::{ExecEnv, Primitive, PrimitiveResult};

/// Default wall-clock limit when the caller passes no `timeout_ms`.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Grace period between SIGTERM and SIGKILL when tearing a group down.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Exit code reported for cancelled commands (SIGINT convention).
const CANCEL_EXIT_CODE: i32 = 130;

pub struct ExecPrimitive;

#[async_trait]
impl Primitive for ExecPrimitive {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a command via a POSIX shell and return stdout, stderr, exit_code,\n\
         and duration_ms. timeout_ms defaults to 30000; 0 disables the timeout.\n\
         The command runs in its own process group and is killed on timeout or\n\
         cancellation. Prefer non-interactive commands; avoid anything that\n\
         needs a TTY. For large outputs pipe through tail or grep."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute (one-liner)"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Wall-clock limit in milliseconds (default 30000, 0 = none)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: &Value,
        env: &ExecEnv,
        cancel: &CancellationToken,
    ) -> PrimitiveResult {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return PrimitiveResult::fail("missing required parameter 'command'");
        };
        let timeout_ms = args
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        debug!(cmd = %command, timeout_ms, "exec");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(wd) = &env.workdir {
            cmd.current_dir(wd);
        }
        // setsid() detaches the child into its own session and process group,
        // so timeout/cancel can kill the whole group — including anything the
        // shell itself spawned.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return PrimitiveResult::fail(format!("spawn error: {e}")),
        };
        let pid = child.id();

        // Drain the pipes concurrently; the readers finish once the group dies
        // and the write ends close.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(p) = stdout_pipe.as_mut() {
                let _ = p.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(p) = stderr_pipe.as_mut() {
                let _ = p.read_to_end(&mut buf).await;
            }
            buf
        });

        enum Outcome {
            Exited(Option<i32>),
            TimedOut,
            Cancelled,
        }

        // The wait future borrows the child, so the group kill happens after
        // the select resolves, not inside an arm.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            status = child.wait() => Outcome::Exited(status.ok().and_then(|s| s.code())),
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)), if timeout_ms > 0 => {
                Outcome::TimedOut
            }
        };
        if !matches!(outcome, Outcome::Exited(_)) {
            kill_group(pid, &mut child).await;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        let (exit_code, timed_out, cancelled) = match outcome {
            Outcome::Exited(code) => (code.unwrap_or(-1), false, false),
            Outcome::TimedOut => (-1, true, false),
            Outcome::Cancelled => (CANCEL_EXIT_CODE, false, true),
        };

        let mut output = String::new();
        if !stdout.is_empty() {
            output.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str("[stderr]\n");
            output.push_str(&stderr);
        }
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("[exit_code: {exit_code}] [duration_ms: {duration_ms}]"));
        if timed_out {
            output.push_str(" [TIMED OUT]");
        }

        if exit_code == 0 && !timed_out && !cancelled {
            PrimitiveResult::ok(output)
        } else if cancelled {
            PrimitiveResult::fail_with_output(output, "cancelled")
        } else if timed_out {
            PrimitiveResult::fail_with_output(output, format!("timeout after {timeout_ms}ms"))
        } else {
            PrimitiveResult::fail_with_output(output, format!("exit code {exit_code}"))
        }
    }
}

/// Kill the child's whole process group: SIGTERM, then SIGKILL after a grace
/// period if it has not exited.
async fn kill_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn run(args: Value) -> PrimitiveResult {
        ExecPrimitive
            .execute(&args, &ExecEnv::default(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_zero() {
        let r = run(json!({"command": "echo hello"})).await;
        assert!(r.success, "{:?}", r.error);
        assert!(r.output.contains("hello"));
        assert!(r.output.contains("[exit_code: 0]"));
        assert!(r.output.contains("duration_ms"));
    }

    #[tokio::test]
    async fn captures_stderr_separately() {
        let r = run(json!({"command": "echo out && echo err >&2"})).await;
        assert!(r.output.contains("out"));
        assert!(r.output.contains("[stderr]"));
        assert!(r.output.contains("err"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_output() {
        let r = run(json!({"command": "echo partial && exit 3"})).await;
        assert!(!r.success);
        assert!(r.output.contains("partial"));
        assert!(r.output.contains("[exit_code: 3]"));
    }

    #[tokio::test]
    async fn timeout_kills_and_marks() {
        let start = Instant::now();
        let r = run(json!({"command": "sleep 30", "timeout_ms": 200})).await;
        assert!(!r.success);
        assert!(r.output.contains("[TIMED OUT]"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancel_kills_group_and_reports_130() {
        let cancel = CancellationToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            c2.cancel();
        });
        let start = Instant::now();
        let r = ExecPrimitive
            .execute(
                &json!({"command": "sleep 30", "timeout_ms": 0}),
                &ExecEnv::default(),
                &cancel,
            )
            .await;
        assert!(!r.success);
        assert!(r.output.contains("[exit_code: 130]"), "{}", r.output);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn workdir_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let env = ExecEnv { workdir: Some(dir.path().to_path_buf()), workspace: None };
        let r = ExecPrimitive
            .execute(&json!({"command": "pwd"}), &env, &CancellationToken::new())
            .await;
        assert!(r.output.contains(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn missing_command_is_failure() {
        let r = run(json!({})).await;
        assert!(!r.success);
    }
}
