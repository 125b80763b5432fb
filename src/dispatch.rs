//! Dispatcher (spec §4.F): runs a handler's expanded command as a host-shell
//! subprocess under a bounded worker pool, never propagating an error to the
//! caller — every outcome, including launch failure, becomes a
//! [`DispatchRecord`].
//!
//! Concurrency bound follows the semaphore-gated-task shape of
//! `local_fanout.rs`'s per-consumer spawn, generalized from "one task per TCP
//! consumer" to "one task per in-flight subprocess".

use crate::model::{DispatchRecord, Event, HandlerConfig, Outcome};
use crate::template::expand;
use chrono::Utc;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, warn};

/// Per-stream output cap (spec §4.F: "e.g. 64 KiB; excess is dropped with a marker").
const OUTPUT_CAP_BYTES: usize = 64 * 1024;
const TRUNCATION_MARKER: &str = "...[truncated]";

/// Grace period between SIGTERM and SIGKILL on timeout (spec §4.F step 5).
const KILL_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

pub struct Dispatcher {
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// `concurrency` is the bounded worker pool size (spec §4.F default 4,
    /// configurable).
    pub fn new(concurrency: usize) -> Self {
        Dispatcher { semaphore: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Run `handler`'s command against `event`. Awaits a pool slot, then
    /// expands the template, launches `sh -c "<command>"`, and enforces
    /// `handler.timeout`. The semaphore slot is released on every exit path.
    pub async fn dispatch(&self, handler: &HandlerConfig, event: &Event) -> DispatchRecord {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");

        let command = expand(&handler.command, event);
        let started_at = Utc::now();

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(handler = %handler.name, error = %e, "failed to launch handler command");
                return DispatchRecord {
                    remote_id: event.remote_id,
                    handler_name: handler.name.clone(),
                    outcome: Outcome::Failure,
                    exit_status: None,
                    stdout: String::new(),
                    stderr: format!("launch failed: {e}"),
                    started_at,
                    ended_at: Utc::now(),
                };
            }
        };

        let pid = child.id();
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let run = async {
            tokio::join!(
                read_capped(&mut stdout_pipe),
                read_capped(&mut stderr_pipe),
                child.wait(),
            )
        };

        match timeout(handler.timeout, run).await {
            Ok((stdout, stderr, status)) => {
                let ended_at = Utc::now();
                match status {
                    Ok(status) => {
                        let outcome = if status.success() { Outcome::Success } else { Outcome::Failure };
                        info!(
                            handler = %handler.name,
                            remote_id = event.remote_id,
                            outcome = outcome.as_str(),
                            "handler dispatch completed"
                        );
                        DispatchRecord {
                            remote_id: event.remote_id,
                            handler_name: handler.name.clone(),
                            outcome,
                            exit_status: status.code(),
                            stdout,
                            stderr,
                            started_at,
                            ended_at,
                        }
                    }
                    Err(e) => DispatchRecord {
                        remote_id: event.remote_id,
                        handler_name: handler.name.clone(),
                        outcome: Outcome::Failure,
                        exit_status: None,
                        stdout,
                        stderr: format!("{stderr}\nwait failed: {e}"),
                        started_at,
                        ended_at,
                    },
                }
            }
            Err(_) => {
                warn!(handler = %handler.name, remote_id = event.remote_id, "handler dispatch timed out");
                terminate(pid).await;
                let exit_status = match child.wait().await {
                    Ok(status) => status.code().or_else(|| status.signal().map(|sig| 128 + sig)),
                    Err(_) => None,
                };
                DispatchRecord {
                    remote_id: event.remote_id,
                    handler_name: handler.name.clone(),
                    outcome: Outcome::Timeout,
                    exit_status,
                    stdout: String::new(),
                    stderr: "handler exceeded its timeout".to_owned(),
                    started_at,
                    ended_at: Utc::now(),
                }
            }
        }
    }
}

/// SIGTERM the process, wait a grace period, then SIGKILL if it's still alive
/// (spec §4.F step 5). `tokio::process::Child::kill()` only sends SIGKILL, so
/// SIGTERM goes out via `libc::kill` directly.
async fn terminate(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        tokio::time::sleep(KILL_GRACE).await;
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(pipe: &mut Option<R>) -> String {
    let Some(pipe) = pipe else { return String::new() };
    let mut buf = Vec::with_capacity(OUTPUT_CAP_BYTES.min(4096));
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < OUTPUT_CAP_BYTES {
                    let remaining = OUTPUT_CAP_BYTES - buf.len();
                    buf.extend_from_slice(&chunk[..n.min(remaining)]);
                }
            }
            Err(_) => break,
        }
    }
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    if buf.len() >= OUTPUT_CAP_BYTES {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handler(name: &str, command: &str, timeout_secs: u64) -> HandlerConfig {
        HandlerConfig {
            name: name.to_owned(),
            event_type: "check_run".to_owned(),
            action: String::new(),
            command: command.to_owned(),
            filters: vec![],
            timeout: Duration::from_secs(timeout_secs),
            enabled: true,
        }
    }

    fn event() -> Event {
        Event {
            remote_id: 42,
            repo: "o/r".to_owned(),
            event_type: "check_run".to_owned(),
            action: "completed".to_owned(),
            ref_name: None,
            actor: None,
            summary: String::new(),
            payload: serde_json::json!({}),
            delivery_id: "d1".to_owned(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_command_yields_success_outcome() {
        let dispatcher = Dispatcher::new(4);
        let record = dispatcher.dispatch(&handler("h1", "echo hello", 5), &event()).await;
        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.exit_status, Some(0));
        assert!(record.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_yields_failure_outcome() {
        let dispatcher = Dispatcher::new(4);
        let record = dispatcher.dispatch(&handler("h1", "exit 3", 5), &event()).await;
        assert_eq!(record.outcome, Outcome::Failure);
        assert_eq!(record.exit_status, Some(3));
    }

    #[tokio::test]
    async fn unknown_command_yields_failure_via_nonzero_exit() {
        let dispatcher = Dispatcher::new(4);
        let record = dispatcher
            .dispatch(&handler("h1", "definitely-not-a-real-command-xyz", 5), &event())
            .await;
        assert_eq!(record.outcome, Outcome::Failure);
        assert_ne!(record.exit_status, Some(0));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dispatcher = Dispatcher::new(4);
        let record = dispatcher.dispatch(&handler("h1", "sleep 5", 1), &event()).await;
        assert_eq!(record.outcome, Outcome::Timeout);
        // Killed by signal (SIGTERM, since `sleep` doesn't trap it), recorded
        // as the conventional 128+signo exit status rather than discarded.
        assert_eq!(record.exit_status, Some(128 + libc::SIGTERM));
    }

    #[tokio::test]
    async fn template_is_expanded_before_launch() {
        let dispatcher = Dispatcher::new(4);
        let record = dispatcher.dispatch(&handler("h1", "echo {{repo}}", 5), &event()).await;
        assert!(record.stdout.contains("o/r"));
    }
}
