//! Spawns agent processes and reports what they do as [`ProcessEvent`]s.
//!
//! Each spawn gets one event channel with one consumer. Stdout arrives as raw
//! chunks (framing is the decoder's job), stderr as lines. The watchdog and
//! the cancel token both end in SIGKILL; the exit is reported once, after the
//! output readers have drained.

use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::invocation::Invocation;
use crate::registry::ProcessHandle;

/// How long to wait for the output readers once the child is gone.
/// Grandchildren can keep a pipe open after the shell is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Exit status of `sh` when the command is not found.
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(Bytes),
    Stderr(String),
    /// The watchdog fired and the process is being killed.
    TimedOut(Duration),
    /// The process is gone. `code` is `None` when it died from a signal.
    Exited { code: Option<i32>, killed: bool },
}

impl ProcessEvent {
    /// Nonzero, signalled, or not found: a failed run unless we killed it.
    pub fn is_failure_exit(&self) -> bool {
        matches!(self, Self::Exited { code, killed: false } if *code != Some(0))
    }

    pub fn is_command_not_found(&self) -> bool {
        matches!(self, Self::Exited { code: Some(EXIT_COMMAND_NOT_FOUND), .. })
    }
}

pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Start `sh -c <command_line>` in the invocation's directory. Stdin is
    /// closed immediately.
    pub fn spawn(
        invocation: &Invocation,
        watchdog: Duration,
    ) -> Result<(ProcessHandle, mpsc::UnboundedReceiver<ProcessEvent>), EngineError> {
        let mut command = Command::new("sh");
        let _ = command
            .arg("-c")
            .arg(&invocation.command_line)
            .current_dir(&invocation.cwd)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("failed to spawn agent: {e}")))?;
        let pid = child.id();

        let (tx, rx) = mpsc::unbounded_channel();
        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump_stdout(out, tx.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_stderr(err, tx.clone())));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let _ = tokio::spawn(async move {
            let watchdog_sleep = tokio::time::sleep(watchdog);
            tokio::pin!(watchdog_sleep);
            let mut killed = false;

            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    _ = token.cancelled(), if !killed => {
                        debug!(?pid, "kill requested");
                        killed = true;
                        if let Err(e) = child.start_kill() {
                            warn!(?pid, error = %e, "failed to kill agent");
                        }
                    }
                    _ = &mut watchdog_sleep, if !killed => {
                        warn!(?pid, after_secs = watchdog.as_secs(), "watchdog expired, killing agent");
                        killed = true;
                        let _ = tx.send(ProcessEvent::TimedOut(watchdog));
                        if let Err(e) = child.start_kill() {
                            warn!(?pid, error = %e, "failed to kill agent");
                        }
                    }
                }
            };

            drain(stdout).await;
            drain(stderr).await;

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(?pid, error = %e, "failed to wait for agent");
                    None
                }
            };
            debug!(?pid, ?code, killed, "agent exited");
            let _ = tx.send(ProcessEvent::Exited { code, killed });
        });

        Ok((ProcessHandle { cancel, pid }, rx))
    }
}

async fn pump_stdout<R: AsyncRead + Unpin>(out: R, tx: mpsc::UnboundedSender<ProcessEvent>) {
    let mut chunks = ReaderStream::new(out);
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "stdout read failed");
                break;
            }
        };
        if tx.send(ProcessEvent::Stdout(chunk)).is_err() {
            break;
        }
    }
}

async fn pump_stderr<R: AsyncRead + Unpin>(err: R, tx: mpsc::UnboundedSender<ProcessEvent>) {
    let mut lines = BufReader::new(err).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(ProcessEvent::Stderr(line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stderr read failed");
                break;
            }
        }
    }
}

async fn drain(reader: Option<JoinHandle<()>>) {
    if let Some(handle) = reader {
        if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
            debug!("output reader still open after exit");
        }
    }
}
