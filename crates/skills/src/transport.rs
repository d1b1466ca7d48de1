//! Skill subprocess transport.
//!
//! Spawns a child process and speaks line-delimited JSON-RPC over its
//! stdin/stdout. A dedicated reader task routes responses, which may
//! arrive out of order, to per-id oneshot channels; unknown ids are
//! logged and dropped. Stderr is captured into a bounded ring buffer that
//! is attached to error telemetry but never mixed into tool output.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex, Notify, Semaphore};

use mimo_domain::config::SkillProviderConfig;

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Lines of stderr retained for error telemetry.
const STDERR_TAIL_LINES: usize = 64;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("skill process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("rejected argument: {0}")]
    RejectedArgument(String),
}

/// Screen a subprocess argument for shell-dangerous content. The config
/// loader already whitelists the executable; this is the last line.
pub fn screen_argument(arg: &str) -> Result<(), TransportError> {
    const FORBIDDEN: [&str; 7] = [";", "&", "|", "`", "$(", "\n", ".."];
    for pattern in FORBIDDEN {
        if arg.contains(pattern) {
            return Err(TransportError::RejectedArgument(format!(
                "argument contains forbidden sequence {pattern:?}"
            )));
        }
    }
    Ok(())
}

type PendingMap = Arc<SyncMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// One running skill subprocess.
#[derive(Debug)]
pub struct SkillTransport {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    /// Fired once when the reader observes EOF or the pipe breaks.
    died: Arc<Notify>,
    /// FIFO cap on concurrent in-flight calls.
    in_flight: Semaphore,
    stderr_tail: Arc<SyncMutex<VecDeque<String>>>,
}

impl SkillTransport {
    /// Spawn the subprocess and start its reader tasks. Argument screening
    /// happens in the supervisor before this is reached.
    pub fn spawn(config: &SkillProviderConfig, max_in_flight: usize) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stderr",
            ))
        })?;

        let pending: PendingMap = Arc::new(SyncMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let died = Arc::new(Notify::new());
        let stderr_tail = Arc::new(SyncMutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        // Reader: route each stdout line to the waiting caller by id.
        tokio::spawn(reader_loop(
            stdout,
            pending.clone(),
            alive.clone(),
            died.clone(),
            config.id.clone(),
        ));

        // Stderr capture: bounded tail, never mixed into output.
        {
            let tail = stderr_tail.clone();
            let skill_id = config.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(skill_id = %skill_id, line = %line, "skill stderr");
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            });
        }

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            died,
            in_flight: Semaphore::new(max_in_flight.max(1)),
            stderr_tail,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Wait until the reader observes the process dying.
    pub async fn wait_dead(&self) {
        let mut notified = std::pin::pin!(self.died.notified());
        notified.as_mut().enable();
        if !self.is_alive() {
            return;
        }
        notified.await;
    }

    /// Recent stderr lines for error telemetry.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    /// Send a request and wait for its response under `deadline`.
    ///
    /// Queueing for an in-flight slot is FIFO and also bounded by the
    /// deadline. On timeout the id is abandoned: a response arriving later
    /// is discarded by the reader.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<JsonRpcResponse, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }

        let started = tokio::time::Instant::now();
        let permit = tokio::time::timeout(deadline, self.in_flight.acquire())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::ProcessExited)?;
        let _permit = permit;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req)?;
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => {
                // Reader dropped the sender: process died.
                Err(TransportError::ProcessExited)
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::debug!(id, method, "skill call timed out, id abandoned");
                Err(TransportError::Timeout)
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let line = serde_json::to_string(&notif)?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Graceful shutdown: `shutdown` notification, wait up to `grace`,
    /// then kill.
    pub async fn shutdown(&self, grace: Duration) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.notify_raw_shutdown().await;

        let mut child = self.child.lock().await;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "skill process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for skill process");
            }
            Err(_) => {
                tracing::warn!("skill process did not exit within grace, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill skill process");
                }
            }
        }
    }

    /// Immediate kill (timeout-burst policy).
    pub async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "failed to kill skill process");
        }
    }

    async fn notify_raw_shutdown(&self) -> Result<(), TransportError> {
        // Bypasses the alive check: we just cleared it ourselves.
        let notif = JsonRpcNotification::new("shutdown");
        let line = serde_json::to_string(&notif)?;
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Reader task body: match response ids, drop unknowns, flag death on EOF.
async fn reader_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    died: Arc<Notify>,
    skill_id: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                    Ok(resp) => {
                        let sender = pending.lock().remove(&resp.id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(resp);
                            }
                            None => {
                                tracing::debug!(
                                    skill_id = %skill_id,
                                    id = resp.id,
                                    "response for unknown or abandoned id, dropped"
                                );
                            }
                        }
                    }
                    Err(_) => {
                        tracing::debug!(
                            skill_id = %skill_id,
                            line = %trimmed,
                            "non-response line from skill stdout, skipped"
                        );
                    }
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Fail anything still waiting.
    pending.lock().clear();
    died.notify_waiters();
    tracing::info!(skill_id = %skill_id, "skill stdout closed");
}
