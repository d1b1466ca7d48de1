//! Skill supervisor: lazy subprocess lifecycle.
//!
//! Skills start as config-only entries. The first call spawns the
//! subprocess (blocking that caller only for the handshake), later calls
//! share the running transport. Observed deaths atomically downgrade the
//! entry back to unstarted and are broadcast so the tool registry can
//! react. A burst of call timeouts kills the child.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex as SyncMutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;

use mimo_domain::config::{SkillProviderConfig, SkillsConfig};
use mimo_domain::error::{Error, Result};

use crate::protocol::{SkillToolDef, ToolsListResult};
use crate::transport::{screen_argument, SkillTransport, TransportError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const TIMEOUT_BURST_LIMIT: usize = 5;
const TIMEOUT_BURST_WINDOW: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Broadcast when a running skill's termination is observed.
#[derive(Debug, Clone)]
pub struct SkillDeath {
    pub skill_id: String,
    pub generation: u64,
}

/// One running subprocess behind a skill id.
#[derive(Debug)]
pub struct RunningSkill {
    pub generation: u64,
    transport: SkillTransport,
    timeouts: SyncMutex<VecDeque<Instant>>,
}

impl RunningSkill {
    /// Record one call timeout; true when the burst limit is hit.
    fn note_timeout(&self) -> bool {
        let now = Instant::now();
        let mut timeouts = self.timeouts.lock();
        timeouts.push_back(now);
        while let Some(first) = timeouts.front() {
            if now.duration_since(*first) > TIMEOUT_BURST_WINDOW {
                timeouts.pop_front();
            } else {
                break;
            }
        }
        timeouts.len() >= TIMEOUT_BURST_LIMIT
    }
}

struct SkillEntry {
    config: SkillProviderConfig,
    running: Option<Arc<RunningSkill>>,
}

struct Inner {
    settings: SkillsConfig,
    entries: RwLock<HashMap<String, SkillEntry>>,
    /// Serializes spawning so concurrent first-callers share one child.
    spawn_lock: tokio::sync::Mutex<()>,
    running_count: AtomicUsize,
    failed_count: AtomicUsize,
    generation: AtomicU64,
    death_subscribers: SyncMutex<Vec<mpsc::UnboundedSender<SkillDeath>>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct SkillSupervisor {
    inner: Arc<Inner>,
}

impl SkillSupervisor {
    pub fn new(settings: SkillsConfig) -> Self {
        let entries = settings
            .providers
            .iter()
            .map(|config| {
                (
                    config.id.clone(),
                    SkillEntry {
                        config: config.clone(),
                        running: None,
                    },
                )
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                settings,
                entries: RwLock::new(entries),
                spawn_lock: tokio::sync::Mutex::new(()),
                running_count: AtomicUsize::new(0),
                failed_count: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                death_subscribers: SyncMutex::new(Vec::new()),
            }),
        }
    }

    /// Receive a notification for every observed skill death.
    pub fn subscribe_deaths(&self) -> mpsc::UnboundedReceiver<SkillDeath> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.death_subscribers.lock().push(tx);
        rx
    }

    pub fn known_skills(&self) -> Vec<SkillProviderConfig> {
        self.inner
            .entries
            .read()
            .values()
            .map(|e| e.config.clone())
            .collect()
    }

    pub fn is_running(&self, skill_id: &str) -> bool {
        self.inner
            .entries
            .read()
            .get(skill_id)
            .and_then(|e| e.running.as_ref())
            .map(|r| r.transport.is_alive())
            .unwrap_or(false)
    }

    pub fn has_config(&self, skill_id: &str) -> bool {
        self.inner.entries.read().contains_key(skill_id)
    }

    pub fn running_count(&self) -> usize {
        self.inner.running_count.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> usize {
        self.inner.failed_count.load(Ordering::Relaxed)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Idempotent start. Running skills return the existing reference;
    /// otherwise the caller blocks for spawn + handshake only.
    pub async fn ensure_started(&self, skill_id: &str) -> Result<Arc<RunningSkill>> {
        if let Some(running) = self.alive_handle(skill_id) {
            return Ok(running);
        }

        let _guard = self.inner.spawn_lock.lock().await;
        // A concurrent caller may have spawned while we waited.
        if let Some(running) = self.alive_handle(skill_id) {
            return Ok(running);
        }

        let config = {
            let entries = self.inner.entries.read();
            let entry = entries
                .get(skill_id)
                .ok_or_else(|| Error::SkillUnavailable(format!("unknown skill '{skill_id}'")))?;
            entry.config.clone()
        };

        // Re-validate at the spawn boundary even though the config loader
        // already checked: defense against config mutation paths.
        self.inner
            .settings
            .check_command(&config.command)
            .map_err(Error::SkillUnavailable)?;
        for arg in &config.args {
            screen_argument(arg).map_err(|e| Error::SkillUnavailable(e.to_string()))?;
        }

        if self.inner.running_count.load(Ordering::Relaxed) >= self.inner.settings.max_processes {
            return Err(Error::SkillUnavailable(format!(
                "subprocess cap ({}) reached",
                self.inner.settings.max_processes
            )));
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(skill_id = %skill_id, generation, command = %config.command, "spawning skill");

        let transport = SkillTransport::spawn(&config, self.inner.settings.max_in_flight)
            .map_err(|e| Error::SkillUnavailable(format!("spawn {skill_id}: {e}")))?;

        // Handshake: the skill must answer `initialize` before serving.
        let init = transport
            .call(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "clientInfo": { "name": "mimo", "version": env!("CARGO_PKG_VERSION") },
                })),
                HANDSHAKE_TIMEOUT,
            )
            .await;
        if let Err(e) = init {
            transport.kill().await;
            return Err(Error::SkillUnavailable(format!(
                "handshake with {skill_id} failed: {e}"
            )));
        }

        let running = Arc::new(RunningSkill {
            generation,
            transport,
            timeouts: SyncMutex::new(VecDeque::new()),
        });

        {
            let mut entries = self.inner.entries.write();
            if let Some(entry) = entries.get_mut(skill_id) {
                entry.running = Some(running.clone());
            }
        }
        self.inner.running_count.fetch_add(1, Ordering::Relaxed);

        // Death watch: downgrade the entry and notify subscribers exactly
        // once when this generation's process dies.
        let supervisor = self.clone();
        let watch_id = skill_id.to_string();
        let watched = running.clone();
        tokio::spawn(async move {
            watched.transport.wait_dead().await;
            supervisor.on_death(&watch_id, watched.generation);
        });

        Ok(running)
    }

    fn alive_handle(&self, skill_id: &str) -> Option<Arc<RunningSkill>> {
        let entries = self.inner.entries.read();
        let running = entries.get(skill_id)?.running.as_ref()?;
        if running.transport.is_alive() {
            Some(running.clone())
        } else {
            None
        }
    }

    fn on_death(&self, skill_id: &str, generation: u64) {
        let mut entries = self.inner.entries.write();
        let Some(entry) = entries.get_mut(skill_id) else {
            return;
        };
        let Some(running) = &entry.running else {
            return;
        };
        if running.generation != generation {
            // A newer process already replaced this generation.
            return;
        }
        let stderr = running.transport.stderr_tail();
        entry.running = None;
        drop(entries);

        self.inner.running_count.fetch_sub(1, Ordering::Relaxed);
        self.inner.failed_count.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            skill_id = %skill_id,
            generation,
            stderr_lines = stderr.len(),
            "skill process died"
        );
        if !stderr.is_empty() {
            tracing::debug!(skill_id = %skill_id, stderr = ?stderr, "skill stderr tail");
        }

        let death = SkillDeath {
            skill_id: skill_id.to_string(),
            generation,
        };
        self.inner
            .death_subscribers
            .lock()
            .retain(|tx| tx.send(death.clone()).is_ok());
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Invoke a tool on a skill, spawning it first when needed. Calls to
    /// the same subprocess queue FIFO behind its in-flight cap.
    pub async fn call_tool(
        &self,
        skill_id: &str,
        tool_name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let running = self.ensure_started(skill_id).await?;
        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });

        match running.transport.call("tools/call", Some(params), deadline).await {
            Ok(resp) => resp.into_result().map_err(|e| {
                Error::Internal(format!("skill {skill_id} returned error {}: {}", e.code, e.message))
            }),
            Err(TransportError::Timeout) => {
                if running.note_timeout() {
                    tracing::warn!(
                        skill_id = %skill_id,
                        "timeout burst limit hit, killing skill process"
                    );
                    running.transport.kill().await;
                }
                Err(Error::Timeout(format!("skill {skill_id} call to {tool_name}")))
            }
            Err(TransportError::ProcessExited) => {
                Err(Error::SkillUnavailable(format!("skill {skill_id} exited")))
            }
            Err(e) => Err(Error::SkillUnavailable(format!("skill {skill_id}: {e}"))),
        }
    }

    /// Fetch the skill's own tool descriptors (post-handshake).
    pub async fn discover_tools(&self, skill_id: &str) -> Result<Vec<SkillToolDef>> {
        let running = self.ensure_started(skill_id).await?;
        let resp = running
            .transport
            .call("tools/list", None, HANDSHAKE_TIMEOUT)
            .await
            .map_err(|e| Error::SkillUnavailable(format!("tools/list on {skill_id}: {e}")))?;
        let value = resp
            .into_result()
            .map_err(|e| Error::SkillUnavailable(format!("tools/list on {skill_id}: {e}")))?;
        let parsed: ToolsListResult = serde_json::from_value(value)
            .map_err(|e| Error::SkillUnavailable(format!("tools/list on {skill_id}: {e}")))?;
        Ok(parsed.tools)
    }

    /// Kill one skill's process immediately. The entry downgrades to
    /// unstarted through the normal death watch.
    pub async fn kill(&self, skill_id: &str) {
        let running = self.alive_handle(skill_id);
        if let Some(running) = running {
            running.transport.kill().await;
        }
    }

    /// Graceful shutdown of one skill.
    pub async fn shutdown(&self, skill_id: &str, grace: Duration) {
        let running = {
            let mut entries = self.inner.entries.write();
            entries.get_mut(skill_id).and_then(|e| e.running.take())
        };
        if let Some(running) = running {
            running.transport.shutdown(grace).await;
        }
    }

    /// Shut down every running skill concurrently (drain for hot reload
    /// or exit).
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.inner.entries.read().keys().cloned().collect();
        let futs: Vec<_> = ids
            .iter()
            .map(|id| self.shutdown(id, SHUTDOWN_GRACE))
            .collect();
        futures_util::future::join_all(futs).await;
    }
}
