use std::sync::Arc;
use std::time::Instant;

use mimo_dispatch::{Dispatcher, FeedbackLoop, TelemetryRecorder, ToolRegistry};
use mimo_domain::config::Config;
use mimo_knowledge::KnowledgeGraph;
use mimo_memory::completer::Completer;
use mimo_memory::MemoryCore;
use mimo_router::MetaRouter;
use mimo_skills::SkillSupervisor;

use crate::background::health::HealthMonitor;

/// Shared application state passed to both frontends and every API
/// handler.
///
/// Fields group by concern:
/// - **Core services**: config, memory, knowledge graph
/// - **Dispatch fabric**: supervisor, registry, dispatcher, router
/// - **Observability**: feedback, telemetry, health
/// - **Security (startup-computed)**: API key hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub memory: Arc<MemoryCore>,
    pub graph: Arc<KnowledgeGraph>,
    /// Synthesis endpoint; `None` disables synthesis in `/v1/ask` and the
    /// chat adapter.
    pub completer: Option<Arc<dyn Completer>>,

    // ── Dispatch fabric ───────────────────────────────────────────────
    pub supervisor: SkillSupervisor,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<MetaRouter>,

    // ── Observability ─────────────────────────────────────────────────
    pub feedback: Arc<FeedbackLoop>,
    pub telemetry: Arc<TelemetryRecorder>,
    pub health: Arc<HealthMonitor>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer key (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_key_hash: Option<Vec<u8>>,

    pub started_at: Instant,
}
