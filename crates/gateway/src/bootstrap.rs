//! AppState construction shared by the `serve` and `stdio` commands:
//! validate config, snapshot the database, wire every subsystem, register
//! the tool surface, and bridge skill deaths into the registry.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use sha2::{Digest, Sha256};

use mimo_dispatch::{Dispatcher, FeedbackLoop, TelemetryRecorder, ToolRegistry};
use mimo_domain::config::{Config, ConfigSeverity};
use mimo_knowledge::KnowledgeGraph;
use mimo_memory::completer::{Analyzer, Completer, CompletionAnalyzer, HttpCompleter};
use mimo_memory::MemoryCore;
use mimo_router::MetaRouter;
use mimo_skills::SkillSupervisor;
use mimo_tools::code::CodeTool;
use mimo_tools::cognitive::CognitiveTool;
use mimo_tools::files::FileTool;
use mimo_tools::knowledge::KnowledgeTool;
use mimo_tools::memory::MemoryTool;
use mimo_tools::meta::MetaTool;
use mimo_tools::ops::{AutonomousTool, OnboardTool, OrchestrateTool};
use mimo_tools::reason::ReasonTool;
use mimo_tools::status::{AwakeningStatusTool, ToolUsageTool};
use mimo_tools::terminal::TerminalTool;
use mimo_tools::web::WebTool;

use crate::background::health::HealthMonitor;
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`]. Shared by `serve` and `stdio`.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Database snapshot (pre-migration safety copy) ────────────────
    if let Some(dir) = &config.snapshots.dir {
        snapshot_database(&config.memory.db_path, dir, config.snapshots.retention_days)
            .context("database snapshot")?;
    }
    if let Some(parent) = config.memory.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating data directory")?;
        }
    }
    std::fs::create_dir_all(&config.sandbox.root).context("creating sandbox root")?;

    // ── Providers ────────────────────────────────────────────────────
    let completer: Option<Arc<dyn Completer>> = config
        .memory
        .completion_url
        .as_ref()
        .map(|url| Arc::new(HttpCompleter::new(url)) as Arc<dyn Completer>);
    let analyzer: Option<Arc<dyn Analyzer>> =
        match (&config.memory.completion_url, config.features.analyzer) {
            (Some(url), true) => Some(
                Arc::new(CompletionAnalyzer::new(HttpCompleter::new(url))) as Arc<dyn Analyzer>,
            ),
            _ => None,
        };

    // ── Memory core & knowledge graph ────────────────────────────────
    let memory = Arc::new(
        MemoryCore::open(
            &config.memory,
            analyzer.clone(),
            config.features.approximate_index,
            config.features.temporal_chains,
        )
        .context("opening memory core")?,
    );
    tracing::info!(
        path = %config.memory.db_path.display(),
        count = memory.count().unwrap_or(0),
        "memory core ready"
    );

    let graph = Arc::new(
        KnowledgeGraph::open(&config.memory.db_path).context("opening knowledge graph")?,
    );

    // ── Skill supervisor & registry ──────────────────────────────────
    let supervisor = SkillSupervisor::new(config.skills.clone());
    let registry = Arc::new(ToolRegistry::new(supervisor.clone()));
    registry.reload_skills(&config.skills.providers);

    // Bridge observed skill deaths into the registry, exactly once each.
    {
        let registry = registry.clone();
        let mut deaths = supervisor.subscribe_deaths();
        tokio::spawn(async move {
            while let Some(death) = deaths.recv().await {
                tracing::debug!(skill_id = %death.skill_id, "processing skill death");
                registry.on_skill_death(&death.skill_id);
            }
        });
    }

    // ── Dispatch fabric ──────────────────────────────────────────────
    let feedback = Arc::new(FeedbackLoop::new());
    let telemetry = Arc::new(TelemetryRecorder::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        supervisor.clone(),
        feedback.clone(),
        telemetry.clone(),
        memory.clone(),
    ));
    let router = Arc::new(MetaRouter::new(analyzer, feedback.clone()));

    // ── Internal tool surface ────────────────────────────────────────
    registry
        .register_internal(Arc::new(MemoryTool::new(memory.clone())))
        .context("registering memory tool")?;
    registry
        .register_internal(Arc::new(CognitiveTool::new(memory.working())))
        .context("registering cognitive tool")?;
    registry
        .register_internal(Arc::new(FileTool::new(config.sandbox.root.clone())))
        .context("registering file tool")?;
    registry
        .register_internal(Arc::new(TerminalTool::new(
            config.skills.command_whitelist.clone(),
            config.sandbox.root.clone(),
        )))
        .context("registering terminal tool")?;
    registry
        .register_internal(Arc::new(WebTool::new()))
        .context("registering web tool")?;
    registry
        .register_internal(Arc::new(CodeTool::new(config.sandbox.root.clone())))
        .context("registering code tool")?;
    registry
        .register_internal(Arc::new(ReasonTool::new(completer.clone())))
        .context("registering reason tool")?;
    registry
        .register_internal(Arc::new(KnowledgeTool::new(graph.clone())))
        .context("registering knowledge tool")?;
    registry
        .register_internal(Arc::new(MetaTool::new(memory.store_handle(), feedback.clone())))
        .context("registering meta tool")?;
    registry
        .register_internal(Arc::new(OnboardTool::new(memory.clone(), graph.clone())))
        .context("registering onboard tool")?;
    registry
        .register_internal(Arc::new(AutonomousTool::new(completer.clone())))
        .context("registering autonomous tool")?;
    registry
        .register_internal(Arc::new(OrchestrateTool::new(dispatcher.clone())))
        .context("registering orchestrate tool")?;
    registry
        .register_internal(Arc::new(AwakeningStatusTool::new(
            memory.clone(),
            graph.clone(),
            supervisor.clone(),
            telemetry.clone(),
        )))
        .context("registering awakening_status tool")?;
    registry
        .register_internal(Arc::new(ToolUsageTool::new(
            feedback.clone(),
            telemetry.clone(),
        )))
        .context("registering tool_usage tool")?;
    tracing::info!(tools = registry.len(), "tool surface registered");

    // ── API key (read once, hashed) ──────────────────────────────────
    let api_key_hash = match std::env::var(&config.server.api_key_env) {
        Ok(key) if !key.is_empty() => Some(Sha256::digest(key.as_bytes()).to_vec()),
        _ if config.server.production => {
            anyhow::bail!(
                "production mode requires the {} environment variable",
                config.server.api_key_env
            );
        }
        _ => {
            tracing::warn!(
                env = %config.server.api_key_env,
                "no API key configured, running unauthenticated (dev mode)"
            );
            None
        }
    };

    Ok(AppState {
        config,
        memory,
        graph,
        completer,
        supervisor,
        registry,
        dispatcher,
        router,
        feedback,
        telemetry,
        health: Arc::new(HealthMonitor::new()),
        api_key_hash,
        started_at: Instant::now(),
    })
}

/// Copy the database into the snapshot directory with a timestamped name
/// and prune copies past the retention window.
fn snapshot_database(db_path: &Path, dir: &Path, retention_days: u32) -> anyhow::Result<()> {
    if !db_path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;

    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let name = db_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("mimo.db");
    let target = dir.join(format!("{stamp}-{name}"));
    std::fs::copy(db_path, &target)?;
    tracing::info!(snapshot = %target.display(), "database snapshot taken");

    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(u64::from(retention_days) * 24 * 3600);
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            if modified < cutoff {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
    Ok(())
}
