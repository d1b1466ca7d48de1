use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mimo_gateway::api;
use mimo_gateway::background;
use mimo_gateway::bootstrap::build_app_state;
use mimo_gateway::cli::{Cli, Command, ConfigCommand};
use mimo_gateway::state::AppState;
use mimo_gateway::stdio;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing(false);
            let config = mimo_gateway::cli::load_config(&cli.config)?;
            if !mimo_gateway::cli::validate(&config, &cli.config) {
                std::process::exit(2);
            }
            let state = build_app_state(config).await?;
            background::spawn_loops(&state);
            run_server(state).await
        }
        Some(Command::Stdio) => {
            // Stdout is the protocol channel; all logging goes to stderr.
            init_tracing(true);
            let config = mimo_gateway::cli::load_config(&cli.config)?;
            if !mimo_gateway::cli::validate(&config, &cli.config) {
                std::process::exit(2);
            }
            let state = build_app_state(config).await?;
            background::spawn_loops(&state);
            stdio::run(state.clone()).await?;
            state_shutdown(&state).await;
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = mimo_gateway::cli::load_config(&cli.config)?;
            if !mimo_gateway::cli::validate(&config, &cli.config) {
                std::process::exit(2);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("mimo {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing. The stdio frontend logs to stderr in
/// plain format; the HTTP server logs JSON to stdout.
fn init_tracing(stderr_only: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mimo_gateway=debug"));
    if stderr_only {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}

async fn run_server(state: AppState) -> anyhow::Result<()> {
    let config = state.config.clone();

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = config.server.max_concurrent_requests;

    // ── Rate-limit layer (per-IP token bucket via governor) ─────────
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled");
    }

    // ── Router ───────────────────────────────────────────────────────
    let router = api::router(state.clone())
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state)
    } else {
        router.with_state(state)
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "mimo gateway listening");

    // Peer addresses are required by the per-IP rate limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;
    Ok(())
}

/// Drain external skills on clean stdio exit.
async fn state_shutdown(state: &AppState) {
    state.supervisor.shutdown_all().await;
}
