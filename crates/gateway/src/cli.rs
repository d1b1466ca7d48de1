//! Command-line interface and config loading.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use mimo_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "mimo", version, about = "Memory-and-tool gateway for LLM agents")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "mimo.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP gateway (default).
    Serve,
    /// Speak JSON-RPC over stdin/stdout (MCP server mode).
    Stdio,
    /// Config utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and exit (0 valid, 2 invalid).
    Validate,
}

/// Load the config file; a missing file yields defaults.
pub fn load_config(path: &PathBuf) -> anyhow::Result<Arc<Config>> {
    let config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };
    Ok(Arc::new(config))
}

/// Validate and report; returns whether the config is usable.
pub fn validate(config: &Config, path: &PathBuf) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}
