//! Operator CLI: configuration checks and durable-queue maintenance.
//!
//! Exit codes: 0 ok, 1 error, 2 config file missing.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use arkiv_config::{Config, LoadError};
use arkiv_core::clock::SystemClock;
use arkiv_core::queue::{HistoryLog, RedisStreams, drain_dlq, queue_stats};

#[derive(Parser, Debug)]
#[command(name = "arkivctl")]
#[command(about = "arkiv ticket archiver CLI utilities")]
struct Cli {
    /// Path to the YAML config file (overrides ARKIV_CONFIG)
    #[arg(long, env = "ARKIV_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and exit
    ValidateConfig,
    /// Dump configuration as JSON (secrets redacted)
    DumpConfig,
    /// Show deprecated environment variables in use
    ShowDeprecated,
    /// Show durable queue statistics
    QueueStats,
    /// Delete entries from the dead-letter queue
    QueueDrainDlq {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Read recent processing history
    QueueHistory {
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        ticket_id: Option<u64>,
    },
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config, ExitCode> {
    match arkiv_config::load(path) {
        Ok(cfg) => Ok(cfg),
        Err(LoadError::FileNotFound(path)) => {
            eprintln!("configuration file not found: {}", path.display());
            Err(ExitCode::from(2))
        }
        Err(err) => {
            eprintln!("configuration is invalid: {err}");
            Err(ExitCode::from(1))
        }
    }
}

fn cmd_validate_config(cfg: &Config) -> ExitCode {
    println!("configuration is valid");
    println!("  zammad url:      {}", cfg.zammad.base_url);
    println!("  storage root:    {}", cfg.storage.root.display());
    println!("  execution:       {:?}", cfg.workflow.execution_backend);
    println!("  signing enabled: {}", cfg.signing.enabled);
    println!(
        "  metrics enabled: {}",
        cfg.observability.metrics_enabled
    );
    ExitCode::SUCCESS
}

fn cmd_dump_config(cfg: &Config) -> ExitCode {
    let dump = arkiv_config::redacted_dump(cfg);
    println!("{}", serde_json::to_string_pretty(&dump).expect("config dumps"));
    ExitCode::SUCCESS
}

fn cmd_show_deprecated() -> ExitCode {
    let in_use = arkiv_config::deprecated_aliases_in_use();
    if in_use.is_empty() {
        println!("no deprecated environment variables in use");
        return ExitCode::SUCCESS;
    }

    println!("deprecated environment variables detected:");
    println!();
    for alias in &in_use {
        let status = if alias.overridden {
            "(canonical override present)"
        } else {
            "NEEDS MIGRATION"
        };
        println!("  {} -> {} {status}", alias.deprecated, alias.canonical);
    }
    println!();
    println!("these variables will be removed in a future version; migrate to the canonical names");
    ExitCode::SUCCESS
}

async fn stream_backend(cfg: &Config) -> anyhow::Result<RedisStreams> {
    let url = cfg
        .workflow
        .redis_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .context("workflow.redis_url is not configured")?;
    RedisStreams::connect(url)
        .await
        .context("failed to connect to redis")
}

async fn cmd_queue_stats(cfg: &Config) -> anyhow::Result<()> {
    let backend = stream_backend(cfg).await?;
    let stats = queue_stats(&backend, &cfg.workflow).await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn cmd_queue_drain_dlq(cfg: &Config, limit: usize) -> anyhow::Result<()> {
    let backend = stream_backend(cfg).await?;
    let drained = drain_dlq(&backend, &cfg.workflow.queue_dlq_stream, limit).await?;
    println!("drained {drained} DLQ entries");
    Ok(())
}

async fn cmd_queue_history(
    cfg: &Config,
    limit: usize,
    ticket_id: Option<u64>,
) -> anyhow::Result<()> {
    let backend = Arc::new(stream_backend(cfg).await?);
    let history = HistoryLog::new(
        Some(backend),
        cfg.workflow.history_stream.clone(),
        cfg.workflow.history_retention_maxlen,
        Arc::new(SystemClock),
    );
    let items = history.read(limit, ticket_id).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": "ok",
            "count": items.len(),
            "items": items,
        }))?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if matches!(cli.command, Command::ShowDeprecated) {
        return cmd_show_deprecated();
    }

    let cfg = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };

    let result = match cli.command {
        Command::ValidateConfig => return cmd_validate_config(&cfg),
        Command::DumpConfig => return cmd_dump_config(&cfg),
        Command::ShowDeprecated => unreachable!("handled above"),
        Command::QueueStats => cmd_queue_stats(&cfg).await,
        Command::QueueDrainDlq { limit } => cmd_queue_drain_dlq(&cfg, limit).await,
        Command::QueueHistory { limit, ticket_id } => {
            cmd_queue_history(&cfg, limit, ticket_id).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}
