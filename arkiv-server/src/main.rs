use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use arkiv_core::AppContext;
use arkiv_server::{AppState, create_app};

/// Command line arguments for the arkiv archiving service
#[derive(Parser, Debug)]
#[command(name = "arkiv-server")]
#[command(about = "Webhook-driven Zammad ticket archiving service")]
struct Args {
    /// Path to the YAML config file (overrides ARKIV_CONFIG)
    #[arg(long, env = "ARKIV_CONFIG")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT_OVERRIDE")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST_OVERRIDE")]
    host: Option<String>,
}

fn init_tracing(cfg: &arkiv_config::Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.observability.log_level.clone()));

    if cfg.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Local development convenience; a missing .env is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let cfg = arkiv_config::load(args.config.as_deref()).context("configuration error")?;
    init_tracing(&cfg);

    let host = args.host.unwrap_or_else(|| cfg.server.host.clone());
    let port = args.port.unwrap_or(cfg.server.port);

    let ctx = AppContext::new(cfg).await?;
    ctx.start_worker();

    let state = AppState::new(ctx.clone());
    let app = create_app(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "arkiv server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Socket is closed; drain in-flight processing under the grace period.
    ctx.shutdown_default().await;
    Ok(())
}
