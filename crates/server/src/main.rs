//! propd: host-local property aggregation agent.
//!
//! Polls instance metadata, tags, and the sources listed in a remote index
//! document, merges them into one property tree, and serves it over HTTP.

mod api;
mod conqueso;
mod router;
mod startup;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use propd_core::Config;

use crate::state::AppState;

// ── CLI ─────────────────────────────────────────────────────────────

/// Host-local property aggregation agent.
#[derive(Parser, Debug)]
#[command(name = "propd", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, short, env = "PROPD_CONFIG")]
    config: Option<PathBuf>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    propd_core::config::load_dotenv();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    startup::init_tracing(&config.log);
    config.log_summary();
    let config = Arc::new(config);

    let manager = startup::bootstrap(Arc::clone(&config))?;
    manager.start();

    let app = router::build_router(Arc::new(AppState::new(Arc::clone(&manager))));
    let addr = format!("{}:{}", config.service.host, config.service.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "propd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(startup::shutdown_signal())
        .await?;

    manager.shutdown();
    info!("propd stopped");
    Ok(())
}
