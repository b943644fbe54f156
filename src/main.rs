//! Call gateway entry point: loads configuration, wires up the call
//! log store and agent directory, and serves the telephony WebSocket
//! and admin API until shutdown.

use std::sync::Arc;

use callgateway::call_log::sqlite::SqliteCallLogStore;
use callgateway::call_log::{CallLogStore, InMemoryCallLogStore};
use callgateway::session::{AgentDirectory, InMemoryAgentDirectory};
use callgateway::types::AgentConfig;
use callgateway::{server, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: {err:#}");
            std::process::exit(1);
        }
    };

    init_tracing(config.is_production());
    let config = Arc::new(config);

    let call_log: Arc<dyn CallLogStore> = if config.call_log.db_path == ":memory:" {
        Arc::new(InMemoryCallLogStore::new())
    } else {
        Arc::new(SqliteCallLogStore::new(&config.call_log.db_path).await?)
    };

    let agent_directory: Arc<dyn AgentDirectory> = Arc::new(InMemoryAgentDirectory::new(AgentConfig::default_agent()));

    let state = server::ServerState::new(config, call_log, agent_directory);
    let supervisor = state.supervisor.clone();

    server::serve(state, shutdown_signal(supervisor)).await
}

/// `production` gets compact JSON lines (for log aggregators) and panics
/// routed through `tracing::error!` instead of the default stderr
/// unwind message; `development` gets the teacher's plain `fmt()` output.
fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if production {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
        std::panic::set_hook(Box::new(|info| {
            tracing::error!(%info, "panic");
        }));
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on SIGINT/SIGTERM, draining in-flight calls before axum
/// stops accepting connections (SPEC_FULL §B graceful shutdown).
async fn shutdown_signal(supervisor: Arc<callgateway::Supervisor>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!(live_calls = supervisor.len().await, "shutting down, draining live calls");
    supervisor.interrupt_all().await;
}
