//! Axum server: telephony WebSocket endpoint plus a minimal admin API
//! for external termination and observability (SPEC_FULL §B).

pub mod admin;
pub mod call_ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::call_log::CallLogStore;
use crate::config::Config;
use crate::session::{AgentDirectory, Supervisor};

/// Shared server state, cloned into every handler.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub supervisor: Arc<Supervisor>,
    pub call_log: Arc<dyn CallLogStore>,
    pub agent_directory: Arc<dyn AgentDirectory>,
    pub http_client: Client,
}

impl ServerState {
    pub fn new(config: Arc<Config>, call_log: Arc<dyn CallLogStore>, agent_directory: Arc<dyn AgentDirectory>) -> Self {
        Self { config, supervisor: Arc::new(Supervisor::new()), call_log, agent_directory, http_client: Client::new() }
    }
}

fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/ws", get(call_ws::ws_handler))
        .route("/admin/calls", get(admin::list_calls))
        .route("/admin/calls/{stream_id}/terminate", post(admin::terminate_call))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves, at which point axum stops
/// accepting new connections (in-flight calls are drained separately
/// by the caller via `Supervisor::interrupt_all`, SPEC_FULL §B).
pub async fn serve(state: ServerState, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port).parse()?;
    let app = router(state);

    info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
