//! Minimal admin surface (SPEC_FULL §B): list live calls and terminate
//! one externally. Grounded on the teacher's `server/http.rs` handler
//! shape (State-extracted JSON handlers over the shared server state).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::ServerState;

#[derive(Debug, Serialize)]
pub struct CallSummary {
    pub stream_id: String,
}

#[derive(Debug, Serialize)]
pub struct CallListResponse {
    pub calls: Vec<CallSummary>,
}

pub async fn list_calls(State(state): State<ServerState>) -> Json<CallListResponse> {
    let calls = state
        .supervisor
        .stream_ids()
        .await
        .into_iter()
        .map(|stream_id| CallSummary { stream_id })
        .collect();
    Json(CallListResponse { calls })
}

#[derive(Debug, Serialize)]
pub struct TerminateResponse {
    pub terminated: bool,
}

/// `POST /admin/calls/:stream_id/terminate` — signals the call's
/// TurnController to run the Ending sequence (§4.1 External
/// termination). Asynchronous: the PBX `stop` frame follows once the
/// handler's event loop observes the notification.
pub async fn terminate_call(
    State(state): State<ServerState>,
    Path(stream_id): Path<String>,
) -> (StatusCode, Json<TerminateResponse>) {
    let terminated = state.supervisor.terminate(&stream_id).await;
    let status = if terminated { StatusCode::ACCEPTED } else { StatusCode::NOT_FOUND };
    (status, Json(TerminateResponse { terminated }))
}
