use axum::{extract::State, routing::get, Json, Router};
use medmcp_core::OrchestratorStatus;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_status))
}

async fn get_status(State(state): State<AppState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.status().await)
}
