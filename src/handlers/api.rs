use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::core::session::SessionSummary;
use crate::state::AppState;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionSummary>,
}

/// List the calls currently being relayed.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    let sessions = state.registry.summaries();

    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}
