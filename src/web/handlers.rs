//! HTTP request handlers.

use super::AppState;
use crate::monitor::Statistics;

use axum::{extract::State, response::Json};
use serde::Serialize;

pub async fn handle_stats(State(state): State<AppState>) -> Json<Statistics> {
    Json(state.fleet.statistics().await)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub targets: usize,
}

pub async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online",
        targets: state.fleet.len(),
    })
}
