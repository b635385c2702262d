//! Axum router wiring (HTTP surface + WS upgrade).

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use axum::extract::State;

use portico_core::protocol::now_millis;

use crate::{app_state::AppState, bridge, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(transport::ws::ws_upgrade))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/bridge/send", post(bridge::send))
        .route("/bridge/poll", post(bridge::poll).get(bridge::poll))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": state.gateway().stats(),
        "timestamp": now_millis(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.gateway().stats())
}
