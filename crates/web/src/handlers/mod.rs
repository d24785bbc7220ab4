use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::AppState;

mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(webhook::webhook))
        .route("/health", get(health))
}

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }
