//! Health check routes

use axum::Json;
use serde_json::{json, Value};

/// Health check for infrastructure monitoring
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
