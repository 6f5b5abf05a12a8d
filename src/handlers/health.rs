//! Health Check
//! /api/health エンドポイント

use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub database: bool,
}

/// GET /api/health - ヘルスチェック
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check database query failed: {}", e);
            false
        }
    };

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        service: "seller-portal-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    })
}
