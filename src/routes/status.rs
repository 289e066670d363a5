use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;
use crate::cache::ProfileStore;
use crate::types::{AlertRecord, epoch_now};

/// レート制限の対象外
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health).head(health_head))
        .route("/stats", get(stats))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "timestamp": epoch_now() }))
}

async fn health_head() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
struct StatsResponse {
    cache_size: usize,
    last_alerts: Vec<AlertRecord>,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        cache_size: state.fetcher.store().len().await,
        last_alerts: state.notifier.recent(),
    })
}
