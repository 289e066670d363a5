use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::AppState;
use crate::error::AppError;
use crate::fetch::FetchError;
use crate::types::ProfileRecord;

pub fn routes() -> Router<AppState> {
    Router::new().route("/scrape/{username}", get(scrape_user))
}

async fn scrape_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ProfileRecord>, AppError> {
    let record = state
        .fetcher
        .resolve(&username, state.config.max_retries)
        .await
        .map_err(|e| match e {
            FetchError::NotFound => AppError::NotFound("User not found".into()),
            FetchError::UpstreamExhausted { .. } | FetchError::Blocked(_) => {
                AppError::BadGateway("All attempts failed".into())
            }
        })?;
    Ok(Json(record))
}
