use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::fetch::FetchError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/proxy-image/", get(proxy_image))
        .route("/proxy-image", get(proxy_image))
}

#[derive(Deserialize)]
struct ProxyQuery {
    url: String,
    max_retries: Option<u32>,
}

async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, AppError> {
    // 接続先アドレスの検証はリダイレクト先も含めて上流クライアントが行う
    let parsed = parse_image_url(&query.url)?;

    let attempts = query
        .max_retries
        .unwrap_or(state.config.max_retries)
        .min(state.config.proxy_max_retries);

    let image = state
        .fetcher
        .fetch_image(parsed.as_str(), attempts)
        .await
        .map_err(|e| match e {
            FetchError::NotFound => AppError::NotFound("Image not found".into()),
            FetchError::UpstreamExhausted { .. } => {
                AppError::BadGateway("All attempts failed for image fetch".into())
            }
            FetchError::Blocked(reason) => AppError::BadRequest(reason),
        })?;

    Ok((
        [(header::CONTENT_TYPE, image.content_type)],
        Body::from(image.bytes),
    )
        .into_response())
}

/// http/httpsのURLのみ受け付ける。
fn parse_image_url(url: &str) -> Result<reqwest::Url, AppError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| AppError::BadRequest(format!("invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::BadRequest("URL must use HTTP or HTTPS".into()));
    }
    if parsed.host_str().is_none() {
        return Err(AppError::BadRequest("URL has no host".into()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_image_url_accepts_http_and_https() {
        assert!(parse_image_url("https://cdn.example.com/a.jpg").is_ok());
        assert!(parse_image_url("http://cdn.example.com/a.jpg").is_ok());
    }

    #[test]
    fn parse_image_url_rejects_other_schemes() {
        assert!(parse_image_url("file:///etc/passwd").is_err());
        assert!(parse_image_url("ftp://cdn.example.com/a.jpg").is_err());
        assert!(parse_image_url("not a url").is_err());
    }
}
