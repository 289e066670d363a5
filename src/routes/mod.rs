mod image;
mod profile;
mod status;

use axum::Router;
use axum::middleware;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::rate_limit;

/// ルータを組み立てる。
///
/// レート制限はクライアントアドレスを使うため、
/// `into_make_service_with_connect_info::<SocketAddr>()` で起動すること。
pub fn build_router(state: AppState) -> Router {
    let limited = Router::new()
        .merge(profile::routes())
        .merge(image::routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .merge(limited)
        .merge(status::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
