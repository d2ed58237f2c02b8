use axum::{
    Router,
    http::Method,
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::assets::serve_embedded;
use crate::handler::{self, AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/clipboard", get(handler::get_clipboard).post(handler::save_clipboard))
}

/// Full service router: JSON API under `/api`, the web client everywhere else.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handler::healthcheck))
        .nest("/api", routes())
        .fallback(serve_embedded)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
