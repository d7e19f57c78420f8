use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::service::MacroService;

pub fn router(service: Arc<MacroService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/run-macro/", post(handlers::run_macro))
        .route("/run-macro", post(handlers::run_macro))
        .route("/run-macro-upload/", post(handlers::run_macro_upload))
        .route("/run-macro-upload", post(handlers::run_macro_upload))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
