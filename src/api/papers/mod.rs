mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::generate_paper))
        .route("/papers", post(handlers::store_paper))
        .route("/upload", post(handlers::upload_paper))
        .route("/questions", get(handlers::list_questions))
        .route("/export", post(handlers::export_paper))
}
