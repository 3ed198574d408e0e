use std::path::PathBuf;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use facecheck_store::Store;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::face::FaceCapability;
use crate::handlers::{api, page};

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub face: FaceCapability,
    pub upload_dir: PathBuf,
    pub captures_dir: PathBuf,
}

impl AppState {
    pub fn new(store: Store, face: FaceCapability, config: &Config) -> Self {
        Self {
            store,
            face,
            upload_dir: config.upload_dir.clone(),
            captures_dir: config.captures_dir.clone(),
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/capture/", post(page::capture))
        .route("/verify/", post(page::verify))
        .route("/upload/", post(page::upload))
        .route("/embeddings/", get(page::embeddings))
        .route("/api/capture/", post(api::capture))
        .route("/api/verify/", post(api::verify))
        .route("/api/upload/", post(api::upload))
        .route("/api/embeddings/", get(api::embeddings))
        .route("/api/records/", get(api::records))
        .route("/api/status/", get(api::status))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "facecheck"
}
