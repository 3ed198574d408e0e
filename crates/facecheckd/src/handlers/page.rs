//! Routes used by the browser page. Errors are `{"error": "..."}`.

use axum::extract::{Multipart, State};
use axum::Json;
use serde_json::{json, Value};

use super::{read_file_field, required, CaptureRequest, SavedFileResponse, VerifyRequest, VerifyResponse};
use crate::app::AppState;
use crate::error::ApiError;
use crate::service;

pub async fn capture(
    State(state): State<AppState>,
    Json(req): Json<CaptureRequest>,
) -> Result<Json<SavedFileResponse>, ApiError> {
    let image = required(req.image).ok_or_else(|| ApiError::missing(&["image"], "No image data received"))?;
    let saved = service::capture(&state, &image).await?;
    Ok(Json(saved.into()))
}

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let (known, new) = req.into_required(required, "Both images are required")?;
    let outcome = service::verify(&state, &known, &new).await?;
    Ok(Json(VerifyResponse::from_outcome(&outcome, false)))
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SavedFileResponse>, ApiError> {
    let (name, data) = read_file_field(multipart)
        .await?
        .ok_or_else(|| ApiError::missing(&["file"], "No file part"))?;
    let saved = service::upload(&state, &name, &data).await?;
    Ok(Json(saved.into()))
}

/// Latest embedding payload only, without row metadata.
pub async fn embeddings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let body = match service::latest_embedding(&state).await? {
        Some(embedding) => json!({ "success": true, "embedding": embedding.embedding_data }),
        None => json!({ "success": false, "message": "No embedding found" }),
    };
    Ok(Json(body))
}
