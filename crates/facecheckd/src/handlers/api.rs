//! JSON API routes. Missing fields are reported per field.

use axum::extract::{Multipart, State};
use axum::Json;
use facecheck_store::VerificationRecord;
use serde::Serialize;
use serde_json::{json, Value};

use super::{read_file_field, required_trimmed, CaptureRequest, SavedFileResponse, VerifyRequest, VerifyResponse};
use crate::app::AppState;
use crate::error::{ApiError, FieldErrors};
use crate::face::FaceCapability;
use crate::service;

#[derive(Serialize)]
pub struct RecordsResponse {
    pub success: bool,
    pub records: Vec<VerificationRecord>,
}

pub async fn capture(
    State(state): State<AppState>,
    Json(req): Json<CaptureRequest>,
) -> Result<Json<SavedFileResponse>, FieldErrors> {
    let image = required_trimmed(req.image).ok_or_else(|| ApiError::missing(&["image"], "No image data received"))?;
    let saved = service::capture(&state, &image).await?;
    Ok(Json(saved.into()))
}

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, FieldErrors> {
    let (known, new) = req.into_required(required_trimmed, "Both images are required")?;
    let outcome = service::verify(&state, &known, &new).await?;
    Ok(Json(VerifyResponse::from_outcome(&outcome, true)))
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SavedFileResponse>, FieldErrors> {
    let (name, data) = read_file_field(multipart)
        .await?
        .ok_or_else(|| ApiError::missing(&["file"], "No file part"))?;
    let saved = service::upload(&state, &name, &data).await?;
    Ok(Json(saved.into()))
}

/// Latest embedding row, including id and timestamps.
pub async fn embeddings(State(state): State<AppState>) -> Result<Json<Value>, FieldErrors> {
    let body = match service::latest_embedding(&state).await? {
        Some(embedding) => json!({ "success": true, "embedding": embedding }),
        None => json!({ "success": false, "message": "No embedding found" }),
    };
    Ok(Json(body))
}

pub async fn records(State(state): State<AppState>) -> Result<Json<RecordsResponse>, FieldErrors> {
    let records = service::recent_records(&state).await?;
    Ok(Json(RecordsResponse {
        success: true,
        records,
    }))
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, FieldErrors> {
    let embeddings = state.store.count_embeddings().await.map_err(ApiError::from)?;
    let records = state.store.count_records().await.map_err(ApiError::from)?;
    let (enabled, reason) = match &state.face {
        FaceCapability::Enabled(_) => (true, None),
        FaceCapability::Disabled { reason } => (false, Some(reason.clone())),
    };
    Ok(Json(json!({
        "success": true,
        "version": env!("CARGO_PKG_VERSION"),
        "face_verification": enabled,
        "face_verification_reason": reason,
        "embeddings": embeddings,
        "records": records,
    })))
}
