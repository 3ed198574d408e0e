//! Request workflows shared by the page and API route sets.

use std::path::PathBuf;

use chrono::Local;
use facecheck_core::Comparison;
use facecheck_store::{FaceEmbedding, NewVerificationRecord, VerificationRecord};

use crate::app::AppState;
use crate::error::ApiError;
use crate::face::FaceCapability;
use crate::media::{self, ScratchFile};

/// Number of records returned by the records listing.
pub const RECENT_RECORDS_LIMIT: usize = 10;

pub const MSG_VERIFIED: &str = "Verification successful!";
pub const MSG_NOT_VERIFIED: &str = "Verification failed - faces do not match";

/// A file written to one of the media directories.
#[derive(Debug)]
pub struct SavedFile {
    pub filename: String,
    pub filepath: PathBuf,
}

#[derive(Debug)]
pub struct VerifyOutcome {
    pub comparison: Comparison,
    pub embedding: Option<FaceEmbedding>,
    pub record: VerificationRecord,
}

impl VerifyOutcome {
    pub fn message(&self) -> &'static str {
        if self.comparison.verified {
            MSG_VERIFIED
        } else {
            MSG_NOT_VERIFIED
        }
    }
}

/// Decode a base64 image and store it in the captures directory.
pub async fn capture(state: &AppState, image: &str) -> Result<SavedFile, ApiError> {
    let bytes = media::decode_image_payload(image)?;
    let filename = media::capture_filename(Local::now());
    let filepath = state.captures_dir.join(&filename);
    tokio::fs::write(&filepath, &bytes).await?;
    tracing::info!(file = %filepath.display(), bytes = bytes.len(), "image captured");
    Ok(SavedFile { filename, filepath })
}

/// Compare two base64 images and persist the attempt.
///
/// Scratch copies of both images live only for the duration of the call.
pub async fn verify(state: &AppState, known_image: &str, new_image: &str) -> Result<VerifyOutcome, ApiError> {
    let known_bytes = media::decode_image_payload(known_image)?;
    let new_bytes = media::decode_image_payload(new_image)?;

    let face = match &state.face {
        FaceCapability::Enabled(service) => service.clone(),
        FaceCapability::Disabled { reason } => return Err(ApiError::Unavailable(reason.clone())),
    };

    let known = ScratchFile::create(&state.upload_dir, "known_temp", &known_bytes).await?;
    let new = ScratchFile::create(&state.upload_dir, "new_temp", &new_bytes).await?;

    let comparison = face.compare(known.path(), new.path()).await?;

    let embedding = if comparison.verified {
        match face.represent(new.path()).await {
            Ok(faces) if !faces.is_empty() => {
                let data = serde_json::to_value(&faces)?;
                Some(state.store.insert_embedding(&data).await?)
            }
            Ok(_) => {
                tracing::warn!("verified image produced no embedding");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedding generation failed");
                None
            }
        }
    } else {
        None
    };

    let record = state
        .store
        .insert_record(NewVerificationRecord {
            known_image_path: known.path().display().to_string(),
            new_image_path: new.path().display().to_string(),
            is_verified: comparison.verified,
            embedding: embedding.as_ref().map(|e| e.id),
        })
        .await?;

    tracing::info!(
        record = record.id,
        verified = comparison.verified,
        similarity = comparison.similarity,
        embedding_saved = embedding.is_some(),
        "verification recorded"
    );

    Ok(VerifyOutcome {
        comparison,
        embedding,
        record,
    })
}

/// Store an uploaded image under a timestamp-prefixed name.
pub async fn upload(state: &AppState, client_name: &str, bytes: &[u8]) -> Result<SavedFile, ApiError> {
    let filename = media::upload_filename(Local::now(), client_name)?;
    let filepath = state.upload_dir.join(&filename);
    tokio::fs::write(&filepath, bytes).await?;
    tracing::info!(file = %filepath.display(), bytes = bytes.len(), "file uploaded");
    Ok(SavedFile { filename, filepath })
}

pub async fn latest_embedding(state: &AppState) -> Result<Option<FaceEmbedding>, ApiError> {
    Ok(state.store.latest_embedding().await?)
}

pub async fn recent_records(state: &AppState) -> Result<Vec<VerificationRecord>, ApiError> {
    Ok(state.store.recent_records(RECENT_RECORDS_LIMIT).await?)
}
