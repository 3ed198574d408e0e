//! Image payload decoding, file naming and scratch-file handling.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Local};
use thiserror::Error;

/// Extensions accepted by the upload endpoints.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("data URL has no payload")]
    EmptyDataUrl,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("No selected file")]
    NoFilename,
}

/// Strip a leading `data:image/...;base64,` marker and decode the payload.
/// Line breaks and other ASCII whitespace inside the payload are ignored.
pub fn decode_image_payload(raw: &str) -> Result<Vec<u8>, MediaError> {
    let payload = if raw.starts_with("data:image") {
        raw.split_once(',').map(|(_, rest)| rest).ok_or(MediaError::EmptyDataUrl)?
    } else {
        raw
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// `capture_<YYYYmmdd_HHMMSS>_<8 hex>.jpg`
pub fn capture_filename(now: DateTime<Local>) -> String {
    format!("capture_{}_{}.jpg", timestamp(now), short_id())
}

/// `<YYYYmmdd_HHMMSS>_<client name>` after checking the client name.
pub fn upload_filename(now: DateTime<Local>, client_name: &str) -> Result<String, MediaError> {
    let name = client_basename(client_name).ok_or(MediaError::NoFilename)?;
    if !has_allowed_extension(name) {
        return Err(MediaError::InvalidFileType);
    }
    Ok(format!("{}_{}", timestamp(now), name))
}

pub fn has_allowed_extension(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Final path component of a client-supplied file name, with either
/// separator style. `None` for empty names and dot entries.
fn client_basename(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match base {
        "" | "." | ".." => None,
        other => Some(other),
    }
}

fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// A file that is removed when the guard is dropped.
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Write `bytes` to `<dir>/<stem>_<8 hex>.jpg`.
    pub async fn create(dir: &Path, stem: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let path = dir.join(format!("{stem}_{}.jpg", short_id()));
        tokio::fs::write(&path, bytes).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "scratch file removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove scratch file")
            }
        }
    }
}
