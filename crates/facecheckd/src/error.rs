use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facecheck_store::StoreError;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::engine::EngineError;
use crate::media::MediaError;

const FIELD_REQUIRED: &str = "This field is required.";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Required request fields were absent or empty.
    #[error("{message}")]
    Missing {
        fields: Vec<&'static str>,
        message: &'static str,
    },
    #[error("{0}")]
    BadRequest(String),
    /// The face capability is disabled.
    #[error("{0}")]
    Unavailable(String),
    /// The comparison could not be performed.
    #[error("{0}")]
    Face(#[from] EngineError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn missing(fields: &[&'static str], message: &'static str) -> Self {
        Self::Missing {
            fields: fields.to_vec(),
            message,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Face(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self) {
        match self {
            Self::Face(err) => tracing::error!(error = %err, "face comparison failed"),
            Self::Internal(msg) => tracing::error!(error = %msg, "internal error"),
            other => tracing::debug!(error = %other, "request rejected"),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Page routes: every error is `{"error": "..."}`.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// API routes: missing fields render as a field map, everything else as
/// `{"error": "..."}`.
pub struct FieldErrors(pub ApiError);

impl From<ApiError> for FieldErrors {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for FieldErrors {
    fn into_response(self) -> Response {
        match self.0 {
            ApiError::Missing { fields, .. } => {
                tracing::debug!(?fields, "request rejected: missing fields");
                let body: Map<String, Value> = fields
                    .into_iter()
                    .map(|f| (f.to_string(), json!([FIELD_REQUIRED])))
                    .collect();
                (StatusCode::BAD_REQUEST, Json(Value::Object(body))).into_response()
            }
            other => other.into_response(),
        }
    }
}
