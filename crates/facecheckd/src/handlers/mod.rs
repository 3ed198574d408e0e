pub mod api;
pub mod page;

use axum::body::Bytes;
use axum::extract::Multipart;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::service::{SavedFile, VerifyOutcome};

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub known_image: Option<String>,
    #[serde(default)]
    pub new_image: Option<String>,
}

impl VerifyRequest {
    fn into_required(
        self,
        check: fn(Option<String>) -> Option<String>,
        message: &'static str,
    ) -> Result<(String, String), ApiError> {
        match (check(self.known_image), check(self.new_image)) {
            (Some(known), Some(new)) => Ok((known, new)),
            (known, new) => {
                let mut fields = Vec::new();
                if known.is_none() {
                    fields.push("known_image");
                }
                if new.is_none() {
                    fields.push("new_image");
                }
                Err(ApiError::missing(&fields, message))
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SavedFileResponse {
    pub success: bool,
    pub filename: String,
    pub filepath: String,
}

impl From<SavedFile> for SavedFileResponse {
    fn from(saved: SavedFile) -> Self {
        Self {
            success: true,
            filename: saved.filename,
            filepath: saved.filepath.display().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub verified: bool,
    pub embedding_saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_id: Option<i64>,
    pub message: &'static str,
}

impl VerifyResponse {
    fn from_outcome(outcome: &VerifyOutcome, with_id: bool) -> Self {
        Self {
            success: true,
            verified: outcome.comparison.verified,
            embedding_saved: outcome.embedding.is_some(),
            verification_id: with_id.then_some(outcome.record.id),
            message: outcome.message(),
        }
    }
}

/// Non-empty string fields only.
fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// API fields are trimmed first, so blank values count as missing.
fn required_trimmed(value: Option<String>) -> Option<String> {
    required(value.map(|v| v.trim().to_string()))
}

/// The `file` part of a multipart body as (client file name, contents).
async fn read_file_field(mut multipart: Multipart) -> Result<Option<(String, Bytes)>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok(Some((name, data)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use facecheck_core::{Comparison, FaceRepresentation, FacialArea};
    use facecheck_store::Store;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::app::{router, AppState};
    use crate::engine::EngineError;
    use crate::face::{FaceCapability, FaceService};

    /// Scripted face backend. Records which scratch files existed when it ran.
    struct StubFace {
        verified: bool,
        faces: usize,
        fail_compare: bool,
        seen: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl StubFace {
        fn new(verified: bool, faces: usize) -> Arc<Self> {
            Arc::new(Self {
                verified,
                faces,
                fail_compare: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                verified: false,
                faces: 0,
                fail_compare: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(PathBuf, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FaceService for StubFace {
        async fn compare(&self, known: &Path, new: &Path) -> Result<Comparison, EngineError> {
            {
                let mut seen = self.seen.lock().unwrap();
                seen.push((known.to_path_buf(), known.exists()));
                seen.push((new.to_path_buf(), new.exists()));
            }
            if self.fail_compare {
                return Err(EngineError::ChannelClosed);
            }
            Ok(Comparison {
                verified: self.verified,
                similarity: if self.verified { 0.8 } else { 0.1 },
                distance: if self.verified { 0.2 } else { 0.9 },
                threshold: 0.4,
                faces_detected: true,
            })
        }

        async fn represent(&self, _image: &Path) -> Result<Vec<FaceRepresentation>, EngineError> {
            Ok((0..self.faces)
                .map(|i| FaceRepresentation {
                    embedding: vec![0.5, 0.5],
                    facial_area: FacialArea { x: i as u32, y: 0, w: 10, h: 10 },
                    face_confidence: 0.9,
                })
                .collect())
        }
    }

    struct Harness {
        app: Router,
        state: AppState,
        _dir: TempDir,
    }

    async fn harness(face: FaceCapability) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("uploads");
        let captures_dir = dir.path().join("captures");
        std::fs::create_dir_all(&upload_dir).unwrap();
        std::fs::create_dir_all(&captures_dir).unwrap();
        let state = AppState {
            store: Store::open_in_memory().await.unwrap(),
            face,
            upload_dir,
            captures_dir,
        };
        Harness {
            app: router(state.clone(), 1024 * 1024),
            state,
            _dir: dir,
        }
    }

    fn enabled(stub: &Arc<StubFace>) -> FaceCapability {
        FaceCapability::Enabled(stub.clone())
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_file(uri: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let boundary = "XfacecheckBoundaryX";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn upload_dir_entries(state: &AppState) -> Vec<String> {
        std::fs::read_dir(&state.upload_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_index_banner() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let resp = h.app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"facecheck");
    }

    #[tokio::test]
    async fn test_capture_writes_decoded_bytes() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let (status, body) = send(
            &h.app,
            post_json("/capture/", json!({"image": "data:image/jpeg;base64,/9j/4AAQSkZJRg=="})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        let filename = body["filename"].as_str().unwrap();
        assert!(filename.starts_with("capture_") && filename.ends_with(".jpg"));
        let stored = std::fs::read(h.state.captures_dir.join(filename)).unwrap();
        assert_eq!(stored, b"\xff\xd8\xff\xe0\x00\x10JFIF");
        assert_eq!(
            body["filepath"].as_str().unwrap(),
            h.state.captures_dir.join(filename).display().to_string()
        );
    }

    #[tokio::test]
    async fn test_capture_missing_image_page_and_api() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;

        let (status, body) = send(&h.app, post_json("/capture/", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No image data received"}));

        let (status, body) = send(&h.app, post_json("/api/capture/", json!({"image": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"image": ["This field is required."]}));
    }

    #[tokio::test]
    async fn test_capture_invalid_base64_is_client_error() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let (status, body) = send(&h.app, post_json("/api/capture/", json!({"image": "%%%"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("base64"));
    }

    #[tokio::test]
    async fn test_verify_match_saves_embedding_and_record() {
        let stub = StubFace::new(true, 1);
        let h = harness(enabled(&stub)).await;

        let (status, body) = send(
            &h.app,
            post_json("/api/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["verified"], json!(true));
        assert_eq!(body["embedding_saved"], json!(true));
        assert_eq!(body["message"], json!("Verification successful!"));

        let records = h.state.store.recent_records(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_verified);
        assert_eq!(body["verification_id"], json!(records[0].id));

        let embedding = h.state.store.latest_embedding().await.unwrap().unwrap();
        assert_eq!(records[0].embedding, Some(embedding.id));
        assert_eq!(embedding.embedding_data[0]["facial_area"]["w"], json!(10));
    }

    #[tokio::test]
    async fn test_verify_mismatch_saves_no_embedding() {
        let stub = StubFace::new(false, 1);
        let h = harness(enabled(&stub)).await;

        let (status, body) = send(
            &h.app,
            post_json("/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], json!(false));
        assert_eq!(body["embedding_saved"], json!(false));
        assert_eq!(body["message"], json!("Verification failed - faces do not match"));
        assert!(body.get("verification_id").is_none());

        assert!(h.state.store.latest_embedding().await.unwrap().is_none());
        let records = h.state.store.recent_records(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_verified);
        assert_eq!(records[0].embedding, None);
    }

    #[tokio::test]
    async fn test_verify_match_without_face_embedding() {
        let stub = StubFace::new(true, 0);
        let h = harness(enabled(&stub)).await;
        let (status, body) = send(
            &h.app,
            post_json("/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], json!(true));
        assert_eq!(body["embedding_saved"], json!(false));
        assert_eq!(h.state.store.count_embeddings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verify_removes_scratch_files() {
        let stub = StubFace::new(true, 1);
        let h = harness(enabled(&stub)).await;
        send(
            &h.app,
            post_json("/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
        )
        .await;

        let seen = stub.seen();
        assert_eq!(seen.len(), 2);
        for (path, existed) in &seen {
            assert!(existed, "{} should exist during compare", path.display());
            assert!(!path.exists(), "{} should be removed", path.display());
        }
        assert!(upload_dir_entries(&h.state).is_empty());
    }

    #[tokio::test]
    async fn test_verify_failure_is_server_error_and_cleans_up() {
        let stub = StubFace::failing();
        let h = harness(enabled(&stub)).await;
        let (status, body) = send(
            &h.app,
            post_json("/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert!(upload_dir_entries(&h.state).is_empty());
        assert_eq!(h.state.store.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verify_disabled_capability_is_unavailable() {
        let h = harness(FaceCapability::Disabled { reason: "models missing".into() }).await;
        let (status, body) = send(
            &h.app,
            post_json("/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({"error": "models missing"}));
    }

    #[tokio::test]
    async fn test_verify_missing_fields() {
        let stub = StubFace::new(true, 1);
        let h = harness(enabled(&stub)).await;

        let (status, body) = send(&h.app, post_json("/verify/", json!({"known_image": "a25vd24="}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Both images are required"}));

        let (status, body) = send(&h.app, post_json("/api/verify/", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({
                "known_image": ["This field is required."],
                "new_image": ["This field is required."],
            })
        );
        assert!(stub.seen().is_empty());
    }

    #[tokio::test]
    async fn test_api_blank_fields_are_missing() {
        let stub = StubFace::new(true, 1);
        let h = harness(enabled(&stub)).await;

        let (status, body) = send(&h.app, post_json("/api/capture/", json!({"image": "  \n "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"image": ["This field is required."]}));
        assert_eq!(std::fs::read_dir(&h.state.captures_dir).unwrap().count(), 0);

        let (status, body) = send(
            &h.app,
            post_json("/api/verify/", json!({"known_image": "a25vd24=", "new_image": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"new_image": ["This field is required."]}));
        assert!(stub.seen().is_empty());
    }

    #[tokio::test]
    async fn test_api_capture_trims_and_accepts_wrapped_payload() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let (status, body) = send(&h.app, post_json("/api/capture/", json!({"image": " aGVs\nbG8=\n"}))).await;
        assert_eq!(status, StatusCode::OK);
        let filename = body["filename"].as_str().unwrap();
        assert_eq!(std::fs::read(h.state.captures_dir.join(filename)).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_upload_accepts_images_with_timestamp_prefix() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        for (uri, name) in [("/upload/", "face.PNG"), ("/api/upload/", "me.jpeg")] {
            let (status, body) = send(&h.app, post_file(uri, name, b"imagebytes")).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            let filename = body["filename"].as_str().unwrap();
            // YYYYmmdd_HHMMSS_
            assert_eq!(&filename[8..9], "_");
            assert_eq!(&filename[15..], format!("_{name}"));
            assert_eq!(std::fs::read(h.state.upload_dir.join(filename)).unwrap(), b"imagebytes");
        }
    }

    #[tokio::test]
    async fn test_upload_rejects_other_extensions() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        for name in ["notes.txt", "noext", "image.png.exe"] {
            let (status, body) = send(&h.app, post_file("/upload/", name, b"x")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{name}");
            assert_eq!(body, json!({"error": "Invalid file type"}));
        }
        assert!(upload_dir_entries(&h.state).is_empty());
    }

    #[tokio::test]
    async fn test_upload_requires_file_part() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let boundary = "b0undary";
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload/")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{boundary}--\r\n"
            )))
            .unwrap();
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No file part"}));
    }

    #[tokio::test]
    async fn test_upload_requires_filename() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let (status, body) = send(&h.app, post_file("/upload/", "", b"x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No selected file"}));
    }

    #[tokio::test]
    async fn test_embeddings_empty_then_latest() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;

        let (status, body) = send(&h.app, get("/embeddings/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": false, "message": "No embedding found"}));

        h.state.store.insert_embedding(&json!([{"embedding": [1.0]}])).await.unwrap();
        let newest = h.state.store.insert_embedding(&json!([{"embedding": [2.0]}])).await.unwrap();

        let (_, body) = send(&h.app, get("/embeddings/")).await;
        assert_eq!(body, json!({"success": true, "embedding": [{"embedding": [2.0]}]}));

        let (_, body) = send(&h.app, get("/api/embeddings/")).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["embedding"]["id"], json!(newest.id));
        assert_eq!(body["embedding"]["embedding_data"], json!([{"embedding": [2.0]}]));
        assert!(body["embedding"]["created_at"].is_string());
        assert!(body["embedding"]["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_records_returns_last_ten_newest_first() {
        let stub = StubFace::new(false, 0);
        let h = harness(enabled(&stub)).await;
        for _ in 0..12 {
            send(
                &h.app,
                post_json("/verify/", json!({"known_image": "a25vd24=", "new_image": "bmV3"})),
            )
            .await;
        }

        let (status, body) = send(&h.app, get("/api/records/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 10);
        let ids: Vec<i64> = records.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids[0], 12);
        assert!(ids.windows(2).all(|w| w[0] > w[1]));
        for field in ["known_image_path", "new_image_path", "is_verified", "verification_date", "embedding"] {
            assert!(records[0].get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn test_status_reports_capability_and_counts() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        h.state.store.insert_embedding(&json!([])).await.unwrap();
        let (status, body) = send(&h.app, get("/api/status/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["face_verification"], json!(false));
        assert_eq!(body["face_verification_reason"], json!("off"));
        assert_eq!(body["embeddings"], json!(1));
        assert_eq!(body["records"], json!(0));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let h = harness(FaceCapability::Disabled { reason: "off".into() }).await;
        let body = json!({"image": "A".repeat(2 * 1024 * 1024)}).to_string();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/capture/")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();
        let resp = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
