use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_BIND: &str = "127.0.0.1:8000";
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Service configuration.
///
/// Sources, lowest to highest precedence: built-in defaults, the TOML file
/// named by `FACECHECK_CONFIG`, then `FACECHECK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:8000).
    pub bind: SocketAddr,
    /// Where uploads and verification scratch images are written.
    pub upload_dir: PathBuf,
    /// Where camera captures are written.
    pub captures_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Whether to load the face models at all.
    pub face_enabled: bool,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
}

/// Optional keys accepted in the TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    upload_dir: Option<PathBuf>,
    captures_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    face_enabled: Option<bool>,
    max_body_bytes: Option<usize>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

impl Config {
    /// Load configuration from the optional config file and the process environment.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("FACECHECK_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = facecheck_core::data_home().join("facecheck");

        let bind = env("FACECHECK_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .with_context(|| format!("invalid bind address {bind:?}"))?;

        Ok(Self {
            bind,
            upload_dir: env("FACECHECK_UPLOAD_DIR")
                .map(PathBuf::from)
                .or(file.upload_dir)
                .unwrap_or_else(|| data_dir.join("uploads")),
            captures_dir: env("FACECHECK_CAPTURES_DIR")
                .map(PathBuf::from)
                .or(file.captures_dir)
                .unwrap_or_else(|| data_dir.join("captures")),
            db_path: env("FACECHECK_DB_PATH")
                .map(PathBuf::from)
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("facecheck.db")),
            model_dir: env("FACECHECK_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(facecheck_core::default_model_dir),
            similarity_threshold: parsed(&env, "FACECHECK_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            face_enabled: env("FACECHECK_FACE_ENABLED")
                .map(|v| v != "0")
                .or(file.face_enabled)
                .unwrap_or(true),
            max_body_bytes: parsed(&env, "FACECHECK_MAX_BODY_BYTES")
                .or(file.max_body_bytes)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
        })
    }

    /// Create the upload, capture and database directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        let db_dir = self.db_path.parent().filter(|p| !p.as_os_str().is_empty());
        for dir in [Some(self.upload_dir.as_path()), Some(self.captures_dir.as_path()), db_dir]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}
