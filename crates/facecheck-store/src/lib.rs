//! facecheck-store: SQLite persistence for face embeddings and
//! verification records.
//!
//! All access goes through a `tokio_rusqlite::Connection`, which runs the
//! blocking SQLite calls on its own thread.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS face_embeddings (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        embedding_data TEXT NOT NULL,
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_embeddings_created ON face_embeddings(created_at);
    CREATE TABLE IF NOT EXISTS verification_records (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        known_image_path  TEXT NOT NULL,
        new_image_path    TEXT NOT NULL,
        is_verified       INTEGER NOT NULL,
        verification_date TEXT NOT NULL,
        embedding_id      INTEGER REFERENCES face_embeddings(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_records_date ON verification_records(verification_date);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("cannot encode embedding data: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A stored face embedding. `embedding_data` is the JSON list of per-face
/// representations produced by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceEmbedding {
    pub id: i64,
    pub embedding_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One face comparison attempt and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationRecord {
    pub id: i64,
    pub known_image_path: String,
    pub new_image_path: String,
    pub is_verified: bool,
    pub verification_date: DateTime<Utc>,
    /// Id of the embedding saved for this attempt, if any.
    pub embedding: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewVerificationRecord {
    pub known_image_path: String,
    pub new_image_path: String,
    pub is_verified: bool,
    pub embedding: Option<i64>,
}

#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
        conn.call(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        tracing::info!(path = %path.as_ref().display(), "store opened");
        Ok(Self { conn })
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn insert_embedding(&self, data: &Value) -> Result<FaceEmbedding, StoreError> {
        self.insert_embedding_at(data, Utc::now()).await
    }

    pub(crate) async fn insert_embedding_at(
        &self,
        data: &Value,
        at: DateTime<Utc>,
    ) -> Result<FaceEmbedding, StoreError> {
        let json = serde_json::to_string(data)?;
        let stamp = format_ts(at);
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO face_embeddings (embedding_data, created_at, updated_at)
                     VALUES (?1, ?2, ?2)",
                    params![json, stamp],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        tracing::debug!(id, "embedding stored");
        Ok(FaceEmbedding {
            id,
            embedding_data: data.clone(),
            created_at: truncate_micros(at),
            updated_at: truncate_micros(at),
        })
    }

    /// Most recently created embedding, if any.
    pub async fn latest_embedding(&self) -> Result<Option<FaceEmbedding>, StoreError> {
        let row = self
            .conn
            .call(|conn| {
                let found = conn
                    .query_row(
                        "SELECT id, embedding_data, created_at, updated_at
                         FROM face_embeddings
                         ORDER BY created_at DESC, id DESC
                         LIMIT 1",
                        [],
                        row_to_embedding,
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(row)
    }

    pub async fn insert_record(&self, record: NewVerificationRecord) -> Result<VerificationRecord, StoreError> {
        self.insert_record_at(record, Utc::now()).await
    }

    pub(crate) async fn insert_record_at(
        &self,
        record: NewVerificationRecord,
        at: DateTime<Utc>,
    ) -> Result<VerificationRecord, StoreError> {
        let stamp = format_ts(at);
        let row = record.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO verification_records
                         (known_image_path, new_image_path, is_verified, verification_date, embedding_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.known_image_path,
                        row.new_image_path,
                        row.is_verified,
                        stamp,
                        row.embedding,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        tracing::debug!(id, verified = record.is_verified, "verification record stored");
        Ok(VerificationRecord {
            id,
            known_image_path: record.known_image_path,
            new_image_path: record.new_image_path,
            is_verified: record.is_verified,
            verification_date: truncate_micros(at),
            embedding: record.embedding,
        })
    }

    /// Up to `limit` records, newest first.
    pub async fn recent_records(&self, limit: usize) -> Result<Vec<VerificationRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, known_image_path, new_image_path, is_verified, verification_date, embedding_id
                     FROM verification_records
                     ORDER BY verification_date DESC, id DESC
                     LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn count_records(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM verification_records").await
    }

    pub async fn count_embeddings(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) FROM face_embeddings").await
    }

    async fn count(&self, sql: &'static str) -> Result<u64, StoreError> {
        let n = self
            .conn
            .call(move |conn| Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(n.max(0) as u64)
    }
}

/// Fixed-width RFC 3339 so text order matches time order.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn truncate_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    parse_ts(&format_ts(at)).unwrap_or(at)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn ts_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_embedding(row: &Row) -> rusqlite::Result<FaceEmbedding> {
    let raw: String = row.get(1)?;
    let embedding_data = serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    Ok(FaceEmbedding {
        id: row.get(0)?,
        embedding_data,
        created_at: ts_column(row, 2)?,
        updated_at: ts_column(row, 3)?,
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<VerificationRecord> {
    Ok(VerificationRecord {
        id: row.get(0)?,
        known_image_path: row.get(1)?,
        new_image_path: row.get(2)?,
        is_verified: row.get(3)?,
        verification_date: ts_column(row, 4)?,
        embedding: row.get(5)?,
    })
}
