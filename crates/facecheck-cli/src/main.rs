use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{FaceAnalyzer, DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use facecheck_store::Store;
use serde_json::json;

#[derive(Parser)]
#[command(name = "facecheck", about = "facecheck offline tools", version)]
struct Cli {
    /// Directory containing the ONNX models
    #[arg(long, global = true, env = "FACECHECK_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// SQLite database used by facecheckd
    #[arg(long, global = true, env = "FACECHECK_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the faces in two image files
    Compare {
        known: PathBuf,
        new: PathBuf,
        /// Cosine similarity needed for a match
        #[arg(short, long, default_value_t = 0.40, env = "FACECHECK_SIMILARITY_THRESHOLD")]
        threshold: f32,
    },
    /// Print the embedding of every face in an image
    Represent { image: PathBuf },
    /// List recent verification records
    Records {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show the latest saved embedding
    Embedding,
    /// Show model and database status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let model_dir = cli.model_dir.unwrap_or_else(facecheck_core::default_model_dir);
    let db_path = cli.db.unwrap_or_else(default_db_path);

    match cli.command {
        Commands::Compare { known, new, threshold } => {
            let comparison = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut analyzer = load_analyzer(&model_dir)?;
                Ok(analyzer.compare(&known, &new, threshold)?)
            })
            .await??;
            print_json(&comparison)?;
        }
        Commands::Represent { image } => {
            let faces = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut analyzer = load_analyzer(&model_dir)?;
                Ok(analyzer.represent(&image)?)
            })
            .await??;
            if faces.is_empty() {
                eprintln!("no face detected");
            }
            print_json(&faces)?;
        }
        Commands::Records { limit } => {
            let store = open_store(&db_path).await?;
            print_json(&store.recent_records(limit).await?)?;
        }
        Commands::Embedding => {
            let store = open_store(&db_path).await?;
            match store.latest_embedding().await? {
                Some(embedding) => print_json(&embedding)?,
                None => println!("No embedding found"),
            }
        }
        Commands::Status => {
            let detector = model_dir.join(DETECTOR_MODEL_FILE);
            let recognizer = model_dir.join(RECOGNIZER_MODEL_FILE);
            let (embeddings, records) = if db_path.exists() {
                let store = open_store(&db_path).await?;
                (Some(store.count_embeddings().await?), Some(store.count_records().await?))
            } else {
                (None, None)
            };
            print_json(&json!({
                "version": env!("CARGO_PKG_VERSION"),
                "model_dir": model_dir,
                "detector_model": detector.exists(),
                "recognizer_model": recognizer.exists(),
                "database": db_path,
                "database_exists": db_path.exists(),
                "embeddings": embeddings,
                "records": records,
            }))?;
        }
    }

    Ok(())
}

/// Same default location facecheckd uses.
fn default_db_path() -> PathBuf {
    facecheck_core::data_home().join("facecheck").join("facecheck.db")
}

fn load_analyzer(model_dir: &Path) -> Result<FaceAnalyzer> {
    tracing::debug!(model_dir = %model_dir.display(), "loading face models");
    FaceAnalyzer::load(model_dir)
        .with_context(|| format!("loading face models from {}", model_dir.display()))
}

async fn open_store(path: &Path) -> Result<Store> {
    Store::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
