use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::engine::corrector::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::semantic::DEFAULT_MODEL_ID;

pub const DEFAULT_DB_FILENAME: &str = "auth_users.sqlite";
pub const DEFAULT_ARTIFACT_DIRNAME: &str = "trained";

#[derive(Parser, Debug)]
#[command(
    name = "segcorrect",
    version,
    about = "Learned correction of generated market segmentation outlines"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Train(TrainArgs),
    Correct(CorrectArgs),
    Evaluate(EvaluateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[arg(long, default_value = ".cache/segments")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CorrectArgs {
    #[arg(long, default_value = ".cache/segments")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Market name used for the similarity lookup.
    #[arg(long)]
    pub market: String,

    /// Outline file: plain lines, a JSON array of lines, or nested generator JSON.
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    pub confidence: f64,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".cache/segments")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    pub confidence: f64,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/segments")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,
}

pub fn resolve_db_path(cache_root: &Path, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join(DEFAULT_DB_FILENAME))
}

pub fn resolve_artifact_dir(cache_root: &Path, artifact_dir: Option<&PathBuf>) -> PathBuf {
    artifact_dir
        .cloned()
        .unwrap_or_else(|| cache_root.join(DEFAULT_ARTIFACT_DIRNAME))
}
