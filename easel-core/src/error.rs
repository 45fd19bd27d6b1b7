// Error types for easel-core

use std::path::PathBuf;

use thiserror::Error;

/// Model construction failed. The cache stays empty so the next request retries.
#[derive(Error, Debug)]
#[error("Could not load the model. Please check your installation.")]
pub struct LoadFailure(pub anyhow::Error);

impl LoadFailure {
    /// The underlying error raised by the loader.
    pub fn cause(&self) -> &anyhow::Error {
        &self.0
    }
}

/// Persisting a generated image failed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("no free filename after {attempts} attempts in {}", dir.display())]
    Exhausted { dir: PathBuf, attempts: usize },
}

/// Why a generation request produced no image.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    Load(#[from] LoadFailure),

    #[error("{0:#}")]
    Inference(anyhow::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
