//! On-disk persistence of generated images.
//!
//! Every successful generation becomes one PNG in a flat output directory,
//! named `<YYYYMMDD_HHMMSS>_<8 hex>.png`. Nothing here ever deletes files.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info};
use uuid::Uuid;

use crate::StorageError;

pub const DEFAULT_OUTPUT_DIR: &str = "generated_images";

const SUFFIX_LEN: usize = 8;
const MAX_ATTEMPTS: usize = 8;

/// A PNG written by [`ArtifactStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `image` as a PNG named after the current local time.
    pub fn save(&self, image: &DynamicImage) -> Result<ArtifactFile, StorageError> {
        self.save_at(image, Local::now().naive_local())
    }

    /// Writes `image` under a name derived from `timestamp` and a random suffix.
    ///
    /// Files are created with create-new semantics, so an existing artifact is
    /// never overwritten; a taken name just draws another suffix.
    pub fn save_at(
        &self,
        image: &DynamicImage,
        timestamp: NaiveDateTime,
    ) -> Result<ArtifactFile, StorageError> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        for _ in 0..MAX_ATTEMPTS {
            let filename = artifact_filename(timestamp, &random_suffix());
            let path = self.dir.join(&filename);
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("artifact name {filename} already taken, retrying");
                    continue;
                }
                Err(source) => return Err(StorageError::Write { path, source }),
            };

            if let Err(e) = write_png(file, image, &path) {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
            info!("Saved image to {}", path.display());
            return Ok(ArtifactFile { filename, path });
        }

        Err(StorageError::Exhausted {
            dir: self.dir.clone(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

fn write_png(file: fs::File, image: &DynamicImage, path: &Path) -> Result<(), StorageError> {
    let mut writer = BufWriter::new(file);
    image
        .write_to(&mut writer, ImageFormat::Png)
        .map_err(|source| StorageError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn artifact_filename(timestamp: NaiveDateTime, suffix: &str) -> String {
    format!("{}_{suffix}.png", timestamp.format("%Y%m%d_%H%M%S"))
}

/// Eight lowercase hex characters taken from a fresh v4 UUID.
pub fn random_suffix() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SUFFIX_LEN);
    id
}
