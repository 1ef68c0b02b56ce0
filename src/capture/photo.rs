use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_PHOTO_PREFIX: &str = "Photo";

/// Writes still-capture JPEGs as `<dir>/<prefix>_<unix_millis>.jpg`.
#[derive(Clone, Debug)]
pub struct PhotoStore {
    dir: PathBuf,
    prefix: String,
}

impl PhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_prefix(dir, DEFAULT_PHOTO_PREFIX)
    }

    pub fn with_prefix(dir: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `jpeg` and return its path. The directory is created on demand.
    pub fn save(&self, jpeg: &[u8]) -> Result<PathBuf> {
        if jpeg.is_empty() {
            return Err(anyhow!("refusing to save empty still capture"));
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create photo dir {}", self.dir.display()))?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before unix epoch")?
            .as_millis();
        let mut path = self.dir.join(format!("{}_{}.jpg", self.prefix, millis));
        let mut suffix = 1;
        while path.exists() {
            path = self
                .dir
                .join(format!("{}_{}_{}.jpg", self.prefix, millis, suffix));
            suffix += 1;
        }

        fs::write(&path, jpeg).with_context(|| format!("write photo {}", path.display()))?;
        log::info!("PhotoStore: saved {} ({} bytes)", path.display(), jpeg.len());
        Ok(path)
    }
}
