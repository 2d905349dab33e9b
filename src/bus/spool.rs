//! Atomic file spool for intents when the primary channel is unhealthy
//!
//! One intent per file, `<unix_ms>-<fingerprint>.json`, written to a
//! temporary name and renamed into place (rename(2) atomicity). The
//! Executor tails the directory and removes what it consumes.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::BusError;
use crate::intent::ExecutionIntent;

/// Intent spool writer
pub struct SpoolWriter {
    dir: PathBuf,
}

impl SpoolWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the spool directory if missing
    pub async fn ensure_dir(&self) -> Result<(), BusError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Atomically write one intent; returns the final path
    pub async fn write(&self, intent: &ExecutionIntent) -> Result<PathBuf, BusError> {
        self.ensure_dir().await?;
        let final_path = self.dir.join(intent.spool_filename());
        let tmp_path = self.dir.join(format!(".tmp-{}", intent.spool_filename()));

        let bytes = serde_json::to_vec_pretty(intent)?;
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        debug!(path = %final_path.display(), "intent spooled");
        Ok(final_path)
    }

    /// Spool files awaiting the Executor, oldest first
    pub async fn pending(&self) -> Result<Vec<PathBuf>, BusError> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".json") && !name.starts_with(".tmp-") {
                entries.push(entry.path());
            }
        }
        entries.sort();
        Ok(entries)
    }
}
