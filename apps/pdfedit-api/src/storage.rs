//! On-disk storage for uploads and job outputs
//!
//! Uploads live at `{dir}/{file_id}.pdf` and outputs at `{dir}/{job_id}.pdf`.
//! Ids are UUIDs; anything else is treated as unknown so a request can never
//! name a path outside the data directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Open the data directory, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn pdf_path(&self, id: &str) -> Option<PathBuf> {
        Uuid::try_parse(id)
            .ok()
            .map(|_| self.dir.join(format!("{}.pdf", id)))
    }

    /// Store an uploaded PDF under a fresh id
    pub async fn save_upload(&self, bytes: &[u8]) -> std::io::Result<String> {
        let id = Self::new_id();
        let path = self.dir.join(format!("{}.pdf", id));
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored upload {} ({} bytes)", id, bytes.len());
        Ok(id)
    }

    /// Bytes of a stored PDF, or `None` if no such file exists
    pub async fn read(&self, id: &str) -> std::io::Result<Option<Vec<u8>>> {
        let Some(path) = self.pdf_path(id) else {
            return Ok(None);
        };
        read_optional(&path).await
    }

    /// Write a job's output through a temporary sibling, then rename it into place
    pub async fn write_output(&self, job_id: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self
            .pdf_path(job_id)
            .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "invalid job id"))?;
        let partial = path.with_extension("pdf.partial");

        if let Err(err) = tokio::fs::write(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, &path).await?;
        Ok(path)
    }
}

/// Read a file, mapping "not found" to `None`
pub async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
