//! Upload store - temporary on-disk buffering of inbound attachments.
//!
//! Each attachment lives in its own uniquely named file for the duration of
//! one relay call. Dropping the [`Attachment`] deletes the file, and
//! [`UploadStore::sweep`] clears any leftovers at shutdown.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Default per-file limit (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("attachment exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("failed to read upload: {0}")]
    Read(#[source] Box<dyn StdError + Send + Sync>),

    #[error("failed to write upload: {0}")]
    Io(#[from] io::Error),
}

/// One stored attachment. Owns its temporary file.
#[derive(Debug)]
pub struct Attachment {
    pub temp_path: PathBuf,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    released: bool,
}

impl Attachment {
    /// File name inside the upload directory, used as the processor-side file id
    pub fn file_name(&self) -> String {
        self.temp_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Delete the file without blocking the runtime.
    pub async fn release(mut self) {
        match tokio::fs::remove_file(&self.temp_path).await {
            Ok(()) => debug!(path = %self.temp_path.display(), "released attachment"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.temp_path.display(), error = %e, "failed to release attachment"),
        }
        self.released = true;
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(path = %self.temp_path.display(), "released attachment"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.temp_path.display(), error = %e, "failed to release attachment"),
        }
    }
}

pub struct UploadStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl UploadStore {
    /// Open (creating if needed) the upload directory
    pub async fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stream one attachment to disk.
    ///
    /// Returns `Ok(None)` for an empty upload. Exceeding the limit aborts the
    /// write and removes the partial file.
    pub async fn store<S, E>(
        &self,
        field: &str,
        original_name: &str,
        mime_type: &str,
        mut chunks: S,
    ) -> Result<Option<Attachment>, StoreError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: StdError + Send + Sync + 'static,
    {
        let temp_path = self.dir.join(temp_file_name(field, original_name));
        let mut file = tokio::fs::File::create(&temp_path).await?;

        // From here on, dropping `attachment` removes the file.
        let mut attachment = Attachment {
            temp_path,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: 0,
            created_at: Utc::now(),
            released: false,
        };

        let written = write_limited(&mut file, &mut chunks, self.max_bytes).await;
        // Close the handle before the file can be removed.
        drop(file);

        let size = match written {
            Ok(0) => {
                attachment.release().await;
                return Ok(None);
            }
            Ok(size) => size,
            Err(e) => {
                attachment.release().await;
                return Err(e);
            }
        };
        attachment.size_bytes = size;

        debug!(
            field,
            path = %attachment.temp_path.display(),
            size = attachment.size_bytes,
            "stored attachment"
        );
        Ok(Some(attachment))
    }

    /// Delete every regular file left in the upload directory.
    pub async fn sweep(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path().display(), error = %e, "sweep failed"),
            }
        }
        Ok(removed)
    }
}

/// Copy `chunks` into `file`, failing once more than `max_bytes` arrive
async fn write_limited<S, E>(
    file: &mut tokio::fs::File,
    chunks: &mut S,
    max_bytes: u64,
) -> Result<u64, StoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: StdError + Send + Sync + 'static,
{
    let mut size = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| StoreError::Read(Box::new(e)))?;
        size += chunk.len() as u64;
        if size > max_bytes {
            return Err(StoreError::TooLarge { limit: max_bytes });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(size)
}

/// `<field>-<uuid><.ext>`, keeping the original extension when it is sane
fn temp_file_name(field: &str, original_name: &str) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}-{}{}", field, uuid::Uuid::new_v4(), ext)
}
