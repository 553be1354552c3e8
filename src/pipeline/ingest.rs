//! Upload ingestion: validate an uploaded byte stream and stage it on disk.
//!
//! Every accepted upload gets a fresh UUID v4 document id and is written to
//! `<uploads_dir>/<document-id>.<ext>` with `create_new`, so concurrent
//! requests never share or clobber a path. Size and media type are checked
//! before the filesystem is touched.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generic type browsers and curl send when they don't know better.
const OCTET_STREAM: &str = "application/octet-stream";

/// One staged input file. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadHandle {
    pub id: Uuid,
    /// Sanitised original filename.
    pub filename: String,
    /// Declared media type, resolved from the extension when generic.
    pub media_type: String,
    pub size: u64,
    pub path: PathBuf,
}

impl UploadHandle {
    /// Delete the staged file. Missing files are not an error.
    pub async fn remove(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Validates uploads and writes them under the staging root.
#[derive(Debug, Clone)]
pub struct FileIngestor {
    config: ExtractionConfig,
}

impl FileIngestor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.config.uploads_dir
    }

    /// Validate `bytes` and stage them unchanged.
    ///
    /// # Errors
    /// - [`ExtractError::UploadTooLarge`], [`ExtractError::MediaTypeNotAllowed`],
    ///   [`ExtractError::EmptyUpload`] — rejected before any write
    /// - [`ExtractError::StorageFailure`] — directory creation or write failed
    ///   or exceeded the I/O timeout
    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        declared_media_type: Option<&str>,
    ) -> Result<UploadHandle, ExtractError> {
        let filename = sanitize_filename(filename);
        let size = bytes.len() as u64;

        let max = self.config.max_upload_bytes;
        if size > max {
            return Err(ExtractError::UploadTooLarge { size, max });
        }

        let media_type = resolve_media_type(declared_media_type, &filename);
        if !self.config.allows_media_type(&media_type) {
            return Err(ExtractError::MediaTypeNotAllowed {
                media_type,
                allowed: self.config.allowed_media_types.join(", "),
            });
        }

        if bytes.is_empty() {
            return Err(ExtractError::EmptyUpload { filename });
        }

        let id = Uuid::new_v4();
        let ext = extension_for(&media_type, &filename);
        let path = self.uploads_dir().join(format!("{}.{}", id, ext));

        let secs = self.config.io_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), self.write_new(&path, bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                remove_partial(&path).await;
                return Err(e);
            }
            Err(_) => {
                remove_partial(&path).await;
                return Err(ExtractError::storage_timeout(&path, secs));
            }
        }

        info!(
            document_id = %id,
            filename = %filename,
            media_type = %media_type,
            size,
            "Staged upload at {}",
            path.display()
        );

        Ok(UploadHandle {
            id,
            filename,
            media_type,
            size,
            path,
        })
    }

    async fn write_new(&self, path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
        let storage = |source| ExtractError::StorageFailure {
            path: path.to_path_buf(),
            source,
        };

        let uploads_dir = self.uploads_dir();
        tokio::fs::create_dir_all(uploads_dir)
            .await
            .map_err(|source| ExtractError::StorageFailure {
                path: uploads_dir.to_path_buf(),
                source,
            })?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(storage)?;
        file.write_all(bytes).await.map_err(storage)?;
        file.flush().await.map_err(storage)?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial upload {}: {}", path.display(), e);
        }
    }
}

/// Keep alphanumerics, `-`, `_`, `.` and spaces; cap at 255 characters.
///
/// Path separators never survive, so the result is safe to log and to
/// echo back to clients.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .take(255)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Resolve the effective media type.
///
/// Parameters (`; charset=...`) are dropped. A missing or
/// `application/octet-stream` declaration falls back to the filename
/// extension.
pub fn resolve_media_type(declared: Option<&str>, filename: &str) -> String {
    let declared = declared
        .and_then(|d| d.split(';').next())
        .map(|d| d.trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty());

    match declared {
        Some(d) if d != OCTET_STREAM => d,
        _ => media_type_from_extension(filename)
            .map(str::to_string)
            .unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

fn media_type_from_extension(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "tif" | "tiff" => Some("image/tiff"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// File extension used for the staged copy.
pub fn extension_for(media_type: &str, filename: &str) -> String {
    let known = match media_type {
        "application/pdf" => Some("pdf"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/tiff" => Some("tif"),
        "image/bmp" => Some("bmp"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}
