//! Error types for the ocr-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the extraction cannot proceed at all
//!   (rejected upload, unknown file format, OCR engine missing, disk full).
//!   Returned as `Err(ExtractError)` from the top-level `extract*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (corrupt page,
//!   engine timeout, engine crash on one image) but sibling pages are fine.
//!   Stored inside [`crate::output::PageResult`] so callers can inspect
//!   partial success rather than losing the whole document to one bad page.
//!
//! [`ErrorKind`] collapses both into the small taxonomy the HTTP transport
//! maps onto status codes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocr-extract library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload is larger than the configured limit.
    #[error("Upload of {size} bytes exceeds the {max} byte limit")]
    UploadTooLarge { size: u64, max: u64 },

    /// The declared (or inferred) media type is not in the allow-list.
    #[error("Media type '{media_type}' is not accepted (allowed: {allowed})")]
    MediaTypeNotAllowed { media_type: String, allowed: String },

    /// The upload carried no bytes.
    #[error("Upload '{filename}' is empty")]
    EmptyUpload { filename: String },

    /// The staged bytes are not a recognised image or PDF.
    #[error("File '{path}' is not a supported document or image\nFirst bytes: {magic:?}")]
    UnsupportedFormat { path: PathBuf, magic: Vec<u8> },

    /// The file claims to be a PDF but cannot be opened (corrupt, encrypted).
    #[error("Document '{path}' cannot be opened: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    // ── Engine / renderer errors ──────────────────────────────────────────
    /// The OCR engine binary or library cannot be reached.
    #[error("OCR engine unavailable: {detail}\nInstall tesseract or set TESSERACT_CMD.")]
    EngineUnavailable { detail: String },

    /// The PDF rendering library could not be loaded.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    RendererUnavailable(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Writing to the staging or output directory failed.
    #[error("Storage failure at '{path}': {source}")]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Build a [`ExtractError::StorageFailure`] for an I/O operation that
    /// exceeded its deadline.
    pub(crate) fn storage_timeout(path: impl Into<PathBuf>, secs: u64) -> Self {
        ExtractError::StorageFailure {
            path: path.into(),
            source: std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("I/O did not complete within {secs}s"),
            ),
        }
    }

    /// Coarse classification used for status mapping and logging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::UploadTooLarge { .. }
            | ExtractError::MediaTypeNotAllowed { .. }
            | ExtractError::EmptyUpload { .. } => ErrorKind::InvalidInput,
            ExtractError::UnsupportedFormat { .. } | ExtractError::CorruptDocument { .. } => {
                ErrorKind::UnsupportedFormat
            }
            ExtractError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
            ExtractError::RendererUnavailable(_) => ErrorKind::Internal,
            ExtractError::StorageFailure { .. } => ErrorKind::StorageFailure,
            ExtractError::InvalidConfig(_) | ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// The extraction continues with the sibling pages.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PageError {
    /// The page could not be rasterised.
    #[error("Page {page}: decode failed: {detail}")]
    PageDecode { page: usize, detail: String },

    /// The OCR engine did not answer within the per-page budget.
    #[error("Page {page}: recognition timed out after {secs}s")]
    RecognitionTimeout { page: usize, secs: u64 },

    /// The OCR engine ran but reported an error for this page.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailure { page: usize, detail: String },
}

impl PageError {
    /// Stable machine-readable code, matching the serialised `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            PageError::PageDecode { .. } => "page_decode",
            PageError::RecognitionTimeout { .. } => "recognition_timeout",
            PageError::RecognitionFailure { .. } => "recognition_failure",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PageError::PageDecode { .. } => ErrorKind::PageDecode,
            PageError::RecognitionTimeout { .. } => ErrorKind::RecognitionTimeout,
            PageError::RecognitionFailure { .. } => ErrorKind::RecognitionFailure,
        }
    }
}

/// The error taxonomy shared by fatal and page-local errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedFormat,
    PageDecode,
    RecognitionTimeout,
    RecognitionFailure,
    EngineUnavailable,
    StorageFailure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::PageDecode => "page_decode",
            ErrorKind::RecognitionTimeout => "recognition_timeout",
            ErrorKind::RecognitionFailure => "recognition_failure",
            ErrorKind::EngineUnavailable => "engine_unavailable",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Error returned by a [`crate::engine::RecognitionEngine`].
///
/// The split mirrors the fatal/page-local split above: an unreachable
/// engine aborts the document, a failed recognition only fails the page.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}
