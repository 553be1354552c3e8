//! # ocr-extract
//!
//! Extract plain text from uploaded PDFs and images with OCR.
//!
//! A document is staged on disk, split into page rasters, cleaned up for
//! recognition, read by an OCR engine page by page, and folded back into one
//! ordered result that is persisted next to the upload. Pages fail
//! independently: a document with one unreadable page still returns the
//! text of the others, marked `partial`.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Ingest     validate size / media type, stage as uploads/<id>.<ext>
//!  ├─ 2. Rasterize  image → 1 page, PDF → N pages via pdfium (spawn_blocking)
//!  ├─ 3. Normalize  grayscale, autocontrast, denoise, binarise, deskew
//!  ├─ 4. Recognize  tesseract per page, bounded concurrency + timeout
//!  ├─ 5. Clean      deterministic text cleanup
//!  └─ 6. Aggregate  ordered DocumentResult → outputs/<id>.txt (+ .json)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_extract::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = Extractor::new(ExtractionConfig::default());
//!     let bytes = std::fs::read("passport.png")?;
//!     let result = extractor
//!         .extract_upload(&bytes, "passport.png", Some("image/png"))
//!         .await?;
//!     println!("{}", result.text);
//!     eprintln!("status: {}, ids: {:?}", result.status.as_str(), result.identifiers);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | via cli | HTTP transport (axum + tower-http) |
//! | `cli`    | on      | Enables the `ocr-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable default features when using only the library:
//! ```toml
//! ocr-extract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! The `tesseract` binary must be on `PATH` (or set via
//! [`ExtractionConfigBuilder::tesseract_command`]) and PDF input needs the
//! pdfium shared library (system-wide or via
//! [`ExtractionConfigBuilder::pdfium_library`]).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod identifiers;
pub mod output;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Binarization, ExtractionConfig, ExtractionConfigBuilder, NormalizeOptions, PageSeparator,
    TesseractOptions,
};
pub use engine::{Recognition, RecognitionEngine, TesseractEngine};
pub use error::{EngineError, ErrorKind, ExtractError, PageError};
pub use extract::{extract_file, extract_file_sync, Extractor, ExtractorBuilder};
pub use identifiers::find_identifiers;
pub use output::{
    DocumentResult, DocumentStatus, ExtractionStats, PageImage, PageResult, PageStatus,
    QualityWarning, TextSource,
};
pub use pipeline::ingest::UploadHandle;
pub use pipeline::render::{
    CollectPages, InputKind, PageContent, PageSink, PageStream, RasterPage, Rasterizer, Rasterizers,
};
pub use progress::{
    ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, TracingProgressCallback,
};
