//! Extraction entry points: upload bytes in, [`DocumentResult`] out.
//!
//! [`Extractor`] owns the configured ingestor, rasterisers and recognition
//! engine and drives one document through the pipeline:
//!
//! ```text
//! ingest ──▶ rasterize ──▶ (normalize ──▶ recognize) × N ──▶ aggregate ──▶ persist
//! ```
//!
//! Pages are recognised as the rasteriser emits them, concurrently up to
//! `concurrency`, and re-sorted by index before aggregation, so the result
//! order never depends on which page finished first. No more than
//! `concurrency` rendered pages wait for a free slot at any time.
//!
//! ## Cancellation
//!
//! Dropping the future returned by [`Extractor::extract_upload`] (for
//! example when an HTTP client disconnects) drops every in-flight page task;
//! engine child processes are killed on drop. A cleanup guard then removes
//! the staged input and any artifact already written for that document, so
//! an abandoned request leaves nothing behind. The same happens when the
//! extraction fails with a fatal error.

use crate::config::ExtractionConfig;
use crate::engine::{RecognitionEngine, TesseractEngine};
use crate::error::ExtractError;
use crate::output::DocumentResult;
use crate::pipeline::aggregate::{
    self, breakdown_artifact_path, temp_artifact_path, text_artifact_path,
};
use crate::pipeline::ingest::FileIngestor;
use crate::pipeline::recognize::{process_page, PageContext};
use crate::pipeline::render::{self, Rasterizers};
use futures::stream::{StreamExt, TryStreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Runs documents through the extraction pipeline.
///
/// Cheap to share: wrap it in an `Arc` and call it from as many tasks as
/// needed. It holds no per-document state.
pub struct Extractor {
    config: ExtractionConfig,
    ingestor: FileIngestor,
    rasterizers: Rasterizers,
    engine: Arc<dyn RecognitionEngine>,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// An extractor backed by `tesseract` and pdfium as configured.
    pub fn new(config: ExtractionConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building an extractor, optionally swapping the engine or
    /// rasterisers.
    pub fn builder(config: ExtractionConfig) -> ExtractorBuilder {
        ExtractorBuilder {
            config,
            engine: None,
            rasterizers: None,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Check that the recognition engine can be reached.
    pub async fn probe_engine(&self) -> Result<String, ExtractError> {
        self.engine
            .probe()
            .await
            .map_err(|e| ExtractError::EngineUnavailable {
                detail: e.to_string(),
            })
    }

    /// Extract text from an uploaded document.
    ///
    /// # Returns
    /// `Ok(DocumentResult)` whenever the document could be staged and
    /// opened, even if some or all pages failed; inspect
    /// [`DocumentResult::status`]. The result has already been persisted.
    ///
    /// # Errors
    /// Returns `Err(ExtractError)` only for fatal errors: a rejected upload,
    /// an unrecognised format, an unreachable engine or a storage failure.
    pub async fn extract_upload(
        &self,
        bytes: &[u8],
        filename: &str,
        media_type: Option<&str>,
    ) -> Result<DocumentResult, ExtractError> {
        let total_start = Instant::now();

        // ── Step 1: Stage the upload ─────────────────────────────────────
        let handle = self.ingestor.ingest(bytes, filename, media_type).await?;
        let mut owned = vec![handle.path.clone()];
        for artifact in [
            text_artifact_path(&self.config.outputs_dir, handle.id),
            breakdown_artifact_path(&self.config.outputs_dir, handle.id),
        ] {
            owned.push(temp_artifact_path(&artifact));
            owned.push(artifact);
        }
        let mut guard = CleanupGuard::new(owned);

        // ── Step 2: Start rasterising ────────────────────────────────────
        let mut page_stream =
            render::rasterize(&self.rasterizers, &handle, self.config.concurrency).await?;
        let total_pages = page_stream.total_pages;
        info!(
            document_id = %handle.id,
            kind = ?page_stream.kind,
            total_pages,
            "Rasterising"
        );

        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_extraction_start(handle.id, total_pages);
        }

        // ── Step 3: Normalise + recognise pages as they arrive ───────────
        let recognize_start = Instant::now();
        let ctx = PageContext {
            document_id: handle.id,
            engine: self.engine.as_ref(),
            normalize: &self.config.normalize,
            page_timeout_secs: self.config.page_timeout_secs,
        };
        let ctx = &ctx;
        let page_results = page_stream
            .pages
            .by_ref()
            .map(|page| async move {
                if let Some(cb) = cb {
                    cb.on_page_start(page.index + 1, total_pages);
                }
                let result = process_page(ctx, page).await?;
                if let Some(cb) = cb {
                    match &result.error {
                        None => cb.on_page_complete(&result, total_pages),
                        Some(e) => cb.on_page_error(&result, e, total_pages),
                    }
                }
                Ok::<_, ExtractError>(result)
            })
            .buffer_unordered(self.config.concurrency)
            .try_collect::<Vec<_>>()
            .await?;
        let rasterize_duration_ms = page_stream.finish().await?;
        let recognize_duration_ms = recognize_start.elapsed().as_millis() as u64;

        if page_results.len() != total_pages {
            return Err(ExtractError::Internal(format!(
                "rasteriser announced {} pages but produced {}",
                total_pages,
                page_results.len()
            )));
        }

        // ── Step 4: Aggregate and persist ────────────────────────────────
        let mut result = aggregate::aggregate(
            handle.id,
            handle.filename.clone(),
            page_results,
            &self.config,
        );
        result.stats.rasterize_duration_ms = rasterize_duration_ms;
        result.stats.recognize_duration_ms = recognize_duration_ms;
        result.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        aggregate::persist(&result, &self.config).await?;

        if let Some(cb) = cb {
            cb.on_extraction_complete(&result);
        }

        guard.disarm();
        info!(
            document_id = %result.document_id,
            status = result.status.as_str(),
            "Extraction complete: {}/{} pages, {}ms total",
            result.stats.succeeded_pages,
            total_pages,
            result.stats.total_duration_ms
        );
        Ok(result)
    }

    /// Extract text from a file on disk.
    ///
    /// The file is copied into the staging directory like any upload; its
    /// media type is inferred from the extension.
    pub async fn extract_file(&self, path: impl AsRef<Path>) -> Result<DocumentResult, ExtractError> {
        let path = path.as_ref();
        let secs = self.config.io_timeout_secs;
        let bytes = timeout(Duration::from_secs(secs), tokio::fs::read(path))
            .await
            .map_err(|_| ExtractError::storage_timeout(path, secs))?
            .map_err(|source| ExtractError::StorageFailure {
                path: path.to_path_buf(),
                source,
            })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        debug!("Read {} bytes from {}", bytes.len(), path.display());

        self.extract_upload(&bytes, &filename, None).await
    }
}

/// Extract text from a file with a one-off [`Extractor`].
///
/// # Example
/// ```rust,no_run
/// use ocr_extract::{extract_file, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default();
/// let result = extract_file("scan.pdf", &config).await?;
/// println!("{} ({})", result.text, result.status.as_str());
/// # Ok(())
/// # }
/// ```
pub async fn extract_file(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentResult, ExtractError> {
    Extractor::new(config.clone()).extract_file(path).await
}

/// Synchronous wrapper around [`extract_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_file_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentResult, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_file(path, config))
}

/// Builder for [`Extractor`].
pub struct ExtractorBuilder {
    config: ExtractionConfig,
    engine: Option<Arc<dyn RecognitionEngine>>,
    rasterizers: Option<Rasterizers>,
}

impl ExtractorBuilder {
    /// Use this engine instead of `tesseract`.
    pub fn engine(mut self, engine: Arc<dyn RecognitionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use these rasterisers instead of the built-in image and PDF ones.
    pub fn rasterizers(mut self, rasterizers: Rasterizers) -> Self {
        self.rasterizers = Some(rasterizers);
        self
    }

    pub fn build(self) -> Extractor {
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(TesseractEngine::from_config(&self.config)));
        let rasterizers = self
            .rasterizers
            .unwrap_or_else(|| Rasterizers::from_config(&self.config));
        Extractor {
            ingestor: FileIngestor::new(&self.config),
            config: self.config,
            rasterizers,
            engine,
        }
    }
}

/// Removes a document's files unless disarmed.
struct CleanupGuard {
    paths: Vec<PathBuf>,
    armed: bool,
}

impl CleanupGuard {
    fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }
}
