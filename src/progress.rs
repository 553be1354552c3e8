//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each page. The CLI renders them as a
//! progress bar; the HTTP server forwards them to `tracing`.
//!
//! # Example
//!
//! ```rust
//! use ocr_extract::{ExtractionProgressCallback, ExtractionConfig, PageResult};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     recognised: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page: &PageResult, total_pages: usize) {
//!         self.recognised.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {:?}", page.page_num(), total_pages, page.confidence);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     recognised: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PageError;
use crate::output::{DocumentResult, PageResult};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called by the extraction pipeline as it processes each page.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the page
/// methods may be called concurrently and out of page order. All methods
/// default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is recognised.
    fn on_extraction_start(&self, document_id: Uuid, total_pages: usize) {
        let _ = (document_id, total_pages);
    }

    /// Called just before a page is normalised and sent to the engine.
    ///
    /// `page_num` is 1-indexed.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page produced text.
    fn on_page_complete(&self, page: &PageResult, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page failed with a page-local error.
    fn on_page_error(&self, page: &PageResult, error: &PageError, total_pages: usize) {
        let _ = (page, error, total_pages);
    }

    /// Called with the aggregated result once it has been persisted.
    fn on_extraction_complete(&self, result: &DocumentResult) {
        let _ = result;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Forwards every event to `tracing`. Used by the HTTP server.
pub struct TracingProgressCallback;

impl ExtractionProgressCallback for TracingProgressCallback {
    fn on_extraction_start(&self, document_id: Uuid, total_pages: usize) {
        info!(%document_id, total_pages, "extraction started");
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        debug!(page_num, total_pages, "page started");
    }

    fn on_page_complete(&self, page: &PageResult, total_pages: usize) {
        debug!(
            page_num = page.page_num(),
            total_pages,
            chars = page.text.chars().count(),
            confidence = page.confidence,
            duration_ms = page.duration_ms,
            "page recognised"
        );
    }

    fn on_page_error(&self, page: &PageResult, error: &PageError, total_pages: usize) {
        warn!(
            page_num = page.page_num(),
            total_pages,
            code = error.code(),
            "page failed: {}",
            error
        );
    }

    fn on_extraction_complete(&self, result: &DocumentResult) {
        info!(
            document_id = %result.document_id,
            status = result.status.as_str(),
            succeeded = result.stats.succeeded_pages,
            failed = result.stats.failed_pages,
            "extraction complete"
        );
    }
}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
