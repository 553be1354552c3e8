//! Result types produced by the extraction pipeline.
//!
//! [`PageImage`] is the in-memory hand-off between normalisation and
//! recognition and is never serialised. [`PageResult`] and
//! [`DocumentResult`] are what callers receive and what the aggregator
//! persists under `outputs/`.

use crate::error::PageError;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// One normalised raster page, ready for the recognition engine.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub document_id: Uuid,
    /// Zero-based position in the original document.
    pub page_index: usize,
    pub pixels: GrayImage,
}

impl PageImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Whether a page produced usable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Succeeded,
    Failed,
}

/// Where a page's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Recognised by the OCR engine. (default)
    #[default]
    Ocr,
    /// Copied from the PDF's embedded text layer.
    Embedded,
}

/// A non-fatal observation made while normalising a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum QualityWarning {
    /// Normalisation failed; the grayscale page was used as-is.
    NormalizationSkipped { detail: String },
    /// The page was larger than the configured maximum and was downscaled.
    Downscaled { width: u32, height: u32 },
    /// The page was nearly uniform; recognition is unlikely to find text.
    LowContrast,
}

/// Recognition output for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Zero-based page index.
    pub page_index: usize,
    /// Cleaned text; empty when the page failed or carried no text.
    pub text: String,
    /// Engine confidence in `[0, 1]`; `None` when the engine reported none.
    pub confidence: Option<f32>,
    pub status: PageStatus,
    pub source: TextSource,
    /// Page-local error, present exactly when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<QualityWarning>,
    pub duration_ms: u64,
}

impl PageResult {
    /// A successfully recognised page.
    pub fn succeeded(page_index: usize, text: String, confidence: Option<f32>) -> Self {
        Self {
            page_index,
            text,
            confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            status: PageStatus::Succeeded,
            source: TextSource::Ocr,
            error: None,
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    /// A page that failed with a page-local error.
    pub fn failed(page_index: usize, error: PageError) -> Self {
        Self {
            page_index,
            text: String::new(),
            confidence: None,
            status: PageStatus::Failed,
            source: TextSource::Ocr,
            error: Some(error),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PageStatus::Succeeded
    }

    /// 1-indexed page number for display.
    pub fn page_num(&self) -> usize {
        self.page_index + 1
    }
}

/// Overall outcome of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every page succeeded.
    Success,
    /// At least one page succeeded and at least one failed.
    Partial,
    /// No page succeeded, or the document had no pages.
    Failure,
}

impl DocumentStatus {
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if total == 0 || succeeded == 0 {
            DocumentStatus::Failure
        } else if succeeded == total {
            DocumentStatus::Success
        } else {
            DocumentStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Success => "success",
            DocumentStatus::Partial => "partial",
            DocumentStatus::Failure => "failure",
        }
    }
}

/// Timing and counts for one extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    pub rasterize_duration_ms: u64,
    pub recognize_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The document-level aggregate returned to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_id: Uuid,
    /// Sanitised original filename.
    pub filename: String,
    pub status: DocumentStatus,
    /// Succeeded pages' text in page order, joined by the page separator.
    pub text: String,
    /// Ordered by `page_index`; indices are unique.
    pub pages: Vec<PageResult>,
    /// Identifiers found in `text`, keyed by pattern name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, Vec<String>>,
    /// Persisted text artifact under the output store.
    pub artifact_path: PathBuf,
    pub stats: ExtractionStats,
}

impl DocumentResult {
    pub fn failed_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.iter().filter(|p| !p.is_success())
    }

    /// True when the document has pages and every one of them timed out.
    pub fn timed_out(&self) -> bool {
        !self.pages.is_empty()
            && self
                .pages
                .iter()
                .all(|p| matches!(p.error, Some(PageError::RecognitionTimeout { .. })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_counts() {
        assert_eq!(DocumentStatus::from_counts(3, 3), DocumentStatus::Success);
        assert_eq!(DocumentStatus::from_counts(1, 3), DocumentStatus::Partial);
        assert_eq!(DocumentStatus::from_counts(0, 3), DocumentStatus::Failure);
        assert_eq!(DocumentStatus::from_counts(0, 0), DocumentStatus::Failure);
    }

    #[test]
    fn confidence_is_clamped() {
        let p = PageResult::succeeded(0, "x".into(), Some(1.7));
        assert_eq!(p.confidence, Some(1.0));
        assert_eq!(p.page_num(), 1);
    }

    #[test]
    fn failed_page_serialises_error() {
        let p = PageResult::failed(2, PageError::RecognitionTimeout { page: 3, secs: 5 });
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["code"], "recognition_timeout");
        assert!(json.get("warnings").is_none());
    }
}
