//! Configuration types for document text extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Staging and output directories are
//! ordinary fields here rather than process-wide state, so every component
//! receives them at construction and tests can point them at temporary
//! directories.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Media types accepted by default.
pub const DEFAULT_ALLOWED_MEDIA_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/tiff",
    "image/bmp",
];

/// Configuration for a text extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use ocr_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .uploads_dir("/var/lib/ocr/uploads")
///     .outputs_dir("/var/lib/ocr/outputs")
///     .max_upload_bytes(10 * 1024 * 1024)
///     .page_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Staging root for accepted uploads. Default: `uploads`.
    pub uploads_dir: PathBuf,

    /// Output store for persisted results. Default: `outputs`.
    pub outputs_dir: PathBuf,

    /// Largest accepted upload in bytes. Default: 25 MiB.
    pub max_upload_bytes: u64,

    /// Media-type allow-list checked by the ingestor.
    pub allowed_media_types: Vec<String>,

    /// Rendering DPI used when rasterising PDF pages. Range: 72–600. Default: 200.
    ///
    /// Tesseract is tuned for glyphs around 20–30 px tall; 200 DPI puts body
    /// text of a typical scan in that band.
    pub dpi: u32,

    /// Maximum rendered page dimension (width or height) in pixels. Default: 3000.
    pub max_rendered_pixels: u32,

    /// Number of pages recognised concurrently within one request. Default: 4.
    ///
    /// Tesseract is CPU-bound, so values above the core count only add
    /// contention. `1` processes pages strictly sequentially.
    pub concurrency: usize,

    /// Per-page OCR timeout in seconds. Default: 60.
    pub page_timeout_secs: u64,

    /// Timeout for staging and output writes in seconds. Default: 30.
    pub io_timeout_secs: u64,

    /// Image normalisation toggles.
    pub normalize: NormalizeOptions,

    /// Tesseract invocation settings.
    pub tesseract: TesseractOptions,

    /// Explicit path to the pdfium shared library. `None` binds the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Use a PDF page's embedded text layer instead of OCR when it is non-empty.
    /// Default: false.
    pub prefer_embedded_text: bool,

    /// Separator inserted between pages in the concatenated text.
    pub page_separator: PageSeparator,

    /// Also persist `outputs/<id>.json` with the per-page breakdown. Default: true.
    pub write_page_breakdown: bool,

    /// Scan the extracted text for ID-card style identifiers. Default: true.
    pub detect_identifiers: bool,

    /// Optional per-page progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("outputs"),
            max_upload_bytes: 25 * 1024 * 1024,
            allowed_media_types: DEFAULT_ALLOWED_MEDIA_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dpi: 200,
            max_rendered_pixels: 3000,
            concurrency: 4,
            page_timeout_secs: 60,
            io_timeout_secs: 30,
            normalize: NormalizeOptions::default(),
            tesseract: TesseractOptions::default(),
            pdfium_library: None,
            prefer_embedded_text: false,
            page_separator: PageSeparator::default(),
            write_page_breakdown: true,
            detect_identifiers: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Destructured so a new field cannot be left out.
        let Self {
            uploads_dir,
            outputs_dir,
            max_upload_bytes,
            allowed_media_types,
            dpi,
            max_rendered_pixels,
            concurrency,
            page_timeout_secs,
            io_timeout_secs,
            normalize,
            tesseract,
            pdfium_library,
            prefer_embedded_text,
            page_separator,
            write_page_breakdown,
            detect_identifiers,
            progress_callback,
        } = self;

        f.debug_struct("ExtractionConfig")
            .field("uploads_dir", uploads_dir)
            .field("outputs_dir", outputs_dir)
            .field("max_upload_bytes", max_upload_bytes)
            .field("allowed_media_types", allowed_media_types)
            .field("dpi", dpi)
            .field("max_rendered_pixels", max_rendered_pixels)
            .field("concurrency", concurrency)
            .field("page_timeout_secs", page_timeout_secs)
            .field("io_timeout_secs", io_timeout_secs)
            .field("normalize", normalize)
            .field("tesseract", tesseract)
            .field("pdfium_library", pdfium_library)
            .field("prefer_embedded_text", prefer_embedded_text)
            .field("page_separator", page_separator)
            .field("write_page_breakdown", write_page_breakdown)
            .field("detect_identifiers", detect_identifiers)
            .field(
                "progress_callback",
                &progress_callback
                    .as_ref()
                    .map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `media_type` is on the allow-list (case-insensitive).
    pub fn allows_media_type(&self, media_type: &str) -> bool {
        self.allowed_media_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(media_type))
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.uploads_dir = dir.into();
        self
    }

    pub fn outputs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.outputs_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn allowed_media_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_media_types = types
            .into_iter()
            .map(|t| t.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn io_timeout_secs(mut self, secs: u64) -> Self {
        self.config.io_timeout_secs = secs;
        self
    }

    pub fn normalize(mut self, options: NormalizeOptions) -> Self {
        self.config.normalize = options;
        self
    }

    pub fn deskew(mut self, v: bool) -> Self {
        self.config.normalize.deskew = v;
        self
    }

    pub fn tesseract(mut self, options: TesseractOptions) -> Self {
        self.config.tesseract = options;
        self
    }

    pub fn tesseract_command(mut self, cmd: impl Into<PathBuf>) -> Self {
        self.config.tesseract.command = cmd.into();
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract.language = lang.into();
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn prefer_embedded_text(mut self, v: bool) -> Self {
        self.config.prefer_embedded_text = v;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn write_page_breakdown(mut self, v: bool) -> Self {
        self.config.write_page_breakdown = v;
        self
    }

    pub fn detect_identifiers(mut self, v: bool) -> Self {
        self.config.detect_identifiers = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_upload_bytes must be ≥ 1".into(),
            ));
        }
        if c.allowed_media_types.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "at least one media type must be allowed".into(),
            ));
        }
        if c.page_timeout_secs == 0 || c.io_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.tesseract.language.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "tesseract language must not be empty".into(),
            ));
        }
        if c.tesseract.psm > 13 {
            return Err(ExtractError::InvalidConfig(format!(
                "tesseract page segmentation mode must be 0–13, got {}",
                c.tesseract.psm
            )));
        }
        if c.uploads_dir == c.outputs_dir {
            return Err(ExtractError::InvalidConfig(
                "uploads_dir and outputs_dir must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Normalisation ────────────────────────────────────────────────────────

/// How the normaliser turns grayscale into black and white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binarization {
    /// Leave the page grayscale.
    Off,
    /// Per-page threshold chosen from the histogram (Otsu). (default)
    #[default]
    Otsu,
    /// Fixed threshold: pixels brighter than the value become white.
    Fixed(u8),
}

/// Toggles for the preprocessing chain applied to every page.
///
/// Grayscale conversion always runs; everything else can be switched off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    /// Longest edge after normalisation; larger pages are downscaled. Default: 4000.
    pub max_dimension: u32,
    /// Stretch the histogram to the full 0–255 range. Default: true.
    pub autocontrast: bool,
    /// 3×3 median filter. Default: true.
    pub denoise: bool,
    pub binarization: Binarization,
    /// Correct small rotations (±5°). Default: true.
    pub deskew: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: 4000,
            autocontrast: true,
            denoise: true,
            binarization: Binarization::default(),
            deskew: true,
        }
    }
}

/// Tesseract invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TesseractOptions {
    /// Binary to execute. Default: `tesseract` (resolved through `PATH`).
    pub command: PathBuf,
    /// Language pack(s), `+`-separated. Default: `eng`.
    pub language: String,
    /// Page segmentation mode. Default: 3 (fully automatic).
    pub psm: u8,
    /// Optional `tessedit_char_whitelist`.
    pub char_whitelist: Option<String>,
}

impl Default for TesseractOptions {
    fn default() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            psm: 3,
            char_whitelist: None,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How to separate pages in the concatenated text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line: "\n\n". (default)
    #[default]
    Blank,
    /// Form feed on its own line, as `pdftotext` emits.
    FormFeed,
    /// Visible marker with the page number: "--- page N ---"
    Marker,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::Blank => "\n\n".to_string(),
            PageSeparator::FormFeed => "\n\u{000C}\n".to_string(),
            PageSeparator::Marker => format!("\n\n--- page {} ---\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
