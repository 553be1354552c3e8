//! Fakes shared by the integration tests.
//!
//! `ScriptedEngine` answers per page index with a delay and an outcome;
//! `FakeDocument` stands in for pdfium and yields N blank pages for any
//! upload starting with `%PDF`.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use ocr_extract::{
    EngineError, ExtractError, ExtractionConfig, Extractor, PageContent, PageError, PageImage,
    PageSink, RasterPage, Rasterizer, Rasterizers, Recognition, RecognitionEngine, UploadHandle,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Outcome {
    Text(String, f32),
    Fail,
    Hang,
    Unavailable,
}

pub struct ScriptedEngine {
    script: Box<dyn Fn(usize) -> (u64, Outcome) + Send + Sync>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    /// `script(page_index)` returns `(delay_ms, outcome)`.
    pub fn new(script: impl Fn(usize) -> (u64, Outcome) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Every page reads "page N" with confidence 0.9.
    pub fn echo() -> Arc<Self> {
        Self::new(|i| (0, Outcome::Text(format!("page {}", i + 1), 0.9)))
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    async fn recognize(&self, image: &PageImage) -> Result<Recognition, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (delay_ms, outcome) = (self.script)(image.page_index);
        let result = match outcome {
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(EngineError::Failed("woke up".into()))
            }
            other => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                match other {
                    Outcome::Text(text, confidence) => Ok(Recognition {
                        text,
                        confidence: Some(confidence),
                    }),
                    Outcome::Fail => Err(EngineError::Failed("engine crashed".into())),
                    Outcome::Unavailable => Err(EngineError::Unavailable("not installed".into())),
                    Outcome::Hang => unreachable!(),
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn probe(&self) -> Result<String, EngineError> {
        Ok("scripted 1.0".into())
    }
}

/// Yields `pages` blank pages; indices listed in `broken` fail to decode.
pub struct FakeDocument {
    pub pages: usize,
    pub broken: Vec<usize>,
}

impl Rasterizer for FakeDocument {
    fn rasterize(&self, _handle: &UploadHandle, sink: &mut dyn PageSink) -> Result<(), ExtractError> {
        sink.begin(self.pages)?;
        for index in 0..self.pages {
            let content = if self.broken.contains(&index) {
                PageContent::Failed(PageError::PageDecode {
                    page: index + 1,
                    detail: "bad page object".into(),
                })
            } else {
                PageContent::Image(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                    64,
                    64,
                    Luma([255]),
                )))
            };
            sink.page(RasterPage { index, content })?;
        }
        Ok(())
    }
}

/// Bytes that sniff as a PDF.
pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n% fake document for tests\n";

pub fn config_in(dir: &Path) -> ExtractionConfig {
    ExtractionConfig::builder()
        .uploads_dir(dir.join("uploads"))
        .outputs_dir(dir.join("outputs"))
        .page_timeout_secs(1)
        .build()
        .unwrap()
}

pub fn extractor(
    config: ExtractionConfig,
    engine: Arc<ScriptedEngine>,
    document_pages: usize,
) -> Extractor {
    extractor_with_broken(config, engine, document_pages, vec![])
}

pub fn extractor_with_broken(
    config: ExtractionConfig,
    engine: Arc<ScriptedEngine>,
    document_pages: usize,
    broken: Vec<usize>,
) -> Extractor {
    let rasterizers = Rasterizers {
        document: Arc::new(FakeDocument {
            pages: document_pages,
            broken,
        }),
        ..Rasterizers::from_config(&config)
    };
    Extractor::builder(config)
        .engine(engine)
        .rasterizers(rasterizers)
        .build()
}

/// A small PNG with a dark bar on white.
pub fn sample_png() -> Vec<u8> {
    let mut img = GrayImage::from_pixel(120, 80, Luma([255]));
    for y in 30..40 {
        for x in 10..110 {
            img.put_pixel(x, y, Luma([0]));
        }
    }
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Regular files directly under `dir`; empty when it doesn't exist.
pub fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default()
}
