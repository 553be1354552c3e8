//! Per-page processing: normalise one raster page and run the engine on it.
//!
//! [`process_page`] turns a [`RasterPage`] into a [`PageResult`]. It never
//! retries: each page gets at most one engine invocation per request. Every
//! failure becomes a failed page except an unreachable engine, which is the
//! only `Err` and aborts the document.

use crate::config::NormalizeOptions;
use crate::engine::RecognitionEngine;
use crate::error::{EngineError, ExtractError, PageError};
use crate::output::{PageImage, PageResult, TextSource};
use crate::pipeline::normalize::normalize_page;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::render::{PageContent, RasterPage};
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything a page task needs besides the page itself.
pub struct PageContext<'a> {
    pub document_id: Uuid,
    pub engine: &'a dyn RecognitionEngine,
    pub normalize: &'a NormalizeOptions,
    pub page_timeout_secs: u64,
}

/// Process one page slot.
pub async fn process_page(
    ctx: &PageContext<'_>,
    page: RasterPage,
) -> Result<PageResult, ExtractError> {
    let start = Instant::now();
    let index = page.index;

    let mut result = match page.content {
        PageContent::Failed(err) => PageResult::failed(index, err),
        PageContent::Text(text) => {
            let mut r = PageResult::succeeded(index, clean_text(&text), None);
            r.source = TextSource::Embedded;
            r
        }
        PageContent::Image(raw) => {
            let document_id = ctx.document_id;
            let options = ctx.normalize.clone();
            let normalized = tokio::task::spawn_blocking(move || {
                normalize_page(document_id, index, &raw, &options)
            })
            .await;

            match normalized {
                Ok((image, warnings)) => {
                    let mut r = recognize_page(ctx, &image).await?;
                    r.warnings = warnings;
                    r
                }
                Err(e) => PageResult::failed(
                    index,
                    PageError::PageDecode {
                        page: index + 1,
                        detail: format!("normalisation task failed: {e}"),
                    },
                ),
            }
        }
    };

    result.duration_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

/// Run the engine on one normalised page under the per-page timeout.
pub async fn recognize_page(
    ctx: &PageContext<'_>,
    image: &PageImage,
) -> Result<PageResult, ExtractError> {
    let index = image.page_index;
    let page = index + 1;
    let secs = ctx.page_timeout_secs;

    match timeout(Duration::from_secs(secs), ctx.engine.recognize(image)).await {
        Ok(Ok(recognition)) => {
            let text = clean_text(&recognition.text);
            debug!(
                document_id = %ctx.document_id,
                page,
                chars = text.len(),
                "Page recognised"
            );
            Ok(PageResult::succeeded(index, text, recognition.confidence))
        }
        Ok(Err(EngineError::Unavailable(detail))) => {
            Err(ExtractError::EngineUnavailable { detail })
        }
        Ok(Err(EngineError::Failed(detail))) => {
            warn!(document_id = %ctx.document_id, page, "Recognition failed: {}", detail);
            Ok(PageResult::failed(
                index,
                PageError::RecognitionFailure { page, detail },
            ))
        }
        Err(_) => {
            warn!(document_id = %ctx.document_id, page, "Recognition timed out after {}s", secs);
            Ok(PageResult::failed(
                index,
                PageError::RecognitionTimeout { page, secs },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Recognition;
    use crate::output::PageStatus;
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Text(&'static str, f32),
        Fail,
        Hang,
        Missing,
    }

    struct ScriptedEngine {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedEngine {
        async fn recognize(&self, _image: &PageImage) -> Result<Recognition, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Text(text, confidence) => Ok(Recognition {
                    text: text.to_string(),
                    confidence: Some(confidence),
                }),
                Behaviour::Fail => Err(EngineError::Failed("segfault".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(EngineError::Failed("unreachable".into()))
                }
                Behaviour::Missing => Err(EngineError::Unavailable("not installed".into())),
            }
        }

        async fn probe(&self) -> Result<String, EngineError> {
            Ok("scripted".into())
        }
    }

    fn image_page(index: usize) -> RasterPage {
        RasterPage {
            index,
            content: PageContent::Image(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                32,
                32,
                Luma([255]),
            ))),
        }
    }

    fn ctx<'a>(engine: &'a ScriptedEngine, normalize: &'a NormalizeOptions) -> PageContext<'a> {
        PageContext {
            document_id: Uuid::nil(),
            engine,
            normalize,
            page_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn recognised_text_is_cleaned() {
        let engine = ScriptedEngine::new(Behaviour::Text("Hello  \r\n\r\n\r\n\r\nworld\n", 0.95));
        let opts = NormalizeOptions::default();
        let r = process_page(&ctx(&engine, &opts), image_page(3)).await.unwrap();
        assert_eq!(r.page_index, 3);
        assert_eq!(r.status, PageStatus::Succeeded);
        assert_eq!(r.text, "Hello\n\nworld");
        assert_eq!(r.confidence, Some(0.95));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn engine_failure_is_page_local() {
        let engine = ScriptedEngine::new(Behaviour::Fail);
        let opts = NormalizeOptions::default();
        let r = process_page(&ctx(&engine, &opts), image_page(0)).await.unwrap();
        assert_eq!(r.status, PageStatus::Failed);
        assert!(r.text.is_empty());
        assert!(matches!(r.error, Some(PageError::RecognitionFailure { page: 1, .. })));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1, "no retry");
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let engine = ScriptedEngine::new(Behaviour::Hang);
        let opts = NormalizeOptions::default();
        let r = process_page(&ctx(&engine, &opts), image_page(1)).await.unwrap();
        assert_eq!(
            r.error,
            Some(PageError::RecognitionTimeout { page: 2, secs: 1 })
        );
    }

    #[tokio::test]
    async fn unavailable_engine_is_fatal() {
        let engine = ScriptedEngine::new(Behaviour::Missing);
        let opts = NormalizeOptions::default();
        let err = process_page(&ctx(&engine, &opts), image_page(0)).await.unwrap_err();
        assert!(matches!(err, ExtractError::EngineUnavailable { .. }));
    }

    #[tokio::test]
    async fn decode_failures_and_text_layers_skip_the_engine() {
        let engine = ScriptedEngine::new(Behaviour::Fail);
        let opts = NormalizeOptions::default();
        let c = ctx(&engine, &opts);

        let failed = RasterPage {
            index: 0,
            content: PageContent::Failed(PageError::PageDecode {
                page: 1,
                detail: "bad xref".into(),
            }),
        };
        let r = process_page(&c, failed).await.unwrap();
        assert!(matches!(r.error, Some(PageError::PageDecode { .. })));

        let embedded = RasterPage {
            index: 1,
            content: PageContent::Text("Embedded text  \r\n".into()),
        };
        let r = process_page(&c, embedded).await.unwrap();
        assert_eq!(r.text, "Embedded text");
        assert_eq!(r.source, TextSource::Embedded);

        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
