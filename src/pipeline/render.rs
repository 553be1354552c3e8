//! Page rasterisation: turn a staged upload into a stream of pages.
//!
//! The input kind is a closed set ([`InputKind`]) chosen by sniffing the
//! staged file's magic bytes, and each kind is served by a [`Rasterizer`].
//! Rasterisers are synchronous and push pages into a [`PageSink`] one at a
//! time. [`rasterize`] runs them inside `spawn_blocking`, because pdfium
//! and the image decoders are CPU-bound and pdfium is not async-safe, and
//! hands the pages over through a bounded channel. A long document is
//! therefore never held in memory as a whole: the rasteriser stalls once
//! `buffer` pages are waiting for recognition.
//!
//! A page that fails to decode becomes a [`PageContent::Failed`] placeholder
//! in its slot. Only an unrecognised or unopenable file aborts the document.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::pipeline::ingest::UploadHandle;
use image::{DynamicImage, ImageBuffer, ImageFormat, ImageReader};
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType as TiffColorType;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Leading bytes read for format detection.
const MAGIC_LEN: u64 = 32;

/// Header sizes of the BMP DIB variants (CORE, INFO, V2, V3, OS/2 2, V4, V5).
const BMP_DIB_HEADER_SIZES: [u32; 7] = [12, 40, 52, 56, 64, 108, 124];

/// The kinds of input the pipeline knows how to rasterise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A raster image (PNG, JPEG, WebP, BMP, or TIFF with one or more frames).
    Image,
    /// A paginated document (PDF).
    MultiPageDocument,
}

impl InputKind {
    /// Classify a file from its leading bytes.
    pub fn sniff(magic: &[u8]) -> Option<Self> {
        if magic.starts_with(b"%PDF") {
            return Some(InputKind::MultiPageDocument);
        }
        let is_image = magic.starts_with(b"\x89PNG\r\n\x1a\n")
            || magic.starts_with(&[0xFF, 0xD8, 0xFF])
            || (magic.len() >= 12 && &magic[..4] == b"RIFF" && &magic[8..12] == b"WEBP")
            || magic.starts_with(b"II*\0")
            || magic.starts_with(b"MM\0*")
            || is_bmp_header(magic);
        is_image.then_some(InputKind::Image)
    }
}

/// `BM`, zeroed reserved fields and a known DIB header size.
fn is_bmp_header(magic: &[u8]) -> bool {
    if magic.len() < 18 || !magic.starts_with(b"BM") {
        return false;
    }
    let reserved_clear = magic[6..10].iter().all(|&b| b == 0);
    let dib_size = u32::from_le_bytes([magic[14], magic[15], magic[16], magic[17]]);
    reserved_clear && BMP_DIB_HEADER_SIZES.contains(&dib_size)
}

/// What occupies one page slot after rasterisation.
#[derive(Debug, Clone)]
pub enum PageContent {
    /// Raw raster, to be normalised and recognised.
    Image(DynamicImage),
    /// Text lifted from an embedded PDF text layer; OCR is skipped.
    Text(String),
    /// The page could not be decoded.
    Failed(PageError),
}

/// One page slot, in native document order.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// Zero-based page index.
    pub index: usize,
    pub content: PageContent,
}

impl RasterPage {
    fn failed(index: usize, detail: impl Into<String>) -> Self {
        Self {
            index,
            content: PageContent::Failed(PageError::PageDecode {
                page: index + 1,
                detail: detail.into(),
            }),
        }
    }
}

/// Receives pages from a [`Rasterizer`].
///
/// `begin` is called exactly once, before the first page. An error from
/// either method aborts rasterisation and is returned by the rasteriser.
pub trait PageSink {
    fn begin(&mut self, total_pages: usize) -> Result<(), ExtractError>;
    fn page(&mut self, page: RasterPage) -> Result<(), ExtractError>;
}

/// A sink that keeps every page in memory.
#[derive(Debug, Default)]
pub struct CollectPages {
    pub total_pages: Option<usize>,
    pub pages: Vec<RasterPage>,
}

impl PageSink for CollectPages {
    fn begin(&mut self, total_pages: usize) -> Result<(), ExtractError> {
        self.total_pages = Some(total_pages);
        self.pages.reserve(total_pages);
        Ok(())
    }

    fn page(&mut self, page: RasterPage) -> Result<(), ExtractError> {
        self.pages.push(page);
        Ok(())
    }
}

/// Converts a staged upload into pages.
///
/// Implementations announce the page count, then emit every page in
/// native order with `index` matching the position. Pages are never
/// skipped; an undecodable one is emitted as [`PageContent::Failed`].
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, handle: &UploadHandle, sink: &mut dyn PageSink)
        -> Result<(), ExtractError>;
}

/// The rasteriser used for each [`InputKind`].
#[derive(Clone)]
pub struct Rasterizers {
    pub image: Arc<dyn Rasterizer>,
    pub document: Arc<dyn Rasterizer>,
}

impl Rasterizers {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            image: Arc::new(ImageRasterizer),
            document: Arc::new(PdfRasterizer::from_config(config)),
        }
    }

    pub fn for_kind(&self, kind: InputKind) -> Arc<dyn Rasterizer> {
        match kind {
            InputKind::Image => Arc::clone(&self.image),
            InputKind::MultiPageDocument => Arc::clone(&self.document),
        }
    }
}

/// Detect the input kind of a staged file.
pub fn detect_kind(path: &Path) -> Result<InputKind, ExtractError> {
    let mut magic = Vec::with_capacity(MAGIC_LEN as usize);
    File::open(path)
        .and_then(|f| f.take(MAGIC_LEN).read_to_end(&mut magic))
        .map_err(|e| ExtractError::Internal(format!("cannot read staged file: {e}")))?;

    InputKind::sniff(&magic).ok_or_else(|| ExtractError::UnsupportedFormat {
        path: path.to_path_buf(),
        magic: magic.iter().take(8).copied().collect(),
    })
}

/// Pages of one document, arriving as the rasteriser produces them.
pub struct PageStream {
    pub kind: InputKind,
    pub total_pages: usize,
    pub pages: ReceiverStream<RasterPage>,
    producer: JoinHandle<Result<u64, ExtractError>>,
}

impl PageStream {
    /// Wait for the rasteriser to finish.
    ///
    /// Returns its wall time in milliseconds, or the error that stopped it
    /// early. Call after `pages` is drained.
    pub async fn finish(self) -> Result<u64, ExtractError> {
        join_producer(self.producer).await
    }
}

async fn join_producer(
    producer: JoinHandle<Result<u64, ExtractError>>,
) -> Result<u64, ExtractError> {
    producer
        .await
        .map_err(|e| ExtractError::Internal(format!("Rasterise task panicked: {}", e)))?
}

/// Forwards pages from the blocking rasteriser to the async consumer.
struct ChannelSink {
    kind: InputKind,
    announce: Option<oneshot::Sender<(InputKind, usize)>>,
    pages: mpsc::Sender<RasterPage>,
}

impl PageSink for ChannelSink {
    fn begin(&mut self, total_pages: usize) -> Result<(), ExtractError> {
        if let Some(tx) = self.announce.take() {
            // A dropped receiver surfaces on the first page.
            let _ = tx.send((self.kind, total_pages));
        }
        Ok(())
    }

    fn page(&mut self, page: RasterPage) -> Result<(), ExtractError> {
        if self.announce.is_some() {
            return Err(ExtractError::Internal(
                "rasteriser emitted a page before the page count".into(),
            ));
        }
        self.pages
            .blocking_send(page)
            .map_err(|_| ExtractError::Internal("page consumer went away".into()))
    }
}

/// Detect the kind of `handle` and start rasterising it off the async
/// runtime.
///
/// Resolves once the page count is known. At most `buffer` rendered pages
/// wait in the channel; the rasteriser blocks until the consumer catches
/// up, and stops when the returned stream is dropped.
pub async fn rasterize(
    rasterizers: &Rasterizers,
    handle: &UploadHandle,
    buffer: usize,
) -> Result<PageStream, ExtractError> {
    let rasterizers = rasterizers.clone();
    let handle = handle.clone();
    let (announce_tx, announce_rx) = oneshot::channel();
    let (page_tx, page_rx) = mpsc::channel(buffer.max(1));

    let producer = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let kind = detect_kind(&handle.path)?;
        debug!(document_id = %handle.id, ?kind, "Detected input kind");

        let mut sink = ChannelSink {
            kind,
            announce: Some(announce_tx),
            pages: page_tx,
        };
        rasterizers.for_kind(kind).rasterize(&handle, &mut sink)?;
        if sink.announce.is_some() {
            return Err(ExtractError::Internal(
                "rasteriser finished without a page count".into(),
            ));
        }
        Ok(start.elapsed().as_millis() as u64)
    });

    match announce_rx.await {
        Ok((kind, total_pages)) => Ok(PageStream {
            kind,
            total_pages,
            pages: ReceiverStream::new(page_rx),
            producer,
        }),
        Err(_) => {
            join_producer(producer).await?;
            Err(ExtractError::Internal(
                "rasteriser finished without a page count".into(),
            ))
        }
    }
}

// ── Images ───────────────────────────────────────────────────────────────

/// Decodes an image upload.
///
/// Yields one page, except for TIFF where every frame is a page.
pub struct ImageRasterizer;

impl Rasterizer for ImageRasterizer {
    fn rasterize(
        &self,
        handle: &UploadHandle,
        sink: &mut dyn PageSink,
    ) -> Result<(), ExtractError> {
        let reader = ImageReader::open(&handle.path).and_then(|r| r.with_guessed_format());
        if matches!(&reader, Ok(r) if r.format() == Some(ImageFormat::Tiff)) {
            return rasterize_tiff(handle, sink);
        }

        let decoded = reader
            .map_err(|e| e.to_string())
            .and_then(|r| r.decode().map_err(|e| e.to_string()));

        sink.begin(1)?;
        match decoded {
            Ok(img) => {
                debug!("Decoded image → {}x{} px", img.width(), img.height());
                sink.page(RasterPage {
                    index: 0,
                    content: PageContent::Image(img),
                })
            }
            Err(detail) => {
                warn!(document_id = %handle.id, "Image decode failed: {}", detail);
                sink.page(RasterPage::failed(0, detail))
            }
        }
    }
}

fn open_tiff(path: &Path) -> Result<Decoder<BufReader<File>>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    Decoder::new(BufReader::new(file)).map_err(|e| e.to_string())
}

/// Number of image directories, counting one that fails to load.
fn count_frames<R: Read + Seek>(decoder: &mut Decoder<R>) -> usize {
    let mut frames = 1;
    while decoder.more_images() {
        frames += 1;
        if decoder.next_image().is_err() {
            break;
        }
    }
    frames
}

/// One page per TIFF frame.
///
/// Frames are counted first, then decoded one at a time on a second pass.
/// A frame that cannot be decoded fails only its own page; once the
/// directory chain itself is broken every remaining page fails.
fn rasterize_tiff(handle: &UploadHandle, sink: &mut dyn PageSink) -> Result<(), ExtractError> {
    let frames = match open_tiff(&handle.path) {
        Ok(mut decoder) => count_frames(&mut decoder),
        Err(detail) => {
            warn!(document_id = %handle.id, "TIFF header unreadable: {}", detail);
            sink.begin(1)?;
            return sink.page(RasterPage::failed(0, detail));
        }
    };
    info!(document_id = %handle.id, "TIFF opened: {} frames", frames);
    sink.begin(frames)?;

    let mut decoder = open_tiff(&handle.path);
    for index in 0..frames {
        if index > 0 {
            let advanced = match decoder.as_mut() {
                Ok(d) => d.next_image().map_err(|e| e.to_string()),
                Err(_) => Ok(()),
            };
            if let Err(detail) = advanced {
                decoder = Err(detail);
            }
        }

        let page = match decoder.as_mut() {
            Ok(d) => match decode_tiff_frame(d) {
                Ok(img) => {
                    debug!(
                        "Decoded frame {} → {}x{} px",
                        index + 1,
                        img.width(),
                        img.height()
                    );
                    RasterPage {
                        index,
                        content: PageContent::Image(img),
                    }
                }
                Err(detail) => {
                    warn!("Frame {}: decode failed: {}", index + 1, detail);
                    RasterPage::failed(index, detail)
                }
            },
            Err(detail) => RasterPage::failed(index, format!("frame unreachable: {detail}")),
        };
        sink.page(page)?;
    }
    Ok(())
}

/// Decode the decoder's current frame.
fn decode_tiff_frame<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<DynamicImage, String> {
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let color_type = decoder.colortype().map_err(|e| e.to_string())?;
    let data = decoder.read_image().map_err(|e| e.to_string())?;
    let mismatch = || format!("{width}x{height} frame does not match its data");

    let image = match (data, color_type) {
        (DecodingResult::U8(data), TiffColorType::Gray(8)) => {
            DynamicImage::ImageLuma8(ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?)
        }
        (DecodingResult::U8(data), TiffColorType::GrayA(8)) => DynamicImage::ImageLumaA8(
            ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?,
        ),
        (DecodingResult::U8(data), TiffColorType::RGB(8)) => {
            DynamicImage::ImageRgb8(ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?)
        }
        (DecodingResult::U8(data), TiffColorType::RGBA(8)) => DynamicImage::ImageRgba8(
            ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?,
        ),
        (DecodingResult::U16(data), TiffColorType::Gray(16)) => DynamicImage::ImageLuma16(
            ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?,
        ),
        (DecodingResult::U16(data), TiffColorType::RGB(16)) => DynamicImage::ImageRgb16(
            ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?,
        ),
        (DecodingResult::U16(data), TiffColorType::RGBA(16)) => DynamicImage::ImageRgba16(
            ImageBuffer::from_raw(width, height, data).ok_or_else(mismatch)?,
        ),
        (_, other) => return Err(format!("unsupported TIFF colour type {other:?}")),
    };
    Ok(image)
}

// ── PDF documents ────────────────────────────────────────────────────────

/// Renders PDF pages through pdfium.
pub struct PdfRasterizer {
    dpi: u32,
    max_pixels: u32,
    library: Option<PathBuf>,
    prefer_embedded_text: bool,
}

impl PdfRasterizer {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            library: config.pdfium_library.clone(),
            prefer_embedded_text: config.prefer_embedded_text,
        }
    }

    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let bindings = match &self.library {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExtractError::RendererUnavailable(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfRasterizer {
    fn rasterize(
        &self,
        handle: &UploadHandle,
        sink: &mut dyn PageSink,
    ) -> Result<(), ExtractError> {
        let pdfium = self.bind()?;

        let document = pdfium
            .load_pdf_from_file(&handle.path, None)
            .map_err(|e| ExtractError::CorruptDocument {
                path: handle.path.clone(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!(document_id = %handle.id, "PDF loaded: {} pages", total_pages);
        sink.begin(total_pages)?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        for idx in 0..total_pages {
            let page = match pages.get(idx as u16) {
                Ok(page) => page,
                Err(e) => {
                    warn!("Page {}: cannot load: {:?}", idx + 1, e);
                    sink.page(RasterPage::failed(idx, format!("{:?}", e)))?;
                    continue;
                }
            };

            if self.prefer_embedded_text {
                if let Ok(text) = page.text() {
                    let text = text.all();
                    if !text.trim().is_empty() {
                        debug!("Page {}: using embedded text layer", idx + 1);
                        sink.page(RasterPage {
                            index: idx,
                            content: PageContent::Text(text),
                        })?;
                        continue;
                    }
                }
            }

            let raster = match page.render_with_config(&render_config) {
                Ok(bitmap) => {
                    let image = DynamicImage::ImageLuma8(bitmap.as_image().to_luma8());
                    debug!(
                        "Rendered page {} → {}x{} px",
                        idx + 1,
                        image.width(),
                        image.height()
                    );
                    RasterPage {
                        index: idx,
                        content: PageContent::Image(image),
                    }
                }
                Err(e) => {
                    warn!("Page {}: render failed: {:?}", idx + 1, e);
                    RasterPage::failed(idx, format!("{:?}", e))
                }
            };
            sink.page(raster)?;
        }

        Ok(())
    }
}
