//! Image encoding: normalised `GrayImage` → PNG bytes for the engine.
//!
//! The engine receives each page on stdin. PNG is lossless, so the binarised
//! strokes reach the recogniser exactly as the normaliser left them.

use crate::output::PageImage;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Encode a normalised page as PNG.
pub fn encode_page(page: &PageImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    page.pixels
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;

    debug!(
        page = page.page_index + 1,
        "Encoded page → {} bytes PNG",
        buf.len()
    );
    Ok(buf)
}
