//! Pipeline stages for document text extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ render ──▶ normalize ──▶ encode ──▶ recognize ──▶ postprocess ──▶ aggregate
//! (staging)  (pdfium)   (imageproc)   (PNG)      (tesseract)   (cleanup)       (outputs/)
//! ```
//!
//! 1. [`ingest`]: validate the upload and stage it under a fresh id
//! 2. [`render`]: rasterise pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`normalize`]: deterministic preprocessing that helps the engine
//! 4. [`encode`]: PNG-encode the normalised page for the engine's stdin
//! 5. [`recognize`]: one engine call per page under a timeout; the only
//!    stage that spawns processes
//! 6. [`postprocess`]: deterministic text cleanup
//! 7. [`aggregate`]: order, concatenate, persist

pub mod aggregate;
pub mod encode;
pub mod ingest;
pub mod normalize;
pub mod postprocess;
pub mod recognize;
pub mod render;
