//! Image normalisation: prepare a raw page for the OCR engine.
//!
//! The chain runs in a fixed order:
//!
//! 1. grayscale (always)
//! 2. downscale so the longest edge fits `max_dimension`
//! 3. autocontrast: stretch the occupied histogram range to 0–255
//!    (nearly uniform pages skip this and binarisation)
//! 4. 3×3 median filter to drop salt-and-pepper noise
//! 5. binarisation (Otsu or a fixed threshold)
//! 6. deskew: estimate a small rotation from the horizontal projection
//!    profile and rotate it away
//!
//! Every step is a pure function of its input, so the chain is
//! deterministic. Each step is also a near no-op on its own output, which
//! keeps a second pass over an already normalised page harmless.
//!
//! Normalisation never fails the document: if the chain cannot run, the
//! grayscale page is handed on unchanged with a
//! [`QualityWarning::NormalizationSkipped`].

use crate::config::{Binarization, NormalizeOptions};
use crate::output::{PageImage, QualityWarning};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use tracing::{debug, warn};
use uuid::Uuid;

/// Pixels darker than this count as ink for skew estimation.
const INK_THRESHOLD: u8 = 128;
/// Histogram spread below which a page is treated as blank.
const MIN_CONTRAST_SPREAD: u8 = 16;
/// Skew search range and step, in degrees.
const MAX_SKEW_DEG: f32 = 5.0;
const SKEW_STEP_DEG: f32 = 0.25;
/// Rotations smaller than this are left alone.
const MIN_SKEW_DEG: f32 = 0.5;

/// Normalise one raw page into a [`PageImage`].
///
/// Returns the page together with any quality warnings raised on the way.
pub fn normalize_page(
    document_id: Uuid,
    page_index: usize,
    raw: &DynamicImage,
    options: &NormalizeOptions,
) -> (PageImage, Vec<QualityWarning>) {
    let gray = raw.to_luma8();
    let mut warnings = Vec::new();

    let pixels = match run_chain(&gray, options, &mut warnings) {
        Ok(img) => img,
        Err(detail) => {
            warn!(%document_id, page = page_index + 1, "Normalisation skipped: {}", detail);
            warnings.push(QualityWarning::NormalizationSkipped { detail });
            gray
        }
    };

    debug!(
        %document_id,
        page = page_index + 1,
        "Normalised page → {}x{} px",
        pixels.width(),
        pixels.height()
    );

    (
        PageImage {
            document_id,
            page_index,
            pixels,
        },
        warnings,
    )
}

/// Run steps 2–6 on an already grayscale image.
pub fn run_chain(
    gray: &GrayImage,
    options: &NormalizeOptions,
    warnings: &mut Vec<QualityWarning>,
) -> Result<GrayImage, String> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(format!("degenerate page dimensions {w}x{h}"));
    }

    let mut img = downscale(gray, options.max_dimension);
    if img.dimensions() != (w, h) {
        warnings.push(QualityWarning::Downscaled { width: w, height: h });
    }

    // A flat page has nothing to stretch or split; thresholding it would
    // turn it solid black or white at random.
    let (lo, hi) = intensity_range(&img);
    let flat = hi.saturating_sub(lo) < MIN_CONTRAST_SPREAD;
    if flat {
        warnings.push(QualityWarning::LowContrast);
    } else if options.autocontrast {
        img = autocontrast(&img, lo, hi);
    }

    if options.denoise {
        img = median_filter(&img, 1, 1);
    }

    let binary = match options.binarization {
        _ if flat => false,
        Binarization::Off => false,
        Binarization::Otsu => {
            let level = otsu_level(&img);
            img = threshold(&img, level);
            true
        }
        Binarization::Fixed(level) => {
            img = threshold(&img, level);
            true
        }
    };

    if options.deskew {
        if let Some(angle) = detect_skew_angle(&img) {
            debug!("Deskewing by {:.2}°", angle);
            let interpolation = if binary {
                Interpolation::Nearest
            } else {
                Interpolation::Bilinear
            };
            img = rotate_about_center(&img, -angle.to_radians(), interpolation, Luma([255]));
        }
    }

    Ok(img)
}

/// Shrink so the longest edge is at most `max_dimension`, keeping aspect ratio.
fn downscale(img: &GrayImage, max_dimension: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if max_dimension == 0 || longest <= max_dimension {
        return img.clone();
    }
    let scale = max_dimension as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(img, nw, nh, FilterType::Lanczos3)
}

fn intensity_range(img: &GrayImage) -> (u8, u8) {
    img.pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])))
}

/// Linear stretch of `[lo, hi]` to `[0, 255]`.
fn autocontrast(img: &GrayImage, lo: u8, hi: u8) -> GrayImage {
    if lo == 0 && hi == 255 {
        return img.clone();
    }
    let span = (hi - lo) as f32;
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let v = (p.0[0] - lo) as f32 * 255.0 / span;
        p.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Pixels brighter than `level` become white, the rest black.
fn threshold(img: &GrayImage, level: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > level { 255 } else { 0 };
    }
    out
}

/// Estimate page skew in degrees (positive = text runs downhill to the right).
///
/// Projection-profile method: for each candidate angle, ink pixels are
/// projected onto the axis perpendicular to that angle and binned by row.
/// Text lines aligned with the candidate produce a few tall bins, which
/// maximises the sum of squared bin counts.
///
/// Returns `None` for tiny or nearly empty pages and for angles below
/// 0.5°.
pub fn detect_skew_angle(img: &GrayImage) -> Option<f32> {
    let (w, h) = img.dimensions();
    if w < 50 || h < 50 {
        return None;
    }

    // Subsample columns for speed; rows stay dense for resolution.
    let ink: Vec<(f32, f32)> = (0..h)
        .flat_map(|y| (0..w).step_by(2).map(move |x| (x, y)))
        .filter(|&(x, y)| img.get_pixel(x, y).0[0] < INK_THRESHOLD)
        .map(|(x, y)| (x as f32, y as f32))
        .collect();

    let sampled = ((w as usize + 1) / 2) * h as usize;
    let ink_ratio = ink.len() as f32 / sampled as f32;
    if !(0.005..=0.6).contains(&ink_ratio) {
        return None;
    }

    let margin = (w as f32 * MAX_SKEW_DEG.to_radians().tan()).ceil() as i64 + 1;
    let bins = (h as i64 + 2 * margin) as usize;
    let mut histogram = vec![0u32; bins];

    let mut best_angle = 0.0f32;
    let mut best_score = 0u64;

    let steps = (2.0 * MAX_SKEW_DEG / SKEW_STEP_DEG).round() as i32;
    for i in 0..=steps {
        let angle = -MAX_SKEW_DEG + i as f32 * SKEW_STEP_DEG;
        let tan = angle.to_radians().tan();

        histogram.iter_mut().for_each(|b| *b = 0);
        for &(x, y) in &ink {
            let row = (y - x * tan).round() as i64 + margin;
            if (0..bins as i64).contains(&row) {
                histogram[row as usize] += 1;
            }
        }

        let score: u64 = histogram.iter().map(|&c| c as u64 * c as u64).sum();
        // Ties resolve toward the smaller rotation.
        if score > best_score || (score == best_score && angle.abs() < best_angle.abs()) {
            best_score = score;
            best_angle = angle;
        }
    }

    (best_angle.abs() >= MIN_SKEW_DEG).then_some(best_angle)
}
