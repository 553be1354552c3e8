//! End-to-end tests against a real `tesseract` binary and pdfium.
//!
//! Gated behind `E2E_ENABLED` so they do not run in CI unless explicitly
//! requested. Inputs are generated on the fly: a small PDF with Helvetica
//! text, a multi-frame TIFF and a PNG.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

mod common;

use common::sample_png;
use ocr_extract::{
    DocumentStatus, ExtractError, ExtractionConfig, Extractor, PageStatus, RecognitionEngine,
    TesseractEngine, TextSource,
};
use std::io::Cursor;
use std::path::Path;
use tiff::encoder::{colortype, TiffEncoder};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

fn config_in(dir: &Path) -> ExtractionConfig {
    let mut builder = ExtractionConfig::builder()
        .uploads_dir(dir.join("uploads"))
        .outputs_dir(dir.join("outputs"));
    if let Ok(cmd) = std::env::var("TESSERACT_CMD") {
        builder = builder.tesseract_command(cmd);
    }
    if let Ok(lib) = std::env::var("PDFIUM_LIB_PATH") {
        builder = builder.pdfium_library(lib);
    }
    builder.build().expect("valid config")
}

/// A minimal PDF with one line of 36pt Helvetica per page.
fn text_pdf(pages: &[&str]) -> Vec<u8> {
    let font_id = 3;
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        {
            let kids: Vec<String> = (0..pages.len())
                .map(|i| format!("{} 0 R", 4 + 2 * i))
                .collect();
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                pages.len()
            )
        },
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for (i, line) in pages.iter().enumerate() {
        let contents_id = 5 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {font_id} 0 R >> >> /Contents {contents_id} 0 R >>"
        ));
        let stream = format!("BT /F1 36 Tf 72 680 Td ({line}) Tj ET");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{stream}\nendstream",
            stream.len()
        ));
    }

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref_at = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    pdf
}

fn blank_tiff(frames: usize) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut buf).unwrap();
    for _ in 0..frames {
        encoder
            .write_image::<colortype::Gray8>(200, 100, &[255u8; 200 * 100])
            .unwrap();
    }
    buf.into_inner()
}

/// Assert the extracted text passes basic cleanup checks.
fn assert_text_quality(text: &str, context: &str) {
    assert!(!text.trim().is_empty(), "[{context}] Text is empty");
    assert_eq!(text, text.trim(), "[{context}] Text must be trimmed");
    assert!(
        !text.contains("\n\n\n"),
        "[{context}] Text has more than one consecutive blank line"
    );
    assert!(!text.contains('\r'), "[{context}] Text has CR line endings");
    for ch in ['\u{200B}', '\u{FEFF}', '\u{00AD}'] {
        assert!(
            !text.contains(ch),
            "[{context}] Text contains invisible char U+{:04X}",
            ch as u32
        );
    }
    println!("[{context}] {} chars, quality checks passed", text.chars().count());
}

// ── Engine ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tesseract_reports_version() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();
    let engine = TesseractEngine::from_config(&config_in(tmp.path()));

    let version = engine.probe().await.expect("tesseract should be installed");
    assert!(
        version.to_lowercase().contains("tesseract"),
        "unexpected banner: {version}"
    );
}

#[tokio::test]
async fn test_missing_binary_is_fatal() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();
    let config = ExtractionConfig::builder()
        .uploads_dir(tmp.path().join("uploads"))
        .outputs_dir(tmp.path().join("outputs"))
        .tesseract_command("/definitely/not/tesseract")
        .build()
        .unwrap();

    let err = Extractor::new(config)
        .extract_upload(&sample_png(), "bar.png", Some("image/png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::EngineUnavailable { .. }));
}

#[tokio::test]
async fn test_missing_language_is_fatal() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_in(tmp.path());
    config.tesseract.language = "zzz".into();

    let err = Extractor::new(config)
        .extract_upload(&sample_png(), "bar.png", Some("image/png"))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::EngineUnavailable { .. }), "{err}");
}

// ── Documents ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_extract_image() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();

    let result = Extractor::new(config_in(tmp.path()))
        .extract_upload(&sample_png(), "bar.png", Some("image/png"))
        .await
        .expect("extraction should succeed");

    assert_eq!(result.pages.len(), 1);
    assert_eq!(result.pages[0].page_index, 0);
    assert_eq!(
        std::fs::read_to_string(&result.artifact_path).unwrap(),
        result.text
    );
}

#[tokio::test]
async fn test_extract_multipage_pdf() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();
    let pdf = text_pdf(&["INVOICE 1042", "TOTAL DUE 99", "THANK YOU"]);

    let result = Extractor::new(config_in(tmp.path()))
        .extract_upload(&pdf, "letter.pdf", Some("application/pdf"))
        .await
        .expect("extraction should succeed");

    assert_eq!(result.status, DocumentStatus::Success);
    let indices: Vec<usize> = result.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(result
        .pages
        .iter()
        .all(|p| p.status == PageStatus::Succeeded && p.source == TextSource::Ocr));
    assert_text_quality(&result.text, "letter.pdf");

    let upper = result.text.to_uppercase();
    for word in ["INVOICE", "TOTAL", "THANK"] {
        assert!(upper.contains(word), "missing {word}: {}", result.text);
    }
    assert!(upper.find("INVOICE") < upper.find("THANK"), "page order");

    for page in &result.pages {
        println!(
            "  page {}: {} chars, conf {:?}, {}ms",
            page.page_num(),
            page.text.chars().count(),
            page.confidence,
            page.duration_ms
        );
    }
}

#[tokio::test]
async fn test_embedded_text_layer_skips_ocr() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_in(tmp.path());
    config.prefer_embedded_text = true;

    let result = Extractor::new(config)
        .extract_upload(&text_pdf(&["HELLO WORLD"]), "a.pdf", None)
        .await
        .unwrap();

    assert_eq!(result.pages[0].source, TextSource::Embedded);
    assert_eq!(result.text, "HELLO WORLD");
}

#[tokio::test]
async fn test_extract_multi_frame_tiff() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();

    let result = Extractor::new(config_in(tmp.path()))
        .extract_upload(&blank_tiff(3), "scan.tif", Some("image/tiff"))
        .await
        .expect("extraction should succeed");

    let indices: Vec<usize> = result.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_extract_is_repeatable() {
    e2e_skip_unless_ready!();
    let tmp = tempfile::tempdir().unwrap();
    let extractor = Extractor::new(config_in(tmp.path()));
    let pdf = text_pdf(&["REPEATABLE 7"]);

    let a = extractor.extract_upload(&pdf, "r.pdf", None).await.unwrap();
    let b = extractor.extract_upload(&pdf, "r.pdf", None).await.unwrap();

    assert_eq!(a.text, b.text, "same input and config must give same text");
    assert_ne!(a.document_id, b.document_id);
}
