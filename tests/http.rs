//! HTTP transport tests: a real listener on an ephemeral port, driven with
//! reqwest multipart uploads.

mod common;

use common::*;
use ocr_extract::server::{build_router, AppState, STATUS_HEADER};
use ocr_extract::Extractor;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

struct TestServer {
    base: String,
    _tmp: TempDir,
}

async fn spawn(engine: Arc<ScriptedEngine>, document_pages: usize) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let ex: Extractor = extractor(config_in(tmp.path()), engine, document_pages);
    let app = build_router(AppState::new(ex));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        _tmp: tmp,
    }
}

fn upload(bytes: Vec<u8>, filename: &str, media_type: &str) -> Form {
    let part = Part::bytes(bytes)
        .file_name(filename.to_string())
        .mime_str(media_type)
        .unwrap();
    Form::new().part("file", part)
}

async fn post(server: &TestServer, path: &str, form: Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}{}", server.base, path))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_engine_version() {
    let server = spawn(ScriptedEngine::echo(), 1).await;

    let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engine"], "scripted 1.0");
}

#[tokio::test]
async fn health_is_degraded_without_engine() {
    struct Missing;

    #[async_trait::async_trait]
    impl ocr_extract::RecognitionEngine for Missing {
        async fn recognize(
            &self,
            _image: &ocr_extract::PageImage,
        ) -> Result<ocr_extract::Recognition, ocr_extract::EngineError> {
            Err(ocr_extract::EngineError::Unavailable("missing".into()))
        }

        async fn probe(&self) -> Result<String, ocr_extract::EngineError> {
            Err(ocr_extract::EngineError::Unavailable("missing".into()))
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let ex = Extractor::builder(config_in(tmp.path()))
        .engine(Arc::new(Missing))
        .build();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(AppState::new(ex)))
            .await
            .unwrap();
    });

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["engine"], "unavailable");
}

#[tokio::test]
async fn png_upload_returns_json_result() {
    let engine = ScriptedEngine::new(|_| (0, Outcome::Text("Invoice 42".into(), 0.88)));
    let server = spawn(engine, 0).await;

    let resp = post(
        &server,
        "/api/v1/extract",
        upload(sample_png(), "invoice.png", "image/png"),
    )
    .await;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["text"], "Invoice 42");
    assert_eq!(body["filename"], "invoice.png");
    assert_eq!(body["pages"].as_array().unwrap().len(), 1);
    assert_eq!(body["pages"][0]["page_index"], 0);
}

#[tokio::test]
async fn text_format_sets_status_header() {
    let engine = ScriptedEngine::new(|i| match i {
        0 => (0, Outcome::Text("first".into(), 0.9)),
        _ => (0, Outcome::Fail),
    });
    let server = spawn(engine, 2).await;

    let resp = post(
        &server,
        "/api/v1/extract?format=text",
        upload(FAKE_PDF.to_vec(), "doc.pdf", "application/pdf"),
    )
    .await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()[STATUS_HEADER], "partial");
    assert_eq!(resp.text().await.unwrap(), "first");
}

#[tokio::test]
async fn unversioned_alias_works() {
    let server = spawn(ScriptedEngine::echo(), 2).await;

    let resp = post(
        &server,
        "/extract",
        upload(FAKE_PDF.to_vec(), "doc.pdf", "application/pdf"),
    )
    .await;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["text"], "page 1\n\npage 2");
}

#[tokio::test]
async fn disallowed_media_type_is_bad_request() {
    let server = spawn(ScriptedEngine::echo(), 1).await;

    let resp = post(
        &server,
        "/api/v1/extract",
        upload(b"hello".to_vec(), "notes.txt", "text/plain"),
    )
    .await;

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn garbage_bytes_are_unsupported_format() {
    let server = spawn(ScriptedEngine::echo(), 1).await;

    let resp = post(
        &server,
        "/api/v1/extract",
        upload(b"not really a png".to_vec(), "x.png", "image/png"),
    )
    .await;

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "unsupported_format");
}

#[tokio::test]
async fn missing_file_field_is_bad_request() {
    let server = spawn(ScriptedEngine::echo(), 1).await;

    let form = Form::new().text("comment", "no file here");
    let resp = post(&server, "/api/v1/extract", form).await;

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn all_pages_failing_is_unprocessable() {
    let server = spawn(ScriptedEngine::new(|_| (0, Outcome::Fail)), 2).await;

    let resp = post(
        &server,
        "/api/v1/extract",
        upload(FAKE_PDF.to_vec(), "doc.pdf", "application/pdf"),
    )
    .await;

    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "recognition_failure");
    assert_eq!(body["result"]["status"], "failure");
}

#[tokio::test]
async fn all_pages_timing_out_is_gateway_timeout() {
    let server = spawn(ScriptedEngine::new(|_| (0, Outcome::Hang)), 2).await;

    let resp = post(
        &server,
        "/api/v1/extract",
        upload(FAKE_PDF.to_vec(), "doc.pdf", "application/pdf"),
    )
    .await;

    assert_eq!(resp.status(), 504);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "recognition_timeout");
}

#[tokio::test]
async fn unavailable_engine_is_server_error() {
    let server = spawn(ScriptedEngine::new(|_| (0, Outcome::Unavailable)), 1).await;

    let resp = post(
        &server,
        "/api/v1/extract",
        upload(FAKE_PDF.to_vec(), "doc.pdf", "application/pdf"),
    )
    .await;

    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "engine_unavailable");
}
