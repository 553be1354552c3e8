//! HTTP transport: multipart upload in, extraction result out.
//!
//! ## Endpoints
//!
//! | Method | Path              | Description |
//! |--------|-------------------|-------------|
//! | GET    | `/health`         | Liveness plus the OCR engine version |
//! | POST   | `/api/v1/extract` | Extract text from the uploaded file |
//! | POST   | `/extract`        | Same as above, unversioned |
//!
//! The upload is read from the multipart field named `file`, or the first
//! field carrying a filename. `?format=text` returns the plain text with the
//! document status in the `X-Extraction-Status` header; the default
//! `?format=json` returns the full [`DocumentResult`].
//!
//! ## Status codes
//!
//! | Outcome | Status |
//! |---------|--------|
//! | `success` / `partial` | 200 |
//! | rejected upload, unsupported format | 400 |
//! | every page failed | 422 |
//! | every page timed out | 504 |
//! | storage, engine, renderer or internal failure | 500 |
//!
//! Errors use the body `{"error": {"kind": "...", "message": "..."}}`.

use crate::error::{ErrorKind, ExtractError};
use crate::extract::Extractor;
use crate::output::{DocumentResult, DocumentStatus};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header::HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Response header carrying the document status in `format=text` mode.
pub const STATUS_HEADER: &str = "x-extraction-status";

/// Room for multipart framing on top of the upload limit, so oversize
/// uploads reach the ingestor and get its error rather than a bare 413.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
}

impl AppState {
    pub fn new(extractor: Extractor) -> Self {
        Self {
            extractor: Arc::new(extractor),
        }
    }
}

/// Build the API router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    let max_upload = state.extractor.config().max_upload_bytes;
    let body_limit = max_upload
        .saturating_mul(2)
        .saturating_add(BODY_LIMIT_SLACK)
        .min(usize::MAX as u64) as usize;

    Router::new()
        .route("/health", get(health_handler))
        .route("/extract", post(extract_handler))
        .route("/api/v1/extract", post(extract_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `addr` until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", listener.local_addr()?);
    info!("Endpoints:");
    info!("  GET  /health          - Health check");
    info!("  POST /api/v1/extract  - Text extraction (multipart field 'file')");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

// ── Health ───────────────────────────────────────────────────────────────

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the engine cannot be reached.
    pub status: String,
    pub version: String,
    /// Engine version banner, or `unavailable`.
    pub engine: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, engine) = match state.extractor.probe_engine().await {
        Ok(version) => ("ok", version),
        Err(e) => {
            warn!("Health probe: {}", e);
            ("degraded", "unavailable".to_string())
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine,
    })
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Response body format selected with `?format=`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtractParams {
    #[serde(default)]
    pub format: ResponseFormat,
}

struct Upload {
    filename: String,
    media_type: Option<String>,
    bytes: Vec<u8>,
}

async fn extract_handler(
    State(state): State<AppState>,
    Query(params): Query<ExtractParams>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    let start = Instant::now();

    let upload = read_upload(multipart).await?;
    info!(
        %request_id,
        filename = %upload.filename,
        size = upload.bytes.len(),
        "Processing extraction request"
    );

    let result = state
        .extractor
        .extract_upload(&upload.bytes, &upload.filename, upload.media_type.as_deref())
        .await
        .map_err(|e| {
            error!(%request_id, kind = e.kind().as_str(), "Extraction failed: {}", e);
            ApiError::from(e)
        })?;

    info!(
        %request_id,
        document_id = %result.document_id,
        status = result.status.as_str(),
        total_ms = start.elapsed().as_millis() as u64,
        "Extraction request completed"
    );

    Ok(render_result(result, params.format))
}

/// Pick the upload out of the multipart body.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut chosen: Option<Upload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        let is_file_field = field.name() == Some("file");
        if !is_file_field && (chosen.is_some() || field.file_name().is_none()) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let media_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;

        chosen = Some(Upload {
            filename,
            media_type,
            bytes: bytes.to_vec(),
        });
        if is_file_field {
            break;
        }
    }

    chosen.ok_or_else(|| ApiError::bad_request("No file field in multipart body".into()))
}

fn status_for(result: &DocumentResult) -> StatusCode {
    match result.status {
        DocumentStatus::Success | DocumentStatus::Partial => StatusCode::OK,
        DocumentStatus::Failure if result.timed_out() => StatusCode::GATEWAY_TIMEOUT,
        DocumentStatus::Failure => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn render_result(result: DocumentResult, format: ResponseFormat) -> Response {
    let code = status_for(&result);
    match format {
        ResponseFormat::Text => (
            code,
            [(HeaderName::from_static(STATUS_HEADER), result.status.as_str())],
            result.text,
        )
            .into_response(),
        ResponseFormat::Json if result.status == DocumentStatus::Failure => {
            let (kind, message) = failure_reason(&result);
            let body = json!({
                "error": { "kind": kind.as_str(), "message": message },
                "result": result,
            });
            (code, Json(body)).into_response()
        }
        ResponseFormat::Json => (code, Json(result)).into_response(),
    }
}

/// Error reported alongside a failed result: the first page error, or a
/// recognition failure when the document had no pages at all.
fn failure_reason(result: &DocumentResult) -> (ErrorKind, String) {
    match result.pages.iter().find_map(|p| p.error.as_ref()) {
        Some(e) => (e.kind(), e.to_string()),
        None => (
            ErrorKind::RecognitionFailure,
            "Document has no pages to recognise".to_string(),
        ),
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A fatal error rendered as `{"error": {"kind", "message"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::InvalidInput,
            message,
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        let kind = e.kind();
        let status = match kind {
            ErrorKind::InvalidInput | ErrorKind::UnsupportedFormat => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "kind": self.kind.as_str(), "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
