//! Result aggregation: fold page results into a [`DocumentResult`] and
//! persist it to the output store.
//!
//! [`aggregate`] is pure. [`persist`] writes `outputs/<id>.txt` and,
//! when enabled, `outputs/<id>.json` with the full per-page breakdown.
//! Both files are written atomically (temp file + rename) so a reader never
//! observes a half-written artifact.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::identifiers::find_identifiers;
use crate::output::{DocumentResult, DocumentStatus, ExtractionStats, PageResult};
use std::path::{Path, PathBuf};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};
use uuid::Uuid;

/// `outputs/<id>.txt`
pub fn text_artifact_path(outputs_dir: &Path, document_id: Uuid) -> PathBuf {
    outputs_dir.join(format!("{document_id}.txt"))
}

/// `outputs/<id>.json`
pub fn breakdown_artifact_path(outputs_dir: &Path, document_id: Uuid) -> PathBuf {
    outputs_dir.join(format!("{document_id}.json"))
}

/// Build the document result from every page's outcome.
///
/// Pages may arrive in any order; they are sorted by index here. Only
/// succeeded pages with non-empty text contribute to the concatenated text.
/// Timing fields of the returned stats are left at zero for the caller.
pub fn aggregate(
    document_id: Uuid,
    filename: String,
    mut pages: Vec<PageResult>,
    config: &ExtractionConfig,
) -> DocumentResult {
    pages.sort_by_key(|p| p.page_index);

    let succeeded = pages.iter().filter(|p| p.is_success()).count();
    let status = DocumentStatus::from_counts(succeeded, pages.len());
    let text = assemble_text(&pages, config);

    let identifiers = if config.detect_identifiers && !text.is_empty() {
        find_identifiers(&text)
    } else {
        Default::default()
    };

    debug!(
        %document_id,
        pages = pages.len(),
        succeeded,
        status = status.as_str(),
        "Aggregated document"
    );

    DocumentResult {
        document_id,
        filename,
        status,
        text,
        stats: ExtractionStats {
            total_pages: pages.len(),
            succeeded_pages: succeeded,
            failed_pages: pages.len() - succeeded,
            ..Default::default()
        },
        pages,
        identifiers,
        artifact_path: text_artifact_path(&config.outputs_dir, document_id),
    }
}

/// Join succeeded pages' text in page order with the configured separator.
fn assemble_text(pages: &[PageResult], config: &ExtractionConfig) -> String {
    let mut out = String::new();
    for page in pages.iter().filter(|p| p.is_success() && !p.text.is_empty()) {
        if !out.is_empty() {
            out.push_str(&config.page_separator.render(page.page_num()));
        }
        out.push_str(&page.text);
    }
    out
}

/// Write the result's artifacts. Returns the paths written.
pub async fn persist(
    result: &DocumentResult,
    config: &ExtractionConfig,
) -> Result<Vec<PathBuf>, ExtractError> {
    let secs = config.io_timeout_secs;
    let outputs_dir = config.outputs_dir.clone();

    let mut writes = vec![(result.artifact_path.clone(), result.text.clone().into_bytes())];
    if config.write_page_breakdown {
        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| ExtractError::Internal(format!("serialise result: {e}")))?;
        writes.push((breakdown_artifact_path(&outputs_dir, result.document_id), json));
    }

    let work = async {
        tokio::fs::create_dir_all(&outputs_dir)
            .await
            .map_err(|e| ExtractError::StorageFailure {
                path: outputs_dir.clone(),
                source: e,
            })?;

        let mut written = Vec::with_capacity(writes.len());
        for (path, bytes) in &writes {
            write_atomic(path, bytes).await?;
            written.push(path.clone());
        }
        Ok::<_, ExtractError>(written)
    };

    let written = timeout(Duration::from_secs(secs), work)
        .await
        .map_err(|_| ExtractError::storage_timeout(&outputs_dir, secs))??;

    info!(
        document_id = %result.document_id,
        path = %result.artifact_path.display(),
        "Persisted extraction result"
    );
    Ok(written)
}

/// `<path>.tmp`, the staging name used by the atomic write.
pub fn temp_artifact_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
    let tmp_path = temp_artifact_path(path);

    let storage = |e| ExtractError::StorageFailure {
        path: path.to_path_buf(),
        source: e,
    };

    if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(storage(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(storage(e));
    }
    Ok(())
}
