//! Recognition engines: turn a normalised page into text.
//!
//! [`RecognitionEngine`] is the seam between the pipeline and whatever does
//! the actual character recognition. The production implementation,
//! [`TesseractEngine`], drives the `tesseract` CLI: the page goes in on
//! stdin as PNG and word-level TSV comes back on stdout, from which both the
//! text and a mean confidence are derived.
//!
//! Tests substitute their own engine through
//! [`crate::extract::ExtractorBuilder::engine`].

use crate::config::{ExtractionConfig, TesseractOptions};
use crate::error::EngineError;
use crate::output::PageImage;
use crate::pipeline::encode::encode_page;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Text and confidence for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence in `[0, 1]`; `None` when no word was found.
    pub confidence: Option<f32>,
}

/// An OCR backend.
///
/// `recognize` must not hold per-document state: the pipeline calls it
/// concurrently for different pages of the same document.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Recognise the text on one page.
    ///
    /// Return [`EngineError::Unavailable`] only when the engine itself cannot
    /// be reached; that aborts the whole document. Anything else is
    /// [`EngineError::Failed`] and fails just this page.
    async fn recognize(&self, image: &PageImage) -> Result<Recognition, EngineError>;

    /// Check the engine is reachable and report its version string.
    async fn probe(&self) -> Result<String, EngineError>;
}

/// Runs the `tesseract` binary once per page.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    options: TesseractOptions,
    dpi: u32,
}

impl TesseractEngine {
    pub fn new(options: TesseractOptions, dpi: u32) -> Self {
        Self { options, dpi }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.tesseract.clone(), config.dpi)
    }

    /// Arguments after the binary name for a page recognition run.
    fn recognize_args(&self) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.options.language.clone(),
            "--psm".to_string(),
            self.options.psm.to_string(),
            "--dpi".to_string(),
            self.dpi.to_string(),
        ];
        if let Some(whitelist) = &self.options.char_whitelist {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={whitelist}"));
        }
        args.push("tsv".to_string());
        args
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        let cmd = self.options.command.display();
        match e.kind() {
            IoErrorKind::NotFound | IoErrorKind::PermissionDenied => {
                EngineError::Unavailable(format!("cannot execute '{cmd}': {e}"))
            }
            _ => EngineError::Failed(format!("failed to run '{cmd}': {e}")),
        }
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    async fn recognize(&self, image: &PageImage) -> Result<Recognition, EngineError> {
        let png = encode_page(image).map_err(|e| EngineError::Failed(format!("PNG encode: {e}")))?;

        let mut child = Command::new(&self.options.command)
            .args(self.recognize_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Failed("engine stdin not captured".into()))?;

        // Feed stdin while draining stdout so a large page cannot deadlock on
        // a full pipe.
        let write = async move {
            let res = stdin.write_all(&png).await;
            drop(stdin);
            res
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| EngineError::Failed(format!("engine wait: {e}")))?;

        if !output.status.success() {
            return Err(exit_error(output.status, &String::from_utf8_lossy(&output.stderr)));
        }
        if let Err(e) = written {
            if e.kind() != IoErrorKind::BrokenPipe {
                return Err(EngineError::Failed(format!("engine stdin: {e}")));
            }
            warn!(page = image.page_index + 1, "tesseract closed stdin early");
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let recognition = parse_tsv(&tsv);
        debug!(
            page = image.page_index + 1,
            chars = recognition.text.len(),
            confidence = ?recognition.confidence,
            "tesseract finished"
        );
        Ok(recognition)
    }

    async fn probe(&self) -> Result<String, EngineError> {
        let output = Command::new(&self.options.command)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(EngineError::Unavailable(format!(
                "'{} --version' exited with {}",
                self.options.command.display(),
                output.status
            )));
        }

        // Older releases print the banner on stderr.
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let version = String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(version)
    }
}

/// Stderr fragments tesseract prints when it cannot start at all, for
/// example when the requested language data is not installed.
const SETUP_FAILURES: [&str; 4] = [
    "Failed loading language",
    "Error opening data file",
    "Could not initialize tesseract",
    "Please make sure the TESSDATA_PREFIX",
];

/// Classify a non-zero tesseract exit.
///
/// Setup failures map to [`EngineError::Unavailable`]; anything else is a
/// page-local failure.
fn exit_error(status: ExitStatus, stderr: &str) -> EngineError {
    let stderr = stderr.trim();
    let message = format!("tesseract exited with {status}: {stderr}");
    if SETUP_FAILURES.iter().any(|s| stderr.contains(s)) {
        EngineError::Unavailable(message)
    } else {
        EngineError::Failed(message)
    }
}

/// Rebuild page text and mean confidence from tesseract's TSV output.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Only word rows (level 5) carry text. Words on
/// one line are joined by spaces, lines by newlines, and a blank line
/// separates paragraphs.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut conf_sum = 0.0f64;
    let mut conf_count = 0usize;
    let mut current_line: Option<(u32, u32, u32, u32)> = None;
    let mut current_par: Option<(u32, u32, u32)> = None;

    for row in tsv.lines() {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11..].join("\t");
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let line = (num(1), num(2), num(3), num(4));
        let par = (line.0, line.1, line.2);

        if current_line != Some(line) {
            if current_line.is_some() {
                text.push('\n');
                if current_par != Some(par) {
                    text.push('\n');
                }
            }
            current_line = Some(line);
            current_par = Some(par);
        } else {
            text.push(' ');
        }
        text.push_str(word);

        if let Ok(conf) = cols[10].trim().parse::<f64>() {
            if conf >= 0.0 {
                conf_sum += conf;
                conf_count += 1;
            }
        }
    }

    let confidence =
        (conf_count > 0).then(|| ((conf_sum / conf_count as f64) / 100.0).clamp(0.0, 1.0) as f32);
    Recognition { text, confidence }
}
