//! CLI binary for ocr-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and either serves the HTTP API or runs one file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ocr_extract::server::{self, AppState};
use ocr_extract::{
    Binarization, DocumentResult, DocumentStatus, ExtractionConfig, ExtractionProgressCallback,
    Extractor, PageError, PageResult, PageSeparator, ProgressCallback, QualityWarning, TextSource,
    TracingProgressCallback,
};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress for `file`: a bar plus one line per settled page.
///
/// Lines are printed as pages settle, so with `--concurrency` above one
/// they can appear out of page order.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Opening");
        bar.set_message("detecting format…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn line(&self, glyph: &str, page_num: usize, total: usize, detail: String) {
        self.bar
            .println(format!("  {glyph} page {page_num:>3}/{total:<3}  {detail}"));
        self.bar.inc(1);
    }
}

impl ExtractionProgressCallback for CliProgress {
    fn on_extraction_start(&self, document_id: Uuid, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}/{len} pages  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Recognising");
        self.bar.println(format!("document {document_id}"));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page: &PageResult, total_pages: usize) {
        let confidence = page
            .confidence
            .map(|c| format!("{:>3.0}%", c * 100.0))
            .unwrap_or_else(|| "  - ".to_string());
        let source = match page.source {
            TextSource::Ocr => "ocr",
            TextSource::Embedded => "text layer",
        };
        let mut detail = format!(
            "{:>6} chars  {confidence}  {:>6}ms  {source}",
            page.text.chars().count(),
            page.duration_ms
        );
        if page.warnings.contains(&QualityWarning::LowContrast) {
            detail.push_str("  (low contrast)");
        }
        self.line("✓", page.page_num(), total_pages, detail);
    }

    fn on_page_error(&self, page: &PageResult, error: &PageError, total_pages: usize) {
        let message: String = error.to_string().chars().take(72).collect();
        self.line(
            "✗",
            page.page_num(),
            total_pages,
            format!("{:<19} {message}", error.code()),
        );
    }

    fn on_extraction_complete(&self, _result: &DocumentResult) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the HTTP API on port 8000
  ocr-extract serve --addr 0.0.0.0:8000

  # Upload a document
  curl -F file=@scan.pdf http://localhost:8000/api/v1/extract
  curl -F file=@id.jpg 'http://localhost:8000/api/v1/extract?format=text'

  # Extract a local file to stdout
  ocr-extract file scan.pdf

  # Full JSON result, Sinhala + English, page markers
  ocr-extract --language sin+eng --separator marker file scan.pdf --json

ENVIRONMENT VARIABLES:
  TESSERACT_CMD           tesseract binary (default: tesseract on PATH)
  PDFIUM_LIB_PATH         Path to libpdfium (default: system library)
  OCR_UPLOADS_DIR         Staging directory (default: uploads)
  OCR_OUTPUTS_DIR         Output directory (default: outputs)
  RUST_LOG                Log filter (default: ocr_extract=info,tower_http=info)
"#;

#[derive(Parser, Debug)]
#[command(
    name = "ocr-extract",
    version,
    about = "Extract text from PDFs and images with OCR",
    long_about = "Extract plain text from uploaded PDFs and images. Pages are rasterised, \
cleaned up for recognition and read with tesseract; results are written to the output \
directory and returned as JSON or plain text.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,

    #[arg(short, long, global = true, env = "OCR_VERBOSE")]
    verbose: bool,

    #[arg(short, long, global = true, env = "OCR_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "OCR_ADDR", default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
    /// Run the pipeline on a local file.
    File {
        input: PathBuf,

        /// Print the full result as JSON instead of the text.
        #[arg(long)]
        json: bool,

        #[arg(long, env = "OCR_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    #[arg(long, global = true, env = "OCR_UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    #[arg(long, global = true, env = "OCR_OUTPUTS_DIR", default_value = "outputs")]
    outputs_dir: PathBuf,

    /// Largest accepted upload, in MiB.
    #[arg(long, global = true, env = "OCR_MAX_UPLOAD_MB", default_value_t = 25)]
    max_upload_mb: u64,

    #[arg(long, global = true, env = "OCR_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    #[arg(short, long, global = true, env = "OCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    #[arg(long, global = true, env = "OCR_PAGE_TIMEOUT", default_value_t = 60)]
    page_timeout: u64,

    #[arg(long, global = true, env = "OCR_IO_TIMEOUT", default_value_t = 30)]
    io_timeout: u64,

    #[arg(long, global = true, env = "TESSERACT_CMD", default_value = "tesseract")]
    tesseract_cmd: PathBuf,

    #[arg(short, long, global = true, env = "OCR_LANGUAGE", default_value = "eng")]
    language: String,

    /// Tesseract page segmentation mode.
    #[arg(long, global = true, env = "OCR_PSM", default_value_t = 3,
          value_parser = clap::value_parser!(u8).range(0..=13))]
    psm: u8,

    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Binarisation: otsu, off, or a fixed threshold 0-255.
    #[arg(long, global = true, env = "OCR_BINARIZE", default_value = "otsu")]
    binarize: String,

    #[arg(long, global = true, env = "OCR_NO_DESKEW")]
    no_deskew: bool,

    /// Use a PDF page's text layer instead of OCR when it has one.
    #[arg(long, global = true, env = "OCR_EMBEDDED_TEXT")]
    embedded_text: bool,

    /// Page separator: blank, formfeed, marker, or any custom string.
    #[arg(long, global = true, env = "OCR_SEPARATOR", default_value = "blank")]
    separator: String,

    #[arg(long, global = true, env = "OCR_NO_IDENTIFIERS")]
    no_identifiers: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for one-off file runs.
    let show_progress = match &cli.command {
        Command::File {
            json, no_progress, ..
        } => !cli.quiet && !no_progress && !json,
        Command::Serve { .. } => false,
    };
    let filter = if cli.verbose {
        "ocr_extract=debug,tower_http=debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "ocr_extract=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve { addr } => {
            let progress: ProgressCallback = Arc::new(TracingProgressCallback);
            let config = build_config(&cli.pipeline, Some(progress))?;
            let extractor = Extractor::new(config);
            match extractor.probe_engine().await {
                Ok(version) => tracing::info!("OCR engine: {}", version),
                Err(e) => tracing::warn!("{}", e),
            }
            server::serve(AppState::new(extractor), addr)
                .await
                .context("HTTP server failed")?;
        }
        Command::File { input, json, .. } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgress::new() as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let config = build_config(&cli.pipeline, progress)?;
            let extractor = Extractor::new(config);

            let result = extractor
                .extract_file(&input)
                .await
                .with_context(|| format!("Extraction failed for {}", input.display()))?;

            if json {
                let out =
                    serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
                println!("{out}");
            } else {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(result.text.as_bytes())
                    .context("Failed to write to stdout")?;
                if !result.text.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
            }

            if !cli.quiet && !json {
                print_summary(&result);
            }

            if result.status == DocumentStatus::Failure {
                anyhow::bail!("No page of {} could be recognised", input.display());
            }
        }
    }

    Ok(())
}

/// Identifiers, failed pages and the totals line, on stderr.
fn print_summary(result: &DocumentResult) {
    for (kind, values) in &result.identifiers {
        eprintln!("• {}: {}", kind, values.join(", "));
    }
    for page in result.failed_pages() {
        if let Some(error) = &page.error {
            eprintln!("✗ page {}: {}", page.page_num(), error.code());
        }
    }
    let glyph = match result.status {
        DocumentStatus::Success => "✔",
        DocumentStatus::Partial => "⚠",
        DocumentStatus::Failure => "✘",
    };
    let stats = &result.stats;
    eprintln!(
        "{glyph} {}  {}/{} pages  rasterise {}ms  recognise {}ms  total {}ms  →  {}",
        result.status.as_str(),
        stats.succeeded_pages,
        stats.total_pages,
        stats.rasterize_duration_ms,
        stats.recognize_duration_ms,
        stats.total_duration_ms,
        result.artifact_path.display(),
    );
}

fn build_config(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .uploads_dir(&args.uploads_dir)
        .outputs_dir(&args.outputs_dir)
        .max_upload_bytes(args.max_upload_mb.saturating_mul(1024 * 1024))
        .dpi(args.dpi)
        .concurrency(args.concurrency)
        .page_timeout_secs(args.page_timeout)
        .io_timeout_secs(args.io_timeout)
        .tesseract_command(&args.tesseract_cmd)
        .language(&args.language)
        .prefer_embedded_text(args.embedded_text)
        .page_separator(parse_separator(&args.separator))
        .detect_identifiers(!args.no_identifiers);

    if let Some(ref lib) = args.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Fields the builder has no dedicated setter for.
    config.tesseract.psm = args.psm;
    config.normalize.binarization = parse_binarization(&args.binarize)?;
    config.normalize.deskew = !args.no_deskew;

    Ok(config)
}

/// Parse `--binarize` into a [`Binarization`].
fn parse_binarization(s: &str) -> Result<Binarization> {
    match s.trim().to_lowercase().as_str() {
        "otsu" => Ok(Binarization::Otsu),
        "off" | "none" => Ok(Binarization::Off),
        level => level
            .parse::<u8>()
            .map(Binarization::Fixed)
            .with_context(|| format!("Invalid --binarize value '{s}': expected otsu, off or 0-255")),
    }
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" => PageSeparator::Blank,
        "formfeed" | "ff" => PageSeparator::FormFeed,
        "marker" => PageSeparator::Marker,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
