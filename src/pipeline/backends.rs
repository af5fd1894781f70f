//! PDF rendering backends.
//!
//! Each backend is an external tool driven through `tokio::process`. The
//! pipeline tries them in a fixed order, richest layout first:
//!
//! | Backend | Input | Probe | Attempted when probe fails |
//! |---------|-------|-------|----------------------------|
//! | [`WeasyPrint`]  | full HTML page | `weasyprint --version`, `python3 -c "import weasyprint"` | yes |
//! | [`MdPdf`]       | preprocessed Markdown + CSS | `mdpdf --help` | no |
//! | [`WkHtmlToPdf`] | full HTML page | `wkhtmltopdf --version` | no |
//!
//! Probes only answer "does the tool respond". A failed render is the
//! authoritative answer, so WeasyPrint is tried even when its probe fails.

use crate::error::RenderError;
use crate::pipeline::markup::PRINT_CSS;
use async_trait::async_trait;
use serde::Serialize;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

/// Everything a backend needs to render one document.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Source after image/chapter preprocessing (Markdown or HTML body).
    pub preprocessed: String,
    /// Complete standalone HTML page.
    pub html: String,
    /// Directory relative image references resolve against.
    pub base_dir: PathBuf,
    /// Where the PDF must be written.
    pub output: PathBuf,
}

/// A PDF renderer the conversion pipeline can try.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Short stable name, e.g. `"weasyprint"`.
    fn name(&self) -> &'static str;

    /// Best-effort availability check.
    async fn probe(&self) -> bool;

    /// Try this backend even when [`probe`](Self::probe) says it is missing.
    fn attempt_when_unavailable(&self) -> bool {
        false
    }

    /// How a user would install this backend.
    fn install_hint(&self) -> &'static str;

    /// Render `job` to `job.output`. Size validation is the caller's job.
    async fn render(&self, job: &RenderJob) -> Result<(), RenderError>;
}

/// Probe result for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendAvailability {
    pub name: String,
    pub available: bool,
    pub install_hint: String,
}

/// The default backends in priority order.
pub fn default_backends() -> Vec<Box<dyn RenderBackend>> {
    vec![Box::new(WeasyPrint), Box::new(MdPdf), Box::new(WkHtmlToPdf)]
}

// ── WeasyPrint ───────────────────────────────────────────────────────────────

pub struct WeasyPrint;

#[async_trait]
impl RenderBackend for WeasyPrint {
    fn name(&self) -> &'static str {
        "weasyprint"
    }

    async fn probe(&self) -> bool {
        responds("weasyprint", &["--version"]).await
            || responds("python3", &["-c", "import weasyprint"]).await
    }

    fn attempt_when_unavailable(&self) -> bool {
        true
    }

    fn install_hint(&self) -> &'static str {
        "pip install weasyprint"
    }

    async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        let page = temp_file(&job.base_dir, ".html", &job.html)?;
        let args: Vec<OsString> = vec![
            "--presentational-hints".into(),
            "--base-url".into(),
            job.base_dir.clone().into_os_string(),
            page.path().into(),
            job.output.clone().into_os_string(),
        ];

        match run("weasyprint", &args).await {
            Err(RenderError::NotInstalled { .. }) => {
                debug!("weasyprint CLI missing; trying python3 -m weasyprint");
                let mut module_args: Vec<OsString> = vec!["-m".into(), "weasyprint".into()];
                module_args.extend(args);
                run("python3", &module_args).await
            }
            other => other,
        }
    }
}

// ── mdpdf ────────────────────────────────────────────────────────────────────

pub struct MdPdf;

#[async_trait]
impl RenderBackend for MdPdf {
    fn name(&self) -> &'static str {
        "mdpdf"
    }

    async fn probe(&self) -> bool {
        responds("mdpdf", &["--help"]).await
    }

    fn install_hint(&self) -> &'static str {
        "pip install mdpdf"
    }

    async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        let markdown = temp_file(&job.base_dir, ".md", &job.preprocessed)?;
        let css = temp_file(&job.base_dir, ".css", PRINT_CSS)?;
        let args: Vec<OsString> = vec![
            "--output".into(),
            job.output.clone().into_os_string(),
            "--css".into(),
            css.path().into(),
            "--format".into(),
            "A4".into(),
            "--margin".into(),
            "2cm".into(),
            markdown.path().into(),
        ];
        run("mdpdf", &args).await
    }
}

// ── wkhtmltopdf ──────────────────────────────────────────────────────────────

pub struct WkHtmlToPdf;

/// Flags mirroring the usual pdfkit option set.
const WKHTMLTOPDF_FLAGS: &[&str] = &[
    "--page-size",
    "A4",
    "--margin-top",
    "2cm",
    "--margin-right",
    "2cm",
    "--margin-bottom",
    "2cm",
    "--margin-left",
    "2cm",
    "--encoding",
    "UTF-8",
    "--no-outline",
    "--quiet",
    "--print-media-type",
    "--disable-smart-shrinking",
    "--enable-local-file-access",
    "--minimum-font-size",
    "10",
    "--javascript-delay",
    "1000",
    "--load-error-handling",
    "ignore",
    "--load-media-error-handling",
    "ignore",
];

#[async_trait]
impl RenderBackend for WkHtmlToPdf {
    fn name(&self) -> &'static str {
        "wkhtmltopdf"
    }

    async fn probe(&self) -> bool {
        responds("wkhtmltopdf", &["--version"]).await
    }

    fn install_hint(&self) -> &'static str {
        "install wkhtmltopdf from https://wkhtmltopdf.org/downloads.html"
    }

    async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        let page = temp_file(&job.base_dir, ".html", &job.html)?;
        let mut args: Vec<OsString> = WKHTMLTOPDF_FLAGS.iter().map(OsString::from).collect();
        args.push(page.path().into());
        args.push(job.output.clone().into_os_string());
        run("wkhtmltopdf", &args).await
    }
}

// ── Process helpers ──────────────────────────────────────────────────────────

/// `true` when `program args…` runs and exits successfully.
async fn responds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn run(program: &str, args: &[OsString]) -> Result<(), RenderError> {
    debug!("Running {program} with {} args", args.len());
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RenderError::NotInstalled {
                program: program.to_string(),
            },
            _ => RenderError::Io(e),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(RenderError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().chars().take(500).collect(),
        })
    }
}

/// Write `content` to a temp file next to the document so relative image
/// paths still resolve, or in the system temp dir if that is not writable.
fn temp_file(dir: &Path, suffix: &str, content: &str) -> Result<NamedTempFile, RenderError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".storybook-").suffix(suffix);
    let mut file = builder.tempfile_in(dir).or_else(|_| builder.tempfile())?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}
