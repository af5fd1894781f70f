//! Document conversion: source file → PDF, or a printable HTML fallback.
//!
//! [`ConversionPipeline::convert`] never returns an error. Every outcome,
//! including a missing input, is a [`ConversionOutcome`] the caller can
//! report: a validated PDF, a fallback page with recovery guidance, or a
//! failure message.

use crate::config::StorybookConfig;
use crate::error::RenderError;
use crate::output::{ConversionAttemptResult, ConversionOutcome};
use crate::pipeline::backends::{default_backends, BackendAvailability, RenderBackend, RenderJob};
use crate::pipeline::input::{load_document, SourceDocument, SourceFormat};
use crate::pipeline::{fallback, markup, preprocess};
use crate::progress::ProgressCallback;
use futures::future::join_all;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tries each rendering backend in order, then falls back to HTML.
pub struct ConversionPipeline {
    backends: Vec<Box<dyn RenderBackend>>,
    min_pdf_bytes: u64,
    progress: Option<ProgressCallback>,
}

impl ConversionPipeline {
    /// Pipeline with the default backends (WeasyPrint, mdpdf, wkhtmltopdf).
    pub fn new(config: &StorybookConfig) -> Self {
        Self {
            backends: default_backends(),
            min_pdf_bytes: config.min_pdf_bytes,
            progress: config.progress_callback.clone(),
        }
    }

    /// Replace the backend list. Order is priority order.
    pub fn with_backends(mut self, backends: Vec<Box<dyn RenderBackend>>) -> Self {
        self.backends = backends;
        self
    }

    /// Probe every backend concurrently.
    pub async fn detect_backends(&self) -> Vec<BackendAvailability> {
        let probes = self.backends.iter().map(|b| async move {
            BackendAvailability {
                name: b.name().to_string(),
                available: b.probe().await,
                install_hint: b.install_hint().to_string(),
            }
        });
        join_all(probes).await
    }

    /// Convert `path` to a PDF next to it, or write a fallback page.
    pub async fn convert(&self, path: impl AsRef<Path>) -> ConversionOutcome {
        let start = Instant::now();
        let path = path.as_ref();
        info!("Converting {}", path.display());

        // ── Step 1: Verify input ─────────────────────────────────────────
        let doc = match load_document(path).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("{e}");
                return ConversionOutcome::Failed {
                    message: e.to_string(),
                    attempts: Vec::new(),
                };
            }
        };

        // ── Step 2: Probe backends ───────────────────────────────────────
        let availability = self.detect_backends().await;
        debug!("Backend availability: {:?}", availability);

        // ── Step 3: Preprocess and build markup ──────────────────────────
        let (title, body) = render_body(&doc);
        let job = RenderJob {
            preprocessed: preprocess::preprocess(&doc.content, doc.format),
            html: markup::html_document(&title, &body, "", ""),
            base_dir: doc.base_dir(),
            output: doc.pdf_path(),
        };

        // ── Step 4: Try backends in priority order ───────────────────────
        let mut attempts = Vec::new();
        for (backend, avail) in self.backends.iter().zip(&availability) {
            if !avail.available && !backend.attempt_when_unavailable() {
                debug!("Skipping {}: not available", backend.name());
                continue;
            }

            if let Some(ref cb) = self.progress {
                cb.on_backend_attempt(backend.name());
            }
            let result = match self.attempt(backend.as_ref(), &job).await {
                Ok(bytes) => {
                    let result = ConversionAttemptResult::succeeded(backend.name(), &job.output);
                    if let Some(ref cb) = self.progress {
                        cb.on_backend_result(&result);
                    }
                    attempts.push(result);
                    info!(
                        "PDF created with {} in {}ms: {} ({bytes} bytes)",
                        backend.name(),
                        start.elapsed().as_millis(),
                        job.output.display()
                    );
                    return ConversionOutcome::Pdf {
                        path: job.output.clone(),
                        backend: backend.name().to_string(),
                        bytes,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!("{} failed: {e}", backend.name());
                    ConversionAttemptResult::failed(backend.name(), e.to_string())
                }
            };
            if let Some(ref cb) = self.progress {
                cb.on_backend_result(&result);
            }
            attempts.push(result);
        }

        // ── Step 5: Fallback ─────────────────────────────────────────────
        remove_stale(&job.output).await;
        self.write_fallback(&doc, &title, &body, &availability, attempts)
            .await
    }

    /// Blocking wrapper around [`convert`](Self::convert).
    ///
    /// Creates a temporary tokio runtime; do not call from async code.
    pub fn convert_sync(&self, path: impl AsRef<Path>) -> ConversionOutcome {
        match tokio::runtime::Runtime::new() {
            Ok(rt) => rt.block_on(self.convert(path)),
            Err(e) => ConversionOutcome::Failed {
                message: format!("Failed to create tokio runtime: {e}"),
                attempts: Vec::new(),
            },
        }
    }

    /// Render once and validate the output size.
    async fn attempt(&self, backend: &dyn RenderBackend, job: &RenderJob) -> Result<u64, RenderError> {
        // A PDF left by an earlier run must not pass validation.
        remove_stale(&job.output).await;
        backend.render(job).await?;

        let bytes = tokio::fs::metadata(&job.output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if bytes > self.min_pdf_bytes {
            Ok(bytes)
        } else {
            Err(RenderError::OutputTooSmall {
                path: job.output.clone(),
                bytes,
                min_bytes: self.min_pdf_bytes,
            })
        }
    }

    async fn write_fallback(
        &self,
        doc: &SourceDocument,
        title: &str,
        body: &str,
        availability: &[BackendAvailability],
        attempts: Vec<ConversionAttemptResult>,
    ) -> ConversionOutcome {
        let html_path = doc.fallback_path();
        let page = fallback::fallback_document(title, body, &doc.base_dir()).await;

        match tokio::fs::write(&html_path, page).await {
            Ok(()) => {
                let guidance = fallback::fallback_guidance(&html_path, availability);
                info!("All PDF backends failed; wrote {}", html_path.display());
                if let Some(ref cb) = self.progress {
                    cb.on_degraded(&guidance);
                }
                ConversionOutcome::Fallback {
                    html_path,
                    guidance,
                    attempts,
                }
            }
            Err(e) => {
                warn!("Could not write fallback {}: {e}", html_path.display());
                ConversionOutcome::Failed {
                    message: fallback::unrecoverable_message(&doc.path, &e.to_string()),
                    attempts,
                }
            }
        }
    }
}

/// Title and HTML body fragment for a source document.
fn render_body(doc: &SourceDocument) -> (String, String) {
    match doc.format {
        SourceFormat::Markdown => {
            let pre = preprocess::preprocess_markdown(&doc.content);
            (
                markup::document_title(&doc.content),
                markup::markdown_to_html(&pre),
            )
        }
        SourceFormat::Html => (
            markup::html_title(&doc.content),
            preprocess::preprocess_html(markup::html_body(&doc.content)),
        ),
    }
}

async fn remove_stale(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Writes `size` bytes to the output, or fails.
    struct FakeBackend {
        name: &'static str,
        available: bool,
        blind: bool,
        size: Option<usize>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl RenderBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn probe(&self) -> bool {
            self.available
        }
        fn attempt_when_unavailable(&self) -> bool {
            self.blind
        }
        fn install_hint(&self) -> &'static str {
            "install it"
        }
        async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
            self.calls.lock().unwrap().push(self.name);
            match self.size {
                Some(n) => {
                    std::fs::write(&job.output, vec![b'%'; n])?;
                    Ok(())
                }
                None => Err(RenderError::Failed {
                    program: self.name.into(),
                    status: "exit status: 1".into(),
                    stderr: "boom".into(),
                }),
            }
        }
    }

    fn fake(
        name: &'static str,
        available: bool,
        size: Option<usize>,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn RenderBackend> {
        Box::new(FakeBackend {
            name,
            available,
            blind: false,
            size,
            calls: Arc::clone(calls),
        })
    }

    fn pipeline(backends: Vec<Box<dyn RenderBackend>>) -> ConversionPipeline {
        ConversionPipeline::new(&StorybookConfig::default()).with_backends(backends)
    }

    fn story(dir: &Path) -> PathBuf {
        let path = dir.join("story.md");
        std::fs::write(
            &path,
            "# Fox Tales\n\n## Chapter 1: Meadow\n\n![Chapter 1](PLACEHOLDER: a fox in a meadow)\n\nThe fox ran.\n",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn first_valid_backend_wins() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let p = pipeline(vec![
            fake("a", true, None, &calls),
            fake("b", true, Some(4096), &calls),
            fake("c", true, Some(4096), &calls),
        ]);

        let out = p.convert(story(dir.path())).await;
        match &out {
            ConversionOutcome::Pdf { backend, bytes, path, attempts } => {
                assert_eq!(backend, "b");
                assert_eq!(*bytes, 4096);
                assert_eq!(path, &dir.path().join("story.pdf"));
                assert_eq!(attempts.len(), 2);
                assert!(!attempts[0].success);
            }
            other => panic!("expected pdf, got {other:?}"),
        }
        assert_eq!(*calls.lock().unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn too_small_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let p = pipeline(vec![fake("tiny", true, Some(1000), &calls)]);

        let out = p.convert(story(dir.path())).await;
        assert!(out.is_fallback());
        assert!(out.attempts()[0].error.as_deref().unwrap().contains("1000 bytes"));
        assert!(!dir.path().join("story.pdf").exists());
    }

    #[tokio::test]
    async fn unavailable_backends_are_skipped_unless_blind() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let blind = Box::new(FakeBackend {
            name: "blind",
            available: false,
            blind: true,
            size: None,
            calls: Arc::clone(&calls),
        });
        let p = pipeline(vec![blind, fake("absent", false, Some(4096), &calls)]);

        let out = p.convert(story(dir.path())).await;
        assert!(out.is_fallback());
        assert_eq!(*calls.lock().unwrap(), ["blind"]);
    }

    #[tokio::test]
    async fn fallback_contains_preprocessed_chapter_text() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let p = pipeline(vec![fake("a", false, None, &calls)]);

        let out = p.convert(story(dir.path())).await;
        let ConversionOutcome::Fallback { html_path, guidance, .. } = &out else {
            panic!("expected fallback, got {out:?}");
        };
        assert_eq!(html_path, &dir.path().join("story.html"));
        let html = std::fs::read_to_string(html_path).unwrap();
        assert!(html.contains("The fox ran."));
        assert!(html.contains("📖 a fox in a meadow"));
        assert!(html.contains("chapter-break"));
        assert!(html.contains("window.print()"));
        assert!(guidance.contains("install it"));
    }

    #[tokio::test]
    async fn missing_document_reports_failure() {
        let p = pipeline(vec![]);
        let out = p.convert("/no/such/story.md").await;
        assert_eq!(out.classification(), "failed");
        assert!(out.status_message().contains("not found"));
    }

    #[tokio::test]
    async fn stale_pdf_does_not_count_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = story(dir.path());
        std::fs::write(dir.path().join("story.pdf"), vec![0u8; 10_000]).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let out = pipeline(vec![fake("a", true, None, &calls)]).convert(&path).await;
        assert!(out.is_fallback());
    }

    #[tokio::test]
    async fn detect_backends_reports_each() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let p = pipeline(vec![fake("a", true, None, &calls), fake("b", false, None, &calls)]);
        let found = p.detect_backends().await;
        assert_eq!(found.len(), 2);
        assert!(found[0].available);
        assert!(!found[1].available);
        assert_eq!(found[0].name, "a");
        assert_eq!(found[1].name, "b");
    }

    #[test]
    fn convert_sync_runs_outside_a_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let out = pipeline(vec![fake("ok", true, Some(2048), &calls)]).convert_sync(story(dir.path()));
        assert!(out.is_pdf());
    }
}
