//! Offline integration tests: the full story pipeline and document
//! conversion, driven through the public API with scripted backends.
//!
//! No network, no external PDF tools. Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storybook_forge::error::{BackendError, RenderError};
use storybook_forge::pipeline::backends::{RenderBackend, RenderJob};
use storybook_forge::{
    validate_topic, ConversionOutcome, ConversionPipeline, ImageBackend, ImageResult, RateLimiter,
    ResilientCaller, RetryPolicy, StoryGenerator, StorybookConfig, StorybookError, TextBackend,
    TextRequest, TextResponse, UsageTracker,
};

// ── Fakes ────────────────────────────────────────────────────────────────────

struct ScriptedText(Mutex<VecDeque<Result<TextResponse, BackendError>>>);

impl ScriptedText {
    fn new(replies: Vec<Result<TextResponse, BackendError>>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(replies.into())))
    }
}

#[async_trait]
impl TextBackend for ScriptedText {
    async fn generate(&self, _req: &TextRequest) -> Result<TextResponse, BackendError> {
        self.0.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(BackendError::Permanent {
                status: Some(400),
                detail: "script exhausted".into(),
            })
        })
    }
}

fn text(s: &str) -> Result<TextResponse, BackendError> {
    Ok(TextResponse {
        text: s.into(),
        ..Default::default()
    })
}

struct NoImages;

#[async_trait]
impl ImageBackend for NoImages {
    async fn illustrate(&self, description: &str) -> ImageResult {
        ImageResult::placeholder(description)
    }
}

/// Writes `bytes` bytes to the output, or fails when `bytes` is `None`.
struct FakeRenderer {
    name: &'static str,
    bytes: Option<usize>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl RenderBackend for FakeRenderer {
    fn name(&self) -> &'static str {
        self.name
    }
    async fn probe(&self) -> bool {
        true
    }
    fn install_hint(&self) -> &'static str {
        "install the fake"
    }
    async fn render(&self, job: &RenderJob) -> Result<(), RenderError> {
        self.calls.lock().unwrap().push(self.name);
        match self.bytes {
            Some(n) => {
                tokio::fs::write(&job.output, vec![b'%'; n]).await?;
                Ok(())
            }
            None => Err(RenderError::Failed {
                program: self.name.to_string(),
                status: "exit status: 1".into(),
                stderr: "boom".into(),
            }),
        }
    }
}

fn renderers(
    spec: &[(&'static str, Option<usize>)],
) -> (Vec<Box<dyn RenderBackend>>, Arc<Mutex<Vec<&'static str>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let backends = spec
        .iter()
        .map(|&(name, bytes)| {
            Box::new(FakeRenderer {
                name,
                bytes,
                calls: calls.clone(),
            }) as Box<dyn RenderBackend>
        })
        .collect();
    (backends, calls)
}

fn config(dir: &Path) -> StorybookConfig {
    StorybookConfig::builder()
        .google_api_key("test-google")
        .huggingface_api_key("test-hf")
        .output_dir(dir)
        .build()
        .unwrap()
}

const FOX_STORY: &str = "# The Brave Little Fox\n\n\
## Chapter 1: The Den\n\nFinn the fox lived under an old oak.\n\n\
## Chapter 2: The Storm\n\nRain came and the river rose.\n\n\
## Chapter 3: The Bridge\n\nFinn found a fallen log.\n\n\
## Chapter 4: The Rescue\n\nHe helped the rabbits cross.\n\n\
## Chapter 5: Home\n\nEveryone was safe and dry.\n";

// ── Topic rules ──────────────────────────────────────────────────────────────

#[test]
fn topics_are_short_and_non_empty() {
    assert_ok!(validate_topic("a brave little fox"));
    assert_ok!(validate_topic("one two three four five six seven eight nine ten"));
    assert_err!(validate_topic(""));
    assert_err!(validate_topic("one two three four five six seven eight nine ten eleven"));
}

#[test]
fn blocking_conversion_of_a_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (backends, _) = renderers(&[("good", Some(4096))]);
    let outcome = ConversionPipeline::new(&config(dir.path()))
        .with_backends(backends)
        .convert_sync(dir.path().join("missing.md"));
    assert_eq!(outcome.classification(), "failed");
}

// ── Story pipeline ───────────────────────────────────────────────────────────

#[tokio::test]
async fn story_with_failed_images_and_no_pdf_tools_still_produces_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let caller = ResilientCaller::new(
        ScriptedText::new(vec![text("1. Den\n2. Storm"), text(FOX_STORY)]),
        Arc::new(RateLimiter::new(15, Duration::from_secs(60)).unwrap()),
        Arc::new(UsageTracker::new()),
        RetryPolicy::default(),
    );
    let (backends, _) = renderers(&[("fake-a", None), ("fake-b", Some(10))]);
    let converter = ConversionPipeline::new(&config).with_backends(backends);

    let story = StoryGenerator::new(config, caller, Box::new(NoImages))
        .with_converter(converter)
        .generate("a brave little fox")
        .await
        .unwrap();

    assert_eq!(story.chapters.len(), 5);
    assert_eq!(story.generated_images(), 0);
    assert!(story.chapters.iter().all(|c| c.image.is_placeholder()));

    let md = std::fs::read_to_string(&story.markdown_path).unwrap();
    assert_eq!(md.matches("](PLACEHOLDER: ").count(), 5);

    match &story.conversion {
        ConversionOutcome::Fallback {
            html_path,
            guidance,
            attempts,
        } => {
            assert_eq!(html_path, &dir.path().join("story.html"));
            assert!(guidance.contains("Ctrl+P"));
            assert_eq!(attempts.len(), 2);
            let html = std::fs::read_to_string(html_path).unwrap();
            assert!(html.matches("image-placeholder").count() >= 5);
            assert!(html.contains("page-break-before"));
        }
        other => panic!("expected fallback, got {other:?}"),
    }
    assert!(!dir.path().join("story.pdf").exists());
}

#[tokio::test(start_paused = true)]
async fn quota_errors_are_retried_before_the_story_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let quota = || -> Result<TextResponse, BackendError> {
        Err(BackendError::RateLimited {
            retry_after_secs: None,
            detail: "RESOURCE_EXHAUSTED".into(),
        })
    };
    let usage = Arc::new(UsageTracker::new());
    let caller = ResilientCaller::new(
        ScriptedText::new(vec![quota(), text("outline"), quota(), text(FOX_STORY)]),
        Arc::new(RateLimiter::new(15, Duration::from_secs(60)).unwrap()),
        usage.clone(),
        RetryPolicy::default(),
    );
    let (backends, _) = renderers(&[("fake", Some(5000))]);
    let converter = ConversionPipeline::new(&config).with_backends(backends);

    let story = StoryGenerator::new(config, caller, Box::new(NoImages))
        .with_converter(converter)
        .generate("a brave little fox")
        .await
        .unwrap();

    assert_eq!(usage.requests_today(), 4);
    assert_eq!(story.api_status.requests_today, 4);
    assert!(story.conversion.is_pdf());
}

#[tokio::test(start_paused = true)]
async fn persistent_quota_exhaustion_is_reported_as_quota_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let replies: Vec<Result<TextResponse, BackendError>> = (0..5)
        .map(|_| {
            Err(BackendError::RateLimited {
                retry_after_secs: None,
                detail: "429".into(),
            })
        })
        .collect();
    let caller = ResilientCaller::new(
        ScriptedText::new(replies),
        Arc::new(RateLimiter::new(15, Duration::from_secs(60)).unwrap()),
        Arc::new(UsageTracker::new()),
        RetryPolicy::default(),
    );

    let err = StoryGenerator::new(config, caller, Box::new(NoImages))
        .generate("a brave little fox")
        .await
        .unwrap_err();

    assert!(err.is_quota());
    assert!(matches!(err, StorybookError::QuotaExceeded { attempts: 5, .. }));
    let guidance = err.recovery_guidance().unwrap();
    assert!(guidance.contains("Google AI Studio"));
    assert!(!dir.path().join("story.md").exists());
}

// ── Conversion ───────────────────────────────────────────────────────────────

async fn convert_with(
    dir: &Path,
    source: &Path,
    spec: &[(&'static str, Option<usize>)],
) -> ConversionOutcome {
    let (backends, _) = renderers(spec);
    ConversionPipeline::new(&config(dir))
        .with_backends(backends)
        .convert(source)
        .await
}

fn write_story(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn first_backend_with_a_valid_pdf_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_story(dir.path(), "fox.md", FOX_STORY);
    let (backends, calls) =
        renderers(&[("broken", None), ("good", Some(2048)), ("never", Some(2048))]);
    let pipeline = ConversionPipeline::new(&config(dir.path())).with_backends(backends);

    let outcome = pipeline.convert(&path).await;

    match outcome {
        ConversionOutcome::Pdf {
            ref path,
            ref backend,
            bytes,
            ref attempts,
        } => {
            assert_eq!(path, &dir.path().join("fox.pdf"));
            assert_eq!(backend, "good");
            assert_eq!(bytes, 2048);
            assert_eq!(attempts.len(), 2);
            assert!(!attempts[0].success);
        }
        ref other => panic!("expected pdf, got {other:?}"),
    }
    assert_eq!(*calls.lock().unwrap(), ["broken", "good"]);
}

#[tokio::test]
async fn tiny_pdfs_do_not_count_and_reruns_are_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_story(dir.path(), "fox.md", FOX_STORY);
    let first = convert_with(dir.path(), &path, &[("tiny", Some(1000))]).await;
    let second = convert_with(dir.path(), &path, &[("tiny", Some(1000))]).await;

    assert!(first.is_fallback());
    assert_eq!(first.classification(), second.classification());
    assert!(!dir.path().join("fox.pdf").exists());
    assert!(dir.path().join("fox.html").is_file());
}

#[tokio::test]
async fn html_sources_fall_back_beside_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let original = "<html><head><title>Fox</title></head><body><h1>Fox</h1>\
<h2>Chapter 1: Den</h2><img src=\"PLACEHOLDER: a fox den\" alt=\"den\"><p>Hi.</p></body></html>";
    let path = write_story(dir.path(), "fox.html", original);
    let (backends, _) = renderers(&[("broken", None)]);

    let outcome = ConversionPipeline::new(&config(dir.path()))
        .with_backends(backends)
        .convert(&path)
        .await;

    assert_eq!(
        outcome.artifact_path(),
        Some(dir.path().join("fox.print.html").as_path())
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[tokio::test]
async fn inline_story_images_stay_markup_in_the_fallback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fox.png"), [137u8, 80, 78, 71]).unwrap();
    let path = write_story(
        dir.path(),
        "fox.md",
        "# Fox\n\n## Chapter 1: Den\n\nLook: ![fox](fox.png) here, \
then ![den](PLACEHOLDER: a den under an oak) too. <3 Mom\n",
    );

    let outcome = convert_with(dir.path(), &path, &[("broken", None)]).await;

    let html = std::fs::read_to_string(outcome.artifact_path().unwrap()).unwrap();
    assert!(html.contains(r#"<img src="data:image/png;base64,iVBORw==""#));
    assert!(html.contains(r#"<div class="image-placeholder"><em>📖 a den under an oak</em></div>"#));
    assert!(html.contains("&lt;3 Mom"));
    assert!(!html.contains("&lt;img"));
    assert!(!html.contains("&lt;div"));
}

#[tokio::test]
async fn missing_source_is_unrecoverable() {
    let dir = tempfile::tempdir().unwrap();
    let (backends, calls) = renderers(&[("good", Some(4096))]);

    let outcome = ConversionPipeline::new(&config(dir.path()))
        .with_backends(backends)
        .convert(dir.path().join("nope.md"))
        .await;

    assert_eq!(outcome.classification(), "failed");
    assert!(outcome.status_message().contains("nope.md"));
    assert!(calls.lock().unwrap().is_empty());
}
