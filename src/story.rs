//! Storybook orchestration: outline → write → illustrate → format → convert.
//!
//! Stages run strictly in sequence and each text stage's output is the
//! context for the next. Only the outline and write stages spend text quota;
//! illustration descriptions are derived from the chapters themselves.
//!
//! Text failures are fatal (after the retry core gives up). Image and
//! conversion failures are not: they degrade to placeholders and a printable
//! HTML fallback.

use crate::client::image::{ImageBackend, ImageGenerationClient, ImageResult};
use crate::client::text::{GeminiClient, TextBackend, TextRequest};
use crate::config::StorybookConfig;
use crate::convert::ConversionPipeline;
use crate::error::StorybookError;
use crate::output::{ChapterAsset, Stage, StoryOutput};
use crate::pipeline::postprocess::clean_story_text;
use crate::progress::ProgressCallback;
use crate::prompts::{illustration_description, outline_prompt, write_prompt};
use crate::resilience::{ApiStatus, RateLimiter, ResilientCaller, UsageTracker};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Longest topic accepted, in words.
pub const MAX_TOPIC_WORDS: usize = 10;

/// Trim `topic` and check it is non-empty and at most ten words.
pub fn validate_topic(topic: &str) -> Result<String, StorybookError> {
    let topic = topic.split_whitespace().collect::<Vec<_>>().join(" ");
    if topic.is_empty() {
        return Err(StorybookError::InvalidConfig("topic must not be empty".into()));
    }
    let words = topic.split(' ').count();
    if words > MAX_TOPIC_WORDS {
        return Err(StorybookError::InvalidConfig(format!(
            "topic has {words} words; keep it to {MAX_TOPIC_WORDS} or fewer"
        )));
    }
    Ok(topic)
}

// ── Chapter parsing ──────────────────────────────────────────────────────────

/// A chapter as written, before illustration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftChapter {
    pub title: String,
    pub content: String,
}

/// The write stage's output split into title and chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryDraft {
    pub title: Option<String>,
    pub chapters: Vec<DraftChapter>,
}

static RE_CHAPTER_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^##[ \t]+(Chapter[ \t]+\d+[^\n]*)$").unwrap()
});

/// Split Markdown into its `# Title` and `## Chapter N: …` sections.
///
/// Text before the first chapter heading (other than the title) is dropped.
/// Chapter titles keep the `Chapter N` prefix.
pub fn split_chapters(markdown: &str) -> StoryDraft {
    let title = markdown
        .lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let headings: Vec<_> = RE_CHAPTER_HEADING.captures_iter(markdown).collect();
    let mut chapters = Vec::with_capacity(headings.len());
    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(heading)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(markdown.len(), |m| m.start());
        chapters.push(DraftChapter {
            title: heading.as_str().trim().to_string(),
            content: markdown[whole.end()..end].trim().to_string(),
        });
    }
    StoryDraft { title, chapters }
}

// ── Formatting ───────────────────────────────────────────────────────────────

/// Render the final Markdown document from illustrated chapters.
///
/// Saved images are referenced relative to `output_dir`, which is where the
/// document itself is written.
pub fn render_story_markdown(title: &str, chapters: &[ChapterAsset], output_dir: &Path) -> String {
    let mut out = format!("# {}\n\n", title.trim());
    for chapter in chapters {
        let alt: String = chapter
            .title
            .chars()
            .filter(|c| !matches!(c, '[' | ']'))
            .collect();
        let reference = match &chapter.image {
            ImageResult::Saved(path) => path
                .strip_prefix(output_dir)
                .unwrap_or(path)
                .display()
                .to_string(),
            placeholder => placeholder.reference(),
        };
        out.push_str(&format!(
            "## {}\n\n![{}]({})\n\n{}\n\n",
            chapter.title.trim(),
            alt.trim(),
            reference,
            chapter.textual_content.trim()
        ));
    }
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out.push('\n');
    out
}

/// Write `content` to `path` via a temp file and rename.
async fn write_atomic(path: &Path, content: &str) -> Result<(), StorybookError> {
    let write_err = |e| StorybookError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, content).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

// ── Generator ────────────────────────────────────────────────────────────────

/// Runs the five stages for one topic.
pub struct StoryGenerator<B> {
    config: StorybookConfig,
    caller: ResilientCaller<B>,
    illustrator: Box<dyn ImageBackend>,
    converter: ConversionPipeline,
}

impl StoryGenerator<GeminiClient> {
    /// Wire up the Gemini and image clients, one limiter and one usage
    /// tracker for the whole run.
    pub fn from_config(config: StorybookConfig) -> Result<Self, StorybookError> {
        let limiter = Arc::new(RateLimiter::from_config(&config)?);
        let usage = Arc::new(UsageTracker::new());
        let text = GeminiClient::from_config(&config)?;
        let caller = ResilientCaller::from_config(text, &config, limiter, usage);
        let images = ImageGenerationClient::from_config(&config)?;
        Ok(Self::new(config, caller, Box::new(images)))
    }
}

impl<B: TextBackend> StoryGenerator<B> {
    pub fn new(
        config: StorybookConfig,
        caller: ResilientCaller<B>,
        illustrator: Box<dyn ImageBackend>,
    ) -> Self {
        let converter = ConversionPipeline::new(&config);
        Self {
            config,
            caller,
            illustrator,
            converter,
        }
    }

    /// Replace the conversion pipeline (e.g. with custom backends).
    pub fn with_converter(mut self, converter: ConversionPipeline) -> Self {
        self.converter = converter;
        self
    }

    pub fn config(&self) -> &StorybookConfig {
        &self.config
    }

    pub fn api_status(&self) -> ApiStatus {
        ApiStatus::capture(self.caller.usage(), self.caller.limiter())
    }

    /// Generate the storybook for `topic`.
    pub async fn generate(&self, topic: &str) -> Result<StoryOutput, StorybookError> {
        let start = Instant::now();
        let topic = validate_topic(topic)?;
        info!("Generating storybook about '{topic}'");

        // ── Stage 1: Outline ─────────────────────────────────────────────
        self.stage_start(Stage::Outline);
        let outline = self
            .text_stage(Stage::Outline, outline_prompt(&topic, self.config.chapter_count))
            .await?;
        self.stage_complete(Stage::Outline, outline.len());

        // ── Stage 2: Write ───────────────────────────────────────────────
        self.stage_start(Stage::Write);
        let manuscript = self
            .text_stage(
                Stage::Write,
                write_prompt(&topic, &outline, self.config.chapter_count),
            )
            .await?;
        let draft = split_chapters(&clean_story_text(&manuscript));
        if draft.chapters.is_empty() {
            return Err(self.stage_failed(
                Stage::Write,
                "no '## Chapter N' headings found in the story text".into(),
            ));
        }
        if draft.chapters.len() != self.config.chapter_count {
            warn!(
                "Expected {} chapters, got {}",
                self.config.chapter_count,
                draft.chapters.len()
            );
        }
        self.stage_complete(Stage::Write, manuscript.len());

        // ── Stage 3: Illustrate ──────────────────────────────────────────
        self.stage_start(Stage::Illustrate);
        let mut chapters = Vec::with_capacity(draft.chapters.len());
        for (i, chapter) in draft.chapters.into_iter().enumerate() {
            let description = illustration_description(&chapter.title, &chapter.content);
            let image = self.illustrator.illustrate(&description).await;
            if image.is_placeholder() {
                self.degraded(&format!(
                    "Chapter {}: image unavailable, using a text placeholder",
                    i + 1
                ));
            }
            chapters.push(ChapterAsset {
                chapter_index: i + 1,
                title: chapter.title,
                textual_content: chapter.content,
                image,
            });
        }
        let saved = chapters.iter().filter(|c| !c.image.is_placeholder()).count();
        self.stage_complete(Stage::Illustrate, saved);

        // ── Stage 4: Format ──────────────────────────────────────────────
        self.stage_start(Stage::Format);
        let title = draft.title.unwrap_or_else(|| format!("A Story About {topic}"));
        let markdown = render_story_markdown(&title, &chapters, &self.config.output_dir);
        let markdown_path = self.config.markdown_path();
        if let Err(e) = write_atomic(&markdown_path, &markdown).await {
            self.notify_error(Stage::Format, &e.to_string());
            return Err(e);
        }
        info!("Story written to {}", markdown_path.display());
        self.stage_complete(Stage::Format, markdown.len());

        // ── Stage 5: Convert ─────────────────────────────────────────────
        self.stage_start(Stage::Convert);
        let conversion = self.converter.convert(&markdown_path).await;
        self.stage_complete(Stage::Convert, conversion.attempts().len());

        Ok(StoryOutput {
            topic,
            title,
            markdown_path,
            chapters,
            conversion,
            api_status: self.api_status(),
            total_duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn text_stage(&self, stage: Stage, prompt: String) -> Result<String, StorybookError> {
        let request = TextRequest::new(prompt, self.config.generation);
        match self.caller.invoke(&request).await {
            Ok(response) if !response.text.trim().is_empty() => Ok(response.text.trim().to_string()),
            Ok(_) => Err(self.stage_failed(stage, "model returned empty text".into())),
            Err(e) => {
                self.notify_error(stage, &e.to_string());
                Err(e)
            }
        }
    }

    fn progress(&self) -> Option<&ProgressCallback> {
        self.config.progress_callback.as_ref()
    }

    fn stage_start(&self, stage: Stage) {
        info!("Stage {stage} started");
        if let Some(cb) = self.progress() {
            cb.on_stage_start(stage);
        }
    }

    fn stage_complete(&self, stage: Stage, len: usize) {
        if let Some(cb) = self.progress() {
            cb.on_stage_complete(stage, len);
        }
    }

    fn notify_error(&self, stage: Stage, detail: &str) {
        warn!("Stage {stage} failed: {detail}");
        if let Some(cb) = self.progress() {
            cb.on_stage_error(stage, detail);
        }
    }

    fn stage_failed(&self, stage: Stage, detail: String) -> StorybookError {
        self.notify_error(stage, &detail);
        StorybookError::StageFailed {
            stage: stage.to_string(),
            detail,
        }
    }

    fn degraded(&self, message: &str) {
        warn!("{message}");
        if let Some(cb) = self.progress() {
            cb.on_degraded(message);
        }
    }
}
