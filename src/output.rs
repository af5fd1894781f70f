//! Result types produced by the story stages and the conversion pipeline.
//!
//! Everything here is plain data and `Serialize`, so the CLI can print any
//! of it with `--json`.

use crate::client::image::ImageResult;
use crate::resilience::usage::ApiStatus;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// The five stages of a storybook run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Outline,
    Write,
    Illustrate,
    Format,
    Convert,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Outline,
        Stage::Write,
        Stage::Illustrate,
        Stage::Format,
        Stage::Convert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Outline => "outline",
            Stage::Write => "write",
            Stage::Illustrate => "illustrate",
            Stage::Format => "format",
            Stage::Convert => "convert",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chapter after the write and illustrate stages.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterAsset {
    /// 1-indexed chapter number.
    pub chapter_index: usize,
    pub title: String,
    pub textual_content: String,
    pub image: ImageResult,
}

/// Outcome of one rendering backend attempt.
///
/// Ephemeral: only used to decide whether the pipeline moves on, and
/// reported back to the caller for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionAttemptResult {
    pub backend: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionAttemptResult {
    pub fn succeeded(backend: impl Into<String>, output_path: &Path) -> Self {
        Self {
            backend: backend.into(),
            success: true,
            output_path: Some(output_path.to_path_buf()),
            error: None,
        }
    }

    pub fn failed(backend: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            success: false,
            output_path: None,
            error: Some(error.into()),
        }
    }
}

/// What [`crate::convert::ConversionPipeline::convert`] produced.
///
/// Conversion never returns an error; a missing input or an unwritable
/// fallback is reported through [`ConversionOutcome::Failed`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// A backend produced a validated PDF.
    Pdf {
        path: PathBuf,
        backend: String,
        bytes: u64,
        attempts: Vec<ConversionAttemptResult>,
    },
    /// Every backend failed; a printable HTML document was written instead.
    Fallback {
        html_path: PathBuf,
        guidance: String,
        attempts: Vec<ConversionAttemptResult>,
    },
    /// Nothing usable could be produced.
    Failed {
        message: String,
        attempts: Vec<ConversionAttemptResult>,
    },
}

impl ConversionOutcome {
    pub fn is_pdf(&self) -> bool {
        matches!(self, ConversionOutcome::Pdf { .. })
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ConversionOutcome::Fallback { .. })
    }

    /// Coarse label used to compare runs: `pdf`, `fallback` or `failed`.
    pub fn classification(&self) -> &'static str {
        match self {
            ConversionOutcome::Pdf { .. } => "pdf",
            ConversionOutcome::Fallback { .. } => "fallback",
            ConversionOutcome::Failed { .. } => "failed",
        }
    }

    pub fn attempts(&self) -> &[ConversionAttemptResult] {
        match self {
            ConversionOutcome::Pdf { attempts, .. }
            | ConversionOutcome::Fallback { attempts, .. }
            | ConversionOutcome::Failed { attempts, .. } => attempts,
        }
    }

    /// The file the user should open, if any.
    pub fn artifact_path(&self) -> Option<&Path> {
        match self {
            ConversionOutcome::Pdf { path, .. } => Some(path),
            ConversionOutcome::Fallback { html_path, .. } => Some(html_path),
            ConversionOutcome::Failed { .. } => None,
        }
    }

    /// Human-readable status: the PDF path, or the guidance / failure text.
    pub fn status_message(&self) -> String {
        match self {
            ConversionOutcome::Pdf {
                path,
                backend,
                bytes,
                ..
            } => format!("PDF created with {backend}: {} ({bytes} bytes)", path.display()),
            ConversionOutcome::Fallback { guidance, .. } => guidance.clone(),
            ConversionOutcome::Failed { message, .. } => message.clone(),
        }
    }
}

/// Everything a finished storybook run produced.
#[derive(Debug, Clone, Serialize)]
pub struct StoryOutput {
    pub topic: String,
    pub title: String,
    pub markdown_path: PathBuf,
    pub chapters: Vec<ChapterAsset>,
    pub conversion: ConversionOutcome,
    pub api_status: ApiStatus,
    pub total_duration_ms: u64,
}

impl StoryOutput {
    /// Number of chapters whose illustration is a real image file.
    pub fn generated_images(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| matches!(c.image, ImageResult::Saved(_)))
            .count()
    }
}
