//! # storybook-forge
//!
//! Generate illustrated children's storybooks from a short topic, then turn
//! them into a printable PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! topic
//!  │
//!  ├─ 1. Outline     text model drafts a chapter outline
//!  ├─ 2. Write       text model writes the chapters from the outline
//!  ├─ 3. Illustrate  one image request per chapter (placeholder on failure)
//!  ├─ 4. Format      Markdown document written atomically to disk
//!  └─ 5. Convert     external PDF renderers in priority order,
//!                    printable HTML when none succeeds
//! ```
//!
//! Every text request goes through one [`resilience::ResilientCaller`]: a
//! sliding-window [`resilience::RateLimiter`] in front, classified retry with
//! exponential backoff for quota errors and linear backoff for timeouts
//! behind.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use storybook_forge::{StoryGenerator, StorybookConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys come from GOOGLE_API_KEY / HUGGINGFACE_API_KEY
//!     let config = StorybookConfig::from_env();
//!     let story = StoryGenerator::from_config(config)?
//!         .generate("a brave little fox")
//!         .await?;
//!     println!("{}", story.markdown_path.display());
//!     println!("{}", story.conversion.status_message());
//!     Ok(())
//! }
//! ```
//!
//! Converting an existing document needs no credentials:
//!
//! ```rust,no_run
//! use storybook_forge::{ConversionPipeline, StorybookConfig};
//!
//! # async fn run() {
//! let pipeline = ConversionPipeline::new(&StorybookConfig::default());
//! let outcome = pipeline.convert("story.md").await;
//! eprintln!("{}", outcome.status_message());
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `storybook` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod resilience;
pub mod story;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::image::{ImageBackend, ImageGenerationClient, ImageResult};
pub use client::text::{GeminiClient, TextBackend, TextRequest, TextResponse};
pub use config::{ConfigIssue, StorybookConfig, StorybookConfigBuilder};
pub use convert::ConversionPipeline;
pub use error::{BackendError, ErrorKind, RenderError, StorybookError};
pub use output::{ChapterAsset, ConversionAttemptResult, ConversionOutcome, Stage, StoryOutput};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use resilience::{ApiStatus, RateLimiter, ResilientCaller, RetryPolicy, UsageTracker};
pub use story::{split_chapters, validate_topic, StoryGenerator};
