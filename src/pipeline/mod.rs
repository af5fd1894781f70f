//! Pipeline stages for turning a story document into a PDF.
//!
//! Each submodule implements exactly one step, so each is testable alone
//! and a rendering backend can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ preprocess ──▶ markup ──▶ backends ──▶ (PDF)
//!                                        │
//!                                        └─ all failed ──▶ fallback (HTML)
//! ```
//!
//! 1. [`input`]      — validate the source path, detect Markdown vs HTML
//! 2. [`preprocess`] — placeholder captions, styled images, chapter breaks
//! 3. [`markup`]     — Markdown → HTML plus the print stylesheet
//! 4. [`backends`]   — external renderers tried in priority order
//! 5. [`fallback`]   — self-contained printable HTML with recovery guidance
//!
//! [`postprocess`] is used earlier, by the story stages, to clean model
//! output before it becomes the source document.

pub mod backends;
pub mod fallback;
pub mod input;
pub mod markup;
pub mod postprocess;
pub mod preprocess;
