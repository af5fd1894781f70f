//! Adapters for the two remote backends.
//!
//! Each adapter owns its HTTP client and is the only place that sees raw
//! statuses and transport errors:
//!
//! 1. [`text`]  — the generative-text call; classifies every failure into
//!    [`crate::error::BackendError`] so the retry core can act on a kind
//! 2. [`image`] — the image call; absorbs every failure into a placeholder

pub mod image;
pub mod text;
