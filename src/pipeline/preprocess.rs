//! Pre-processing: normalise image references and chapter breaks before
//! rendering.
//!
//! Two rules, applied to Markdown image syntax and to raw `<img>` tags alike:
//!
//! 1. An image whose source carries the `PLACEHOLDER:` tag becomes a styled
//!    caption block. No `<img>` is emitted for it.
//! 2. A real image becomes an `<img class="chapter-image">` element.
//!
//! Then every `## Chapter N` heading (or `<h2>Chapter N`) gets a
//! `chapter-break` marker in front of it so each chapter starts a new page.

use crate::client::image::placeholder_description;
use crate::pipeline::input::SourceFormat;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Marker inserted before each chapter heading.
pub const CHAPTER_BREAK: &str = r#"<div class="chapter-break"></div>"#;

/// Apply both rules for the given source format.
pub fn preprocess(content: &str, format: SourceFormat) -> String {
    match format {
        SourceFormat::Markdown => preprocess_markdown(content),
        SourceFormat::Html => preprocess_html(content),
    }
}

pub fn preprocess_markdown(md: &str) -> String {
    let s = replace_markdown_images(md);
    let s = replace_html_images(&s);
    insert_markdown_chapter_breaks(&s)
}

pub fn preprocess_html(html: &str) -> String {
    let s = replace_html_images(html);
    insert_html_chapter_breaks(&s)
}

// ── Image references ─────────────────────────────────────────────────────────

static RE_MD_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

static RE_HTML_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*"([^"]*)"[^>]*>"#).unwrap()
});

static RE_HTML_ALT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\balt\s*=\s*"([^"]*)""#).unwrap());

fn replace_markdown_images(input: &str) -> String {
    RE_MD_IMAGE
        .replace_all(input, |caps: &Captures<'_>| {
            image_block(caps[1].trim(), caps[2].trim())
        })
        .to_string()
}

fn replace_html_images(input: &str) -> String {
    RE_HTML_IMAGE
        .replace_all(input, |caps: &Captures<'_>| {
            let tag = &caps[0];
            let src = html_escape::decode_html_entities(caps[1].trim()).to_string();
            if placeholder_description(&src).is_none() && tag.contains("chapter-image") {
                return tag.to_string();
            }
            let alt = RE_HTML_ALT
                .captures(tag)
                .map(|a| html_escape::decode_html_entities(&a[1]).to_string())
                .unwrap_or_default();
            image_block(alt.trim(), &src)
        })
        .to_string()
}

fn image_block(alt: &str, src: &str) -> String {
    match placeholder_description(src) {
        Some(description) => format!(
            r#"<div class="image-placeholder"><em>📖 {}</em></div>"#,
            html_escape::encode_text(description)
        ),
        None => {
            let alt = if alt.is_empty() { "Chapter Image" } else { alt };
            format!(
                r#"<img src="{}" alt="{}" class="chapter-image">"#,
                html_escape::encode_double_quoted_attribute(src),
                html_escape::encode_double_quoted_attribute(alt)
            )
        }
    }
}

// ── Chapter breaks ───────────────────────────────────────────────────────────

static RE_MD_CHAPTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^## (Chapter \d+[^#\n]*)").unwrap());

static RE_HTML_CHAPTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(<h2\b[^>]*>\s*Chapter\s+\d+)").unwrap());

fn insert_markdown_chapter_breaks(input: &str) -> String {
    RE_MD_CHAPTER
        .replace_all(input, |caps: &Captures<'_>| {
            format!("{CHAPTER_BREAK}\n\n## {}", &caps[1])
        })
        .to_string()
}

fn insert_html_chapter_breaks(input: &str) -> String {
    RE_HTML_CHAPTER
        .replace_all(input, |caps: &Captures<'_>| {
            format!("{CHAPTER_BREAK}\n{}", &caps[1])
        })
        .to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_becomes_caption_without_img() {
        let md = "## Chapter 1: Meadow\n\n![Chapter 1](PLACEHOLDER: a fox in a meadow)\n\nText.";
        let out = preprocess_markdown(md);
        assert!(out.contains(r#"<div class="image-placeholder"><em>📖 a fox in a meadow</em></div>"#));
        assert!(!out.contains("<img"));
        assert!(!out.contains("!["));
    }

    #[test]
    fn real_image_becomes_styled_img() {
        let out = preprocess_markdown("![The fox](fox.png)");
        assert_eq!(out, r#"<img src="fox.png" alt="The fox" class="chapter-image">"#);
    }

    #[test]
    fn empty_alt_gets_default() {
        let out = preprocess_markdown("![](fox.png)");
        assert!(out.contains(r#"alt="Chapter Image""#));
    }

    #[test]
    fn caption_text_is_escaped() {
        let out = preprocess_markdown("![x](PLACEHOLDER: cats & <dogs>)");
        assert!(out.contains("cats &amp; &lt;dogs&gt;"));
    }

    #[test]
    fn html_placeholder_img_is_replaced() {
        let html = r#"<p>Intro</p><img src="PLACEHOLDER: a fox in a meadow" alt="fox"><p>End</p>"#;
        let out = preprocess_html(html);
        assert!(out.contains("📖 a fox in a meadow"));
        assert!(!out.contains("<img"));
    }

    #[test]
    fn html_real_img_gets_class() {
        let out = preprocess_html(r#"<img alt="Fox" src="fox.png">"#);
        assert_eq!(out, r#"<img src="fox.png" alt="Fox" class="chapter-image">"#);
    }

    #[test]
    fn breaks_inserted_before_each_chapter() {
        let md = "# Title\n\n## Chapter 1: Start\n\nA.\n\n## Chapter 2: End\n\nB.\n\n## Epilogue\n";
        let out = preprocess_markdown(md);
        assert_eq!(out.matches(CHAPTER_BREAK).count(), 2);
        assert!(out.contains(&format!("{CHAPTER_BREAK}\n\n## Chapter 2: End")));
        assert!(!out.contains(&format!("{CHAPTER_BREAK}\n\n## Epilogue")));
    }

    #[test]
    fn html_breaks_before_chapter_headings() {
        let out = preprocess_html("<h2 class=\"c\">Chapter 3: Night</h2><h2>Notes</h2>");
        assert_eq!(out.matches(CHAPTER_BREAK).count(), 1);
        assert!(out.starts_with(CHAPTER_BREAK));
    }

    #[test]
    fn format_dispatch() {
        let md = preprocess("## Chapter 1\n", SourceFormat::Markdown);
        assert!(md.starts_with(CHAPTER_BREAK));
        let html = preprocess("## Chapter 1\n", SourceFormat::Html);
        assert!(!html.contains(CHAPTER_BREAK));
    }
}
