//! Markdown → HTML and the print stylesheet.
//!
//! Rendering is CommonMark via `comrak` with the table, footnote,
//! strikethrough and description-list extensions. Raw HTML passes through
//! wherever it appears, so the image blocks [`crate::pipeline::preprocess`]
//! emits survive inside paragraphs as well as on their own lines.

use comrak::Options;
use once_cell::sync::Lazy;
use regex::Regex;

/// Title used when the document has no level-1 heading.
pub const DEFAULT_TITLE: &str = "Children's Storybook";

/// Print stylesheet shared by every rendering path and the fallback.
pub const PRINT_CSS: &str = r#"
@page {
    size: A4;
    margin: 2cm;
    @top-center {
        content: "Children's Storybook";
        font-size: 10pt;
        color: #666;
    }
}

body {
    font-family: 'Georgia', 'Times New Roman', serif;
    font-size: 12pt;
    line-height: 1.6;
    color: #333;
    max-width: none;
    margin: 0;
    padding: 0;
}

h1 {
    color: #2c3e50;
    font-size: 24pt;
    text-align: center;
    margin: 0 0 30pt 0;
    padding: 20pt 0;
    border-bottom: 3pt solid #3498db;
}

h2 {
    color: #34495e;
    font-size: 18pt;
    margin: 30pt 0 15pt 0;
    padding: 10pt 0 5pt 15pt;
    border-left: 4pt solid #3498db;
    background-color: #f8f9fa;
}

h1, h2 {
    page-break-after: avoid;
}

.chapter-break {
    page-break-before: always;
    height: 0;
}

.chapter-break:first-child {
    page-break-before: auto;
}

p {
    margin: 0 0 12pt 0;
    text-align: justify;
    text-indent: 20pt;
    orphans: 2;
    widows: 2;
    page-break-inside: avoid;
}

.chapter-image {
    display: block;
    max-width: 100%;
    height: auto;
    margin: 20pt auto;
    border: 1pt solid #ddd;
    border-radius: 8pt;
    box-shadow: 0 2pt 4pt rgba(0,0,0,0.1);
}

.image-placeholder {
    margin: 20pt 0;
    padding: 15pt;
    background-color: #f0f8ff;
    border: 2pt dashed #3498db;
    border-radius: 8pt;
    text-align: center;
}

.image-placeholder em {
    font-style: italic;
    color: #2c3e50;
    font-size: 11pt;
    line-height: 1.4;
}

.chapter-image, .image-placeholder {
    page-break-inside: avoid;
}

ul {
    list-style-type: none;
    padding-left: 0;
}

li {
    margin: 5pt 0;
    padding: 5pt 0;
    border-bottom: 1pt dotted #ccc;
}

@media print {
    body { font-size: 11pt; }
    h1 { font-size: 22pt; }
    h2 { font-size: 16pt; }
}
"#;

/// Wrap a body fragment into a standalone HTML page.
///
/// `extra_head` is inserted after the stylesheet, `body_prefix` right after
/// `<body>`.
pub fn html_document(title: &str, body: &str, extra_head: &str, body_prefix: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n\
<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{}</title>\n<style>{PRINT_CSS}</style>\n{extra_head}</head>\n\
<body>\n{body_prefix}{body}\n</body>\n</html>\n",
        html_escape::encode_text(title)
    )
}

/// The first level-1 heading, or [`DEFAULT_TITLE`].
pub fn document_title(markdown: &str) -> String {
    markdown
        .lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

static RE_HTML_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:title|h1)\b[^>]*>(.*?)</(?:title|h1)>").unwrap());

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

static RE_HTML_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*)</body>").unwrap());

/// Title of an HTML document: `<title>` or the first `<h1>`.
pub fn html_title(html: &str) -> String {
    RE_HTML_TITLE
        .captures(html)
        .map(|c| RE_TAG.replace_all(&c[1], "").trim().to_string())
        .map(|t| html_escape::decode_html_entities(&t).to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Inner body of a full HTML page, or the input unchanged if it is a fragment.
pub fn html_body(html: &str) -> &str {
    RE_HTML_BODY
        .captures(html)
        .and_then(|c| c.get(1))
        .map_or(html, |m| m.as_str())
}

// ── Markdown ─────────────────────────────────────────────────────────────────

fn render_options() -> Options {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.footnotes = true;
    options.extension.strikethrough = true;
    options.extension.description_lists = true;
    options.render.unsafe_ = true;
    options
}

/// Convert Markdown to an HTML fragment.
pub fn markdown_to_html(markdown: &str) -> String {
    comrak::markdown_to_html(markdown, &render_options())
}
