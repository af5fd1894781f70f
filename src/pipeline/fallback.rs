//! Printable HTML fallback for when no backend produced a PDF.
//!
//! The page is self-contained: the print stylesheet is inlined, local images
//! are embedded as `data:` URIs, and a fixed "Print to PDF" button calls
//! `window.print()`. The button is hidden when printing.

use crate::pipeline::backends::BackendAvailability;
use crate::pipeline::markup::html_document;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const SCREEN_CSS: &str = r#"<style>
@media screen {
    body {
        max-width: 800px;
        margin: 0 auto;
        padding: 20px;
        background-color: #fafafa;
    }
    .print-button {
        position: fixed;
        top: 20px;
        right: 20px;
        background: #3498db;
        color: white;
        border: none;
        padding: 10px 20px;
        border-radius: 5px;
        cursor: pointer;
        font-size: 14px;
        z-index: 1000;
    }
    .print-button:hover {
        background: #2980b9;
    }
}
@media print {
    .print-button { display: none; }
}
</style>
<script>
function printPage() {
    window.print();
}
</script>
"#;

const PRINT_BUTTON: &str =
    "<button class=\"print-button\" onclick=\"printPage()\">🖨️ Print to PDF</button>\n";

static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(<img\b[^>]*?\bsrc\s*=\s*")([^"]+)(")"#).unwrap());

/// Build the fallback page from a rendered body fragment.
pub async fn fallback_document(title: &str, body_html: &str, base_dir: &Path) -> String {
    let body = inline_images(body_html, base_dir).await;
    html_document(title, &body, SCREEN_CSS, PRINT_BUTTON)
}

/// Replace local `<img src>` paths with base64 data URIs.
///
/// Remote URLs, existing data URIs and unreadable files are left as they are.
/// Files are read before any substitution happens.
pub async fn inline_images(html: &str, base_dir: &Path) -> String {
    let mut uris: HashMap<String, String> = HashMap::new();
    for caps in RE_IMG_SRC.captures_iter(html) {
        let src = html_escape::decode_html_entities(&caps[2]).to_string();
        if uris.contains_key(&src) {
            continue;
        }
        if let Some(uri) = data_uri(&src, base_dir).await {
            uris.insert(src, uri);
        }
    }
    if uris.is_empty() {
        return html.to_string();
    }

    RE_IMG_SRC
        .replace_all(html, |caps: &Captures<'_>| {
            let src = html_escape::decode_html_entities(&caps[2]);
            match uris.get(&*src) {
                Some(uri) => format!("{}{}{}", &caps[1], uri, &caps[3]),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

async fn data_uri(src: &str, base_dir: &Path) -> Option<String> {
    if src.starts_with("data:") || src.contains("://") {
        return None;
    }
    let path = Path::new(src);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => return None,
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => Some(format!("data:{mime};base64,{}", STANDARD.encode(bytes))),
        Err(e) => {
            debug!("Not inlining {}: {e}", path.display());
            None
        }
    }
}

/// Recovery instructions shown alongside the fallback page.
pub fn fallback_guidance(html_path: &Path, backends: &[BackendAvailability]) -> String {
    let mut out = format!(
        "Enhanced HTML version created: {}\n\n\
PDF conversion was not possible, so a print-ready HTML version was written instead. You can:\n\
  1. Open it in your browser and use \"Print to PDF\" (Ctrl+P / Cmd+P)\n\
  2. Use an online converter such as https://www.markdowntopdf.com/ or https://dillinger.io/\n\
  3. Share the HTML file directly; it is self-contained\n",
        html_path.display()
    );

    let missing: Vec<_> = backends.iter().filter(|b| !b.available).collect();
    if !missing.is_empty() {
        out.push_str("\nTo enable direct PDF generation, install one of:\n");
        for b in missing {
            out.push_str(&format!("  - {}: {}\n", b.name, b.install_hint));
        }
    }
    out
}

/// Message used when even the fallback could not be written.
pub fn unrecoverable_message(source: &Path, reason: &str) -> String {
    format!(
        "All conversion methods failed and the HTML fallback could not be written ({reason}).\n\n\
The source file '{}' still contains your complete storybook. You can:\n\
  1. Open it in any text editor or Markdown viewer\n\
  2. Install a PDF tool and retry: pip install weasyprint, pip install mdpdf, or wkhtmltopdf\n",
        source.display()
    )
}
