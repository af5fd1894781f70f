//! Post-processing: deterministic cleanup of generated story text.
//!
//! Text models add artefacts the prompt asked them not to: an outer
//! ` ```markdown ` fence, CRLF line endings, stray image links, chatty
//! preambles before the title. These rules fix them before the text is split
//! into chapters. Each rule is a pure `&str → String` pass.
//!
//! Rules (applied in order):
//! 1. Strip outer markdown fences
//! 2. Normalise line endings (CRLF → LF)
//! 3. Trim trailing whitespace per line
//! 4. Drop any preamble before the first level-1 heading
//! 5. Remove image links (illustrations are added by the format stage)
//! 6. Ensure a blank line before every heading
//! 7. Collapse 3+ consecutive blank lines
//! 8. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 9. Ensure the text ends with exactly one newline

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to model output.
pub fn clean_story_text(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = drop_preamble(&s);
    let s = remove_image_links(&s);
    let s = normalise_heading_spacing(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace ─────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Drop preamble ────────────────────────────────────────────────────
//
// "Sure! Here is your story:" before the `# Title` line. Only applied when a
// level-1 heading exists; otherwise the text is left alone.

fn drop_preamble(input: &str) -> String {
    let mut offset = 0;
    for line in input.split_inclusive('\n') {
        if line.starts_with("# ") {
            return input[offset..].to_string();
        }
        offset += line.len();
    }
    input.to_string()
}

// ── Rule 5: Remove image links ───────────────────────────────────────────────

static RE_IMAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*!\[[^\]]*\]\([^)]*\)[ \t]*$\n?").unwrap());
static RE_IMAGE_INLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());

fn remove_image_links(input: &str) -> String {
    let s = RE_IMAGE_LINE.replace_all(input, "");
    RE_IMAGE_INLINE.replace_all(&s, "").to_string()
}

// ── Rule 6: Heading spacing ──────────────────────────────────────────────────

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    for (i, line) in input.lines().enumerate() {
        if i > 0 && is_heading(line) {
            let trimmed = result.trim_end_matches('\n').len();
            result.truncate(trimmed);
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

// ── Rule 7: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 8: Invisible characters ─────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 9: Final newline ────────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
