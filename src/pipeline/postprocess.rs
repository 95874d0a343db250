//! Cleanup of free-text transcriptions returned by the OCR flows.
//!
//! Structured extraction never goes through here; its output is parsed, not
//! displayed. Transcriptions are shown to people and archived, so the usual
//! model artefacts are removed with a fixed sequence of string passes:
//!
//! 1. an outer ` ```markdown ` / ` ```md ` fence around the whole answer;
//! 2. CRLF and lone CR line endings;
//! 3. zero-width characters, BOM and soft hyphens;
//! 4. trailing whitespace on each line;
//! 5. image links pointing at files that were never produced;
//! 6. runs of more than two blank lines;
//! 7. a missing or duplicated final newline.
//!
//! Fence stripping runs first so the remaining passes see the real content.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_WRAPPING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*?)\n?```$").unwrap());

/// `![alt](target)` where the target is empty, a placeholder, or a bare
/// local image filename.
static RE_PHANTOM_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"!\[[^\]]*\]\((?:\s*|#|placeholder[^)]*|(?:\./)?[\w.-]+\.(?:png|jpe?g|gif|webp))\)",
    )
    .unwrap()
});

static RE_EXCESS_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

const INVISIBLE: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}', '\u{00AD}'];

/// Clean one page of transcription.
pub fn clean_markdown(raw: &str) -> String {
    let text = unwrap_fence(raw);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text: String = text.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    let text = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let text = RE_PHANTOM_IMAGE.replace_all(&text, "");
    let text = RE_EXCESS_BLANK_LINES.replace_all(&text, "\n\n\n");

    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        "\n".to_string()
    } else {
        format!("{trimmed}\n")
    }
}

fn unwrap_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    match RE_WRAPPING_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => raw.to_string(),
    }
}

/// Join cleaned pages as `--- Page N ---` blocks separated by a blank line.
pub fn join_pages<'a>(pages: impl IntoIterator<Item = (usize, &'a str)>) -> String {
    pages
        .into_iter()
        .map(|(page_num, text)| format!("--- Page {page_num} ---\n{}", text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
