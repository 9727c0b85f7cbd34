//! Best-effort PDF text scraping
//!
//! This is a heuristic, not a PDF parser. It reads string literals from
//! uncompressed `BT`..`ET` text blocks and otherwise salvages readable words
//! from the raw bytes. Compressed content streams, non-Latin encodings and
//! cross-reference resolution are not handled; an empty result is expected
//! for many real-world files and callers show a placeholder instead.

use regex::Regex;
use std::sync::OnceLock;

/// Upper bound on returned text, in characters
pub const MAX_EXTRACTED_CHARS: usize = 8_000;

/// Minimum word count for the raw-byte salvage to be trusted
const MIN_SALVAGED_WORDS: usize = 20;

fn text_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)BT(.*?)ET").expect("valid text block regex"))
}

fn string_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\(((?:\\.|[^\\)])*)\)").expect("valid string literal regex")
    })
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z]{3,}").expect("valid word regex"))
}

/// Extracts plain text from raw PDF bytes
///
/// Returns an empty string when nothing usable was found.
///
/// # Examples
///
/// ```
/// use charla::attachment::extract_pdf_text;
///
/// let text = extract_pdf_text(b"BT (Hello) Tj (World) Tj ET");
/// assert_eq!(text, "Hello World");
/// ```
pub fn extract_pdf_text(bytes: &[u8]) -> String {
    // Single-byte decode: every byte maps to the code point of the same value.
    let raw: String = bytes.iter().map(|&b| char::from(b)).collect();

    let literals = text_block_literals(&raw);
    if !literals.is_empty() {
        return truncate_chars(&literals.join(" "), MAX_EXTRACTED_CHARS);
    }

    let words = salvage_words(&raw);
    if words.len() >= MIN_SALVAGED_WORDS {
        tracing::debug!(words = words.len(), "PDF text recovered by raw salvage");
        return truncate_chars(&words.join(" "), MAX_EXTRACTED_CHARS);
    }

    String::new()
}

fn text_block_literals(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for block in text_block_re().captures_iter(raw) {
        let body = block.get(1).map_or("", |m| m.as_str());
        for literal in string_literal_re().captures_iter(body) {
            let text = unescape(literal.get(1).map_or("", |m| m.as_str()));
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }
    out
}

fn unescape(literal: &str) -> String {
    literal
        .replace("\\n", "\n")
        .replace("\\(", "(")
        .replace("\\)", ")")
}

fn salvage_words(raw: &str) -> Vec<String> {
    // Non-printable bytes become spaces so words on either side stay apart.
    let printable: String = raw
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { ' ' })
        .collect();
    let collapsed = printable.split_whitespace().collect::<Vec<_>>().join(" ");

    word_re()
        .find_iter(&collapsed)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
