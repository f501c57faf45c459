//! Sliding-window text chunker and markdown section helpers.
//!
//! Used by the knowledge-base builder to turn course pages and forum posts
//! into chunk text before embedding.
//!
//! # Algorithm
//!
//! 1. Walk the text in windows of `chunk_chars` characters.
//! 2. Advance each window by `chunk_chars - overlap_chars`, so consecutive
//!    windows share `overlap_chars` characters.
//! 3. Trim every window and drop the ones left empty.
//! 4. Stop after the window that reaches the end of the text.
//!
//! Windows are measured and cut in `char`s, never in bytes, so multi-byte
//! text is never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use virtual_ta_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("abcdefghij", 6, 2);
//! assert_eq!(chunks, vec!["abcdef", "efghij"]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::SourceType;

/// A run of markdown body text under one heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text without `#` marks; `None` for text before the first heading.
    pub title: Option<String>,
    pub body: String,
}

/// Split `text` into overlapping character windows.
///
/// Returns an empty `Vec` for blank text or `chunk_chars == 0`. An
/// `overlap_chars` that is not smaller than `chunk_chars` is treated as
/// `chunk_chars - 1` so the window always advances.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    if chunk_chars == 0 {
        return Vec::new();
    }
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_chars).min(total);
        let window = text[bounds[start]..bounds[end]].trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }
        if end == total {
            break;
        }
        start += step;
    }
    chunks
}

/// Separate YAML-style front matter from a markdown document.
///
/// Returns the `original_url` value when present, and the body after the
/// closing `---`. A document whose front matter is never closed is returned
/// whole, with no url.
pub fn split_front_matter(markdown: &str) -> (Option<String>, &str) {
    let mut lines = markdown.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return (None, markdown),
    }

    let mut offset = markdown.find('\n').map(|i| i + 1).unwrap_or(markdown.len());
    let mut url = None;
    for line in lines {
        offset += line.len();
        let trimmed = line.trim();
        if trimmed == "---" {
            return (url, &markdown[offset..]);
        }
        if let Some(value) = trimmed.strip_prefix("original_url:") {
            let value = value.trim().trim_matches('"').trim_matches('\'').trim();
            if !value.is_empty() {
                url = Some(value.to_string());
            }
        }
    }

    (None, markdown)
}

/// Split a markdown body into sections at heading lines.
///
/// A heading is any line whose first non-blank character is `#`. Sections
/// whose body is blank are omitted.
pub fn split_sections(body: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title: Option<String> = None;
    let mut buf = String::new();

    for line in body.lines() {
        if line.trim_start().starts_with('#') {
            push_section(&mut sections, title.take(), &mut buf);
            let heading = line.trim().trim_start_matches('#').trim();
            title = (!heading.is_empty()).then(|| heading.to_string());
        } else {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    push_section(&mut sections, title, &mut buf);

    sections
}

fn push_section(sections: &mut Vec<Section>, title: Option<String>, buf: &mut String) {
    if !buf.trim().is_empty() {
        sections.push(Section {
            title,
            body: std::mem::take(buf),
        });
    } else {
        buf.clear();
    }
}

/// Stable chunk id: the first 16 hex chars of a SHA-256 over the chunk's
/// origin. Rebuilding from unchanged material yields the same ids.
pub fn chunk_id(source_type: SourceType, url: &str, section: usize, window: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    hasher.update([0u8]);
    hasher.update(section.to_le_bytes());
    hasher.update(window.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// SHA-256 hex digest of chunk text.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
