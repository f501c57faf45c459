//! Context assembly: merge ranked partitions into a bounded prompt context.
//!
//! # Algorithm
//!
//! 1. Concatenate course results, then forum results, each in ranked order.
//! 2. Walk the merged list, adding each chunk's full text while the running
//!    total (in chars) stays within `max_chars`.
//! 3. Stop at the first chunk that does not fit; it and everything after it
//!    are dropped. Chunks are never cut mid-text.
//! 4. For every included chunk, record `(url, quote)` unless the url is
//!    already recorded (first occurrence wins).
//!
//! Only chunk text counts toward `max_chars`; labels added by
//! [`AssembledContext::render`] do not.

use std::collections::HashSet;

use crate::embedding::truncate_chars;
use crate::models::{RankedResult, SourceLink, SourceType};

/// Assembly limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleParams {
    /// Cap on combined chunk text, in chars.
    pub max_chars: usize,
    /// Maximum length of each source quote, in chars.
    pub quote_chars: usize,
}

/// A chunk selected for the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub source_type: SourceType,
    pub chunk_id: String,
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub score: f64,
}

/// Ordered prompt context plus the citations it can support.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub entries: Vec<ContextEntry>,
    /// Deduplicated by url, in first-seen order.
    pub sources: Vec<SourceLink>,
    /// Sum of included chunk text lengths, in chars.
    pub total_chars: usize,
    /// Ranked chunks left out because the budget ran out.
    pub dropped: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `url` belongs to a chunk included in this context.
    pub fn contains_url(&self, url: &str) -> bool {
        self.sources.iter().any(|s| s.url == url)
    }

    pub fn count(&self, source_type: SourceType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.source_type == source_type)
            .count()
    }

    /// Render the context block sent to the language model.
    ///
    /// ```text
    /// Course (URL: https://…): <chunk text>
    ///
    /// Forum (URL: https://…): <chunk text>
    /// ```
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} (URL: {}): {}", e.source_type.label(), e.url, e.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Merge course and forum results into one bounded context.
pub fn assemble(
    course: &[RankedResult<'_>],
    forum: &[RankedResult<'_>],
    params: &AssembleParams,
) -> AssembledContext {
    let merged: Vec<&RankedResult<'_>> = course.iter().chain(forum.iter()).collect();

    let mut ctx = AssembledContext::default();
    let mut seen_urls: HashSet<&str> = HashSet::new();

    for (i, result) in merged.iter().enumerate() {
        let chunk = result.chunk;
        let len = chunk.text.chars().count();

        if ctx.total_chars + len > params.max_chars {
            ctx.dropped = merged.len() - i;
            break;
        }

        ctx.total_chars += len;
        ctx.entries.push(ContextEntry {
            source_type: chunk.source_type,
            chunk_id: chunk.id.clone(),
            url: chunk.url.clone(),
            title: chunk.metadata.title.clone(),
            text: chunk.text.clone(),
            score: result.score,
        });

        if seen_urls.insert(chunk.url.as_str()) {
            ctx.sources.push(SourceLink {
                url: chunk.url.clone(),
                quote: quote_of(&chunk.text, params.quote_chars),
            });
        }
    }

    ctx
}

/// A bounded prefix of the chunk text, or the whole text if shorter.
pub fn quote_of(text: &str, quote_chars: usize) -> String {
    truncate_chars(text.trim(), quote_chars).trim_end().to_string()
}
