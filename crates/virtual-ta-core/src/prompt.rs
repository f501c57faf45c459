//! Prompt construction and strict parsing of the model's reply.
//!
//! The model is asked to answer in this shape:
//!
//! ```text
//! Answer:
//! <answer text>
//!
//! Sources:
//! 1. URL: <exact url>, Text: <short quote>
//! 2. URL: <exact url>, Text: <short quote>
//! ```
//!
//! [`parse_response`] accepts exactly that (list markers optional, a lone
//! `None` for no sources) and rejects anything else with a
//! [`ResponseFormatError`]. [`enforce_citations`] then checks every cited
//! url against the assembled context.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::context::AssembledContext;
use crate::error::ResponseFormatError;
use crate::models::{AnswerResponse, SourceLink};

/// Marks where OCR text from an attached image begins in the query.
pub const IMAGE_TEXT_SEPARATOR: &str = "[Text extracted from attached image]";

/// Returned verbatim by the model when the context is insufficient.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough information to answer this question.";

const SYSTEM_PROMPT: &str = "You are a teaching assistant that answers student questions \
using only the course materials and forum excerpts provided in the prompt. \
Never use outside knowledge. Always cite sources with their exact URLs.";

/// What to do with a cited url that is not part of the assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationPolicy {
    /// Fail the whole response.
    #[default]
    Reject,
    /// Drop the offending link and keep the rest.
    Strip,
}

/// A two-part chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// The model reply after structural parsing, before citation checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub answer: String,
    pub links: Vec<SourceLink>,
}

/// Join the question and optional OCR text into one query string.
///
/// Blank image text is ignored.
pub fn compose_query(question: &str, image_text: Option<&str>) -> String {
    let question = question.trim();
    match image_text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => format!("{}\n\n{}\n{}", question, IMAGE_TEXT_SEPARATOR, text),
        None => question.to_string(),
    }
}

/// Build the grounded instruction prompt for `query` over `ctx`.
pub fn build_prompt(query: &str, ctx: &AssembledContext) -> Prompt {
    let user = format!(
        r#"Answer the student's question using ONLY the context below.
Do not infer, guess, or add anything that is not stated in the context.
If the context does not clearly answer the question, use exactly
"{insufficient}" as the answer and write "None" under Sources.

---

Context:
{context}

---

Question:
{query}

Respond in exactly this format:

Answer:
<your answer>

Sources:
1. URL: <exact URL from the context>, Text: <short quote from that source>
2. URL: <exact URL from the context>, Text: <short quote from that source>

Only cite URLs that appear in the context. If you cite nothing, write "None" under Sources."#,
        insufficient = INSUFFICIENT_CONTEXT_ANSWER,
        context = ctx.render(),
        query = query,
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn source_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:(?:\d+[.)]|[-*•])\s*)?URL:\s*(.+?)\s*,\s*Text:\s*(.*)$")
            .expect("source line pattern is valid")
    })
}

/// Strip markdown emphasis and heading marks around a label line.
fn bare_label(line: &str) -> String {
    line.trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim()
        .to_ascii_lowercase()
}

/// Parse the model reply into answer text and cited links.
pub fn parse_response(raw: &str) -> Result<ParsedAnswer, ResponseFormatError> {
    if raw.trim().is_empty() {
        return Err(ResponseFormatError::EmptyResponse);
    }
    if is_bare_refusal(raw) {
        return Ok(ParsedAnswer {
            answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
            links: Vec::new(),
        });
    }

    let lines: Vec<&str> = raw.lines().collect();
    let header = lines
        .iter()
        .position(|l| bare_label(l).starts_with("sources:"))
        .ok_or(ResponseFormatError::MissingSources)?;

    let answer = strip_answer_label(&lines[..header].join("\n"));
    if answer.is_empty() {
        return Err(ResponseFormatError::EmptyAnswer);
    }

    // Text after "Sources:" on the header line counts as the first entry.
    let header_line = lines[header]
        .trim()
        .trim_start_matches('#')
        .trim()
        .trim_start_matches('*')
        .trim();
    let inline = header_line
        .get("sources:".len()..)
        .unwrap_or("")
        .trim()
        .trim_start_matches('*')
        .trim();

    let mut links = Vec::new();
    for line in std::iter::once(inline).chain(lines[header + 1..].iter().copied()) {
        let line = line.trim();
        if line.is_empty() || line.trim_end_matches('.').eq_ignore_ascii_case("none") {
            continue;
        }
        let caps = source_line_re()
            .captures(line)
            .ok_or_else(|| ResponseFormatError::MalformedSourceLine(line.to_string()))?;
        let url = clean_url(&caps[1]);
        if url.is_empty() {
            return Err(ResponseFormatError::MalformedSourceLine(line.to_string()));
        }
        links.push(SourceLink {
            url,
            quote: clean_quote(&caps[2]),
        });
    }

    Ok(ParsedAnswer { answer, links })
}

fn strip_answer_label(text: &str) -> String {
    let trimmed = text.trim();
    let without_marks = trimmed
        .trim_start_matches('#')
        .trim_start()
        .trim_start_matches('*')
        .trim_start();
    match without_marks.get(.."answer:".len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case("answer:") => without_marks
            ["answer:".len()..]
            .trim_start_matches('*')
            .trim()
            .to_string(),
        _ => trimmed.to_string(),
    }
}

/// The refusal sentence on its own, with no `Sources:` section.
fn is_bare_refusal(raw: &str) -> bool {
    let answer = strip_answer_label(raw);
    clean_quote(&answer).eq_ignore_ascii_case(INSUFFICIENT_CONTEXT_ANSWER)
}

fn clean_url(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '<' | '>' | '[' | ']' | '(' | ')' | '"' | '\'' | '`'))
        .trim()
        .to_string()
}

fn clean_quote(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”'))
        .trim()
        .to_string()
}

/// Verify every cited url against `ctx` and produce the final response.
///
/// Links are deduplicated by url (first wins). A link whose quote is empty
/// takes the context's quote for that url. Under [`CitationPolicy::Reject`]
/// the first unverifiable url fails the response; under
/// [`CitationPolicy::Strip`] it is dropped.
pub fn enforce_citations(
    parsed: ParsedAnswer,
    ctx: &AssembledContext,
    policy: CitationPolicy,
) -> Result<AnswerResponse, ResponseFormatError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::with_capacity(parsed.links.len());

    for link in parsed.links {
        if !seen.insert(link.url.clone()) {
            continue;
        }
        if !ctx.contains_url(&link.url) {
            match policy {
                CitationPolicy::Reject => {
                    return Err(ResponseFormatError::UnverifiedCitation(link.url));
                }
                CitationPolicy::Strip => {
                    tracing::warn!(url = %link.url, "stripping citation not present in context");
                    continue;
                }
            }
        }
        let quote = if link.quote.is_empty() {
            ctx.sources
                .iter()
                .find(|s| s.url == link.url)
                .map(|s| s.quote.clone())
                .unwrap_or_default()
        } else {
            link.quote
        };
        links.push(SourceLink {
            url: link.url,
            quote,
        });
    }

    Ok(AnswerResponse {
        answer: parsed.answer,
        links,
    })
}
