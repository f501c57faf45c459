//! Core data models shared across the retrieval pipeline.
//!
//! A [`Chunk`] is immutable once loaded into a
//! [`ChunkStore`](crate::store::ChunkStore). Everything else here is
//! per-request: created while answering one question and dropped afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The corpus partition a chunk belongs to.
///
/// Partitions are ranked independently so course material and forum posts
/// never compete for the same result slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Course,
    Forum,
}

impl SourceType {
    /// Storage and wire name (`"course"` / `"forum"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Course => "course",
            SourceType::Forum => "forum",
        }
    }

    /// Label used when rendering context entries for the language model.
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::Course => "Course",
            SourceType::Forum => "Forum",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "course" => Ok(SourceType::Course),
            "forum" => Ok(SourceType::Forum),
            other => Err(format!("unknown source type: '{}'", other)),
        }
    }
}

/// Display-only provenance. Never consulted during ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub title: Option<String>,
    /// Origin timestamp as stored (ISO 8601 when known).
    pub created_at: Option<String>,
}

/// An immutable, embedded excerpt of course or forum text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Unique within its partition.
    pub id: String,
    pub source_type: SourceType,
    pub text: String,
    /// Canonical link to the origin page or post.
    pub url: String,
    pub embedding: Vec<f64>,
    pub metadata: ChunkMetadata,
}

/// A raw chunk row as delivered by a storage backend, before validation.
///
/// Embeddings arrive as `f32` (the width models produce and storage keeps);
/// [`ChunkStore::from_rows`](crate::store::ChunkStore::from_rows) widens them
/// to `f64`.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: String,
    pub source_type: SourceType,
    pub text: String,
    pub url: String,
    pub embedding: Vec<f32>,
    pub title: Option<String>,
    pub created_at: Option<String>,
}

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct RankedResult<'a> {
    pub chunk: &'a Chunk,
    pub score: f64,
}

/// One citation: a url the answer relies on and a short supporting quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub url: String,
    pub quote: String,
}

/// The final grounded answer returned to the caller.
///
/// Every `links[].url` is guaranteed to come from a chunk that was part of
/// the context sent to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub links: Vec<SourceLink>,
}
