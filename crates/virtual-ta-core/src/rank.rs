//! Cosine-similarity ranking over one store partition.
//!
//! # Algorithm
//!
//! 1. Score every chunk: `cos(query, chunk.embedding)` in `f64`.
//! 2. Drop chunks scoring strictly below `threshold`.
//! 3. Stable-sort by score (desc); equal scores keep store order.
//! 4. Truncate to `top_k`.
//!
//! [`rank_partitions`] runs this once per [`SourceType`] so course material
//! and forum posts each get their own `top_k` slots.
//!
//! A zero-norm query vector scores `0.0` against every chunk (see
//! [`cosine_similarity`]); such chunks survive only when `threshold <= 0`.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, RankedResult, SourceType};
use crate::store::ChunkStore;

/// Ranking tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankParams {
    /// Minimum similarity to keep a chunk (inclusive).
    pub threshold: f64,
    /// Maximum results per partition.
    pub top_k: usize,
}

/// Ranked results for both partitions of one query.
#[derive(Debug, Clone, Default)]
pub struct PartitionedResults<'a> {
    pub course: Vec<RankedResult<'a>>,
    pub forum: Vec<RankedResult<'a>>,
}

impl PartitionedResults<'_> {
    pub fn is_empty(&self) -> bool {
        self.course.is_empty() && self.forum.is_empty()
    }
}

/// Rank `chunks` against `query`, best first.
///
/// Deterministic for identical inputs. Returns an empty `Vec` for an empty
/// chunk collection or `top_k == 0`.
pub fn rank<'a, I>(query: &[f64], chunks: I, params: &RankParams) -> Vec<RankedResult<'a>>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    if params.top_k == 0 {
        return Vec::new();
    }

    let mut results: Vec<RankedResult<'a>> = chunks
        .into_iter()
        .map(|chunk| RankedResult {
            chunk,
            score: cosine_similarity(query, &chunk.embedding),
        })
        .filter(|r| r.score >= params.threshold)
        .collect();

    // `sort_by` is stable: ties stay in insertion order.
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    results.truncate(params.top_k);
    results
}

/// Rank the course and forum partitions of `store` independently.
pub fn rank_partitions<'a>(
    query: &[f64],
    store: &'a ChunkStore,
    params: &RankParams,
) -> PartitionedResults<'a> {
    PartitionedResults {
        course: rank(query, store.iter(SourceType::Course), params),
        forum: rank(query, store.iter(SourceType::Forum), params),
    }
}
