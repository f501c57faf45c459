//! Error taxonomy for the retrieval core.
//!
//! | Error | Scope | Meaning |
//! |-------|-------|---------|
//! | [`LoadError`] | startup | The chunk store could not be loaded; do not serve |
//! | [`EmbeddingError`] | per request | The question could not be embedded |
//! | [`ResponseFormatError`] | per request | The model reply was unparsable or unverifiable |
//! | [`UpstreamError`] | per request | A language-model or OCR collaborator failed |
//! | [`QueryError`] | per request | Uniform failure returned by the answer pipeline |

use thiserror::Error;

use crate::models::SourceType;

/// The chunk store could not be loaded. Fatal at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("chunk storage unavailable at {location}: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("malformed chunk row '{id}': {reason}")]
    Malformed { id: String, reason: String },

    #[error("chunk '{id}' has {found}-dimensional embedding, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate chunk id '{id}' in {source_type} partition")]
    DuplicateId { source_type: SourceType, id: String },

    #[error("knowledge base was embedded with {stored}, but the configured embedder is {configured}")]
    ModelMismatch { stored: String, configured: String },
}

/// The query text could not be turned into a vector.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("embedding has {found} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// The language model reply could not be turned into a verified answer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseFormatError {
    #[error("language model returned an empty response")]
    EmptyResponse,

    #[error("response has no 'Sources:' section")]
    MissingSources,

    #[error("response has no answer text")]
    EmptyAnswer,

    #[error("unrecognized source line: {0}")]
    MalformedSourceLine(String),

    #[error("cited url is not part of the retrieved context: {0}")]
    UnverifiedCitation(String),
}

/// An external collaborator (language model, OCR) failed.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("{service} rate limited or out of quota: {message}")]
    RateLimited {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned a malformed payload: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },
}

/// Uniform per-request failure produced by the answer pipeline.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question must not be empty")]
    InvalidQuestion,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    ResponseFormat(#[from] ResponseFormatError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl QueryError {
    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidQuestion => "bad_request",
            QueryError::Embedding(_) => "embedding_error",
            QueryError::ResponseFormat(_) => "response_format",
            QueryError::Upstream(UpstreamError::Timeout { .. }) => "timeout",
            QueryError::Upstream(_) => "upstream",
        }
    }
}
