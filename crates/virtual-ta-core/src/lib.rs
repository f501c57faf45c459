//! # Virtual TA Core
//!
//! Pure retrieval and grounding logic for Virtual TA: data models, chunking,
//! the immutable chunk store, similarity ranking, context assembly, prompt
//! construction, strict response parsing, and the answer pipeline.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! External I/O (embedding models, language models, chunk storage) enters
//! through the [`embedding::Embedder`], [`answer::LanguageModel`], and
//! [`store::ChunkSource`] traits, implemented by the `virtual-ta` app crate.
//!
//! ```text
//! question (+ image text)
//!     │
//!     ▼
//! Embedder ──▶ rank (course) ─┐
//!          └─▶ rank (forum)  ─┴─▶ assemble ──▶ prompt ──▶ LanguageModel ──▶ parse
//! ```

pub mod answer;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod rank;
pub mod store;
