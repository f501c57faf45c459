//! # Virtual TA
//!
//! A retrieval-augmented teaching assistant that answers student questions
//! from course pages and forum posts, citing every source it relies on.
//!
//! The pure retrieval and grounding logic lives in `virtual-ta-core`; this
//! crate wires it to SQLite, embedding and chat-completion APIs, OCR, a CLI,
//! and an HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ course/*.md  │──▶│    build    │──▶│  SQLite  │
//! │ forum/*.json │   │ chunk+embed │   │  chunks  │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │ load
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │  (vta)   │       │  /query  │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | Chunk rows and build metadata in SQLite |
//! | [`ingest`] | Knowledge base builder |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat-completions client |
//! | [`ocr`] | Screenshot text extraction |
//! | [`search`] | Retrieval inspection |
//! | [`ask`] | One-shot CLI answers |
//! | [`stats`] | Knowledge base overview |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber setup |

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod ocr;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
