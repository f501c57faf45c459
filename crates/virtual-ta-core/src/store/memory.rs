//! In-memory [`ChunkSource`] for tests and embedding the core in other hosts.
//!
//! Rows are returned in the order they were supplied.

use async_trait::async_trait;

use crate::error::LoadError;
use crate::models::ChunkRow;

use super::{ChunkSource, StoreManifest};

/// Chunk rows held in a `Vec`, with an optional manifest.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    rows: Vec<ChunkRow>,
    manifest: StoreManifest,
}

impl InMemorySource {
    pub fn new(rows: Vec<ChunkRow>) -> Self {
        Self {
            rows,
            manifest: StoreManifest::default(),
        }
    }

    pub fn with_manifest(mut self, manifest: StoreManifest) -> Self {
        self.manifest = manifest;
        self
    }
}

#[async_trait]
impl ChunkSource for InMemorySource {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn manifest(&self) -> Result<StoreManifest, LoadError> {
        Ok(self.manifest.clone())
    }

    async fn fetch_rows(&self) -> Result<Vec<ChunkRow>, LoadError> {
        Ok(self.rows.clone())
    }
}
