//! Immutable chunk store and its storage abstraction.
//!
//! The [`ChunkSource`] trait is the persistent-storage collaborator: it
//! supplies raw [`ChunkRow`]s and the knowledge-base manifest. A
//! [`ChunkStore`] is built from those rows once, validated eagerly, and never
//! mutated afterwards. Rebuilds produce a new store that is swapped into a
//! [`StoreHandle`] wholesale.
//!
//! # Lifecycle
//!
//! ```text
//! ChunkSource ──load()──▶ ChunkStore ──▶ StoreHandle::new()
//!                                            │ snapshot() per request
//!                         new ChunkStore ──▶ StoreHandle::replace()
//! ```

pub mod memory;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::embedding::{widen, Embedder};
use crate::error::LoadError;
use crate::models::{Chunk, ChunkMetadata, ChunkRow, SourceType};

/// Embedding metadata recorded when the knowledge base was built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreManifest {
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
}

/// The embedding model a store must match to be queryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSpec {
    pub model: String,
    pub dims: usize,
}

impl EmbeddingSpec {
    pub fn of(embedder: &dyn Embedder) -> Self {
        Self {
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
        }
    }
}

/// Abstract storage backend that supplies chunk rows.
///
/// Implementations must return rows in a stable order; that order becomes
/// the tie-break order used by the ranker.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Human-readable location for error messages (path, DSN, `"memory"`).
    fn location(&self) -> String;

    /// Embedding metadata stored alongside the rows.
    async fn manifest(&self) -> Result<StoreManifest, LoadError>;

    /// All chunk rows, both partitions, in insertion order.
    async fn fetch_rows(&self) -> Result<Vec<ChunkRow>, LoadError>;
}

/// Read-only collection of chunks, partitioned by [`SourceType`].
#[derive(Debug, Default)]
pub struct ChunkStore {
    course: Vec<Chunk>,
    forum: Vec<Chunk>,
    dims: Option<usize>,
    manifest: StoreManifest,
}

impl ChunkStore {
    /// Load and validate every row from `source`.
    ///
    /// When `expected` is given, the stored manifest and the rows'
    /// dimensionality must agree with it.
    pub async fn load(
        source: &dyn ChunkSource,
        expected: Option<&EmbeddingSpec>,
    ) -> Result<Self, LoadError> {
        let manifest = source.manifest().await?;
        let rows = source.fetch_rows().await?;
        let mut store = Self::from_rows(rows)?;

        if let Some(spec) = expected {
            if let Some(stored) = &manifest.embedding_model {
                if stored != &spec.model {
                    return Err(LoadError::ModelMismatch {
                        stored: stored.clone(),
                        configured: spec.model.clone(),
                    });
                }
            }
            let stored_dims = store.dims.or(manifest.embedding_dims);
            if let Some(dims) = stored_dims {
                if dims != spec.dims {
                    return Err(LoadError::ModelMismatch {
                        stored: format!("{} dimensions", dims),
                        configured: format!("{} ({} dimensions)", spec.model, spec.dims),
                    });
                }
            }
        }

        store.manifest = manifest;
        tracing::info!(
            location = %source.location(),
            course = store.course.len(),
            forum = store.forum.len(),
            dims = ?store.dims,
            "chunk store loaded"
        );
        Ok(store)
    }

    /// Build a store from raw rows, validating them eagerly.
    ///
    /// Fails on the first row with an empty or non-finite embedding, blank
    /// id or url, a dimensionality different from the first row's, or an
    /// id already seen in the same partition.
    pub fn from_rows(rows: impl IntoIterator<Item = ChunkRow>) -> Result<Self, LoadError> {
        let mut store = ChunkStore::default();
        let mut seen: [HashSet<String>; 2] = [HashSet::new(), HashSet::new()];

        for row in rows {
            if row.id.trim().is_empty() {
                return Err(LoadError::Malformed {
                    id: row.id,
                    reason: "blank id".to_string(),
                });
            }
            if row.url.trim().is_empty() {
                return Err(LoadError::Malformed {
                    id: row.id,
                    reason: "blank url".to_string(),
                });
            }
            if row.embedding.is_empty() {
                return Err(LoadError::Malformed {
                    id: row.id,
                    reason: "empty embedding".to_string(),
                });
            }
            if row.embedding.iter().any(|v| !v.is_finite()) {
                return Err(LoadError::Malformed {
                    id: row.id,
                    reason: "non-finite embedding value".to_string(),
                });
            }

            let dims = *store.dims.get_or_insert(row.embedding.len());
            if row.embedding.len() != dims {
                return Err(LoadError::DimensionMismatch {
                    id: row.id,
                    expected: dims,
                    found: row.embedding.len(),
                });
            }

            let slot = match row.source_type {
                SourceType::Course => 0,
                SourceType::Forum => 1,
            };
            if !seen[slot].insert(row.id.clone()) {
                return Err(LoadError::DuplicateId {
                    source_type: row.source_type,
                    id: row.id,
                });
            }

            let chunk = Chunk {
                embedding: widen(&row.embedding),
                id: row.id,
                source_type: row.source_type,
                text: row.text,
                url: row.url,
                metadata: ChunkMetadata {
                    title: row.title,
                    created_at: row.created_at,
                },
            };
            match chunk.source_type {
                SourceType::Course => store.course.push(chunk),
                SourceType::Forum => store.forum.push(chunk),
            }
        }

        Ok(store)
    }

    /// Lazily iterate one partition in insertion order.
    pub fn iter(&self, source_type: SourceType) -> std::slice::Iter<'_, Chunk> {
        self.partition(source_type).iter()
    }

    pub fn partition(&self, source_type: SourceType) -> &[Chunk] {
        match source_type {
            SourceType::Course => &self.course,
            SourceType::Forum => &self.forum,
        }
    }

    pub fn count(&self, source_type: SourceType) -> usize {
        self.partition(source_type).len()
    }

    pub fn is_empty(&self) -> bool {
        self.course.is_empty() && self.forum.is_empty()
    }

    /// Embedding dimensionality shared by every chunk, or `None` if empty.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }
}

/// Shared owner of the current [`ChunkStore`] snapshot.
///
/// Requests call [`snapshot`](StoreHandle::snapshot) once and work against
/// that `Arc` for their whole lifetime. [`replace`](StoreHandle::replace)
/// swaps the reference for subsequent requests; in-flight readers keep the
/// snapshot they already hold. The lock guards only the pointer swap.
pub struct StoreHandle {
    current: RwLock<Arc<ChunkStore>>,
}

impl StoreHandle {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    pub fn snapshot(&self) -> Arc<ChunkStore> {
        // A poisoned lock still holds a complete Arc; the store itself is immutable.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install `store` for new requests, returning the previous snapshot.
    pub fn replace(&self, store: ChunkStore) -> Arc<ChunkStore> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(store))
    }
}
