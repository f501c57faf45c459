//! SQLite-backed [`ChunkSource`] and knowledge-base writer.
//!
//! Reads the `chunks` and `kb_meta` tables created by
//! [`migrate::create_schema`](crate::migrate::create_schema). Rows come back
//! in `rowid` order, which is the order the builder inserted them and the
//! tie-break order used by the ranker.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use virtual_ta_core::chunk::text_hash;
use virtual_ta_core::embedding::{blob_to_vec, vec_to_blob};
use virtual_ta_core::error::LoadError;
use virtual_ta_core::models::{ChunkRow, SourceType};
use virtual_ta_core::store::{ChunkSource, ChunkStore, EmbeddingSpec, StoreManifest};

use crate::db;

pub const META_EMBEDDING_MODEL: &str = "embedding_model";
pub const META_EMBEDDING_DIMS: &str = "embedding_dims";
pub const META_BUILT_AT: &str = "built_at";

/// Read-side view of a knowledge-base database.
pub struct SqliteSource {
    pool: SqlitePool,
    location: String,
}

impl SqliteSource {
    pub fn new(pool: SqlitePool, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
        }
    }

    /// Open an existing database file. A missing file is
    /// [`LoadError::Unavailable`]; nothing is created.
    pub async fn open(path: &Path) -> Result<Self, LoadError> {
        let location = path.display().to_string();
        let pool = db::open_existing(path)
            .await
            .map_err(|e| LoadError::Unavailable {
                location: location.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(pool, location))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    fn unavailable(&self, err: sqlx::Error) -> LoadError {
        LoadError::Unavailable {
            location: self.location.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl ChunkSource for SqliteSource {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn manifest(&self) -> Result<StoreManifest, LoadError> {
        let meta = read_meta(&self.pool).await.map_err(|e| self.unavailable(e))?;

        let embedding_dims = match meta.get(META_EMBEDDING_DIMS) {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| LoadError::Malformed {
                id: META_EMBEDDING_DIMS.to_string(),
                reason: format!("not a dimension count: '{}'", raw),
            })?),
            None => None,
        };

        Ok(StoreManifest {
            embedding_model: meta.get(META_EMBEDDING_MODEL).cloned(),
            embedding_dims,
        })
    }

    async fn fetch_rows(&self) -> Result<Vec<ChunkRow>, LoadError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_type, url, title, created_at, text, embedding
            FROM chunks
            ORDER BY rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.unavailable(e))?;

        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &SqliteRow) -> Result<ChunkRow, LoadError> {
    let id: String = row.try_get("id").map_err(|e| LoadError::Malformed {
        id: "<unknown>".to_string(),
        reason: e.to_string(),
    })?;
    let malformed = |reason: String| LoadError::Malformed {
        id: id.clone(),
        reason,
    };

    let source_type: String = row
        .try_get("source_type")
        .map_err(|e| malformed(e.to_string()))?;
    let source_type: SourceType = source_type.parse().map_err(malformed)?;
    let blob: Vec<u8> = row
        .try_get("embedding")
        .map_err(|e| malformed(e.to_string()))?;
    let embedding = blob_to_vec(&blob).ok_or_else(|| {
        malformed(format!(
            "embedding blob of {} bytes is not f32-aligned",
            blob.len()
        ))
    })?;

    Ok(ChunkRow {
        source_type,
        url: row.try_get("url").map_err(|e| malformed(e.to_string()))?,
        title: row.try_get("title").map_err(|e| malformed(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| malformed(e.to_string()))?,
        text: row.try_get("text").map_err(|e| malformed(e.to_string()))?,
        embedding,
        id,
    })
}

/// All `kb_meta` entries.
pub async fn read_meta(pool: &SqlitePool) -> Result<HashMap<String, String>, sqlx::Error> {
    let rows = sqlx::query("SELECT key, value FROM kb_meta")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("key"), r.get::<String, _>("value")))
        .collect())
}

/// Replace the whole knowledge base with `rows` in one transaction.
///
/// Rows are inserted in slice order; that order is preserved on load.
pub async fn replace_knowledge_base(
    pool: &SqlitePool,
    rows: &[ChunkRow],
    manifest: &StoreManifest,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM kb_meta").execute(&mut *tx).await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, source_type, url, title, created_at, text, text_hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(row.source_type.as_str())
        .bind(&row.url)
        .bind(&row.title)
        .bind(&row.created_at)
        .bind(&row.text)
        .bind(text_hash(&row.text))
        .bind(vec_to_blob(&row.embedding))
        .execute(&mut *tx)
        .await?;
    }

    let mut meta: Vec<(&str, String)> = vec![(META_BUILT_AT, chrono::Utc::now().to_rfc3339())];
    if let Some(model) = &manifest.embedding_model {
        meta.push((META_EMBEDDING_MODEL, model.clone()));
    }
    if let Some(dims) = manifest.embedding_dims {
        meta.push((META_EMBEDDING_DIMS, dims.to_string()));
    }
    for (key, value) in meta {
        sqlx::query("INSERT INTO kb_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Open the database at `path` and load a validated [`ChunkStore`].
pub async fn load_store(
    path: &Path,
    expected: Option<&EmbeddingSpec>,
) -> Result<ChunkStore, LoadError> {
    let source = SqliteSource::open(path).await?;
    let result = ChunkStore::load(&source, expected).await;
    source.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::create_schema;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn fresh_pool(dir: &TempDir) -> (SqlitePool, std::path::PathBuf) {
        let path = dir.path().join("kb.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        (pool, path)
    }

    fn row(id: &str, st: SourceType, url: &str, emb: Vec<f32>) -> ChunkRow {
        ChunkRow {
            id: id.to_string(),
            source_type: st,
            text: format!("text of {}", id),
            url: url.to_string(),
            embedding: emb,
            title: Some("Title".to_string()),
            created_at: None,
        }
    }

    fn manifest() -> StoreManifest {
        StoreManifest {
            embedding_model: Some("test-model".to_string()),
            embedding_dims: Some(2),
        }
    }

    #[tokio::test]
    async fn test_write_then_load_preserves_order() {
        let dir = TempDir::new().unwrap();
        let (pool, path) = fresh_pool(&dir).await;
        let rows = vec![
            row("f1", SourceType::Forum, "https://f/1", vec![0.0, 1.0]),
            row("c2", SourceType::Course, "https://c/2", vec![1.0, 0.0]),
            row("c1", SourceType::Course, "https://c/1", vec![0.5, 0.5]),
        ];
        replace_knowledge_base(&pool, &rows, &manifest()).await.unwrap();
        pool.close().await;

        let spec = EmbeddingSpec {
            model: "test-model".to_string(),
            dims: 2,
        };
        let store = load_store(&path, Some(&spec)).await.unwrap();
        let course: Vec<&str> = store
            .iter(SourceType::Course)
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(course, vec!["c2", "c1"]);
        assert_eq!(store.count(SourceType::Forum), 1);
        assert_eq!(store.dims(), Some(2));
        assert_eq!(store.manifest(), &manifest());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_rows() {
        let dir = TempDir::new().unwrap();
        let (pool, path) = fresh_pool(&dir).await;
        let first = vec![row("a", SourceType::Course, "https://c/a", vec![1.0, 0.0])];
        let second = vec![row("b", SourceType::Forum, "https://f/b", vec![0.0, 1.0])];
        replace_knowledge_base(&pool, &first, &manifest()).await.unwrap();
        replace_knowledge_base(&pool, &second, &manifest()).await.unwrap();
        pool.close().await;

        let store = load_store(&path, None).await.unwrap();
        assert_eq!(store.count(SourceType::Course), 0);
        assert_eq!(store.count(SourceType::Forum), 1);
    }

    #[tokio::test]
    async fn test_missing_database_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.sqlite");
        let err = load_store(&path, None).await.unwrap_err();
        assert!(matches!(err, LoadError::Unavailable { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_source_reports_database_path() {
        let dir = TempDir::new().unwrap();
        let (pool, path) = fresh_pool(&dir).await;
        pool.close().await;

        let source = SqliteSource::open(&path).await.unwrap();
        assert_eq!(source.location(), path.display().to_string());
        source.close().await;
    }

    #[tokio::test]
    async fn test_model_mismatch_refuses_load() {
        let dir = TempDir::new().unwrap();
        let (pool, path) = fresh_pool(&dir).await;
        let rows = vec![row("a", SourceType::Course, "https://c/a", vec![1.0, 0.0])];
        replace_knowledge_base(&pool, &rows, &manifest()).await.unwrap();
        pool.close().await;

        let spec = EmbeddingSpec {
            model: "other-model".to_string(),
            dims: 2,
        };
        let err = load_store(&path, Some(&spec)).await.unwrap_err();
        assert!(matches!(err, LoadError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_misaligned_blob_is_malformed() {
        let dir = TempDir::new().unwrap();
        let (pool, path) = fresh_pool(&dir).await;
        sqlx::query(
            "INSERT INTO chunks (id, source_type, url, text, text_hash, embedding) VALUES ('x', 'course', 'https://c/x', 't', 'h', ?)",
        )
        .bind(vec![0u8, 1, 2])
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let err = load_store(&path, None).await.unwrap_err();
        assert!(matches!(err, LoadError::Malformed { ref id, .. } if id == "x"));
    }
}
