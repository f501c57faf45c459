//! Knowledge-base builder (`vta build`).
//!
//! Rebuilds the whole knowledge base from already-downloaded material:
//!
//! ```text
//! course_dir/**/*.md ──▶ front matter + sections ─┐
//!                                                 ├─▶ window chunks ─▶ embed ─▶ SQLite
//! forum_dir/**/*.json ─▶ posts ───────────────────┘
//! ```
//!
//! Course pages take their url from the `original_url` front-matter key.
//! Forum posts get `<forum_url_base>/<topic_id>/<post_number>`. The old
//! contents are replaced in a single transaction, so a failed build leaves
//! the previous knowledge base intact.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use virtual_ta_core::chunk::{chunk_id, chunk_text, split_front_matter, split_sections};
use virtual_ta_core::embedding::Embedder;
use virtual_ta_core::models::{ChunkRow, SourceType};
use virtual_ta_core::store::StoreManifest;

use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::embedding::{create_provider, embed_all};
use crate::migrate::create_schema;
use crate::sqlite_store::replace_knowledge_base;

/// A chunk ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub id: String,
    pub source_type: SourceType,
    pub url: String,
    pub title: Option<String>,
    pub created_at: Option<String>,
    pub text: String,
}

/// One post from a downloaded forum thread file.
#[derive(Debug, Clone, Deserialize)]
pub struct ForumPost {
    pub post_number: i64,
    pub topic_id: i64,
    #[serde(default)]
    pub topic_title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Counts reported by a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub course_files: usize,
    pub forum_files: usize,
    pub course_chunks: usize,
    pub forum_chunks: usize,
    pub duplicates_skipped: usize,
}

/// Chunk one course markdown page.
///
/// `fallback_url` is used when the page has no `original_url` front matter.
pub fn course_chunks(
    markdown: &str,
    fallback_url: &str,
    chunking: &ChunkingConfig,
) -> Vec<PendingChunk> {
    let (url, body) = split_front_matter(markdown);
    let url = url.unwrap_or_else(|| fallback_url.to_string());

    let mut out = Vec::new();
    for (section_idx, section) in split_sections(body).into_iter().enumerate() {
        let windows = chunk_text(&section.body, chunking.chunk_chars, chunking.overlap_chars);
        for (window_idx, text) in windows.into_iter().enumerate() {
            out.push(PendingChunk {
                id: chunk_id(SourceType::Course, &url, section_idx, window_idx),
                source_type: SourceType::Course,
                url: url.clone(),
                title: section.title.clone(),
                created_at: None,
                text,
            });
        }
    }
    out
}

/// Chunk every post of one forum thread file.
pub fn forum_chunks(
    posts: &[ForumPost],
    url_base: &str,
    chunking: &ChunkingConfig,
) -> Vec<PendingChunk> {
    let base = url_base.trim_end_matches('/');
    let mut out = Vec::new();
    for post in posts {
        let url = format!("{}/{}/{}", base, post.topic_id, post.post_number);
        let windows = chunk_text(&post.content, chunking.chunk_chars, chunking.overlap_chars);
        for (window_idx, text) in windows.into_iter().enumerate() {
            out.push(PendingChunk {
                id: chunk_id(SourceType::Forum, &url, 0, window_idx),
                source_type: SourceType::Forum,
                url: url.clone(),
                title: post.topic_title.clone(),
                created_at: post.created_at.clone(),
                text,
            });
        }
    }
    out
}

/// Files under `root` with the given extension, in path order.
fn files_with_extension(root: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Directory does not exist: {}", root.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(ext)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Scan `course_dir` for markdown pages.
pub fn scan_course_dir(
    root: &Path,
    chunking: &ChunkingConfig,
) -> Result<(usize, Vec<PendingChunk>)> {
    let files = files_with_extension(root, "md")?;
    let mut chunks = Vec::new();
    for path in &files {
        let markdown = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        if split_front_matter(&markdown).0.is_none() {
            tracing::warn!(file = %relative, "course page has no original_url; using its path");
        }
        chunks.extend(course_chunks(&markdown, &relative, chunking));
    }
    Ok((files.len(), chunks))
}

/// Scan `forum_dir` for thread files (JSON arrays of posts).
pub fn scan_forum_dir(
    root: &Path,
    url_base: &str,
    chunking: &ChunkingConfig,
) -> Result<(usize, Vec<PendingChunk>)> {
    let files = files_with_extension(root, "json")?;
    let mut chunks = Vec::new();
    for path in &files {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let posts: Vec<ForumPost> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid forum thread file: {}", path.display()))?;
        chunks.extend(forum_chunks(&posts, url_base, chunking));
    }
    Ok((files.len(), chunks))
}

/// Scan both source directories, dropping repeated chunk ids.
pub fn collect_chunks(config: &Config) -> Result<(BuildReport, Vec<PendingChunk>)> {
    let kb = &config.knowledge_base;
    if kb.course_dir.is_none() && kb.forum_dir.is_none() {
        bail!("Nothing to build: set [knowledge_base].course_dir and/or forum_dir");
    }

    let mut report = BuildReport::default();
    let mut all = Vec::new();

    if let Some(dir) = &kb.course_dir {
        let (files, chunks) = scan_course_dir(dir, &config.chunking)?;
        report.course_files = files;
        all.extend(chunks);
    }
    if let Some(dir) = &kb.forum_dir {
        let (files, chunks) = scan_forum_dir(dir, &kb.forum_url_base, &config.chunking)?;
        report.forum_files = files;
        all.extend(chunks);
    }

    let mut seen = HashSet::new();
    let before = all.len();
    all.retain(|c| seen.insert((c.source_type, c.id.clone())));
    report.duplicates_skipped = before - all.len();

    report.course_chunks = all.iter().filter(|c| c.source_type == SourceType::Course).count();
    report.forum_chunks = all.len() - report.course_chunks;
    Ok((report, all))
}

/// Embed `chunks` and replace the database contents with them.
pub async fn write_chunks(
    config: &Config,
    embedder: &dyn Embedder,
    chunks: Vec<PendingChunk>,
) -> Result<()> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_all(embedder, &texts, config.embedding.batch_size)
        .await
        .context("Embedding failed; knowledge base left unchanged")?;

    let rows: Vec<ChunkRow> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(c, embedding)| ChunkRow {
            id: c.id,
            source_type: c.source_type,
            text: c.text,
            url: c.url,
            embedding,
            title: c.title,
            created_at: c.created_at,
        })
        .collect();

    let manifest = StoreManifest {
        embedding_model: Some(embedder.model_name().to_string()),
        embedding_dims: Some(embedder.dims()),
    };

    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    replace_knowledge_base(&pool, &rows, &manifest).await?;
    pool.close().await;
    Ok(())
}

/// Run `vta build`.
pub async fn run_build(config: &Config, dry_run: bool) -> Result<()> {
    let (report, chunks) = collect_chunks(config)?;

    if dry_run {
        println!("build (dry-run)");
        print_report(&report);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!(
            "Embedding provider is disabled; set [embedding].provider to build the knowledge base"
        );
    }
    let embedder = create_provider(&config.embedding)?;

    tracing::info!(
        chunks = chunks.len(),
        model = embedder.model_name(),
        "embedding knowledge base"
    );
    write_chunks(config, embedder.as_ref(), chunks).await?;

    println!("build");
    print_report(&report);
    println!(
        "  embedding model: {} ({} dims)",
        embedder.model_name(),
        embedder.dims()
    );
    println!("ok");
    Ok(())
}

fn print_report(report: &BuildReport) {
    println!("  course files: {}", report.course_files);
    println!("  forum files: {}", report.forum_files);
    println!("  course chunks: {}", report.course_chunks);
    println!("  forum chunks: {}", report.forum_chunks);
    if report.duplicates_skipped > 0 {
        println!("  duplicates skipped: {}", report.duplicates_skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn chunking(chunk_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_chars,
            overlap_chars,
        }
    }

    #[test]
    fn test_course_chunks_use_front_matter_url_and_sections() {
        let md = "---\noriginal_url: \"https://tds.s-anand.net/#/docker\"\n---\n# Docker\nInstall docker.\n# Podman\nUse podman instead.\n";
        let chunks = course_chunks(md, "docker.md", &chunking(750, 70));

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.url == "https://tds.s-anand.net/#/docker"));
        assert_eq!(chunks[0].title.as_deref(), Some("Docker"));
        assert_eq!(chunks[0].text, "Install docker.");
        assert_eq!(chunks[1].title.as_deref(), Some("Podman"));
        assert_ne!(chunks[0].id, chunks[1].id);
    }

    #[test]
    fn test_course_chunks_fallback_url() {
        let chunks = course_chunks("Just text.", "notes/intro.md", &chunking(750, 70));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].url, "notes/intro.md");
        assert!(chunks[0].title.is_none());
    }

    #[test]
    fn test_forum_chunks_url_and_windows() {
        let posts = vec![ForumPost {
            post_number: 3,
            topic_id: 155939,
            topic_title: Some("GA5 Question 8".to_string()),
            content: "a".repeat(25),
            created_at: Some("2025-04-10T12:00:00Z".to_string()),
        }];
        let chunks = forum_chunks(&posts, "https://discourse.example/t/", &chunking(10, 2));

        assert_eq!(chunks.len(), 3);
        assert!(chunks
            .iter()
            .all(|c| c.url == "https://discourse.example/t/155939/3"));
        assert_eq!(chunks[0].title.as_deref(), Some("GA5 Question 8"));
        assert_eq!(chunks[0].created_at.as_deref(), Some("2025-04-10T12:00:00Z"));
    }

    #[test]
    fn test_ids_stable_across_runs() {
        let md = "# A\nalpha\n# B\nbeta\n";
        let a = course_chunks(md, "x.md", &chunking(750, 70));
        let b = course_chunks(md, "x.md", &chunking(750, 70));
        assert_eq!(a, b);
    }

    #[test]
    fn test_collect_chunks_dedups_repeated_posts() {
        let tmp = TempDir::new().unwrap();
        let forum = tmp.path().join("forum");
        fs::create_dir_all(&forum).unwrap();
        let thread = r#"[{"post_id": 1, "post_number": 1, "topic_id": 7, "topic_title": "T", "author": "a", "content": "Deadline is Sunday."}]"#;
        fs::write(forum.join("a.json"), thread).unwrap();
        fs::write(forum.join("b.json"), thread).unwrap();
        fs::write(forum.join("ignored.txt"), "not a thread").unwrap();

        let toml_str = format!(
            "[db]\npath = \"{}\"\n[knowledge_base]\nforum_dir = \"{}\"\n",
            tmp.path().join("kb.sqlite").display(),
            forum.display()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();

        let (report, chunks) = collect_chunks(&config).unwrap();
        assert_eq!(report.forum_files, 2);
        assert_eq!(report.forum_chunks, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_collect_chunks_requires_a_directory() {
        let config: Config = toml::from_str("[db]\npath = \"kb.sqlite\"\n").unwrap();
        assert!(collect_chunks(&config).is_err());
    }

    #[test]
    fn test_invalid_thread_file_errors() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.json"), "{\"posts\": 1}").unwrap();
        assert!(scan_forum_dir(tmp.path(), "https://f/t", &chunking(750, 70)).is_err());
    }
}
