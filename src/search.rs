//! Retrieval inspection without a language model.
//!
//! `vta search` runs the same embed, rank, and assemble steps as a real
//! query and prints the context that would be sent to the model. Useful for
//! tuning `similarity_threshold`, `top_k`, and `max_context_chars`.

use anyhow::{bail, Context, Result};

use virtual_ta_core::answer;
use virtual_ta_core::store::EmbeddingSpec;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::sqlite_store::load_store;

/// Retrieve context for `query` and print it.
pub async fn run_search(config: &Config, query: &str, image_text: Option<&str>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("search requires an embedding provider; set [embedding].provider");
    }

    let embedder = create_provider(&config.embedding)?;
    let spec = EmbeddingSpec::of(embedder.as_ref());
    let store = load_store(&config.db.path, Some(&spec))
        .await
        .context("Failed to load knowledge base")?;

    let settings = config.answer_settings();
    let retrieval = answer::retrieve(embedder.as_ref(), &settings, &store, query, image_text)
        .await
        .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;

    let ctx = &retrieval.context;
    if ctx.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, entry) in ctx.entries.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} {}",
            i + 1,
            entry.score,
            entry.source_type.label(),
            entry.chunk_id
        );
        println!("    url: {}", entry.url);
        if let Some(title) = &entry.title {
            println!("    title: {}", title);
        }
        println!("    {}", preview(&entry.text, 160));
        println!();
    }

    println!(
        "context: {} chars, {} dropped",
        ctx.total_chars, ctx.dropped
    );
    println!("sources:");
    for link in &ctx.sources {
        println!("  {}", link.url);
    }

    Ok(())
}

/// First `max_chars` chars of `text` on one line.
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n b\tc", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("héllo wörld", 4), "héll...");
    }
}
