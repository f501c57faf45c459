//! Knowledge base overview for `vta stats`.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::{read_meta, META_BUILT_AT, META_EMBEDDING_DIMS, META_EMBEDDING_MODEL};

/// Print chunk counts per partition and the recorded build metadata.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::open_existing(&config.db.path).await?;

    let counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT source_type, COUNT(*) FROM chunks GROUP BY source_type ORDER BY source_type",
    )
    .fetch_all(&pool)
    .await?;
    let count_of = |kind: &str| {
        counts
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };

    let meta = read_meta(&pool).await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let field = |key: &str| meta.get(key).map(String::as_str).unwrap_or("-");

    println!("Virtual TA Knowledge Base");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Course:      {}", count_of("course"));
    println!("  Forum:       {}", count_of("forum"));
    println!();
    println!("  Model:       {}", field(META_EMBEDDING_MODEL));
    println!("  Dims:        {}", field(META_EMBEDDING_DIMS));
    println!("  Built:       {}", field(META_BUILT_AT));
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
