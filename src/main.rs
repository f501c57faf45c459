//! # Virtual TA CLI (`vta`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vta init` | Create the SQLite database and schema |
//! | `vta build` | Chunk and embed course pages and forum posts |
//! | `vta stats` | Show knowledge base counts and build metadata |
//! | `vta search "<query>"` | Show the context a question would retrieve |
//! | `vta ask "<question>"` | Answer a question with cited sources |
//! | `vta serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! vta init --config ./config/vta.toml
//! vta build --dry-run
//! vta build
//! vta ask "Should I use gpt-4o-mini or gpt-3.5-turbo?" --image ./screenshot.png
//! vta serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use virtual_ta::{ask, config, ingest, logging, migrate, search, server, stats};

/// Virtual TA: grounded answers from course material and forum history.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vta.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "vta", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vta.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Rebuild the knowledge base from the configured directories.
    ///
    /// Replaces every stored chunk in a single transaction.
    Build {
        /// Scan and chunk only; print counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show knowledge base statistics.
    Stats,

    /// Print the ranked context a question would retrieve.
    Search {
        query: String,

        /// Text extracted from an attached image.
        #[arg(long)]
        image_text: Option<String>,
    },

    /// Answer a question and print the cited sources.
    Ask {
        question: String,

        /// Screenshot to OCR (requires `[ocr].enabled`).
        #[arg(long)]
        image: Option<PathBuf>,

        /// Text already extracted from the screenshot.
        #[arg(long)]
        image_text: Option<String>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Build { dry_run } => {
            ingest::run_build(&cfg, dry_run).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search { query, image_text } => {
            search::run_search(&cfg, &query, image_text.as_deref()).await?;
        }
        Commands::Ask {
            question,
            image,
            image_text,
        } => {
            ask::run_ask(&cfg, &question, image.as_deref(), image_text.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
