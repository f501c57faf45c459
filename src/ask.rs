//! One-shot question answering from the command line.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use std::sync::Arc;

use virtual_ta_core::answer::Orchestrator;
use virtual_ta_core::store::EmbeddingSpec;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::llm::OpenAiChatClient;
use crate::ocr::{resolve_image_text, OcrEngine, TesseractOcr};
use crate::sqlite_store::load_store;

/// Answer `question` against the local knowledge base and print the result.
///
/// `image` is read from disk and run through OCR when `[ocr]` is enabled;
/// `image_text` skips OCR entirely.
pub async fn run_ask(
    config: &Config,
    question: &str,
    image: Option<&Path>,
    image_text: Option<&str>,
) -> Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let expected = config
        .embedding
        .is_enabled()
        .then(|| EmbeddingSpec::of(embedder.as_ref()));
    let store = load_store(&config.db.path, expected.as_ref())
        .await
        .context("Failed to load knowledge base")?;

    let encoded = match image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read image: {}", path.display()))?;
            Some(STANDARD.encode(bytes))
        }
        None => None,
    };
    let ocr = config.ocr.enabled.then(|| TesseractOcr::new(&config.ocr));
    let image_text = resolve_image_text(
        ocr.as_ref().map(|o| o as &dyn OcrEngine),
        encoded.as_deref(),
        image_text,
    )
    .await;

    let llm = Arc::new(OpenAiChatClient::from_config(&config.llm)?);
    let orchestrator = Orchestrator::new(embedder, llm, config.answer_settings());
    let resp = orchestrator
        .answer(&store, question, image_text.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;

    println!("{}", resp.answer);
    if !resp.links.is_empty() {
        println!();
        println!("Sources:");
        for link in &resp.links {
            println!("  {}", link.url);
            println!("    \"{}\"", link.quote);
        }
    }
    Ok(())
}
