//! Image text extraction for questions that arrive with a screenshot.
//!
//! The image is accepted as base64 (optionally a `data:` URL) and piped to
//! a `tesseract`-compatible command (`<command> stdin stdout`). Any failure
//! (bad base64, missing binary, non-zero exit, timeout) is logged and
//! treated as "no image text"; the question is still answered.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::OcrConfig;

/// Extracts text from raw image bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String>;
}

/// Runs an external OCR command on each image.
pub struct TesseractOcr {
    command: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .context("OCR process has no stdin")?;
        let bytes = image.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&bytes).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.command, self.timeout))??;
        writer.await??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.command, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Decode a base64 image, accepting an optional `data:<mime>;base64,` prefix.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.trim().split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded.trim(),
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .context("image is not valid base64")?;
    if bytes.is_empty() {
        bail!("image is empty");
    }
    Ok(bytes)
}

/// Work out the image text for a request.
///
/// Caller-supplied `image_text` wins over OCR. Without an engine, or when
/// OCR fails, the image contributes nothing.
pub async fn resolve_image_text(
    engine: Option<&dyn OcrEngine>,
    image: Option<&str>,
    image_text: Option<&str>,
) -> Option<String> {
    if let Some(text) = image_text.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(text.to_string());
    }
    let image = image.filter(|i| !i.trim().is_empty())?;
    let Some(engine) = engine else {
        tracing::debug!("image attached but OCR is disabled; ignoring it");
        return None;
    };

    let extracted = match decode_image(image) {
        Ok(bytes) => engine.extract_text(&bytes).await,
        Err(e) => Err(e),
    };
    match extracted {
        Ok(text) if !text.trim().is_empty() => {
            tracing::info!(chars = text.chars().count(), "extracted text from image");
            Some(text)
        }
        Ok(_) => {
            tracing::info!("image contained no recognizable text");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "OCR failed; continuing without image text");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOcr(Result<String, String>);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn extract_text(&self, image: &[u8]) -> Result<String> {
            assert!(!image.is_empty());
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn png_b64() -> String {
        STANDARD.encode(b"\x89PNG fake image bytes")
    }

    #[test]
    fn test_decode_plain_and_data_url() {
        let plain = png_b64();
        assert_eq!(decode_image(&plain).unwrap(), b"\x89PNG fake image bytes");
        let data_url = format!("data:image/png;base64,{}", plain);
        assert_eq!(decode_image(&data_url).unwrap(), b"\x89PNG fake image bytes");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image("not base64 !!!").is_err());
        assert!(decode_image("").is_err());
    }

    #[tokio::test]
    async fn test_explicit_image_text_wins() {
        let ocr = FixedOcr(Ok("from ocr".to_string()));
        let engine: &dyn OcrEngine = &ocr;
        let image = png_b64();
        let text = resolve_image_text(Some(engine), Some(image.as_str()), Some(" typed ")).await;
        assert_eq!(text.as_deref(), Some("typed"));
    }

    #[tokio::test]
    async fn test_ocr_text_used() {
        let ocr = FixedOcr(Ok("Error 429".to_string()));
        let engine: &dyn OcrEngine = &ocr;
        let text = resolve_image_text(Some(engine), Some(png_b64().as_str()), None).await;
        assert_eq!(text.as_deref(), Some("Error 429"));
    }

    #[tokio::test]
    async fn test_ocr_failure_is_no_text() {
        let ocr = FixedOcr(Err("tesseract missing".to_string()));
        let failing: &dyn OcrEngine = &ocr;
        let text = resolve_image_text(Some(failing), Some(png_b64().as_str()), None).await;
        assert!(text.is_none());

        let ok = FixedOcr(Ok("unused".to_string()));
        let working: &dyn OcrEngine = &ok;
        assert!(resolve_image_text(Some(working), Some("%%%"), None).await.is_none());
    }

    #[tokio::test]
    async fn test_no_engine_ignores_image() {
        let text = resolve_image_text(None, Some(png_b64().as_str()), None).await;
        assert!(text.is_none());
        assert!(resolve_image_text(None, None, None).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_errors() {
        let ocr = TesseractOcr::new(&OcrConfig {
            enabled: true,
            command: "definitely-not-an-ocr-binary".to_string(),
            timeout_secs: 5,
        });
        assert!(ocr.extract_text(b"bytes").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_ocr_command_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("slow-ocr");
        std::fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ocr = TesseractOcr::new(&OcrConfig {
            enabled: true,
            command: script.display().to_string(),
            timeout_secs: 1,
        });
        let started = std::time::Instant::now();
        let err = ocr.extract_text(b"bytes").await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));

        let engine: &dyn OcrEngine = &ocr;
        let text = resolve_image_text(Some(engine), Some(png_b64().as_str()), None).await;
        assert!(text.is_none());
    }
}
