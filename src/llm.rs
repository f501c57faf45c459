//! OpenAI-compatible chat-completions client.
//!
//! Implements [`LanguageModel`] over `POST {base_url}/chat/completions`.
//! No retries happen here: a failed call surfaces as an [`UpstreamError`]
//! and the request fails as a whole.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use virtual_ta_core::answer::LanguageModel;
use virtual_ta_core::error::UpstreamError;
use virtual_ta_core::prompt::Prompt;

use crate::config::LlmConfig;

const SERVICE: &str = "language model";

pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatClient {
    /// Build a client from `[llm]`, reading the key from `api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build language model HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(status_error(status.as_u16(), text));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| UpstreamError::Malformed {
            service: SERVICE,
            message: e.to_string(),
        })?;
        extract_content(parsed)
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout { service: SERVICE }
    } else {
        UpstreamError::Transport {
            service: SERVICE,
            message: err.to_string(),
        }
    }
}

fn status_error(status: u16, body: String) -> UpstreamError {
    match status {
        429 => UpstreamError::RateLimited {
            service: SERVICE,
            message: body,
        },
        408 | 504 => UpstreamError::Timeout { service: SERVICE },
        _ => UpstreamError::Http {
            service: SERVICE,
            status,
            body,
        },
    }
}

fn extract_content(parsed: ChatResponse) -> Result<String, UpstreamError> {
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| UpstreamError::Malformed {
            service: SERVICE,
            message: "response has no choices".to_string(),
        })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(429, "quota".into()),
            UpstreamError::RateLimited { .. }
        ));
        assert!(matches!(
            status_error(504, String::new()),
            UpstreamError::Timeout { .. }
        ));
        assert!(matches!(
            status_error(401, "bad key".into()),
            UpstreamError::Http { status: 401, .. }
        ));
    }

    #[test]
    fn test_extract_first_choice() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Answer:\nHi\n\nSources:\nNone"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(parsed).unwrap(), "Answer:\nHi\n\nSources:\nNone");
    }

    #[test]
    fn test_extract_no_choices() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_content(parsed),
            Err(UpstreamError::Malformed { .. })
        ));
    }

    #[test]
    fn test_null_content_is_empty() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(extract_content(parsed).unwrap(), "");
    }

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.1,
            messages: vec![ChatMessage {
                role: "user",
                content: "q",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
