//! AI comparison provider abstraction and implementations.
//!
//! Defines the [`Comparer`] trait, the single seam through which the
//! lineage tracker asks for a natural-language summary of the difference
//! between two document versions, and one concrete client speaking the
//! chat-completions wire shape, parameterized per provider:
//!
//! | Config value | Endpoint | API key env var |
//! |--------------|----------|-----------------|
//! | `openai` | `https://api.openai.com/v1` | `OPENAI_API_KEY` |
//! | `openrouter` | `https://openrouter.ai/api/v1` | `OPENROUTER_API_KEY` |
//!
//! Use [`create_comparer`] to instantiate the configured provider.
//!
//! Comparison calls are made once, with no retry: a failed or empty response
//! is reported as that document's failure and the batch moves on. Retrying
//! an expensive generation automatically is never worth it here.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AiConfig;
use crate::models::ModelInfo;

/// Inputs beyond this length are truncated before prompt substitution,
/// leaving room for the prompt scaffolding and the response.
const MAX_CONTENT_LENGTH: usize = 15000;

const SYSTEM_PROMPT: &str = "You are an expert legal analyst who specializes in comparing terms of service and legal documents. Your task is to identify and explain meaningful changes between document versions.";

/// A provider that can summarize the difference between two documents.
#[async_trait]
pub trait Comparer: Send + Sync {
    /// Generate a comparison summary. An empty model response is an error.
    async fn compare_documents(
        &self,
        previous_content: &str,
        current_content: &str,
        document_name: &str,
        prompt_template: &str,
        metadata: &serde_json::Value,
    ) -> Result<String>;

    /// Probe the provider with a trivial request.
    async fn test_connection(&self) -> bool;

    fn model_info(&self) -> ModelInfo;
}

/// Construct the configured [`Comparer`].
pub fn create_comparer(config: &AiConfig) -> Result<Arc<dyn Comparer>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(ChatClient::openai(config)?)),
        "openrouter" => Ok(Arc::new(ChatClient::openrouter(config)?)),
        other => bail!("Unknown AI provider: {}", other),
    }
}

/// Substitute document content and metadata into a prompt template.
///
/// Recognized placeholders: `{document_name}`, `{previous_content}`,
/// `{current_content}`, `{metadata}`. Content longer than
/// [`MAX_CONTENT_LENGTH`] is cut with a visible `...[truncated]` marker.
pub fn format_prompt(
    template: &str,
    previous_content: &str,
    current_content: &str,
    document_name: &str,
    metadata: &serde_json::Value,
) -> String {
    let previous = truncate_content(previous_content);
    let current = truncate_content(current_content);

    let metadata_str = match metadata.as_object() {
        Some(map) => map
            .iter()
            .filter(|(k, _)| k.as_str() != "content_hash" && k.as_str() != "raw_content")
            .map(|(k, v)| match v.as_str() {
                Some(s) => format!("{}: {}", k, s),
                None => format!("{}: {}", k, v),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };

    template
        .replace("{document_name}", document_name)
        .replace("{previous_content}", &previous)
        .replace("{current_content}", &current)
        .replace("{metadata}", &metadata_str)
}

fn truncate_content(content: &str) -> String {
    if content.len() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }
    // Cut on a char boundary at or below the limit
    let mut end = MAX_CONTENT_LENGTH;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &content[..end])
}

// ============ Chat-completions client ============

/// Chat-completions client covering both supported providers.
pub struct ChatClient {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    provider: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn openai(config: &AiConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Self::build(
            config,
            "https://api.openai.com/v1",
            api_key,
            "gpt-4-turbo-preview",
            "openai",
        )
    }

    pub fn openrouter(config: &AiConfig) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;
        Self::build(
            config,
            "https://openrouter.ai/api/v1",
            api_key,
            "anthropic/claude-3.5-sonnet",
            "openrouter",
        )
    }

    /// A client pointed at a custom endpoint. Used by tests against a local
    /// mock server; also works for any chat-completions-compatible gateway.
    pub fn with_base_url(config: &AiConfig, base_url: &str, api_key: &str) -> Result<Self> {
        Self::build(config, base_url, api_key.to_string(), "test-model", "custom")
    }

    fn build(
        config: &AiConfig,
        base_url: &str,
        api_key: String,
        default_model: &str,
        provider: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            provider: provider.to_string(),
            client,
        })
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!(
                "{} API error {}: {}",
                self.provider,
                status,
                body_text.chars().take(500).collect::<String>()
            );
        }

        let json: serde_json::Value = resp.json().await?;

        if let Some(usage) = json.get("usage") {
            tracing::debug!(provider = %self.provider, %usage, "token usage");
        }

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if content.trim().is_empty() {
            bail!("{} returned an empty result", self.provider);
        }

        Ok(content)
    }
}

#[async_trait]
impl Comparer for ChatClient {
    async fn compare_documents(
        &self,
        previous_content: &str,
        current_content: &str,
        document_name: &str,
        prompt_template: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let prompt = format_prompt(
            prompt_template,
            previous_content,
            current_content,
            document_name,
            metadata,
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": false,
        });

        let summary = self.chat(body).await?;
        tracing::info!(document_name, provider = %self.provider, "generated comparison");
        Ok(summary)
    }

    async fn test_connection(&self) -> bool {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": "Respond with 'OK' if you receive this message." },
            ],
            "max_tokens": 10,
            "temperature": 0,
        });

        match self.chat(body).await {
            Ok(content) => content.to_lowercase().contains("ok"),
            Err(e) => {
                tracing::warn!(provider = %self.provider, "connection test failed: {}", e);
                false
            }
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            provider: self.provider.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let template = "Doc: {document_name}\nOld:\n{previous_content}\nNew:\n{current_content}\nContext:\n{metadata}";
        let metadata = serde_json::json!({ "url": "https://example.com", "content_hash": "xyz" });
        let prompt = format_prompt(template, "old text", "new text", "Acme ToS", &metadata);

        assert!(prompt.contains("Doc: Acme ToS"));
        assert!(prompt.contains("Old:\nold text"));
        assert!(prompt.contains("New:\nnew text"));
        assert!(prompt.contains("url: https://example.com"));
        // Internal fields stay out of the prompt
        assert!(!prompt.contains("xyz"));
    }

    #[test]
    fn long_content_truncated_with_marker() {
        let long = "a".repeat(MAX_CONTENT_LENGTH + 100);
        let prompt = format_prompt(
            "{previous_content}",
            &long,
            "",
            "doc",
            &serde_json::Value::Null,
        );
        assert!(prompt.ends_with("...[truncated]"));
        assert!(prompt.len() < long.len());
    }

    #[tokio::test]
    async fn compare_parses_chat_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [ { "message": { "role": "assistant", "content": "Section 3 now permits data sharing." } } ],
                "usage": { "total_tokens": 42 },
            })))
            .mount(&server)
            .await;

        let client =
            ChatClient::with_base_url(&AiConfig::default(), &server.uri(), "test-key").unwrap();
        let summary = client
            .compare_documents("old", "new", "Acme ToS", "{previous_content} vs {current_content}", &serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(summary, "Section 3 now permits data sharing.");
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [ { "message": { "role": "assistant", "content": "" } } ],
            })))
            .mount(&server)
            .await;

        let client =
            ChatClient::with_base_url(&AiConfig::default(), &server.uri(), "test-key").unwrap();
        let err = client
            .compare_documents("old", "new", "doc", "{current_content}", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty result"));
    }
}
