// 🤖 LLM Provider - OpenAI-compatible chat completions
//
// The provider is a trait so the assistant can run against a mock in tests
// or with no provider at all.

use crate::error::{FinanceError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::Assistant, content: content.into() }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Return the assistant's reply to `messages`
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    fn model(&self) -> &str;
}

// ============================================================================
// OPENAI-COMPATIBLE HTTP PROVIDER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        LlmSettings {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
            temperature: 0.2,
        }
    }
}

impl LlmSettings {
    /// A provider is only usable once a key is configured
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    settings: LlmSettings,
}

impl OpenAiCompatibleProvider {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        if !settings.is_configured() {
            return Err(FinanceError::Llm("no API key configured".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| FinanceError::Llm(format!("failed to build HTTP client: {}", e)))?;
        Ok(OpenAiCompatibleProvider { client, settings })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FinanceError::Llm(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "llm provider returned an error");
            return Err(FinanceError::Llm(format!("provider returned {}: {}", status, body)));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| FinanceError::Llm(format!("malformed response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| FinanceError::Llm("response had no choices".to_string()))
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

/// Build a provider from settings, or None when no key is configured
pub fn provider_from_settings(settings: &LlmSettings) -> Option<Arc<dyn LlmProvider>> {
    if !settings.is_configured() {
        tracing::info!("no LLM API key configured; assistant runs in offline mode");
        return None;
    }
    match OpenAiCompatibleProvider::new(settings.clone()) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            tracing::warn!(error = %e, "could not create LLM provider");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::system("hi")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"hi"}"#);
    }

    #[test]
    fn test_unconfigured_settings_yield_no_provider() {
        let settings = LlmSettings::default();
        assert!(!settings.is_configured());
        assert!(provider_from_settings(&settings).is_none());

        let blank = LlmSettings {
            api_key: Some("  ".to_string()),
            ..LlmSettings::default()
        };
        assert!(!blank.is_configured());
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let provider = OpenAiCompatibleProvider::new(LlmSettings {
            base_url: "http://localhost:11434/v1/".to_string(),
            api_key: Some("sk-test".to_string()),
            ..LlmSettings::default()
        })
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_mock_provider_replays_in_order() {
        let provider = mock::MockProvider::new(vec![Ok("one".to_string()), Ok("two".to_string())]);
        let messages = vec![ChatMessage::user("hello")];
        assert_eq!(provider.complete(&messages).await.unwrap(), "one");
        assert_eq!(provider.complete(&messages).await.unwrap(), "two");
        assert!(provider.complete(&messages).await.is_err());
        assert_eq!(provider.requests.lock().unwrap().len(), 3);
    }
}
