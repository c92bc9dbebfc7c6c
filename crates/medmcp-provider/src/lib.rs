pub mod client;
pub mod gemini;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::{AiClient, AiCompletion, AiError, ProviderStatus};
pub use gemini::GeminiProvider;
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// Provider Configuration
// ============================================================

/// Provider type identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Gemini,
    /// Offline canned replies, for demos and tests
    Stub,
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

/// Configuration for a single provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider ID, matched against the session's provider tag
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom base URL (optional, uses default for each provider type)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Output cap per call; the client default applies when unset.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            api_key: None,
            base_url: None,
            model: default_model(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Create a provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::Gemini => {
            let key = config
                .api_key
                .as_ref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| anyhow!("gemini requires api_key"))?;
            let mut provider = GeminiProvider::new(key.clone());
            if let Some(base_url) = config.base_url.as_deref() {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    Ok(provider)
}

// ============================================================
// Provider Registry
// ============================================================

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("provider not found: {id}"))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Replies with a fixed non-JSON sentence that quotes the last user message.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.clone())
            .unwrap_or_default();
        let first_line = user_text.lines().next().unwrap_or_default();
        Ok(LlmResponse {
            text: format!("[stub:{}] {}", request.model, first_line),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_registry_get_registered_succeeds() {
        let mut registry = ProviderRegistry::new();
        registry.register("gemini", Arc::new(StubProvider));

        assert!(registry.get("gemini").is_ok());
        assert!(!registry.is_empty());
    }

    #[test]
    fn provider_registry_get_unknown_fails() {
        let registry = ProviderRegistry::new();
        let err = registry.get("missing").err().unwrap();
        assert!(err.to_string().contains("provider not found: missing"));
    }

    #[test]
    fn create_provider_gemini_requires_key() {
        let config = ProviderConfig::new("gemini", ProviderType::Gemini);
        assert!(create_provider(&config).is_err());

        let blank = ProviderConfig::new("gemini", ProviderType::Gemini).with_api_key("  ");
        assert!(create_provider(&blank).is_err());

        let keyed = ProviderConfig::new("gemini", ProviderType::Gemini).with_api_key("k");
        assert!(create_provider(&keyed).is_ok());
    }

    #[test]
    fn create_provider_stub_needs_nothing() {
        let config = ProviderConfig::new("stub", ProviderType::Stub);
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn provider_config_deserializes_type_field() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "id": "gemini",
            "type": "gemini",
            "api_key": "secret"
        }))
        .unwrap();
        assert_eq!(config.provider_type, ProviderType::Gemini);
        assert_eq!(config.model, "gemini-1.5-flash");
        assert!(config.base_url.is_none());
        assert!(config.max_tokens.is_none());
        assert!(config.temperature.is_none());
    }

    #[tokio::test]
    async fn stub_provider_quotes_first_line_of_last_user_message() {
        let req = LlmRequest::new(
            "m",
            vec![
                LlmMessage::system("sys"),
                LlmMessage::user("Analyze symptoms\nfever, cough"),
            ],
        );
        let resp = StubProvider.chat(req).await.unwrap();
        assert_eq!(resp.text, "[stub:m] Analyze symptoms");
        assert!(StubProvider.health().await.is_ok());
    }
}
