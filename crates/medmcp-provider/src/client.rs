//! Adapter between the orchestrator and a concrete [`LlmProvider`].
//!
//! Every transport or provider failure is folded into [`AiError::CallFailed`];
//! nothing here retries.

use std::sync::Arc;

use medmcp_schema::ProviderTag;
use serde::Serialize;
use thiserror::Error;

use crate::{create_provider, LlmMessage, LlmProvider, LlmRequest, ProviderConfig, ProviderRegistry};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI call failed: {0}")]
    CallFailed(String),
    #[error("AI call failed: prompt has no messages")]
    EmptyPrompt,
    #[error("AI provider is disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiCompletion {
    pub text: String,
    pub token_estimate: u32,
}

#[derive(Clone)]
pub struct AiClient {
    registry: ProviderRegistry,
    default_id: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl AiClient {
    pub fn new(
        registry: ProviderRegistry,
        default_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            default_id: default_id.into(),
            model: model.into(),
            max_tokens: 2048,
            temperature: Some(0.3),
        }
    }

    /// Single-provider client, the common wiring.
    pub fn with_provider(
        id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let mut registry = ProviderRegistry::new();
        registry.register(id.clone(), provider);
        Self::new(registry, id, model)
    }

    /// Client with no providers; every call reports [`AiError::Disconnected`].
    pub fn disconnected() -> Self {
        Self::new(ProviderRegistry::new(), "", "")
    }

    /// Builds a client from configuration. A missing API key (or a provider
    /// that fails to build) yields a disconnected client instead of an error.
    pub fn from_config(config: &ProviderConfig) -> Self {
        match create_provider(config) {
            Ok(provider) => {
                tracing::info!(
                    provider = %config.id,
                    model = %config.model,
                    "AI provider connected"
                );
                let mut client =
                    Self::with_provider(config.id.clone(), provider, config.model.clone());
                if let Some(max_tokens) = config.max_tokens {
                    client = client.with_max_tokens(max_tokens);
                }
                if config.temperature.is_some() {
                    client = client.with_temperature(config.temperature);
                }
                client
            }
            Err(e) => {
                tracing::warn!(
                    provider = %config.id,
                    "AI provider disconnected, using fallback responses only: {e}"
                );
                Self::disconnected()
            }
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn status(&self) -> ProviderStatus {
        if self.registry.is_empty() {
            ProviderStatus::Disconnected
        } else {
            ProviderStatus::Connected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ProviderStatus::Connected
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolves the provider for a tag. Unregistered tags route to the
    /// default provider.
    pub fn provider_for(&self, tag: ProviderTag) -> Result<Arc<dyn LlmProvider>, AiError> {
        if !self.is_connected() {
            return Err(AiError::Disconnected);
        }
        self.registry
            .get(tag.as_str())
            .or_else(|_| self.registry.get(&self.default_id))
            .map_err(|e| AiError::CallFailed(e.to_string()))
    }

    pub async fn complete(
        &self,
        tag: ProviderTag,
        messages: Vec<LlmMessage>,
    ) -> Result<AiCompletion, AiError> {
        if messages.is_empty() {
            return Err(AiError::EmptyPrompt);
        }
        let provider = self.provider_for(tag)?;

        let request = LlmRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let prompt_chars = request.prompt_chars();

        let response = provider
            .chat(request)
            .await
            .map_err(|e| AiError::CallFailed(e.to_string()))?;

        let token_estimate = match (response.input_tokens, response.output_tokens) {
            (Some(input), Some(output)) => input + output,
            (Some(n), None) | (None, Some(n)) => n,
            (None, None) => estimate_tokens(prompt_chars + response.text.chars().count()),
        };
        tracing::debug!(provider = tag.as_str(), token_estimate, "AI call completed");

        Ok(AiCompletion {
            text: response.text,
            token_estimate,
        })
    }
}

/// Rough four-characters-per-token estimate.
pub fn estimate_tokens(chars: usize) -> u32 {
    chars.div_ceil(4).min(u32::MAX as usize) as u32
}
