//! Gemini `generateContent` adapter for clinical prompts.
//!
//! The patient/guideline system prompt travels as `systemInstruction`; the
//! operation prompt is the single user turn. Replies are returned as raw
//! text: JSON extraction and confidence handling live in the orchestrator.
//!
//! https://ai.google.dev/api/generate-content

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{LlmProvider, LlmRequest, LlmResponse, Role};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, request: &LlmRequest) -> GeminiRequest {
        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System && !m.text.is_empty())
            .map(|m| GeminiContent {
                role: match m.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                },
                parts: vec![GeminiPart { text: m.text.clone() }],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction: request.system_text().map(|s| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: s }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(request.max_tokens),
                temperature: request.temperature,
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, request.model, self.api_key
        );

        let payload = self.build_request(&request);

        let resp = match self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!("gemini api error (timeout): request timed out"));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("gemini api error (connect): {e}"));
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await?;
            return Err(format_api_error(status, &text));
        }

        let body: GeminiResponse = resp.json().await?;
        to_llm_response(body)
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(format_api_error(status, &text));
        }
        Ok(())
    }
}

fn to_llm_response(body: GeminiResponse) -> Result<LlmResponse> {
    let candidate = body
        .candidates
        .first()
        .ok_or_else(|| anyhow!("gemini api error: empty candidates"))?;

    let text: String = candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
        .unwrap_or_default();

    let stop_reason = match candidate.finish_reason.as_deref() {
        Some("STOP") => Some("end_turn".to_string()),
        Some("MAX_TOKENS") => Some("max_tokens".to_string()),
        Some("SAFETY") => Some("safety".to_string()),
        Some(r) => Some(r.to_lowercase()),
        None => None,
    };

    Ok(LlmResponse {
        text,
        input_tokens: body.usage_metadata.as_ref().map(|u| u.prompt_token_count),
        output_tokens: body
            .usage_metadata
            .as_ref()
            .map(|u| u.candidates_token_count),
        stop_reason,
    })
}

fn format_api_error(status: StatusCode, text: &str) -> anyhow::Error {
    anyhow!("gemini api error ({status}): {text}")
}

// ============================================================
// Gemini API Types
// ============================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmMessage;

    #[test]
    fn build_request_moves_system_messages_to_instruction() {
        let provider = GeminiProvider::new("test-key");
        let req = LlmRequest::new(
            "gemini-1.5-flash",
            vec![
                LlmMessage::system("You are a clinical assistant"),
                LlmMessage::user("Patient reports fever"),
            ],
        );
        let api_req = provider.build_request(&req);

        let instruction = api_req.system_instruction.unwrap();
        assert_eq!(instruction.parts[0].text, "You are a clinical assistant");
        assert_eq!(api_req.contents.len(), 1);
        assert_eq!(api_req.contents[0].role, "user");
    }

    #[test]
    fn build_request_maps_assistant_to_model_role() {
        let provider = GeminiProvider::new("test-key");
        let req = LlmRequest::new(
            "gemini-1.5-flash",
            vec![LlmMessage::user("hi"), LlmMessage::assistant("hello")],
        );
        let api_req = provider.build_request(&req);
        assert_eq!(api_req.contents[1].role, "model");
        assert!(api_req.system_instruction.is_none());
    }

    #[test]
    fn to_llm_response_text_only() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"text": "Hello"}, {"text": " there"}]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 5,
                "candidatesTokenCount": 2
            }
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let resp = to_llm_response(parsed).unwrap();

        assert_eq!(resp.text, "Hello there");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.input_tokens, Some(5));
        assert_eq!(resp.output_tokens, Some(2));
    }

    #[test]
    fn to_llm_response_empty_candidates_is_error() {
        let parsed: GeminiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        let err = to_llm_response(parsed).unwrap_err();
        assert!(err.to_string().contains("empty candidates"));
    }

    #[test]
    fn to_llm_response_safety_block_without_content() {
        let raw = serde_json::json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let resp = to_llm_response(parsed).unwrap();
        assert_eq!(resp.text, "");
        assert_eq!(resp.stop_reason.as_deref(), Some("safety"));
    }

    #[test]
    fn with_base_url_strips_trailing_slash() {
        let provider = GeminiProvider::new("k").with_base_url("http://localhost:9000/");
        assert_eq!(provider.base_url, "http://localhost:9000");
    }

    #[test]
    fn clinical_request_carries_generation_limits() {
        let provider = GeminiProvider::new("k");
        let mut req = LlmRequest::new(
            "gemini-1.5-flash",
            vec![
                LlmMessage::system("Patient: Ada (age 40)\nAllergies: penicillin"),
                LlmMessage::system("Clinical guidelines:\n- Check allergies first."),
                LlmMessage::user(""),
                LlmMessage::user("Proposed diagnosis: bronchitis\nReported symptoms: cough."),
            ],
        );
        req.max_tokens = 1024;
        req.temperature = Some(0.2);

        let api_req = provider.build_request(&req);
        let body = serde_json::to_value(&api_req).unwrap();

        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert!(body["generationConfig"]["temperature"].as_f64().is_some());
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "Patient: Ada (age 40)\nAllergies: penicillin\n\nClinical guidelines:\n- Check allergies first."
        );
        // Blank turns are dropped.
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert!(body["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Proposed diagnosis"));
    }

    #[test]
    fn unset_temperature_is_omitted() {
        let provider = GeminiProvider::new("k");
        let req = LlmRequest::new("gemini-1.5-flash", vec![LlmMessage::user("fever")]);
        let body = serde_json::to_value(provider.build_request(&req)).unwrap();
        assert!(body["generationConfig"].get("temperature").is_none());
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }
}
