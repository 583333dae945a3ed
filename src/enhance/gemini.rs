//! Gemini 생성 모델 (generateContent)
//!
//! source: https://ai.google.dev/api/generate-content

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::embedding::{GeminiTransport, RetryPolicy};

use super::{Generation, GenerationParams, GenerativeModel};

/// 완화된 안전 필터 대상 카테고리
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfigBody,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigBody {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    candidate_count: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

// ============================================================================
// GeminiGenerator
// ============================================================================

/// Gemini 텍스트 생성 구현체
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    transport: GeminiTransport,
    model: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, config: &GenerationConfig) -> Result<Self> {
        Self::build(api_key, &config.model, &config.base_url, RetryPolicy::default())
    }

    pub fn build(api_key: String, model: &str, base_url: &str, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            transport: GeminiTransport::new(api_key, base_url, retry)?,
            model: model.trim_start_matches("models/").to_string(),
        })
    }

    /// 환경변수 API 키로 생성
    pub fn from_env(config: &GenerationConfig) -> Result<Self> {
        Self::new(crate::embedding::get_api_key()?, config)
    }

    fn request(prompt: &str, params: &GenerationParams) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfigBody {
                temperature: params.temperature,
                top_p: params.top_p,
                max_output_tokens: params.max_output_tokens,
                candidate_count: 1,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        let path = format!("models/{}:generateContent", self.model);
        let response: GenerateResponse = self
            .transport
            .post_json(&path, &Self::request(prompt, params))
            .await?;

        let Some(candidate) = response.candidates.into_iter().next() else {
            // 후보가 없으면 프롬프트 자체가 차단된 경우
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates"))?;
            tracing::warn!("Prompt blocked by Gemini: {}", reason);
            return Ok(Generation {
                text: String::new(),
                finish_reason: Some(reason),
            });
        };

        let text: String = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();

        if let Some(ref reason) = candidate.finish_reason {
            tracing::debug!(model = %self.model, finish_reason = %reason, "Generation finished");
        }

        Ok(Generation {
            text,
            finish_reason: candidate.finish_reason,
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> GeminiGenerator {
        GeminiGenerator::build(
            "test-key".to_string(),
            "gemini-2.5-flash",
            &server.uri(),
            RetryPolicy {
                max_retries: 1,
                initial_backoff: Duration::from_millis(5),
                min_delay: Duration::ZERO,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_request_body() {
        let params = GenerationParams {
            temperature: 0.3,
            top_p: 0.9,
            max_output_tokens: 42,
        };
        let body = serde_json::to_value(GeminiGenerator::request("hello", &params)).unwrap();
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 42);
        assert_eq!(body["generationConfig"]["candidateCount"], 1);
        assert_eq!(body["safetySettings"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(body_partial_json(json!({"generationConfig": {"candidateCount": 1}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Role "}, {"text": "Prompting"}]},
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let generation = generator(&server)
            .generate("classify", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(generation.text, "Role Prompting");
        assert!(!generation.is_blocked());
    }

    #[tokio::test]
    async fn test_safety_finish_reason_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
            })))
            .mount(&server)
            .await;

        let generation = generator(&server)
            .generate("x", &GenerationParams::default())
            .await
            .unwrap();
        assert!(generation.is_blocked());
        assert!(generation.text.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_prompt_without_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let generation = generator(&server)
            .generate("x", &GenerationParams::default())
            .await
            .unwrap();
        assert!(generation.is_blocked());
    }

    #[tokio::test]
    async fn test_http_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "API key invalid", "status": "PERMISSION_DENIED"}
            })))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate("x", &GenerationParams::default())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("API key invalid"));
    }
}
