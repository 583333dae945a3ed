//! Enhance 모듈 - 프롬프트 분류 + 개선 파이프라인
//!
//! 1. Categorizer: 생성 모델로 가장 적합한 기법 선택 (실패 시 기본 기법)
//! 2. HybridSearcher: 사용자 프롬프트로 관련 기법 검색
//! 3. Enhancer: 기법 설명과 관련 컨텍스트로 개선된 프롬프트 생성
//!
//! 모델 호출이 실패하면 템플릿 기반 결과를 `DegradedFallback`으로 구분해서 돌려줍니다.

mod categorizer;
mod enhancer;
mod gemini;
mod pipeline;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;

pub use categorizer::{Categorization, CategorizationSource, Categorizer};
pub use enhancer::{fallback_enhancement, EnhancementOutcome, Enhancer, RelatedContext};
pub use gemini::GeminiGenerator;
pub use pipeline::{EnhancementReport, PromptPipeline, RetrievedTechnique};

// ============================================================================
// GenerativeModel Trait
// ============================================================================

/// 생성 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            max_output_tokens: 500,
        }
    }
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// 생성 결과
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Generation {
    pub text: String,
    /// 종료 사유 (STOP, MAX_TOKENS, SAFETY, ...)
    pub finish_reason: Option<String>,
}

impl Generation {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("STOP".to_string()),
        }
    }

    /// 안전 필터로 차단된 응답인지
    pub fn is_blocked(&self) -> bool {
        self.finish_reason.as_deref().is_some_and(|reason| {
            ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"]
                .iter()
                .any(|blocked| reason.contains(blocked))
        })
    }
}

/// 텍스트 생성 모델 트레이트
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation>;

    /// 모델 이름
    fn name(&self) -> &str;
}
