//! 임베딩 모듈 - 텍스트 → 고정 길이 벡터
//!
//! - `GeminiEmbedding`: Gemini REST API (문서/질의 task type 구분, 배치 지원)
//! - `HashEmbedding`: 오프라인 feature hashing (API 키 없이 동작, 테스트용)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let embedding = embedder.embed_query("chain of thought").await?;
//! ```

mod gemini;
mod hash;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

pub use gemini::{GeminiEmbedding, RetryPolicy, DEFAULT_BASE_URL, DEFAULT_EMBEDDING_MODEL};
pub use hash::HashEmbedding;

pub(crate) use gemini::GeminiTransport;

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// Gemini 임베딩이 지원하는 차원 (MRL)
pub const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩 (인덱싱용 문서)
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 질의 임베딩 (기본 구현: `embed`)
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(query).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// API Key Management
// ============================================================================

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    api_key_from(|name| std::env::var(name).ok()).ok_or_else(|| {
        anyhow::anyhow!(
            "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
             Get your API key at: https://aistudio.google.com/app/apikey"
        )
    })
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    api_key_from(|name| std::env::var(name).ok()).is_some()
}

fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS.iter().find_map(|name| {
        let key = lookup(name)?;
        if key.trim().is_empty() {
            return None;
        }
        tracing::debug!("Using API key from {}", name);
        Some(key)
    })
}

// ============================================================================
// UnavailableEmbedding
// ============================================================================

/// 임베딩을 만들 수 없는 상태의 자리표시자
///
/// 저장된 인덱스의 모델 이름과 차원을 그대로 갖고, 모든 임베딩 호출은
/// `reason`으로 실패합니다. 검색은 키워드 전용으로 강등됩니다.
#[derive(Debug, Clone)]
pub struct UnavailableEmbedding {
    name: String,
    dimension: usize,
    reason: String,
}

impl UnavailableEmbedding {
    pub fn new(name: impl Into<String>, dimension: usize, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimension,
            reason: reason.into(),
        }
    }

    /// API 키가 없을 때
    pub fn missing_api_key(name: impl Into<String>, dimension: usize) -> Self {
        Self::new(
            name,
            dimension,
            format!("API key not set ({})", API_KEY_VARS.join(" or ")),
        )
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("{}", self.reason)
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("{}", self.reason)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
///
/// `offline`이면 `HashEmbedding`, 아니면 API 키로 `GeminiEmbedding`을 만듭니다.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.offline {
        tracing::info!(
            "Using offline hashing embedder (dimension: {})",
            config.dimension
        );
        return Ok(Arc::new(HashEmbedding::new(config.dimension)?));
    }

    if !has_api_key() {
        anyhow::bail!(
            "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
             Set: export GEMINI_API_KEY=your-api-key\n\
             Or run offline: export PROMPT_RAG_OFFLINE=true"
        );
    }

    let embedder = GeminiEmbedding::from_config(get_api_key()?, config)?;
    tracing::info!(
        "Using Gemini API embedding (model: {}, dimension: {})",
        config.model,
        embedder.dimension()
    );
    Ok(Arc::new(embedder))
}

// ============================================================================
// Tests
// ============================================================================
