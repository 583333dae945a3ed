//! 설정 - 기본값 + 환경변수 오버라이드
//!
//! CLI 플래그는 호출마다 이 값을 다시 덮어씁니다.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::{
    DEFAULT_BASE_URL, DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL, SUPPORTED_DIMENSIONS,
};
use crate::error::{RagError, Result};
use crate::knowledge::{ChunkConfig, ChunkStrategy, SearchOptions, SearchStrategy};

/// 데이터 디렉토리 이름
const DATA_DIR_NAME: &str = ".prompt-rag";

/// 기본 생성 모델
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";

// ============================================================================
// Sections
// ============================================================================

/// 임베딩 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    /// API 대신 해시 임베딩 사용
    pub offline: bool,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            offline: false,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: SearchStrategy,
    pub top_k: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub over_fetch: usize,
    pub embed_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let defaults = SearchOptions::default();
        Self {
            strategy: defaults.strategy,
            top_k: defaults.top_k,
            vector_weight: defaults.vector_weight,
            keyword_weight: defaults.keyword_weight,
            over_fetch: defaults.over_fetch,
            embed_timeout_ms: defaults.embed_timeout.as_millis() as u64,
        }
    }
}

impl SearchConfig {
    pub fn to_options(&self) -> SearchOptions {
        SearchOptions {
            strategy: self.strategy,
            top_k: self.top_k,
            vector_weight: self.vector_weight,
            keyword_weight: self.keyword_weight,
            over_fetch: self.over_fetch,
            embed_timeout: Duration::from_millis(self.embed_timeout_ms),
            allow_degraded: true,
        }
    }
}

/// 생성 모델 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub base_url: String,
    /// 모델 호출 실패 시 템플릿 강등 허용
    pub allow_fallback: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GENERATION_MODEL.to_string(),
            temperature: 0.7,
            top_p: 0.95,
            max_output_tokens: 500,
            base_url: DEFAULT_BASE_URL.to_string(),
            allow_fallback: true,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunk: ChunkConfig,
    pub search: SearchConfig,
    pub generation: GenerationConfig,
    pub debug: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding: EmbeddingConfig::default(),
            chunk: ChunkConfig::default(),
            search: SearchConfig::default(),
            generation: GenerationConfig::default(),
            debug: false,
        }
    }
}

impl RagConfig {
    /// 기본값 + 프로세스 환경변수
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 기본값 + 주어진 조회 함수 (테스트에서 환경변수 대체)
    ///
    /// # Errors
    /// * `InvalidConfiguration` - 알 수 없는 전략, 지원하지 않는 차원, 잘못된 불리언
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var("PROMPT_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dim) = var("EMBEDDING_DIMENSION") {
            let dimension: usize = dim.trim().parse().map_err(|_| {
                RagError::InvalidConfiguration(format!("EMBEDDING_DIMENSION is not a number: {dim}"))
            })?;
            if !SUPPORTED_DIMENSIONS.contains(&dimension) {
                return Err(RagError::InvalidConfiguration(format!(
                    "EMBEDDING_DIMENSION must be one of {SUPPORTED_DIMENSIONS:?}, got {dimension}"
                )));
            }
            config.embedding.dimension = dimension;
        }
        if let Some(flag) = var("PROMPT_RAG_OFFLINE") {
            config.embedding.offline = parse_bool("PROMPT_RAG_OFFLINE", &flag)?;
        }
        if let Some(strategy) = var("PROMPT_RAG_CHUNK_STRATEGY") {
            config.chunk.strategy = strategy.parse::<ChunkStrategy>()?;
            config.chunk.validate()?;
        }
        if let Some(model) = var("GENERATION_MODEL") {
            config.generation.model = model;
        }
        if let Some(flag) = var("PROMPT_RAG_DEBUG") {
            config.debug = parse_bool("PROMPT_RAG_DEBUG", &flag)?;
        }

        Ok(config)
    }

    /// SQLite 파일 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }

    /// LanceDB 디렉토리 경로
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RagError::InvalidConfiguration(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

/// 기본 데이터 디렉토리
///
/// 우선순위: 로컬 데이터 디렉토리 > 홈 디렉토리 > 현재 디렉토리
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// 디버그 플래그만 빠르게 확인 (로깅 초기화 전)
pub fn debug_enabled() -> bool {
    std::env::var("PROMPT_RAG_DEBUG")
        .ok()
        .and_then(|v| parse_bool("PROMPT_RAG_DEBUG", &v).ok())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
