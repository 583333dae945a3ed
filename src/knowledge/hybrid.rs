//! 하이브리드 검색 - 벡터 유사도 + BM25 가중합 통합
//!
//! 두 경로의 후보를 각각 over-fetch 한 뒤 min-max 정규화하고,
//! 가중합(fused = w_v · v + w_k · k)으로 하나의 순위를 만듭니다.
//!
//! 임베딩 호출이 실패하거나 시간 초과되면 키워드 검색으로 강등하고,
//! 응답에 강등 사유를 남깁니다.
//!
//! ref: https://www.elastic.co/what-is/hybrid-search

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::Chunk;
use super::ranker::KeywordIndex;
use super::vector::VectorIndex;

/// 기본 over-fetch 배수
pub const DEFAULT_OVER_FETCH: usize = 4;
/// 기본 임베딩 타임아웃
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Types
// ============================================================================

/// 검색 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStrategy {
    /// 벡터 + 키워드 가중합
    #[default]
    Hybrid,
    /// 벡터 유사도만 사용
    VectorOnly,
    /// BM25 키워드 점수만 사용
    KeywordOnly,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::VectorOnly => "vector-only",
            Self::KeywordOnly => "keyword-only",
        }
    }

    /// 임베딩 호출이 필요한 전략인지
    pub fn needs_embedding(&self) -> bool {
        !matches!(self, Self::KeywordOnly)
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "vector-only" | "vector" => Ok(Self::VectorOnly),
            "keyword-only" | "keyword" | "bm25" => Ok(Self::KeywordOnly),
            other => Err(RagError::InvalidArgument(format!(
                "unknown search strategy '{other}' (expected hybrid, vector-only or keyword-only)"
            ))),
        }
    }
}

/// 검색 옵션
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub strategy: SearchStrategy,
    /// 반환할 최대 결과 수 (양수)
    pub top_k: usize,
    /// 벡터 가중치 (hybrid 전용, 음수 불가)
    pub vector_weight: f32,
    /// 키워드 가중치 (hybrid 전용, 음수 불가)
    pub keyword_weight: f32,
    /// 경로별 후보 수 = top_k × over_fetch
    pub over_fetch: usize,
    /// 임베딩 호출 타임아웃
    pub embed_timeout: Duration,
    /// 임베딩 실패 시 키워드 검색으로 강등할지 여부
    pub allow_degraded: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Hybrid,
            top_k: 3,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            over_fetch: DEFAULT_OVER_FETCH,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            allow_degraded: true,
        }
    }
}

impl SearchOptions {
    pub fn new(strategy: SearchStrategy, top_k: usize) -> Self {
        Self {
            strategy,
            top_k,
            ..Default::default()
        }
    }

    pub fn with_weights(mut self, vector_weight: f32, keyword_weight: f32) -> Self {
        self.vector_weight = vector_weight;
        self.keyword_weight = keyword_weight;
        self
    }

    /// 파라미터 검증
    ///
    /// 가중치는 hybrid 전략에서만 확인합니다.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be a positive integer".to_string(),
            ));
        }
        if self.over_fetch == 0 {
            return Err(RagError::InvalidArgument(
                "over_fetch must be at least 1".to_string(),
            ));
        }
        if self.strategy == SearchStrategy::Hybrid {
            self.normalized_weights()?;
        }
        Ok(())
    }

    /// 합이 1이 되도록 정규화된 (vector, keyword) 가중치
    pub fn normalized_weights(&self) -> Result<(f32, f32)> {
        let (v, k) = (self.vector_weight, self.keyword_weight);
        if !(v.is_finite() && k.is_finite()) || v < 0.0 || k < 0.0 {
            return Err(RagError::InvalidArgument(format!(
                "weights must be non-negative numbers (vector={v}, keyword={k})"
            )));
        }
        let total = v + k;
        if total <= 0.0 {
            return Err(RagError::InvalidArgument(
                "vector_weight and keyword_weight cannot both be zero".to_string(),
            ));
        }
        Ok((v / total, k / total))
    }

    fn candidate_count(&self) -> usize {
        self.top_k.saturating_mul(self.over_fetch)
    }
}

/// 검색 결과 (요청마다 생성, 저장하지 않음)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 청크 ID (코퍼스 삽입 순서)
    pub chunk_id: usize,
    /// 통합 스코어 (0.0 ~ 1.0)
    pub fused_score: f32,
    /// 원시 벡터 유사도 (없거나 0이면 None)
    pub vector_score: Option<f32>,
    /// 원시 BM25 점수 (없거나 0이면 None)
    pub keyword_score: Option<f32>,
}

/// 검색 응답
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// 요청된 전략
    pub requested: SearchStrategy,
    /// 실제로 사용된 전략
    pub strategy_used: SearchStrategy,
    /// 강등 사유 (강등되지 않았으면 None)
    pub degraded: Option<String>,
}

impl SearchResponse {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn chunk_ids(&self) -> Vec<usize> {
        self.results.iter().map(|r| r.chunk_id).collect()
    }
}

// ============================================================================
// HybridSearcher
// ============================================================================

/// 하이브리드 검색기
///
/// 빌드가 끝난 청크, 키워드 인덱스, 벡터 인덱스를 읽기 전용으로 공유합니다.
/// 질의 시점에는 어떤 상태도 변경하지 않습니다.
pub struct HybridSearcher {
    chunks: Vec<Chunk>,
    keyword: KeywordIndex,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl fmt::Debug for HybridSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridSearcher")
            .field("chunks", &self.chunks.len())
            .field("vocabulary", &self.keyword.vocabulary_size())
            .field("dimension", &self.vectors.dimension())
            .field("embedder", &self.embedder.name())
            .finish()
    }
}

impl HybridSearcher {
    /// 새 검색기 생성
    ///
    /// # Errors
    /// * `EmptyCorpus` - 청크가 없음
    /// * `InvalidConfiguration` - 키워드 인덱스/차원 불일치
    pub fn new(
        chunks: Vec<Chunk>,
        keyword: KeywordIndex,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(RagError::EmptyCorpus);
        }
        if keyword.len() != chunks.len() {
            return Err(RagError::InvalidConfiguration(format!(
                "keyword index covers {} chunks but corpus has {}",
                keyword.len(),
                chunks.len()
            )));
        }
        if vectors.dimension() != embedder.dimension() {
            return Err(RagError::InvalidConfiguration(format!(
                "vector index dimension {} does not match embedder '{}' dimension {}",
                vectors.dimension(),
                embedder.name(),
                embedder.dimension()
            )));
        }

        Ok(Self {
            chunks,
            keyword,
            vectors,
            embedder,
        })
    }

    /// 청크 조회
    pub fn chunk(&self, chunk_id: usize) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn keyword_index(&self) -> &KeywordIndex {
        &self.keyword
    }

    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 검색 실행
    ///
    /// # Errors
    /// * `InvalidArgument` - 빈 질의, top_k == 0, 잘못된 가중치
    /// * `UpstreamUnavailable` - 임베딩 실패 + `allow_degraded == false`
    /// * `Storage` - 벡터 인덱스 조회 실패
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".to_string()));
        }
        options.validate()?;

        let requested = options.strategy;
        let mut degraded = None;

        let query_vector = if requested.needs_embedding() {
            match self.embed_query(query, options.embed_timeout).await {
                Ok(v) => Some(v),
                Err(err) if options.allow_degraded => {
                    tracing::warn!(
                        strategy = %requested,
                        error = %err,
                        "Embedding unavailable, degrading to keyword-only search"
                    );
                    degraded = Some(err.to_string());
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let (strategy_used, results) = match (requested, query_vector) {
            (SearchStrategy::Hybrid, Some(v)) => {
                (SearchStrategy::Hybrid, self.search_hybrid(query, &v, options).await?)
            }
            (SearchStrategy::VectorOnly, Some(v)) => {
                (SearchStrategy::VectorOnly, self.search_vector(&v, options.top_k).await?)
            }
            _ => (
                SearchStrategy::KeywordOnly,
                self.search_keyword(query, options.top_k)?,
            ),
        };

        tracing::debug!(
            query,
            requested = %requested,
            used = %strategy_used,
            results = results.len(),
            "Search completed"
        );

        Ok(SearchResponse {
            results,
            requested,
            strategy_used,
            degraded,
        })
    }

    /// 타임아웃이 걸린 질의 임베딩
    async fn embed_query(&self, query: &str, timeout: Duration) -> Result<Vec<f32>> {
        let embedding = tokio::time::timeout(timeout, self.embedder.embed_query(query))
            .await
            .map_err(|_| {
                RagError::UpstreamUnavailable(format!(
                    "embedding request timed out after {} ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| RagError::UpstreamUnavailable(format!("{e:#}")))?;

        if embedding.len() != self.vectors.dimension() {
            return Err(RagError::UpstreamUnavailable(format!(
                "embedder returned {} dimensions, index expects {}",
                embedding.len(),
                self.vectors.dimension()
            )));
        }
        Ok(embedding)
    }

    /// 키워드 전용: BM25 순서 그대로 top_k
    fn search_keyword(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let scored = self.keyword.score(query, top_k)?;
        let raw: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
        let normalized = min_max_normalize(&raw);

        Ok(scored
            .iter()
            .zip(normalized)
            .map(|(&(chunk_id, score), fused_score)| SearchResult {
                chunk_id,
                fused_score,
                vector_score: None,
                keyword_score: non_zero(score),
            })
            .collect())
    }

    /// 벡터 전용: 벡터 인덱스 순서 그대로 top_k
    async fn search_vector(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        let matches = self.vectors.query(query_vector, top_k).await?;
        let raw: Vec<f32> = matches.iter().map(|m| m.similarity).collect();
        let normalized = min_max_normalize(&raw);

        Ok(matches
            .iter()
            .zip(normalized)
            .map(|(m, fused_score)| SearchResult {
                chunk_id: m.chunk_id,
                fused_score,
                vector_score: non_zero(m.similarity),
                keyword_score: None,
            })
            .collect())
    }

    /// 하이브리드: over-fetch → 경로별 min-max → 가중합 → 정렬
    async fn search_hybrid(
        &self,
        query: &str,
        query_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let (w_vector, w_keyword) = options.normalized_weights()?;
        let n = options.candidate_count();

        let vector_hits = self.vectors.query(query_vector, n).await?;
        let keyword_hits = self.keyword.score(query, n)?;

        // chunk_id -> (raw vector, norm vector, raw keyword, norm keyword)
        let mut merged: HashMap<usize, (Option<f32>, f32, Option<f32>, f32)> = HashMap::new();

        let vector_raw: Vec<f32> = vector_hits.iter().map(|m| m.similarity).collect();
        for (m, norm) in vector_hits.iter().zip(min_max_normalize(&vector_raw)) {
            let entry = merged.entry(m.chunk_id).or_insert((None, 0.0, None, 0.0));
            entry.0 = Some(m.similarity);
            entry.1 = norm;
        }

        let keyword_raw: Vec<f32> = keyword_hits.iter().map(|(_, s)| *s).collect();
        for (&(chunk_id, score), norm) in keyword_hits.iter().zip(min_max_normalize(&keyword_raw)) {
            let entry = merged.entry(chunk_id).or_insert((None, 0.0, None, 0.0));
            entry.2 = Some(score);
            entry.3 = norm;
        }

        let mut results: Vec<SearchResult> = merged
            .into_iter()
            .map(|(chunk_id, (raw_v, norm_v, raw_k, norm_k))| SearchResult {
                chunk_id,
                fused_score: w_vector * norm_v + w_keyword * norm_k,
                vector_score: raw_v.and_then(non_zero),
                keyword_score: raw_k.and_then(non_zero),
            })
            .collect();

        results.sort_by(|a, b| {
            b.fused_score
                .total_cmp(&a.fused_score)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(options.top_k);

        Ok(results)
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Min-max 정규화 (0.0 ~ 1.0)
///
/// 서로 다른 값이 하나뿐이면 모두 1.0이 됩니다.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(first) = scores.first() else {
        return Vec::new();
    };

    let (min, max) = scores
        .iter()
        .fold((*first, *first), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let range = max - min;

    if range <= f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores.iter().map(|s| (s - min) / range).collect()
}

fn non_zero(score: f32) -> Option<f32> {
    (score != 0.0).then_some(score)
}

// ============================================================================
// Tests
// ============================================================================
