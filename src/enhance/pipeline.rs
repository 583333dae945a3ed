//! PromptPipeline - 분류 → 검색 → 개선
//!
//! 검색이 키워드 전용으로 강등되어도 파이프라인은 계속 진행하고,
//! 보고서에 강등 사유를 남깁니다.

use std::sync::Arc;

use serde::Serialize;

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::knowledge::{HybridSearcher, KnowledgeBase, SearchOptions, TechniqueCategory};

use super::categorizer::{CategorizationSource, Categorizer};
use super::enhancer::{EnhancementOutcome, Enhancer, RelatedContext};
use super::{GenerationParams, GenerativeModel};

/// 검색으로 가져온 관련 기법
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedTechnique {
    pub technique: String,
    pub category: TechniqueCategory,
    pub excerpt: String,
    pub fused_score: f32,
}

/// 파이프라인 실행 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancementReport {
    pub original_prompt: String,
    pub technique: String,
    pub categorization_source: CategorizationSource,
    pub retrieved: Vec<RetrievedTechnique>,
    /// 검색 강등 사유
    pub search_degraded: Option<String>,
    pub outcome: EnhancementOutcome,
}

/// 프롬프트 개선 파이프라인
pub struct PromptPipeline {
    kb: Arc<KnowledgeBase>,
    searcher: Arc<HybridSearcher>,
    categorizer: Categorizer,
    enhancer: Enhancer,
    search: SearchOptions,
}

impl PromptPipeline {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        searcher: Arc<HybridSearcher>,
        model: Arc<dyn GenerativeModel>,
        params: GenerationParams,
        search: SearchOptions,
        allow_fallback: bool,
    ) -> Self {
        Self {
            categorizer: Categorizer::new(model.clone(), kb.clone(), params),
            enhancer: Enhancer::new(model, params, allow_fallback),
            kb,
            searcher,
            search,
        }
    }

    /// 설정값으로 생성
    pub fn from_config(
        config: &RagConfig,
        kb: Arc<KnowledgeBase>,
        searcher: Arc<HybridSearcher>,
        model: Arc<dyn GenerativeModel>,
    ) -> Self {
        Self::new(
            kb,
            searcher,
            model,
            GenerationParams::from(&config.generation),
            config.search.to_options(),
            config.generation.allow_fallback,
        )
    }

    /// 프롬프트 처리
    ///
    /// # Errors
    /// * `InvalidArgument` - 빈 프롬프트
    /// * `UnknownTechnique` - 분류된 기법이 지식베이스에 없음
    /// * 검색 에러 (강등 불가 시 `UpstreamUnavailable`)
    pub async fn process(&self, prompt: &str) -> Result<EnhancementReport> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RagError::InvalidArgument("prompt must not be empty".to_string()));
        }

        let categorization = self.categorizer.categorize(prompt).await?;
        let technique = self
            .kb
            .get(&categorization.technique)
            .ok_or_else(|| RagError::UnknownTechnique(categorization.technique.clone()))?;

        let response = self.searcher.search(prompt, &self.search).await?;

        let retrieved: Vec<RetrievedTechnique> = response
            .results
            .iter()
            .filter_map(|result| {
                let chunk = self.searcher.chunk(result.chunk_id)?;
                let record = self.kb.get(&chunk.doc_id)?;
                let context = RelatedContext::new(&record.name, record.category, &chunk.text);
                Some(RetrievedTechnique {
                    technique: context.technique,
                    category: context.category,
                    excerpt: context.excerpt,
                    fused_score: result.fused_score,
                })
            })
            .collect();

        let contexts: Vec<RelatedContext> = retrieved
            .iter()
            .map(|r| RelatedContext {
                technique: r.technique.clone(),
                category: r.category,
                excerpt: r.excerpt.clone(),
            })
            .collect();

        let outcome = self.enhancer.enhance(prompt, technique, &contexts).await;

        tracing::info!(
            technique = %technique.name,
            retrieved = retrieved.len(),
            degraded = response.is_degraded(),
            outcome = outcome.status(),
            "Prompt processed"
        );

        Ok(EnhancementReport {
            original_prompt: prompt.to_string(),
            technique: technique.name.clone(),
            categorization_source: categorization.source,
            retrieved,
            search_degraded: response.degraded,
            outcome,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
