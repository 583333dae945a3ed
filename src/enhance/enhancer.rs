//! Enhancer - 선택된 기법으로 프롬프트 개선
//!
//! 모델 응답이 너무 짧거나 차단되면 템플릿 결과를 `DegradedFallback`으로 돌려줍니다.
//! 폴백이 꺼져 있으면 `Failed`.

use std::sync::Arc;

use serde::Serialize;

use crate::knowledge::{TechniqueCategory, TechniqueRecord, DEFAULT_TECHNIQUE};

use super::{GenerationParams, GenerativeModel};

/// 프롬프트에 넣을 관련 컨텍스트 최대 개수
pub const MAX_RELATED_CONTEXTS: usize = 2;

/// 관련 컨텍스트 발췌 최대 길이 (문자)
pub const EXCERPT_CHARS: usize = 200;

/// 이보다 짧은 응답은 거부
const MIN_RESPONSE_CHARS: usize = 10;

/// 검색으로 찾은 관련 기법 컨텍스트
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedContext {
    pub technique: String,
    pub category: TechniqueCategory,
    pub excerpt: String,
}

impl RelatedContext {
    /// 발췌는 200자까지
    pub fn new(technique: impl Into<String>, category: TechniqueCategory, text: &str) -> Self {
        Self {
            technique: technique.into(),
            category,
            excerpt: text.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

/// 개선 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnhancementOutcome {
    /// 모델이 생성한 개선 프롬프트
    FullyEnhanced { prompt: String },
    /// 모델 실패 → 템플릿 기반 결과
    DegradedFallback { prompt: String, reason: String },
    /// 모델 실패, 폴백 비활성화
    Failed { reason: String },
}

impl EnhancementOutcome {
    /// 사용할 프롬프트 (Failed면 None)
    pub fn prompt(&self) -> Option<&str> {
        match self {
            EnhancementOutcome::FullyEnhanced { prompt }
            | EnhancementOutcome::DegradedFallback { prompt, .. } => Some(prompt),
            EnhancementOutcome::Failed { .. } => None,
        }
    }

    pub fn is_fully_enhanced(&self) -> bool {
        matches!(self, EnhancementOutcome::FullyEnhanced { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            EnhancementOutcome::FullyEnhanced { .. } => "fully_enhanced",
            EnhancementOutcome::DegradedFallback { .. } => "degraded_fallback",
            EnhancementOutcome::Failed { .. } => "failed",
        }
    }
}

/// 프롬프트 개선기
pub struct Enhancer {
    model: Arc<dyn GenerativeModel>,
    params: GenerationParams,
    allow_fallback: bool,
}

impl Enhancer {
    pub fn new(model: Arc<dyn GenerativeModel>, params: GenerationParams, allow_fallback: bool) -> Self {
        Self {
            model,
            params,
            allow_fallback,
        }
    }

    /// 개선 요청 프롬프트
    pub fn build_prompt(
        &self,
        original: &str,
        technique: &TechniqueRecord,
        contexts: &[RelatedContext],
    ) -> String {
        let label = technique_label(&technique.name);
        let contexts = usable_contexts(&technique.name, contexts);

        let mut prompt = format!(
            "You are a helpful writing assistant. Help improve the following request to make it \
             clearer and more effective.\n\n\
             Original Request: \"{}\"\n\n\
             Suggested Improvement Approach: {}\n\
             Description: {}\n\
             Guidance: {}\n",
            original, label, technique.description, technique.how_to_apply
        );

        if !contexts.is_empty() {
            prompt.push_str("\nRelated approaches:\n");
            for ctx in &contexts {
                prompt.push_str(&format!("- {}: {}\n", ctx.technique, ctx.excerpt));
            }
        }

        prompt.push_str(
            "\nPlease rewrite the request to be clearer and more specific, applying the suggested \
             approach. Keep the original intent. Return only the improved request.\n\n\
             Improved Request:",
        );
        prompt
    }

    /// 프롬프트 개선
    pub async fn enhance(
        &self,
        original: &str,
        technique: &TechniqueRecord,
        contexts: &[RelatedContext],
    ) -> EnhancementOutcome {
        let request = self.build_prompt(original, technique, contexts);

        let reason = match self.model.generate(&request, &self.params).await {
            Ok(generation) if generation.is_blocked() => format!(
                "response blocked ({})",
                generation.finish_reason.as_deref().unwrap_or("unknown")
            ),
            Ok(generation) => {
                let text = generation.text.trim();
                if text.chars().count() > MIN_RESPONSE_CHARS {
                    tracing::info!(technique = %technique.name, "Prompt enhanced");
                    return EnhancementOutcome::FullyEnhanced {
                        prompt: text.to_string(),
                    };
                }
                format!("response too short ({} chars)", text.chars().count())
            }
            Err(e) => format!("generation failed: {e:#}"),
        };

        tracing::warn!(technique = %technique.name, "Enhancement degraded: {}", reason);

        if !self.allow_fallback {
            return EnhancementOutcome::Failed { reason };
        }

        EnhancementOutcome::DegradedFallback {
            prompt: fallback_enhancement(
                original,
                technique_label(&technique.name),
                &technique.how_to_apply,
            ),
            reason,
        }
    }
}

/// Zero-Shot Prompting은 "Direct Instruction Following"으로 표시
fn technique_label(name: &str) -> &str {
    if name.eq_ignore_ascii_case(DEFAULT_TECHNIQUE) {
        "Direct Instruction Following"
    } else {
        name
    }
}

/// 기법별 중복 제거, 주 기법 제외, 최대 2개
///
/// Zero-Shot이면 in-context learning 기법은 제외
fn usable_contexts<'a>(technique: &str, contexts: &'a [RelatedContext]) -> Vec<&'a RelatedContext> {
    let zero_shot = technique.eq_ignore_ascii_case(DEFAULT_TECHNIQUE);
    let mut seen: Vec<&str> = Vec::new();
    let mut usable = Vec::new();

    for ctx in contexts {
        if ctx.technique.eq_ignore_ascii_case(technique)
            || (zero_shot && ctx.category == TechniqueCategory::InContextLearning)
            || seen.iter().any(|s| s.eq_ignore_ascii_case(&ctx.technique))
        {
            continue;
        }
        seen.push(&ctx.technique);
        usable.push(ctx);
        if usable.len() == MAX_RELATED_CONTEXTS {
            break;
        }
    }
    usable
}

/// 템플릿 기반 개선 (모델 없이)
pub fn fallback_enhancement(original: &str, label: &str, how_to_apply: &str) -> String {
    let lower = label.to_lowercase();

    if lower.contains("chain-of-thought") || lower.contains("cot") {
        format!("{original}\n\nPlease think through this step-by-step and explain your reasoning:")
    } else if lower.contains("role prompting") {
        format!(
            "You are an expert in this domain with extensive knowledge and experience. {original}"
        )
    } else if lower.contains("few-shot") {
        format!("{original}\n\nPlease provide a detailed response with examples if applicable:")
    } else if lower.contains("zero-shot") {
        format!("{original}\n\nPlease provide a comprehensive and detailed response:")
    } else if lower.contains("instruction following") {
        format!("Please follow these instructions carefully:\n\n{original}")
    } else if lower.contains("self-consistency") {
        format!(
            "{original}\n\nPlease think about this from multiple angles and provide a well-reasoned response:"
        )
    } else if lower.contains("generated knowledge") {
        format!(
            "First, consider what background knowledge is relevant to this task, then:\n\n{original}"
        )
    } else if !how_to_apply.trim().is_empty() {
        format!("{original}\n\n{}", how_to_apply.trim())
    } else {
        format!("{original}\n\nPlease provide a detailed and well-structured response:")
    }
}

// ============================================================================
// Tests
// ============================================================================
