//! Categorizer - 사용자 프롬프트에 맞는 기법 선택
//!
//! 모델 응답이 지식베이스에 없으면 부분 일치를 찾고,
//! 그래도 없거나 호출이 실패하면 기본 기법(Zero-Shot Prompting)을 사용합니다.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{RagError, Result};
use crate::knowledge::{KnowledgeBase, DEFAULT_TECHNIQUE};

use super::{GenerationParams, GenerativeModel};

/// 기법 목록에 넣을 설명 최대 길이 (문자)
const DESCRIPTION_PREVIEW_CHARS: usize = 150;

/// 분류 결과 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorizationSource {
    /// 모델이 정확한 기법 이름을 반환
    Model,
    /// 모델 응답과 부분 일치하는 기법
    ClosestMatch,
    /// 호출 실패 또는 일치 없음 → 기본 기법
    Fallback,
}

/// 분류 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Categorization {
    pub technique: String,
    pub source: CategorizationSource,
    /// 모델 원문 응답 (호출 실패 시 None)
    pub raw_response: Option<String>,
}

/// 프롬프트 분류기
pub struct Categorizer {
    model: Arc<dyn GenerativeModel>,
    kb: Arc<KnowledgeBase>,
    params: GenerationParams,
    technique_list: String,
}

impl Categorizer {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        kb: Arc<KnowledgeBase>,
        params: GenerationParams,
    ) -> Self {
        let technique_list = technique_list(&kb);
        Self {
            model,
            kb,
            params,
            technique_list,
        }
    }

    /// 분류 요청 프롬프트
    pub fn build_prompt(&self, user_prompt: &str) -> String {
        format!(
            "You are an expert prompt engineering analyst. Your task is to analyze a user's prompt \
             and identify the most relevant prompting technique from \"The Prompt Report\" taxonomy.\n\n\
             Available Techniques:\n{}\n\n\
             User Prompt to Analyze:\n\"{}\"\n\n\
             Instructions:\n\
             1. Analyze the user's prompt for its intent, complexity, and structure\n\
             2. Determine which prompting technique would be most beneficial\n\
             3. Return ONLY the exact technique name from the list above\n\
             4. If multiple techniques could apply, choose the most impactful one\n\n\
             Response Format: Return only the technique name, nothing else.\n",
            self.technique_list, user_prompt
        )
    }

    /// 프롬프트 분류
    ///
    /// 모델 실패는 에러가 아니라 `Fallback` 결과가 됩니다.
    ///
    /// # Errors
    /// * `InvalidArgument` - 빈 프롬프트
    pub async fn categorize(&self, user_prompt: &str) -> Result<Categorization> {
        if user_prompt.trim().is_empty() {
            return Err(RagError::InvalidArgument("prompt must not be empty".to_string()));
        }

        let generation = match self
            .model
            .generate(&self.build_prompt(user_prompt), &self.params)
            .await
        {
            Ok(generation) if !generation.is_blocked() => generation,
            Ok(generation) => {
                tracing::warn!(
                    finish_reason = ?generation.finish_reason,
                    "Categorization blocked, using default technique"
                );
                return Ok(self.fallback(None));
            }
            Err(e) => {
                tracing::error!("Categorization failed: {:#}", e);
                return Ok(self.fallback(None));
            }
        };

        let raw = generation.text.trim().to_string();
        let answer = clean_answer(&raw);

        if let Some(record) = self.kb.get(answer) {
            tracing::info!("Categorized prompt as: {}", record.name);
            return Ok(Categorization {
                technique: record.name.clone(),
                source: CategorizationSource::Model,
                raw_response: Some(raw),
            });
        }

        tracing::warn!("Model returned unknown technique: {}", raw);
        if let Some(record) = self.kb.closest(answer) {
            return Ok(Categorization {
                technique: record.name.clone(),
                source: CategorizationSource::ClosestMatch,
                raw_response: Some(raw),
            });
        }

        Ok(self.fallback(Some(raw)))
    }

    fn fallback(&self, raw_response: Option<String>) -> Categorization {
        let technique = self
            .kb
            .get(DEFAULT_TECHNIQUE)
            .or_else(|| self.kb.all_documents().first())
            .map(|r| r.name.clone())
            .unwrap_or_else(|| DEFAULT_TECHNIQUE.to_string());

        Categorization {
            technique,
            source: CategorizationSource::Fallback,
            raw_response,
        }
    }
}

/// "- 이름: 설명..." 목록 (설명은 150자까지)
fn technique_list(kb: &KnowledgeBase) -> String {
    kb.all_documents()
        .iter()
        .map(|r| {
            let preview: String = r.description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            format!("- {}: {}...", r.name, preview.trim_end())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 따옴표, 글머리표, 마침표 등 장식 제거
fn clean_answer(raw: &str) -> &str {
    let first_line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    first_line
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '"' | '\'' | '`') || c.is_whitespace())
        .trim_end_matches(|c: char| matches!(c, '.' | '*' | '"' | '\'' | '`') || c.is_whitespace())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::testing::ScriptedModel;
    use crate::enhance::Generation;

    fn categorizer(model: ScriptedModel) -> (Arc<ScriptedModel>, Categorizer) {
        let model = Arc::new(model);
        let kb = Arc::new(KnowledgeBase::builtin().unwrap());
        let categorizer = Categorizer::new(model.clone(), kb, GenerationParams::default());
        (model, categorizer)
    }

    #[tokio::test]
    async fn test_exact_technique_name() {
        let (model, categorizer) = categorizer(ScriptedModel::replying(&["role prompting"]));
        let result = categorizer.categorize("Explain taxes like a CPA").await.unwrap();

        assert_eq!(result.technique, "Role Prompting");
        assert_eq!(result.source, CategorizationSource::Model);

        let prompt = model.last_prompt();
        assert!(prompt.contains("Explain taxes like a CPA"));
        assert!(prompt.contains("- Self-Consistency: "));
    }

    #[tokio::test]
    async fn test_decorated_answer_is_cleaned() {
        let (_, categorizer) =
            categorizer(ScriptedModel::replying(&["**\"Self-Consistency\".**\n"]));
        let result = categorizer.categorize("Solve 17 * 23").await.unwrap();
        assert_eq!(result.technique, "Self-Consistency");
        assert_eq!(result.source, CategorizationSource::Model);
    }

    #[tokio::test]
    async fn test_partial_name_uses_closest_match() {
        let (_, categorizer) = categorizer(ScriptedModel::replying(&["Step-Back"]));
        let result = categorizer.categorize("Why is the sky blue?").await.unwrap();
        assert_eq!(result.technique, "Step-Back Prompting");
        assert_eq!(result.source, CategorizationSource::ClosestMatch);
    }

    #[tokio::test]
    async fn test_unknown_answer_falls_back() {
        let (_, categorizer) = categorizer(ScriptedModel::replying(&["Interpretive Dance"]));
        let result = categorizer.categorize("Write a poem").await.unwrap();
        assert_eq!(result.technique, DEFAULT_TECHNIQUE);
        assert_eq!(result.source, CategorizationSource::Fallback);
        assert_eq!(result.raw_response.as_deref(), Some("Interpretive Dance"));
    }

    #[tokio::test]
    async fn test_model_error_falls_back() {
        let (_, categorizer) = categorizer(ScriptedModel::new(vec![Err(anyhow::anyhow!(
            "HTTP 500"
        ))]));
        let result = categorizer.categorize("Write a poem").await.unwrap();
        assert_eq!(result.technique, DEFAULT_TECHNIQUE);
        assert_eq!(result.source, CategorizationSource::Fallback);
        assert!(result.raw_response.is_none());
    }

    #[tokio::test]
    async fn test_blocked_response_falls_back() {
        let blocked = Generation {
            text: "Role Prompting".to_string(),
            finish_reason: Some("SAFETY".to_string()),
        };
        let (_, categorizer) = categorizer(ScriptedModel::new(vec![Ok(blocked)]));
        let result = categorizer.categorize("something").await.unwrap();
        assert_eq!(result.source, CategorizationSource::Fallback);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let (_, categorizer) = categorizer(ScriptedModel::replying(&[]));
        assert!(matches!(
            categorizer.categorize("  ").await,
            Err(RagError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_technique_list_truncates_descriptions() {
        let kb = KnowledgeBase::builtin().unwrap();
        let list = technique_list(&kb);
        assert_eq!(list.lines().count(), kb.len());
        for line in list.lines() {
            let (_, description) = line.split_once(": ").unwrap();
            assert!(description.chars().count() <= DESCRIPTION_PREVIEW_CHARS + 3);
        }
    }
}
