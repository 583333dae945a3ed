//! Technique Knowledge Base - 프롬프트 엔지니어링 기법 분류 체계
//!
//! 고정된 기법 목록(이름, 카테고리, 설명, 예시, 관련 기법)을 보관합니다.
//! 프로세스 시작 시 한 번 로드되고 이후 읽기 전용입니다.
//! 전역 상태 없이 생성 후 인덱서/검색기에 주입합니다.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};

/// 내장 기법 데이터 (The Prompt Report 텍스트 기반 기법 58종)
const BUILTIN_TECHNIQUES: &str = include_str!("../../data/techniques.json");

/// 카테고리 판별 실패 시 기본 기법
pub const DEFAULT_TECHNIQUE: &str = "Zero-Shot Prompting";

// ============================================================================
// Types
// ============================================================================

/// 기법 카테고리 (빌드 시점에 고정된 닫힌 집합)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TechniqueCategory {
    InContextLearning,
    ZeroShot,
    ThoughtGeneration,
    Decomposition,
    Ensembling,
    SelfCriticism,
}

impl TechniqueCategory {
    pub const ALL: [TechniqueCategory; 6] = [
        TechniqueCategory::InContextLearning,
        TechniqueCategory::ZeroShot,
        TechniqueCategory::ThoughtGeneration,
        TechniqueCategory::Decomposition,
        TechniqueCategory::Ensembling,
        TechniqueCategory::SelfCriticism,
    ];

    /// 표시용 이름
    pub fn display_name(self) -> &'static str {
        match self {
            TechniqueCategory::InContextLearning => "In-Context Learning",
            TechniqueCategory::ZeroShot => "Zero-Shot",
            TechniqueCategory::ThoughtGeneration => "Thought Generation",
            TechniqueCategory::Decomposition => "Decomposition",
            TechniqueCategory::Ensembling => "Ensembling",
            TechniqueCategory::SelfCriticism => "Self-Criticism",
        }
    }

    /// 식별자 (kebab-case)
    pub fn slug(self) -> &'static str {
        match self {
            TechniqueCategory::InContextLearning => "in-context-learning",
            TechniqueCategory::ZeroShot => "zero-shot",
            TechniqueCategory::ThoughtGeneration => "thought-generation",
            TechniqueCategory::Decomposition => "decomposition",
            TechniqueCategory::Ensembling => "ensembling",
            TechniqueCategory::SelfCriticism => "self-criticism",
        }
    }
}

impl fmt::Display for TechniqueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for TechniqueCategory {
    type Err = RagError;

    /// slug 또는 표시용 이름 (대소문자, 공백/하이픈/밑줄 무시)
    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize_label(s);
        TechniqueCategory::ALL
            .into_iter()
            .find(|c| normalize_label(c.slug()) == wanted)
            .ok_or_else(|| RagError::InvalidArgument(format!("unknown technique category: {s}")))
    }
}

fn normalize_label(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 기법 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueRecord {
    pub name: String,
    pub category: TechniqueCategory,
    #[serde(default)]
    pub sub_category: Option<String>,
    pub description: String,
    #[serde(default)]
    pub how_to_apply: String,
    #[serde(default)]
    pub benefits: String,
    #[serde(default)]
    pub prerequisites: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub related_techniques: Vec<String>,
}

impl TechniqueRecord {
    /// 인덱싱용 문서 텍스트
    pub fn document_text(&self) -> String {
        let mut text = format!(
            "Technique: {}.\nCategory: {}.\nDescription: {}\n",
            self.name, self.category, self.description
        );
        if let Some(ref sub) = self.sub_category {
            text.push_str(&format!("Sub-category: {sub}.\n"));
        }
        for (label, value) in [
            ("How to Apply", &self.how_to_apply),
            ("Benefits", &self.benefits),
            ("Prerequisites", &self.prerequisites),
        ] {
            if !value.trim().is_empty() {
                text.push_str(&format!("{label}: {}\n", value.trim()));
            }
        }
        if !self.examples.is_empty() {
            text.push_str(&format!("Examples: {}.\n", self.examples.join("; ")));
        }
        if !self.related_techniques.is_empty() {
            text.push_str(&format!(
                "Related: {}.\n",
                self.related_techniques.join(", ")
            ));
        }
        text
    }

    fn matches_keyword(&self, keyword: &str) -> bool {
        [
            &self.name,
            &self.description,
            &self.benefits,
            &self.how_to_apply,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(keyword))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KnowledgeBaseFile {
    version: u32,
    techniques: Vec<TechniqueRecord>,
}

// ============================================================================
// KnowledgeBase
// ============================================================================

/// 기법 지식베이스 (읽기 전용)
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    records: Vec<TechniqueRecord>,
}

impl KnowledgeBase {
    /// 레코드 목록으로 생성 (이름 중복 검사)
    pub fn from_records(records: Vec<TechniqueRecord>) -> Result<Self> {
        if records.is_empty() {
            return Err(RagError::EmptyCorpus);
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if record.name.trim().is_empty() {
                return Err(RagError::InvalidConfiguration(
                    "technique name must not be empty".to_string(),
                ));
            }
            if !seen.insert(record.name.to_lowercase()) {
                return Err(RagError::DuplicateTechnique(record.name.clone()));
            }
        }

        Ok(Self { records })
    }

    /// 내장 분류 체계
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_TECHNIQUES)
    }

    /// JSON 문자열에서 로드
    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: KnowledgeBaseFile =
            serde_json::from_str(json).context("Failed to parse knowledge base JSON")?;
        let kb = Self::from_records(file.techniques)?;
        tracing::debug!(techniques = kb.len(), "Knowledge base loaded");
        Ok(kb)
    }

    /// JSON 파일에서 로드
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read knowledge base file {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// 전체 문서 (인덱스 빌드 시 1회 소비)
    pub fn all_documents(&self) -> &[TechniqueRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 이름으로 조회 (대소문자 무시)
    pub fn get(&self, name: &str) -> Option<&TechniqueRecord> {
        let name = name.trim();
        self.records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// 부분 문자열로 가장 먼저 일치하는 기법
    pub fn closest(&self, partial: &str) -> Option<&TechniqueRecord> {
        let partial = partial.trim().to_lowercase();
        if partial.is_empty() {
            return None;
        }
        self.records
            .iter()
            .find(|r| r.name.to_lowercase().contains(&partial))
    }

    /// 카테고리별 목록
    pub fn by_category(&self, category: TechniqueCategory) -> Vec<&TechniqueRecord> {
        self.records
            .iter()
            .filter(|r| r.category == category)
            .collect()
    }

    /// 키워드 검색 (이름, 설명, 효과, 적용 방법)
    pub fn search_keyword(&self, keyword: &str) -> Vec<&TechniqueRecord> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Vec::new();
        }
        self.records
            .iter()
            .filter(|r| r.matches_keyword(&keyword))
            .collect()
    }

    /// 보기 좋게 직렬화된 JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        let file = KnowledgeBaseFile {
            version: 1,
            techniques: self.records.clone(),
        };
        Ok(serde_json::to_string_pretty(&file).context("Failed to serialize knowledge base")?)
    }

    /// 내용 지문 (SHA-256, 저장된 인덱스 최신 여부 확인용)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for record in &self.records {
            hasher.update(record.document_text().as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// Tests
// ============================================================================
