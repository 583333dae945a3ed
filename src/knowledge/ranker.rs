//! Keyword Ranker - BM25 키워드 관련도 점수
//!
//! 임베딩과 무관하게 용어 빈도 통계로 질의-청크 관련도를 계산합니다.
//! 인덱스는 빌드 후 불변이며, 여러 호출자가 잠금 없이 공유할 수 있습니다.
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25
//!
//! score(D, Q) = Σ IDF(q) · tf(q, D) · (k1 + 1) / (tf(q, D) + k1 · (1 - b + b · |D| / avgdl))
//! IDF(q) = ln(1 + (N - n(q) + 0.5) / (n(q) + 0.5))  (항상 양수)

use std::collections::HashMap;

use crate::error::{RagError, Result};

use super::chunker::Chunk;

/// 용어 빈도 포화 계수
pub const DEFAULT_K1: f32 = 1.5;
/// 문서 길이 정규화 계수
pub const DEFAULT_B: f32 = 0.75;

/// 영어 불용어 (선택적으로 제거)
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "do", "does", "for",
    "from", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of",
    "on", "or", "our", "so", "such", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "was", "we", "were", "what", "when", "which", "while", "who",
    "will", "with", "you", "your",
];

// ============================================================================
// Tokenizer
// ============================================================================

/// 토크나이저 (빌드 시점과 질의 시점에 동일하게 적용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tokenizer {
    /// 불용어 제거 여부
    pub remove_stop_words: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            remove_stop_words: true,
        }
    }
}

impl Tokenizer {
    /// 소문자화 후 공백/구두점으로 분리
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| !(self.remove_stop_words && STOP_WORDS.contains(&t.as_str())))
            .collect()
    }
}

// ============================================================================
// KeywordIndex
// ============================================================================

/// 청크별 용어 통계 (Keyword Posting)
#[derive(Debug, Clone)]
struct Posting {
    term_freqs: HashMap<String, u32>,
    length: u32,
}

/// BM25 키워드 인덱스 (불변)
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    tokenizer: Tokenizer,
    postings: Vec<Posting>,
    doc_freqs: HashMap<String, u32>,
    avg_len: f32,
    k1: f32,
    b: f32,
}

impl KeywordIndex {
    /// 기본 파라미터로 인덱스 빌드
    ///
    /// # Errors
    /// * `EmptyCorpus` - 청크가 없음
    pub fn build(chunks: &[Chunk]) -> Result<Self> {
        Self::build_with(chunks, Tokenizer::default(), DEFAULT_K1, DEFAULT_B)
    }

    /// 토크나이저와 BM25 파라미터 지정
    pub fn build_with(chunks: &[Chunk], tokenizer: Tokenizer, k1: f32, b: f32) -> Result<Self> {
        if chunks.is_empty() {
            return Err(RagError::EmptyCorpus);
        }
        if !(k1 >= 0.0 && (0.0..=1.0).contains(&b)) {
            return Err(RagError::InvalidConfiguration(format!(
                "BM25 parameters out of range: k1={k1}, b={b}"
            )));
        }

        let mut doc_freqs: HashMap<String, u32> = HashMap::new();
        let mut postings = Vec::with_capacity(chunks.len());
        let mut total_len: u64 = 0;

        for chunk in chunks {
            let tokens = tokenizer.tokenize(&chunk.text);
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens.iter() {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }

            total_len += tokens.len() as u64;
            postings.push(Posting {
                term_freqs,
                length: tokens.len() as u32,
            });
        }

        let avg_len = total_len as f32 / postings.len() as f32;

        tracing::debug!(
            chunks = postings.len(),
            vocabulary = doc_freqs.len(),
            avg_len,
            "Keyword index built"
        );

        Ok(Self {
            tokenizer,
            postings,
            doc_freqs,
            avg_len,
            k1,
            b,
        })
    }

    /// 인덱스된 청크 수
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// 어휘 크기
    pub fn vocabulary_size(&self) -> usize {
        self.doc_freqs.len()
    }

    pub fn tokenizer(&self) -> Tokenizer {
        self.tokenizer
    }

    fn idf(&self, doc_freq: u32) -> f32 {
        let n = self.postings.len() as f32;
        let df = doc_freq as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// 질의 점수 계산 후 상위 `top_k` 반환
    ///
    /// 점수 내림차순, 동점이면 삽입 순서(청크 위치) 오름차순.
    /// 질의 용어가 코퍼스 어디에도 없으면 빈 목록을 반환합니다.
    /// 하나라도 일치하면 점수 0인 청크도 삽입 순서대로 채워집니다.
    ///
    /// # Returns
    /// `(청크 위치, 점수)` 목록
    pub fn score(&self, query: &str, top_k: usize) -> Result<Vec<(usize, f32)>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument(
                "top_k must be a positive integer".to_string(),
            ));
        }

        let terms: Vec<(String, f32)> = self
            .tokenizer
            .tokenize(query)
            .into_iter()
            .filter_map(|term| {
                let df = *self.doc_freqs.get(&term)?;
                let idf = self.idf(df);
                Some((term, idf))
            })
            .collect();

        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };

        let mut scored: Vec<(usize, f32)> = self
            .postings
            .iter()
            .enumerate()
            .map(|(pos, posting)| {
                let norm = self.k1 * (1.0 - self.b + self.b * posting.length as f32 / avg_len);
                let score = terms
                    .iter()
                    .map(|(term, idf)| {
                        let tf = posting.term_freqs.get(term).copied().unwrap_or(0) as f32;
                        idf * tf * (self.k1 + 1.0) / (tf + norm)
                    })
                    .sum::<f32>();
                (pos, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        Ok(scored)
    }
}

// ============================================================================
// Tests
// ============================================================================
