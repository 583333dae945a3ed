//! Text Chunking Module
//!
//! 문서를 인덱싱 단위(청크)로 분할합니다. 네 가지 전략을 지원합니다:
//! - `simple`: 고정 크기 문자 윈도우 (경계 무시, 오버랩 없음)
//! - `sentence`: 문장 경계로 분할 후 `max_size`개 문장씩 묶음
//! - `sliding-window`: 고정 크기 문자 윈도우 + `overlap` 문자 중첩
//! - `semantic`: 문장 경계로 분할 후 추정 토큰 수가 `max_size` 이하가 되도록 묶음 (기본값)
//!
//! 모든 전략은 입력의 모든 문자를 최소 한 청크에 포함합니다.
//! 위치(`start`, `end`)는 바이트가 아닌 문자(char) 단위입니다.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// 토큰 추정용 평균 문자 수
const CHARS_PER_TOKEN: usize = 4;

/// 문장 종결 후보: 종결 부호 + 닫는 따옴표/괄호 + 공백, CJK 종결 부호, 빈 줄(문단 경계)
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[.!?]+["'”’)\]]*\s+)|(?:[。！？]+["'”’」』)\]]*\s*)|(?:\n[ \t]*\n\s*)"#)
        .expect("sentence boundary regex is valid")
});

/// 마침표가 문장 끝이 아닌 약어
const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "etc", "vs", "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "fig", "al",
    "no", "vol", "cf", "approx", "u.s", "u.k",
];

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    Simple,
    Sentence,
    SlidingWindow,
    #[default]
    Semantic,
}

impl ChunkStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStrategy::Simple => "simple",
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::SlidingWindow => "sliding-window",
            ChunkStrategy::Semantic => "semantic",
        }
    }

    /// `max_size` 단위
    pub fn size_unit(self) -> &'static str {
        match self {
            ChunkStrategy::Simple | ChunkStrategy::SlidingWindow => "characters",
            ChunkStrategy::Sentence => "sentences",
            ChunkStrategy::Semantic => "tokens",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "simple" => Ok(ChunkStrategy::Simple),
            "sentence" => Ok(ChunkStrategy::Sentence),
            "sliding-window" | "sliding" => Ok(ChunkStrategy::SlidingWindow),
            "semantic" => Ok(ChunkStrategy::Semantic),
            other => Err(RagError::InvalidConfiguration(format!(
                "unknown chunk strategy: {other} (expected simple, sentence, sliding-window, semantic)"
            ))),
        }
    }
}

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// 분할 전략
    pub strategy: ChunkStrategy,
    /// 최대 크기 (단위는 전략에 따름: 문자 / 문장 수 / 토큰 수)
    pub max_size: usize,
    /// 오버랩 문자 수 (sliding-window 전용, `max_size` 미만)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Semantic,
            max_size: 128,
            overlap: 0,
        }
    }
}

impl ChunkConfig {
    pub fn new(strategy: ChunkStrategy, max_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            strategy,
            max_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// RAG 최적화된 설정 (문맥 보존용 중첩 윈도우)
    pub fn for_rag() -> Self {
        Self {
            strategy: ChunkStrategy::SlidingWindow,
            max_size: 512,
            overlap: 64,
        }
    }

    /// 빠른 인덱싱용 설정 (오버랩 없음)
    pub fn for_fast() -> Self {
        Self {
            strategy: ChunkStrategy::Simple,
            max_size: 1000,
            overlap: 0,
        }
    }

    /// 이름으로 프리셋 선택 (`rag`, `fast`, `default`)
    pub fn preset(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "rag" => Ok(Self::for_rag()),
            "fast" => Ok(Self::for_fast()),
            "default" => Ok(Self::default()),
            other => Err(RagError::InvalidConfiguration(format!(
                "unknown chunk preset: {other} (expected rag, fast, default)"
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "max_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.max_size {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than max_size ({})",
                self.overlap, self.max_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 문서에서 잘라낸 연속 텍스트 구간
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 소유 문서 ID (기법 이름)
    pub doc_id: String,
    /// 문서 내 순번 (0-based)
    pub ordinal: usize,
    /// 원문 텍스트
    pub text: String,
    /// 시작 위치 (문자 단위, 포함)
    pub start: usize,
    /// 끝 위치 (문자 단위, 미포함)
    pub end: usize,
    /// 추정 토큰 수
    pub token_count: usize,
    /// 이전 청크와 겹치는지 여부
    pub overlaps_previous: bool,
}

impl Chunk {
    /// 사람이 읽을 수 있는 키 (`doc#ordinal`)
    pub fn key(&self) -> String {
        format!("{}#{}", self.doc_id, self.ordinal)
    }

    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// 토큰 수 추정 (문자 4개 ≈ 토큰 1개)
pub fn estimate_tokens(text: &str) -> usize {
    text.trim().chars().count().div_ceil(CHARS_PER_TOKEN)
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 문서를 청크로 분할
    fn chunk(&self, doc_id: &str, text: &str) -> Result<Vec<Chunk>>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

/// 설정된 전략으로 분할하는 청커
#[derive(Debug, Clone)]
pub struct StrategyChunker {
    config: ChunkConfig,
}

impl StrategyChunker {
    /// 설정으로 생성 (검증 포함)
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl Chunker for StrategyChunker {
    fn chunk(&self, doc_id: &str, text: &str) -> Result<Vec<Chunk>> {
        chunk(
            doc_id,
            text,
            self.config.strategy,
            self.config.max_size,
            self.config.overlap,
        )
    }

    fn name(&self) -> &'static str {
        self.config.strategy.as_str()
    }
}

// ============================================================================
// Chunking
// ============================================================================

/// 문서를 전략에 따라 청크로 분할
///
/// # Errors
/// * `InvalidConfiguration` - `max_size == 0` 또는 `overlap >= max_size`
/// * `EmptyInput` - 빈 문서 또는 공백만 있는 문서
pub fn chunk(
    doc_id: &str,
    text: &str,
    strategy: ChunkStrategy,
    max_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    ChunkConfig {
        strategy,
        max_size,
        overlap,
    }
    .validate()?;

    if text.trim().is_empty() {
        return Err(RagError::EmptyInput);
    }

    let map = CharMap::new(text);
    let spans = match strategy {
        ChunkStrategy::Simple => window_spans(map.char_len(), max_size, 0),
        ChunkStrategy::SlidingWindow => window_spans(map.char_len(), max_size, overlap),
        ChunkStrategy::Sentence => {
            let sentences = map.sentence_spans();
            group_by_count(&sentences, max_size)
        }
        ChunkStrategy::Semantic => {
            let sentences = map.sentence_spans();
            group_by_tokens(&map, &sentences, max_size)
        }
    };

    let chunks: Vec<Chunk> = spans
        .into_iter()
        .enumerate()
        .map(|(ordinal, span)| {
            let text = map.slice(span.clone()).to_string();
            Chunk {
                doc_id: doc_id.to_string(),
                ordinal,
                token_count: estimate_tokens(&text),
                text,
                overlaps_previous: strategy == ChunkStrategy::SlidingWindow
                    && ordinal > 0
                    && overlap > 0,
                start: span.start,
                end: span.end,
            }
        })
        .collect();

    tracing::debug!(
        doc_id,
        strategy = %strategy,
        chunks = chunks.len(),
        "Document chunked"
    );

    Ok(chunks)
}

/// 고정 크기 윈도우 (step = max_size - overlap)
fn window_spans(len: usize, max_size: usize, overlap: usize) -> Vec<Range<usize>> {
    let step = max_size - overlap;
    let mut spans = Vec::with_capacity(len / step + 1);
    let mut start = 0;

    loop {
        let end = (start + max_size).min(len);
        spans.push(start..end);
        if end >= len {
            break;
        }
        start += step;
    }

    spans
}

/// 연속된 문장을 `per_chunk`개씩 묶음
fn group_by_count(sentences: &[Range<usize>], per_chunk: usize) -> Vec<Range<usize>> {
    sentences
        .chunks(per_chunk)
        .filter_map(|group| Some(group.first()?.start..group.last()?.end))
        .collect()
}

/// 추정 토큰 수가 `max_tokens` 이하로 유지되는 동안 문장을 누적
///
/// 경계는 문장 경계에만 놓입니다. 단일 문장이 예산을 넘으면 그 문장만으로 청크가 됩니다.
fn group_by_tokens(
    map: &CharMap<'_>,
    sentences: &[Range<usize>],
    max_tokens: usize,
) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for sentence in sentences {
        current = match current {
            None => Some(sentence.clone()),
            Some(open) => {
                let candidate = open.start..sentence.end;
                if estimate_tokens(map.slice(candidate.clone())) <= max_tokens {
                    Some(candidate)
                } else {
                    spans.push(open);
                    Some(sentence.clone())
                }
            }
        };
    }

    if let Some(open) = current {
        spans.push(open);
    }

    spans
}

// ============================================================================
// Sentence Splitting
// ============================================================================

/// 문자 위치 <-> 바이트 위치 변환
struct CharMap<'a> {
    text: &'a str,
    /// offsets[i] = i번째 문자의 바이트 위치, 마지막 원소 = text.len()
    offsets: Vec<usize>,
}

impl<'a> CharMap<'a> {
    fn new(text: &'a str) -> Self {
        let offsets = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        Self { text, offsets }
    }

    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// 문자 구간 -> 문자열 슬라이스
    fn slice(&self, span: Range<usize>) -> &'a str {
        &self.text[self.offsets[span.start]..self.offsets[span.end]]
    }

    /// 바이트 위치 -> 문자 위치 (항상 문자 경계에서 호출)
    fn char_at(&self, byte: usize) -> usize {
        self.offsets.partition_point(|&b| b < byte)
    }

    /// 문장 구간 (문자 단위, 빈틈 없이 전체 텍스트를 덮음)
    fn sentence_spans(&self) -> Vec<Range<usize>> {
        split_sentences(self.text)
            .into_iter()
            .map(|r| self.char_at(r.start)..self.char_at(r.end))
            .collect()
    }
}

/// 문장 경계 분할 (바이트 구간)
///
/// 종결 부호 뒤의 공백은 앞 문장에 붙습니다. 결과 구간을 이어 붙이면 원문이 됩니다.
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END.find_iter(text) {
        let boundary = m.end();
        if boundary <= start || boundary >= text.len() {
            continue;
        }
        if m.as_str().starts_with('.') && is_abbreviation(&text[start..m.start()]) {
            continue;
        }
        spans.push(start..boundary);
        start = boundary;
    }

    if start < text.len() {
        spans.push(start..text.len());
    }

    spans
}

/// 마침표 직전 단어가 약어 또는 이니셜인지
fn is_abbreviation(before: &str) -> bool {
    let word = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("")
        .trim_start_matches(|c: char| !c.is_alphanumeric());

    if word.is_empty() {
        return false;
    }

    let mut chars = word.chars();
    if let (Some(first), None) = (chars.next(), chars.next()) {
        return first.is_uppercase();
    }

    let lower = word.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

// ============================================================================
// Tests
// ============================================================================
