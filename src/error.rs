//! 에러 타입 - 검색 코어의 실패 분류
//!
//! - 설정 오류: `InvalidConfiguration`, `InvalidArgument` (재시도 없음)
//! - 입력 오류: `EmptyInput`, `EmptyCorpus`
//! - 업스트림 오류: `UpstreamUnavailable` (하이브리드 검색은 키워드 검색으로 강등)
//! - 저장소 오류: SQLite / LanceDB / 파일 시스템 (`anyhow::Error` 래핑)

use thiserror::Error;

/// 검색 코어 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 설정 조합 (예: overlap >= max_size)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// 잘못된 호출 인자 (예: top_k = 0, 알 수 없는 전략)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 빈 문서 또는 공백만 있는 입력
    #[error("Empty input: document text is empty or whitespace-only")]
    EmptyInput,

    /// 인덱싱할 청크가 없음
    #[error("Empty corpus: nothing to index")]
    EmptyCorpus,

    /// 임베딩 서비스 호출 실패 또는 타임아웃
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// 인덱스가 아직 빌드되지 않음
    #[error("Index not built: run `prompt-rag index` first")]
    IndexNotBuilt,

    /// 지식베이스에 없는 기법
    #[error("Unknown technique: {0}")]
    UnknownTechnique(String),

    /// 기법 이름 중복 (대소문자 무시)
    #[error("Duplicate technique name: {0}")]
    DuplicateTechnique(String),

    /// 저장소 / 외부 협력자 오류
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RagError {
    /// 설정/인자/입력 오류 여부 (호출자에게 즉시 거부로 보고)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RagError::InvalidConfiguration(_)
                | RagError::InvalidArgument(_)
                | RagError::EmptyInput
                | RagError::EmptyCorpus
        )
    }
}

/// 크레이트 공용 Result
pub type Result<T> = std::result::Result<T, RagError>;
