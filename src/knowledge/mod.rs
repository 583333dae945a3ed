//! Knowledge 모듈 - 기법 지식베이스 + 하이브리드 검색 코어
//!
//! - Techniques: 프롬프트 기법 분류 체계 (읽기 전용)
//! - Chunker: 문서 분할 (simple / sentence / sliding-window / semantic)
//! - Ranker: BM25 키워드 점수
//! - Vector: 벡터 인덱스 (메모리, LanceDB)
//! - Hybrid: min-max 정규화 + 가중합 통합
//! - Store: SQLite 청크/메타데이터 저장

mod chunker;
mod hybrid;
mod indexer;
mod lance;
mod ranker;
mod store;
mod techniques;
mod vector;

// Re-exports
pub use chunker::{
    chunk, estimate_tokens, split_sentences, Chunk, ChunkConfig, ChunkStrategy, Chunker,
    StrategyChunker,
};
pub use hybrid::{
    min_max_normalize, HybridSearcher, SearchOptions, SearchResponse, SearchResult,
    SearchStrategy, DEFAULT_EMBED_TIMEOUT, DEFAULT_OVER_FETCH,
};
pub use indexer::{build_and_persist, chunk_and_index, chunk_documents, load_persisted, staleness};
pub use lance::LanceVectorIndex;
pub use ranker::{KeywordIndex, Tokenizer, DEFAULT_B, DEFAULT_K1};
pub use store::{IndexMeta, IndexStore, StoreStats};
pub use techniques::{KnowledgeBase, TechniqueCategory, TechniqueRecord, DEFAULT_TECHNIQUE};
pub use vector::{
    cosine_similarity, normalize_l2, MemoryVectorIndex, VectorEntry, VectorIndex, VectorMatch,
};
