//! prompt-rag - 프롬프트 기법 하이브리드 RAG
//!
//! 프롬프트 기법 분류 체계를 청크로 나눠 벡터 검색(LanceDB)과
//! BM25 키워드 검색을 가중합으로 결합하고, 선택된 기법으로
//! 사용자 프롬프트를 개선합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod enhance;
pub mod error;
pub mod knowledge;

// Re-exports
pub use config::RagConfig;
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding, HashEmbedding,
    UnavailableEmbedding,
};
pub use enhance::{EnhancementOutcome, EnhancementReport, GenerativeModel, PromptPipeline};
pub use error::{RagError, Result};
pub use knowledge::{
    chunk, chunk_and_index, Chunk, ChunkConfig, ChunkStrategy, HybridSearcher, KeywordIndex,
    KnowledgeBase, SearchOptions, SearchResponse, SearchResult, SearchStrategy, TechniqueRecord,
    VectorIndex,
};
