//! Indexer - 인덱스 빌드 진입점
//!
//! 1. 기법 레코드를 청크로 분할
//! 2. BM25 키워드 인덱스 빌드
//! 3. 청크 임베딩 후 벡터 인덱스에 삽입
//!
//! 빌드는 시작 시 한 번만 실행되고, 결과는 읽기 전용으로 공유됩니다.

use std::sync::Arc;

use chrono::Utc;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

use super::chunker::{Chunk, ChunkConfig, Chunker, StrategyChunker};
use super::hybrid::HybridSearcher;
use super::ranker::KeywordIndex;
use super::store::{IndexMeta, IndexStore};
use super::techniques::{KnowledgeBase, TechniqueRecord};
use super::vector::{VectorEntry, VectorIndex};

/// 문서들을 청크로 분할 (청크 ID = 반환 순서)
pub fn chunk_documents(documents: &[TechniqueRecord], config: &ChunkConfig) -> Result<Vec<Chunk>> {
    let chunker: Box<dyn Chunker> = Box::new(StrategyChunker::new(config.clone())?);

    let mut chunks = Vec::new();
    for record in documents {
        let produced = chunker.chunk(&record.name, &record.document_text())?;
        tracing::debug!(
            technique = %record.name,
            chunker = chunker.name(),
            chunks = produced.len(),
            "Document chunked"
        );
        chunks.extend(produced);
    }

    if chunks.is_empty() {
        return Err(RagError::EmptyCorpus);
    }
    Ok(chunks)
}

/// 청킹 + 키워드 인덱스 + 벡터 인덱스 빌드
///
/// 벡터 인덱스는 비운 뒤 다시 채웁니다.
///
/// # Errors
/// * `InvalidConfiguration` - 청킹 설정 오류, 차원 불일치
/// * `EmptyCorpus` - 문서 없음
/// * `UpstreamUnavailable` - 임베딩 실패 (빌드 시점에는 강등하지 않음)
/// * `Storage` - 벡터 인덱스 쓰기 실패
pub async fn chunk_and_index(
    documents: &[TechniqueRecord],
    config: &ChunkConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
) -> Result<HybridSearcher> {
    if vectors.dimension() != embedder.dimension() {
        return Err(RagError::InvalidConfiguration(format!(
            "vector index dimension {} does not match embedder dimension {}",
            vectors.dimension(),
            embedder.dimension()
        )));
    }

    let chunks = chunk_documents(documents, config)?;
    let keyword = KeywordIndex::build(&chunks)?;

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder
        .embed_batch(&texts)
        .await
        .map_err(|e| RagError::UpstreamUnavailable(format!("{e:#}")))?;

    if embeddings.len() != chunks.len() {
        return Err(RagError::UpstreamUnavailable(format!(
            "embedder returned {} vectors for {} chunks",
            embeddings.len(),
            chunks.len()
        )));
    }

    let entries: Vec<VectorEntry> = embeddings
        .into_iter()
        .enumerate()
        .map(|(chunk_id, embedding)| VectorEntry {
            chunk_id,
            embedding,
        })
        .collect();

    vectors.clear().await?;
    vectors.insert_batch(&entries).await?;

    tracing::info!(
        documents = documents.len(),
        chunks = chunks.len(),
        strategy = %config.strategy,
        embedder = embedder.name(),
        "Index built"
    );

    HybridSearcher::new(chunks, keyword, vectors, embedder)
}

/// 지식베이스 전체를 빌드하고 SQLite에 청크/메타데이터 저장
pub async fn build_and_persist(
    kb: &KnowledgeBase,
    config: &ChunkConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    store: &IndexStore,
) -> Result<(HybridSearcher, IndexMeta)> {
    let searcher = chunk_and_index(kb.all_documents(), config, embedder.clone(), vectors).await?;

    let meta = IndexMeta {
        chunk_config: config.clone(),
        embedding_model: embedder.name().to_string(),
        embedding_dimension: embedder.dimension(),
        kb_fingerprint: kb.fingerprint(),
        chunk_count: searcher.chunks().len(),
        built_at: Utc::now(),
    };
    store.replace_chunks(searcher.chunks(), &meta)?;

    Ok((searcher, meta))
}

/// 저장된 인덱스 다시 열기
///
/// 청크로 키워드 인덱스를 다시 만들고, 벡터 인덱스는 그대로 사용합니다.
///
/// # Errors
/// * `IndexNotBuilt` - 저장된 청크가 없거나 벡터 수가 맞지 않음
/// * `InvalidConfiguration` - 저장 당시와 임베딩 모델 또는 차원이 다름
pub async fn load_persisted(
    store: &IndexStore,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<HybridSearcher> {
    let chunks = store.load_chunks()?;
    if chunks.is_empty() {
        return Err(RagError::IndexNotBuilt);
    }

    if let Some(meta) = store.meta()? {
        if meta.embedding_model != embedder.name()
            || meta.embedding_dimension != embedder.dimension()
        {
            return Err(RagError::InvalidConfiguration(format!(
                "index was built with {}-dimensional '{}' embeddings, current embedder '{}' has {}",
                meta.embedding_dimension,
                meta.embedding_model,
                embedder.name(),
                embedder.dimension()
            )));
        }
    }

    let vector_count = vectors.count().await?;
    if vector_count != chunks.len() {
        tracing::warn!(
            chunks = chunks.len(),
            vectors = vector_count,
            "Vector index out of sync with stored chunks"
        );
        return Err(RagError::IndexNotBuilt);
    }

    let keyword = KeywordIndex::build(&chunks)?;
    tracing::info!(chunks = chunks.len(), "Persisted index loaded");

    HybridSearcher::new(chunks, keyword, vectors, embedder)
}

/// 저장된 인덱스가 현재 지식베이스/임베더와 다르면 그 이유
pub fn staleness(
    meta: &IndexMeta,
    kb: &KnowledgeBase,
    embedder: &dyn EmbeddingProvider,
) -> Option<String> {
    if meta.kb_fingerprint != kb.fingerprint() {
        return Some("knowledge base changed since last build".to_string());
    }
    if meta.embedding_model != embedder.name() || meta.embedding_dimension != embedder.dimension()
    {
        return Some(format!(
            "built with {} ({}d), current embedder is {} ({}d)",
            meta.embedding_model,
            meta.embedding_dimension,
            embedder.name(),
            embedder.dimension()
        ));
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::chunker::ChunkStrategy;
    use crate::knowledge::hybrid::{SearchOptions, SearchStrategy};
    use crate::knowledge::lance::LanceVectorIndex;
    use crate::knowledge::techniques::TechniqueCategory;
    use crate::knowledge::vector::MemoryVectorIndex;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const DIM: usize = 256;

    fn record(name: &str, category: TechniqueCategory, description: &str) -> TechniqueRecord {
        TechniqueRecord {
            name: name.to_string(),
            category,
            sub_category: None,
            description: description.to_string(),
            how_to_apply: String::new(),
            benefits: String::new(),
            prerequisites: String::new(),
            examples: Vec::new(),
            related_techniques: Vec::new(),
        }
    }

    fn fixture_kb() -> KnowledgeBase {
        KnowledgeBase::from_records(vec![
            record(
                "Role Prompting",
                TechniqueCategory::ZeroShot,
                "Assign the model a persona such as a teacher or a lawyer.",
            ),
            record(
                "Chain-of-Thought (CoT) Prompting",
                TechniqueCategory::ThoughtGeneration,
                "Ask the model to reason step by step before answering.",
            ),
            record(
                "Self-Consistency",
                TechniqueCategory::Ensembling,
                "Sample several reasoning paths and take the majority answer.",
            ),
        ])
        .unwrap()
    }

    fn hash_embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashEmbedding::new(DIM).unwrap())
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("connection refused")
        }
        fn dimension(&self) -> usize {
            DIM
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_chunk_documents_assigns_owner() {
        let kb = fixture_kb();
        let chunks = chunk_documents(kb.all_documents(), &ChunkConfig::default()).unwrap();
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0].doc_id, "Role Prompting");
        assert!(chunks.iter().any(|c| c.doc_id == "Self-Consistency"));
    }

    #[test]
    fn test_chunk_documents_rejects_bad_config() {
        let kb = fixture_kb();
        let config = ChunkConfig {
            strategy: ChunkStrategy::SlidingWindow,
            max_size: 50,
            overlap: 50,
        };
        assert!(matches!(
            chunk_documents(kb.all_documents(), &config),
            Err(RagError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            chunk_documents(&[], &ChunkConfig::default()),
            Err(RagError::EmptyCorpus)
        ));
    }

    #[tokio::test]
    async fn test_chunk_and_index_then_search() {
        let kb = fixture_kb();
        let vectors: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIM));
        let searcher = chunk_and_index(
            kb.all_documents(),
            &ChunkConfig::default(),
            hash_embedder(),
            vectors.clone(),
        )
        .await
        .unwrap();

        assert_eq!(vectors.count().await.unwrap(), searcher.chunks().len());

        let response = searcher
            .search("persona teacher", &SearchOptions::new(SearchStrategy::Hybrid, 1))
            .await
            .unwrap();
        let top = searcher.chunk(response.results[0].chunk_id).unwrap();
        assert_eq!(top.doc_id, "Role Prompting");
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_build() {
        let kb = fixture_kb();
        let result = chunk_and_index(
            kb.all_documents(),
            &ChunkConfig::default(),
            Arc::new(BrokenEmbedder),
            Arc::new(MemoryVectorIndex::new(DIM)),
        )
        .await;
        assert!(matches!(result, Err(RagError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let kb = fixture_kb();
        let result = chunk_and_index(
            kb.all_documents(),
            &ChunkConfig::default(),
            hash_embedder(),
            Arc::new(MemoryVectorIndex::new(DIM * 2)),
        )
        .await;
        assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let kb = fixture_kb();
        let store = IndexStore::open(&dir.path().join("index.db")).unwrap();

        let missing: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIM));
        assert!(matches!(
            load_persisted(&store, missing, hash_embedder()).await,
            Err(RagError::IndexNotBuilt)
        ));

        let lance_path = dir.path().join("vectors.lance");
        let (built, meta) = {
            let vectors: Arc<dyn VectorIndex> =
                Arc::new(LanceVectorIndex::open(&lance_path, DIM).await.unwrap());
            build_and_persist(&kb, &ChunkConfig::default(), hash_embedder(), vectors, &store)
                .await
                .unwrap()
        };
        assert_eq!(meta.chunk_count, built.chunks().len());
        assert_eq!(meta.embedding_model, "hash");
        assert!(staleness(&meta, &kb, &HashEmbedding::new(DIM).unwrap()).is_none());

        let vectors: Arc<dyn VectorIndex> =
            Arc::new(LanceVectorIndex::open(&lance_path, DIM).await.unwrap());
        let reloaded = load_persisted(&store, vectors, hash_embedder()).await.unwrap();
        assert_eq!(reloaded.chunks(), built.chunks());

        let opts = SearchOptions::new(SearchStrategy::KeywordOnly, 2);
        let a = built.search("majority reasoning paths", &opts).await.unwrap();
        let b = reloaded.search("majority reasoning paths", &opts).await.unwrap();
        assert_eq!(a.results, b.results);
    }

    #[tokio::test]
    async fn test_reload_with_other_dimension_rejected() {
        let dir = TempDir::new().unwrap();
        let kb = fixture_kb();
        let store = IndexStore::open(&dir.path().join("index.db")).unwrap();
        build_and_persist(
            &kb,
            &ChunkConfig::default(),
            hash_embedder(),
            Arc::new(MemoryVectorIndex::new(DIM)),
            &store,
        )
        .await
        .unwrap();

        let result = load_persisted(
            &store,
            Arc::new(MemoryVectorIndex::new(32)),
            Arc::new(HashEmbedding::new(32).unwrap()),
        )
        .await;
        assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    }

    /// 해시 임베더와 같은 차원이지만 다른 모델 이름
    struct RenamedEmbedder(HashEmbedding);

    #[async_trait]
    impl EmbeddingProvider for RenamedEmbedder {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.0.embed(text).await
        }
        fn dimension(&self) -> usize {
            DIM
        }
        fn name(&self) -> &str {
            "gemini-embedding-001"
        }
    }

    #[tokio::test]
    async fn test_reload_with_other_model_same_dimension_rejected() {
        let dir = TempDir::new().unwrap();
        let kb = fixture_kb();
        let store = IndexStore::open(&dir.path().join("index.db")).unwrap();
        let vectors: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(DIM));
        build_and_persist(
            &kb,
            &ChunkConfig::default(),
            hash_embedder(),
            vectors.clone(),
            &store,
        )
        .await
        .unwrap();

        let renamed: Arc<dyn EmbeddingProvider> =
            Arc::new(RenamedEmbedder(HashEmbedding::new(DIM).unwrap()));
        assert_eq!(renamed.dimension(), DIM);
        let result = load_persisted(&store, vectors.clone(), renamed).await;
        match result {
            Err(RagError::InvalidConfiguration(msg)) => {
                assert!(msg.contains("'hash'"));
                assert!(msg.contains("gemini-embedding-001"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("reload with a different embedder must fail"),
        }

        assert!(load_persisted(&store, vectors, hash_embedder()).await.is_ok());
    }

    #[test]
    fn test_staleness_detects_changes() {
        let kb = fixture_kb();
        let meta = IndexMeta {
            chunk_config: ChunkConfig::default(),
            embedding_model: "hash".to_string(),
            embedding_dimension: DIM,
            kb_fingerprint: "outdated".to_string(),
            chunk_count: 3,
            built_at: Utc::now(),
        };
        let embedder = HashEmbedding::new(DIM).unwrap();
        assert!(staleness(&meta, &kb, &embedder).is_some());

        let fresh = IndexMeta {
            kb_fingerprint: kb.fingerprint(),
            ..meta
        };
        assert!(staleness(&fresh, &kb, &embedder).is_none());
        assert!(staleness(&fresh, &kb, &HashEmbedding::new(DIM * 2).unwrap()).is_some());
    }
}
