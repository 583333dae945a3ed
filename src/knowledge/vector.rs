//! Vector Index - 벡터 검색 트레이트 및 메모리 구현
//!
//! 청크 ID를 키로 임베딩을 보관하고, 질의 벡터와 가까운 순서로 반환합니다.
//! 빌드 시점에만 쓰고 질의 시점에는 읽기만 합니다.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (청크 하나당 하나)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// 청크 ID (코퍼스 내 삽입 순서)
    pub chunk_id: usize,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 벡터 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// 청크 ID
    pub chunk_id: usize,
    /// 유사도 스코어 (클수록 가까움)
    pub similarity: f32,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// VectorIndex 트레이트 (async)
///
/// 최근접 이웃 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 벡터 배치 삽입 (빌드 시점 전용)
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize>;

    /// 단일 벡터 삽입
    async fn add(&self, chunk_id: usize, embedding: Vec<f32>) -> Result<()> {
        self.insert_batch(&[VectorEntry {
            chunk_id,
            embedding,
        }])
        .await?;
        Ok(())
    }

    /// 유사도 내림차순 상위 `top_n`
    async fn query(&self, query_embedding: &[f32], top_n: usize) -> Result<Vec<VectorMatch>>;

    /// 벡터 개수
    async fn count(&self) -> Result<usize>;

    /// 전체 삭제 (재빌드 전)
    async fn clear(&self) -> Result<()>;

    /// 벡터 차원
    fn dimension(&self) -> usize;
}

// ============================================================================
// MemoryVectorIndex
// ============================================================================

/// 메모리 내 전수 탐색 인덱스 (코사인 유사도)
///
/// 기법 지식베이스 규모(수백 청크)에서는 ANN 없이도 충분히 빠릅니다.
#[derive(Debug)]
pub struct MemoryVectorIndex {
    dimension: usize,
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            bail!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.chunk_id,
                self.dimension,
                bad.embedding.len()
            );
        }

        let mut stored = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // 하나라도 중복이면 아무것도 넣지 않음
        let mut seen: HashSet<usize> = stored.iter().map(|s| s.chunk_id).collect();
        if let Some(dup) = entries.iter().find(|e| !seen.insert(e.chunk_id)) {
            bail!("Chunk {} already has an embedding", dup.chunk_id);
        }

        stored.extend_from_slice(entries);

        Ok(entries.len())
    }

    async fn query(&self, query_embedding: &[f32], top_n: usize) -> Result<Vec<VectorMatch>> {
        if query_embedding.len() != self.dimension {
            bail!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query_embedding.len()
            );
        }

        let stored = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut matches: Vec<VectorMatch> = stored
            .iter()
            .map(|e| VectorMatch {
                chunk_id: e.chunk_id,
                similarity: cosine_similarity(query_embedding, &e.embedding),
            })
            .collect();

        // 동점이면 삽입 순서 유지 (stable sort)
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_n);

        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        let stored = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(stored.len())
    }

    async fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .clear();
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// L2 정규화 (영벡터는 그대로)
pub fn normalize_l2(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.0001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_normalize_l2() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize_l2(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_memory_index_query_order() {
        let index = MemoryVectorIndex::new(2);
        index.add(0, vec![1.0, 0.0]).await.unwrap();
        index.add(1, vec![0.0, 1.0]).await.unwrap();
        index.add(2, vec![0.7, 0.7]).await.unwrap();

        let results = index.query(&[1.0, 0.1], 3).await.unwrap();
        let ids: Vec<usize> = results.iter().map(|m| m.chunk_id).collect();
        assert_eq!(ids, vec![0, 2, 1]);
        assert_eq!(index.count().await.unwrap(), 3);

        let top1 = index.query(&[1.0, 0.1], 1).await.unwrap();
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_index_ties_keep_insertion_order() {
        let index = MemoryVectorIndex::new(2);
        for id in [5, 3, 9] {
            index.add(id, vec![1.0, 1.0]).await.unwrap();
        }
        let ids: Vec<usize> = index
            .query(&[1.0, 1.0], 3)
            .await
            .unwrap()
            .iter()
            .map(|m| m.chunk_id)
            .collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[tokio::test]
    async fn test_memory_index_rejects_bad_dimension_and_duplicates() {
        let index = MemoryVectorIndex::new(3);
        assert!(index.add(0, vec![1.0, 0.0]).await.is_err());
        assert!(index.query(&[1.0], 1).await.is_err());

        index.add(0, vec![1.0, 0.0, 0.0]).await.unwrap();
        assert!(index.add(0, vec![0.0, 1.0, 0.0]).await.is_err());
    }

    fn entry(chunk_id: usize, value: f32) -> VectorEntry {
        VectorEntry {
            chunk_id,
            embedding: vec![value],
        }
    }

    #[tokio::test]
    async fn test_memory_index_duplicate_batch_inserts_nothing() {
        let index = MemoryVectorIndex::new(1);
        index.add(3, vec![1.0]).await.unwrap();

        let clashes_with_stored = [
            entry(0, 1.0),
            entry(3, 1.0),
        ];
        assert!(index.insert_batch(&clashes_with_stored).await.is_err());
        assert_eq!(index.count().await.unwrap(), 1);

        let repeats_itself = [
            entry(1, 1.0),
            entry(2, 1.0),
            entry(1, 0.5),
        ];
        assert!(index.insert_batch(&repeats_itself).await.is_err());
        assert_eq!(index.count().await.unwrap(), 1);

        assert_eq!(index.insert_batch(&repeats_itself[..2]).await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_memory_index_clear() {
        let index = MemoryVectorIndex::new(1);
        index.add(0, vec![1.0]).await.unwrap();
        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.query(&[1.0], 5).await.unwrap().is_empty());
    }
}
