//! LanceDB Vector Index - 디스크에 영속되는 벡터 인덱스
//!
//! 인덱스 빌드 시 청크 임베딩을 저장하고, 프로세스 시작 시 다시 엽니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::vector::{VectorEntry, VectorIndex, VectorMatch};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunk_vectors";

// ============================================================================
// LanceVectorIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
pub struct LanceVectorIndex {
    db: Connection,
    dimension: usize,
}

impl LanceVectorIndex {
    /// LanceDB 인덱스 열기 (없으면 첫 삽입 시 생성)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db, dimension })
    }

    fn list_size(&self) -> Result<i32> {
        i32::try_from(self.dimension).context("Embedding dimension too large")
    }

    /// 벡터 테이블 스키마
    fn schema(&self) -> Result<Schema> {
        Ok(Schema::new(vec![
            Field::new("chunk_id", DataType::Int64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.list_size()?,
                ),
                false,
            ),
        ]))
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[VectorEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                bad.chunk_id,
                self.dimension,
                bad.embedding.len()
            );
        }

        let chunk_ids = entries
            .iter()
            .map(|e| i64::try_from(e.chunk_id).context("Chunk id out of range"))
            .collect::<Result<Vec<i64>>>()?;

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.list_size()?,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.schema()?),
            vec![
                Arc::new(Int64Array::from(chunk_ids)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open vector table")
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn insert_batch(&self, entries: &[VectorEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            self.open_table()
                .await?
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create vector table")?;
        }

        tracing::debug!(count = entries.len(), "Vectors inserted into LanceDB");
        Ok(entries.len())
    }

    async fn query(&self, query_embedding: &[f32], top_n: usize) -> Result<Vec<VectorMatch>> {
        if query_embedding.len() != self.dimension {
            anyhow::bail!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query_embedding.len()
            );
        }
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;

        let results = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(top_n)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;
        let mut matches = Vec::new();

        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가, L2)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let chunk_id = usize::try_from(chunk_ids.value(i))
                    .context("Negative chunk id in vector table")?;
                matches.push(VectorMatch {
                    chunk_id,
                    // 거리를 유사도로 변환 (L2 거리 -> (0, 1])
                    similarity: 1.0 / (1.0 + distances.value(i)),
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(top_n);

        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let count = self
            .open_table()
            .await?
            .count_rows(None)
            .await
            .context("Failed to count rows")?;
        Ok(count)
    }

    async fn clear(&self) -> Result<()> {
        if !self.table_exists().await {
            return Ok(());
        }

        // 테이블째 삭제 (다음 빌드는 다른 차원일 수 있음)
        self.db
            .drop_table(TABLE_NAME)
            .await
            .context("Failed to drop vector table")?;
        tracing::debug!("Dropped vector table {}", TABLE_NAME);
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn entry(chunk_id: usize, hot: usize) -> VectorEntry {
        let mut embedding = vec![0.0; DIM];
        embedding[hot % DIM] = 1.0;
        VectorEntry {
            chunk_id,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_lance_index_basic() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("test.lance"), DIM)
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.query(&vec![0.0; DIM], 3).await.unwrap().is_empty());

        let inserted = index
            .insert_batch(&[entry(0, 0), entry(1, 1)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        index.add(2, entry(2, 2).embedding).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lance_query_nearest_first() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("q.lance"), DIM)
            .await
            .unwrap();
        index
            .insert_batch(&[entry(0, 0), entry(1, 1), entry(2, 2)])
            .await
            .unwrap();

        let results = index.query(&entry(9, 1).embedding, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, 1);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[tokio::test]
    async fn test_lance_reopen_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("persist.lance");
        {
            let index = LanceVectorIndex::open(&path, DIM).await.unwrap();
            index.insert_batch(&[entry(0, 0), entry(1, 3)]).await.unwrap();
        }

        let reopened = LanceVectorIndex::open(&path, DIM).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);

        reopened.clear().await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 0);
        reopened.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_lance_clear_allows_other_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("resize.lance");
        {
            let index = LanceVectorIndex::open(&path, DIM).await.unwrap();
            index.insert_batch(&[entry(0, 0), entry(1, 1)]).await.unwrap();
            index.clear().await.unwrap();
        }

        let wider = LanceVectorIndex::open(&path, DIM * 2).await.unwrap();
        assert_eq!(wider.count().await.unwrap(), 0);
        wider.add(0, vec![0.5; DIM * 2]).await.unwrap();
        assert_eq!(wider.count().await.unwrap(), 1);

        let results = wider.query(&[0.5; DIM * 2], 1).await.unwrap();
        assert_eq!(results[0].chunk_id, 0);
    }

    #[tokio::test]
    async fn test_lance_rejects_wrong_dimension() {
        let temp_dir = TempDir::new().unwrap();
        let index = LanceVectorIndex::open(&temp_dir.path().join("dim.lance"), DIM)
            .await
            .unwrap();
        assert!(index.add(0, vec![1.0; DIM + 1]).await.is_err());
        assert!(index.query(&[1.0; 2], 1).await.is_err());
    }
}
