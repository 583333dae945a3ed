//! 오프라인 임베딩 - feature hashing
//!
//! 토큰을 SHA-256 해시로 버킷에 배정하고(부호도 해시에서 결정) L2 정규화합니다.
//! 같은 입력은 언제나 같은 벡터가 되므로 저장된 인덱스와 질의가 호환됩니다.
//!
//! ref: https://en.wikipedia.org/wiki/Feature_hashing

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::knowledge::{normalize_l2, Tokenizer};

use super::EmbeddingProvider;

/// Feature hashing 임베더
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
    tokenizer: Tokenizer,
}

impl HashEmbedding {
    /// 저장된 인덱스 메타데이터에 기록되는 이름
    pub const NAME: &'static str = "hash";

    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Hash embedding dimension must be positive");
        }
        Ok(Self {
            dimension,
            tokenizer: Tokenizer::default(),
        })
    }

    /// (버킷, 부호)
    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);

        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        let tokens = self.tokenizer.tokenize(text);

        for token in &tokens {
            let (bucket, sign) = self.bucket(token);
            vector[bucket] += sign;
        }
        // 인접 토큰 쌍은 절반 가중치
        for pair in tokens.windows(2) {
            let (bucket, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[bucket] += 0.5 * sign;
        }

        normalize_l2(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = HashEmbedding::new(256).unwrap();
        let a = embedder.embed("chain of thought reasoning").await.unwrap();
        let b = embedder.embed("chain of thought reasoning").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let embedder = HashEmbedding::new(512).unwrap();
        let query = embedder.embed("step by step reasoning").await.unwrap();
        let related = embedder.embed("reasoning step by step for math").await.unwrap();
        let unrelated = embedder.embed("violin orchestra concert").await.unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedding::new(8).unwrap();
        assert_eq!(embedder.embed("").await.unwrap(), vec![0.0; 8]);
        let batch = embedder
            .embed_batch(&["a b".to_string(), String::new()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], vec![0.0; 8]);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashEmbedding::new(0).is_err());
    }
}
