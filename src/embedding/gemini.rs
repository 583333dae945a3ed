//! Gemini REST 클라이언트 - 임베딩 + 공용 전송 계층
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings
//!
//! `GeminiTransport`는 레이트 리미터와 재시도(429/전송 오류 시 지수 백오프)를
//! 묶은 POST 헬퍼이며, 생성 모델(`enhance::GeminiGenerator`)도 같이 씁니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EmbeddingConfig;

use super::{EmbeddingProvider, DEFAULT_DIMENSION, SUPPORTED_DIMENSIONS};

/// Gemini API 기본 주소
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 기본 임베딩 모델 (MRL 지원)
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// batchEmbedContents 요청당 최대 텍스트 수
const MAX_BATCH_SIZE: usize = 100;

// ============================================================================
// Retry / Rate Limit
// ============================================================================

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 429/전송 오류 시 최대 재시도 횟수
    pub max_retries: u32,
    /// 첫 백오프 (시도마다 2배)
    pub initial_backoff: Duration,
    /// 호출 간 최소 딜레이 (버스트 방지)
    pub min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(2000),
            min_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// GeminiTransport
// ============================================================================

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

/// 레이트 리미트 + 재시도가 적용된 Gemini POST 클라이언트
#[derive(Debug, Clone)]
pub(crate) struct GeminiTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiTransport {
    pub(crate) fn new(api_key: String, base_url: &str, retry: RetryPolicy) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Gemini API key is empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                retry.min_delay,
            ))),
        })
    }

    /// `{base_url}/{path}`로 JSON POST
    ///
    /// 429와 전송 오류는 지수 백오프로 재시도하고, 그 외 실패는 즉시 반환합니다.
    pub(crate) async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=self.retry.max_retries {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send request to {}: {}", path, e));
                    if attempt < self.retry.max_retries {
                        let backoff = self.retry.backoff(attempt);
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            self.retry.max_retries
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let text = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                return serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse response from {}", path));
            }

            if status.as_u16() == 429 {
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < self.retry.max_retries {
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }

            if let Ok(error) = serde_json::from_str::<GeminiErrorBody>(&text) {
                anyhow::bail!(
                    "Gemini API error ({} {}): {}",
                    status.as_u16(),
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, text);
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Request failed after {} retries", self.retry.max_retries)
        }))
    }
}

// ============================================================================
// Request / Response
// ============================================================================

/// 임베딩 용도 (Gemini taskType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Google Gemini 임베딩 구현체
#[derive(Debug, Clone)]
pub struct GeminiEmbedding {
    transport: GeminiTransport,
    model: String,
    dimension: usize,
}

impl GeminiEmbedding {
    /// 기본 모델/차원으로 생성
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        Self::build(
            api_key,
            DEFAULT_EMBEDDING_MODEL,
            dimension,
            DEFAULT_BASE_URL,
            RetryPolicy::default(),
        )
    }

    /// 설정에서 생성
    pub fn from_config(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        Self::build(
            api_key,
            &config.model,
            config.dimension,
            &config.base_url,
            RetryPolicy::default(),
        )
    }

    /// 모든 항목 지정 (테스트에서 mock 서버 주소와 짧은 백오프 사용)
    pub fn build(
        api_key: String,
        model: &str,
        dimension: usize,
        base_url: &str,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        Ok(Self {
            transport: GeminiTransport::new(api_key, base_url, retry)?,
            model: model.trim_start_matches("models/").to_string(),
            dimension,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(super::get_api_key()?)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, text: &str, task_type: TaskType) -> EmbedRequest {
        EmbedRequest {
            model: format!("models/{}", self.model),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type,
            output_dimensionality: Some(self.dimension),
        }
    }

    fn check_dimension(&self, values: &[f32]) -> Result<()> {
        if values.len() != self.dimension {
            anyhow::bail!(
                "Gemini returned {} dimensions, expected {}",
                values.len(),
                self.dimension
            );
        }
        Ok(())
    }

    async fn embed_one(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>> {
        // 빈 텍스트는 API 호출 없이 영벡터
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let path = format!("models/{}:embedContent", self.model);
        let response: EmbedResponse = self
            .transport
            .post_json(&path, &self.request(text, task_type))
            .await?;

        self.check_dimension(&response.embedding.values)?;
        Ok(response.embedding.values)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_one(query, TaskType::RetrievalQuery).await
    }

    /// batchEmbedContents로 최대 100개씩 묶어서 요청
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Vec<f32>> = vec![vec![0.0; self.dimension]; texts.len()];

        let pending: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        let path = format!("models/{}:batchEmbedContents", self.model);
        let total_batches = pending.len().div_ceil(MAX_BATCH_SIZE);

        for (batch_no, batch) in pending.chunks(MAX_BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{} ({} texts)",
                batch_no + 1,
                total_batches,
                batch.len()
            );

            let request = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|&i| self.request(&texts[i], TaskType::RetrievalDocument))
                    .collect(),
            };
            let response: BatchEmbedResponse = self.transport.post_json(&path, &request).await?;

            if response.embeddings.len() != batch.len() {
                anyhow::bail!(
                    "Gemini returned {} embeddings for {} texts",
                    response.embeddings.len(),
                    batch.len()
                );
            }
            for (&i, embedding) in batch.iter().zip(response.embeddings) {
                self.check_dimension(&embedding.values)?;
                results[i] = embedding.values;
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
