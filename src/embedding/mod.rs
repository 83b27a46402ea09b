//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 쿼리와 문서를 고정 차원 벡터로 변환합니다.
//! 쿼리 임베딩과 문서 임베딩은 서로 다른 task type을 사용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let query_vec = embedder.embed_query("검색어").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 쿼리용/문서용 임베딩을 구분해서 제공합니다. 두 메서드 모두
/// `dimension()` 길이의 벡터를 반환해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 검색 쿼리 임베딩
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// 문서 배치 임베딩 (인덱싱용)
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트
/// ref: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// 호출 간 최소 딜레이 (무료 티어 60 RPM 준수)
const MIN_DELAY: Duration = Duration::from_millis(1000);
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// 임베딩 task type (쿼리/문서 비대칭 검색)
#[derive(Debug, Clone, Copy)]
enum EmbedTask {
    Query,
    Document,
}

impl EmbedTask {
    fn as_str(self) -> &'static str {
        match self {
            EmbedTask::Query => "RETRIEVAL_QUERY",
            EmbedTask::Document => "RETRIEVAL_DOCUMENT",
        }
    }
}

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl GeminiEmbedding {
    /// 새 Gemini 임베딩 인스턴스 생성
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    /// 환경변수에서 API 키를 읽어 차원 지정하여 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        Self::with_dimension(get_api_key()?, dimension)
    }

    /// 호출 간 최소 딜레이 적용 (버스트 방지)
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_DELAY {
                let wait = MIN_DELAY - elapsed;
                tracing::debug!("Embedding throttle: waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// 단일 텍스트 임베딩 (재시도 포함)
    async fn embed_one(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>> {
        // 빈 텍스트는 영벡터로 처리
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: "models/gemini-embedding-001".to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task.as_str().to_string(),
            output_dimensionality: Some(self.dimension),
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            self.throttle().await;

            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let embed_response: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return Ok(embed_response.embedding.values);
            }

            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                if let Ok(error) = serde_json::from_str::<GeminiApiError>(&body) {
                    anyhow::bail!(
                        "Gemini API error ({}): {}",
                        error.error.status,
                        error.error.message
                    );
                }
                anyhow::bail!("Gemini API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
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

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiApiError {
    error: GeminiApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiApiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, EmbedTask::Query).await
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Gemini는 배치 API가 없으므로 순차 처리
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding document {}/{}", i + 1, texts.len());
            results.push(self.embed_one(text, EmbedTask::Document).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            tracing::debug!("Using API key from GEMINI_API_KEY");
            return Ok(key);
        }
    }

    if let Ok(key) = std::env::var("GOOGLE_AI_API_KEY") {
        if !key.is_empty() {
            tracing::debug!("Using API key from GOOGLE_AI_API_KEY");
            return Ok(key);
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Tests
// ============================================================================
