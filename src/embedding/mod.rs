//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 인제스트와 질의는 반드시 같은 임베딩 함수(모델 식별자)를 써야 합니다.
//! 식별자는 인덱스 카탈로그에 저장되고 열 때마다 검증됩니다.
//!
//! 지원 모델:
//! - `all-MiniLM-L6-v2`: 로컬 ONNX 문장 임베딩 (384 차원, 기본값)
//! - `hash-<dim>`: 로컬 특징 해싱 임베딩 (모델 파일 불필요, 테스트/오프라인용)
//! - `gemini-embedding-001[@<dim>]`: Gemini API 임베딩
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder("all-MiniLM-L6-v2").await?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod hash;
mod onnx;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{QaError, Result, ServiceErrorKind};

pub use hash::HashEmbedding;
pub use onnx::{all_model_files_present, default_model_dir, OnnxEmbedding, MINILM_DIMENSION, MINILM_MODEL};

/// 기본 임베딩 모델 식별자
pub const DEFAULT_EMBEDDING_MODEL: &str = MINILM_MODEL;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 같은 모델 식별자에 대해 결정적이어야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 정규화된 모델 식별자 (인덱스 카탈로그에 저장됨)
    fn model_id(&self) -> String;
}

// ============================================================================
// Model Identity
// ============================================================================

/// 파싱된 임베딩 모델 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingModel {
    MiniLm,
    Hash { dimension: usize },
    Gemini { dimension: usize },
}

impl EmbeddingModel {
    /// 식별자 문자열 파싱
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();

        if let Some(rest) = id.strip_prefix(MINILM_MODEL) {
            return match rest.strip_prefix('@') {
                None if rest.is_empty() => Ok(Self::MiniLm),
                Some(dim) if dim.parse::<usize>().ok() == Some(MINILM_DIMENSION) => Ok(Self::MiniLm),
                Some(dim) => Err(QaError::Config(format!(
                    "{} only produces {}-dimensional vectors, got '{}'",
                    MINILM_MODEL, MINILM_DIMENSION, dim
                ))),
                None => Err(QaError::Config(format!("unknown embedding model: '{}'", id))),
            };
        }

        if let Some(dim) = id.strip_prefix("hash-") {
            let dimension: usize = dim
                .parse()
                .map_err(|_| QaError::Config(format!("invalid hash embedding dimension: '{}'", dim)))?;
            if !(16..=4096).contains(&dimension) {
                return Err(QaError::Config(format!(
                    "hash embedding dimension must be within 16..=4096, got {}",
                    dimension
                )));
            }
            return Ok(Self::Hash { dimension });
        }

        if let Some(rest) = id.strip_prefix(GEMINI_MODEL) {
            let dimension = match rest.strip_prefix('@') {
                Some(dim) => dim.parse().map_err(|_| {
                    QaError::Config(format!("invalid Gemini embedding dimension: '{}'", dim))
                })?,
                None if rest.is_empty() => DEFAULT_GEMINI_DIMENSION,
                None => {
                    return Err(QaError::Config(format!("unknown embedding model: '{}'", id)));
                }
            };
            return Ok(Self::Gemini { dimension });
        }

        Err(QaError::Config(format!(
            "unknown embedding model: '{}' (expected '{}', 'hash-<dim>' or '{}[@<dim>]')",
            id, MINILM_MODEL, GEMINI_MODEL
        )))
    }

    /// 정규화된 식별자
    pub fn id(&self) -> String {
        match self {
            Self::MiniLm => MINILM_MODEL.to_string(),
            Self::Hash { dimension } => format!("hash-{}", dimension),
            Self::Gemini { dimension } => format!("{}@{}", GEMINI_MODEL, dimension),
        }
    }

    /// API 키가 필요한 모델인지
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::Gemini { .. })
    }
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

const GEMINI_MODEL: &str = "gemini-embedding-001";

/// 기본 Gemini 임베딩 차원
pub const DEFAULT_GEMINI_DIMENSION: usize = 768;

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이 (1000ms = 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;
/// 일시적 실패 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
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
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 적용 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        let now = Instant::now();

        // 2. 윈도우 밖의 오래된 요청 제거
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
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

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

impl GeminiEmbedding {
    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            return Err(QaError::Config(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| QaError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
        )));

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env_with_dimension(dimension: usize) -> Result<Self> {
        let api_key = get_gemini_api_key()?;
        Self::with_dimension(api_key, dimension)
    }

    fn service_error(kind: ServiceErrorKind, message: impl Into<String>) -> QaError {
        QaError::service(GEMINI_MODEL, kind, message)
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
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        // 인제스트/질의 모두 같은 taskType을 사용 (같은 임베딩 함수)
        let request = EmbedRequest {
            model: format!("models/{}", GEMINI_MODEL),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: Some(self.dimension),
        };

        let mut last_error: Option<QaError> = None;

        // 재시도 루프 (네트워크 오류, 429, 5xx 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

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
                    last_error = Some(Self::service_error(
                        ServiceErrorKind::Transient,
                        format!("Failed to send embedding request: {}", e),
                    ));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                Self::service_error(
                    ServiceErrorKind::Transient,
                    format!("Failed to read response body: {}", e),
                )
            })?;

            if status.is_success() {
                let embed_response: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
                    Self::service_error(
                        ServiceErrorKind::Permanent,
                        format!("Failed to parse embedding response: {}", e),
                    )
                })?;
                return Ok(embed_response.embedding.values);
            }

            let message = match serde_json::from_str::<GeminiError>(&body) {
                Ok(error) => format!("{} ({}): {}", status, error.error.status, error.error.message),
                Err(_) => format!("{}: {}", status, body),
            };

            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(
                    "Embedding API returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(Self::service_error(ServiceErrorKind::Transient, message));
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                }
                continue;
            }

            // 다른 에러 - 즉시 실패
            return Err(Self::service_error(ServiceErrorKind::Permanent, message));
        }

        Err(last_error.unwrap_or_else(|| {
            Self::service_error(
                ServiceErrorKind::Transient,
                format!("Embedding failed after {} retries", MAX_RETRIES),
            )
        }))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Gemini는 배치 API 대신 순차 처리, Rate limiter가 자동으로 조절함
        let mut results = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, texts.len());
            results.push(self.embed(text).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        EmbeddingModel::Gemini {
            dimension: self.dimension,
        }
        .id()
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// Gemini API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_gemini_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Some(key) = crate::config::non_empty_env(var) {
            tracing::debug!("Using API key from {}", var);
            return Ok(key);
        }
    }

    Err(QaError::Config(
        "Gemini embedding model configured but no API key found. \
         Set GEMINI_API_KEY or GOOGLE_AI_API_KEY.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .to_string(),
    ))
}

// ============================================================================
// Factory Function
// ============================================================================

/// 모델 식별자로 임베딩 프로바이더 생성
///
/// 로컬 ONNX 모델은 파일이 없으면 먼저 내려받습니다.
pub async fn create_embedder(model_id: &str) -> Result<Arc<dyn EmbeddingProvider>> {
    let model = EmbeddingModel::parse(model_id)?;

    let embedder: Arc<dyn EmbeddingProvider> = match model {
        EmbeddingModel::MiniLm => Arc::new(OnnxEmbedding::from_model_dir(&default_model_dir()).await?),
        EmbeddingModel::Hash { dimension } => Arc::new(HashEmbedding::new(dimension)),
        EmbeddingModel::Gemini { dimension } => {
            Arc::new(GeminiEmbedding::from_env_with_dimension(dimension)?)
        }
    };

    tracing::info!(
        "Using embedding model {} (dimension: {})",
        embedder.model_id(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================
