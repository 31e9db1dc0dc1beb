//! LLM 모듈 - 텍스트 생성 서비스 클라이언트
//!
//! Groq (OpenAI 호환 chat completions) API를 고정 파라미터(모델, temperature)로
//! 호출합니다. 두 가지 모드:
//! - 버퍼: 완성된 답변 문자열 하나
//! - 스트림: 텍스트 조각의 지연 시퀀스 (SSE). 소비를 멈추면(드롭) 취소됩니다.
//!
//! 요청 단계의 일시적 실패(네트워크, 429, 5xx)는 지수 백오프로 재시도합니다.
//! 스트림 도중 끊김은 재시도하지 않고 에러 한 건으로 전달합니다.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{QaError, Result, ServiceErrorKind};

/// 텍스트 조각 스트림
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 텍스트 생성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 버퍼 모드: 전체 답변
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 스트림 모드: 답변 조각 시퀀스
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream>;

    /// 모델 식별자
    fn model(&self) -> &str;
}

// ============================================================================
// Groq Client
// ============================================================================

/// Groq OpenAI 호환 API 기본 주소
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

const SERVICE_NAME: &str = "groq";

/// 일시적 실패 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;
/// 요청 타임아웃 (스트림 수신 시간 포함)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// 재시도 정책 (시도 n번째 대기 = initial_backoff * 2^(n-1))
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Groq chat completions 클라이언트
///
/// 프로세스 수명 동안 하나만 만들어 질의 엔진에 주입합니다.
#[derive(Debug, Clone)]
pub struct GroqClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

/// Chat completions 요청 본문
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// 버퍼 모드 응답
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// 스트림 모드 청크
#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// API 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl GroqClient {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `api_key` - Groq API 키
    /// * `model` - LLM 모델 식별자
    /// * `temperature` - 디코딩 temperature (기본 0.0)
    pub fn new(api_key: String, model: impl Into<String>, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QaError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            base_url: GROQ_BASE_URL.to_string(),
            model: model.into(),
            temperature,
            retry: RetryPolicy::default(),
        })
    }

    /// 환경변수(`GROQ_API_KEY`)에서 API 키를 읽어 생성
    pub fn from_env(model: impl Into<String>, temperature: f32) -> Result<Self> {
        let api_key = get_groq_api_key()?;
        Self::new(api_key, model, temperature)
    }

    /// 다른 OpenAI 호환 엔드포인트 사용
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request<'a>(&'a self, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            stream,
        }
    }

    /// 요청 전송 (일시적 실패 재시도). 성공 응답만 반환
    async fn send_with_retry(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error: Option<QaError> = None;

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt);
                tracing::warn!(
                    "LLM request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.retry.max_retries
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(service_error(
                        ServiceErrorKind::Transient,
                        format!("Failed to send request: {}", e),
                    ));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let error_body = response.text().await.unwrap_or_default();
            let error = service_error(classify_status(status), error_message(status, &error_body));

            if !error.is_transient() {
                return Err(error);
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            service_error(
                ServiceErrorKind::Transient,
                format!("Request failed after {} retries", self.retry.max_retries),
            )
        }))
    }
}

#[async_trait]
impl CompletionProvider for GroqClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.send_with_retry(&self.request(prompt, false)).await?;

        let body = response.text().await.map_err(|e| {
            service_error(
                ServiceErrorKind::Transient,
                format!("Failed to read response body: {}", e),
            )
        })?;

        let answer = parse_completion(&body)?;
        tracing::debug!("LLM answered with {} chars", answer.len());
        Ok(answer)
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let response = self.send_with_retry(&self.request(prompt, true)).await?;
        Ok(sse_text_stream(response.bytes_stream()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Lazy Provider
// ============================================================================

type ProviderInit = Box<dyn Fn() -> Result<Arc<dyn CompletionProvider>> + Send + Sync>;

/// 첫 호출 때 실제 클라이언트를 만드는 프로바이더
///
/// 검색 결과가 없는 질의는 LLM까지 가지 않으므로 API 키 검사도 그때까지 미뤄집니다.
/// 한 번 만든 클라이언트는 프로세스 수명 동안 재사용합니다.
pub struct LazyCompletion {
    model: String,
    init: ProviderInit,
    client: OnceCell<Arc<dyn CompletionProvider>>,
}

impl LazyCompletion {
    pub fn new<F>(model: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CompletionProvider>> + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            init: Box::new(init),
            client: OnceCell::new(),
        }
    }

    /// `GROQ_API_KEY`로 만드는 Groq 클라이언트
    pub fn groq(model: impl Into<String>, temperature: f32) -> Self {
        let model = model.into();
        let client_model = model.clone();
        Self::new(model, move || {
            let client = GroqClient::from_env(client_model.clone(), temperature)?;
            Ok(Arc::new(client) as Arc<dyn CompletionProvider>)
        })
    }

    async fn client(&self) -> Result<&Arc<dyn CompletionProvider>> {
        self.client.get_or_try_init(|| async { (self.init)() }).await
    }
}

#[async_trait]
impl CompletionProvider for LazyCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.client().await?.complete(prompt).await
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        self.client().await?.complete_stream(prompt).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SSE 바이트 스트림을 텍스트 조각 스트림으로 변환
///
/// `[DONE]` 이벤트에서 끝나고 내용 없는 청크는 건너뜁니다.
/// 에러가 나면 그 에러 한 건을 내보낸 뒤 스트림을 끝냅니다.
fn sse_text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = bytes
        .eventsource()
        .take_while(|event| {
            let done = matches!(event, Ok(e) if e.data.trim() == "[DONE]");
            futures::future::ready(!done)
        })
        .filter_map(|event| {
            let item = match event {
                Ok(event) => parse_stream_chunk(&event.data).transpose(),
                Err(e) => Some(Err(service_error(
                    ServiceErrorKind::Transient,
                    format!("Stream interrupted: {}", e),
                ))),
            };
            futures::future::ready(item)
        })
        .scan(false, |failed, item: Result<String>| {
            if *failed {
                return futures::future::ready(None);
            }
            *failed = item.is_err();
            futures::future::ready(Some(item))
        });

    Box::pin(stream)
}

fn service_error(kind: ServiceErrorKind, message: impl Into<String>) -> QaError {
    QaError::service(SERVICE_NAME, kind, message)
}

/// HTTP 상태 코드 분류 (429, 408, 5xx = 일시적)
fn classify_status(status: reqwest::StatusCode) -> ServiceErrorKind {
    if status.as_u16() == 429 || status.as_u16() == 408 || status.is_server_error() {
        ServiceErrorKind::Transient
    } else {
        ServiceErrorKind::Permanent
    }
}

/// 에러 응답 본문에서 메시지 추출
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => match err.error.kind {
            Some(kind) => format!("{} ({}): {}", status, kind, err.error.message),
            None => format!("{}: {}", status, err.error.message),
        },
        Err(_) => format!("{}: {}", status, body.trim()),
    }
}

/// 버퍼 모드 응답 파싱
fn parse_completion(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        service_error(
            ServiceErrorKind::Permanent,
            format!("Failed to parse completion response: {}", e),
        )
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| service_error(ServiceErrorKind::Permanent, "Completion response had no content"))
}

/// 스트림 청크 파싱 (내용 없는 청크는 None)
fn parse_stream_chunk(data: &str) -> Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
        service_error(
            ServiceErrorKind::Permanent,
            format!("Failed to parse stream chunk: {}", e),
        )
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

// ============================================================================
// API Key Management
// ============================================================================

/// Groq API 키 로드 (`GROQ_API_KEY`)
pub fn get_groq_api_key() -> Result<String> {
    crate::config::non_empty_env("GROQ_API_KEY").ok_or_else(|| {
        QaError::Config(
            "Missing GROQ_API_KEY environment variable.\n\
             Set: export GROQ_API_KEY=your-api-key\n\
             Get your API key at: https://console.groq.com/keys"
                .to_string(),
        )
    })
}

/// API 키 존재 여부 확인
pub fn has_groq_api_key() -> bool {
    crate::config::non_empty_env("GROQ_API_KEY").is_some()
}

// ============================================================================
// Tests
// ============================================================================
