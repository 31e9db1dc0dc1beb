//! 질의 엔진
//!
//! 검색 → 컨텍스트 조립 → 프롬프트 생성 → LLM 호출을 한 번의 왕복으로 묶습니다.
//!
//! 인덱스가 생성된 적 없는 경우([`QueryOutcome::NotIndexed`])와
//! 인덱스는 있지만 결과가 없는 경우([`QueryOutcome::NoMatches`])를 구분하며,
//! 두 경우 모두 LLM을 호출하지 않습니다.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{QaError, Result};
use crate::knowledge::{DocumentIndex, SearchHit, TextChunker};
use crate::llm::{CompletionProvider, TextStream};
use crate::prompt::{assemble_context, PromptBuilder};

// ============================================================================
// Outcome Types
// ============================================================================

/// 질의 결과
#[derive(Debug)]
pub enum QueryOutcome<T> {
    /// 인제스트가 한 번도 실행되지 않음
    NotIndexed,
    /// 인덱스가 비어 있어 검색 결과 없음
    NoMatches,
    /// 정상 결과
    Found(T),
}

impl<T> QueryOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryOutcome<U> {
        match self {
            QueryOutcome::NotIndexed => QueryOutcome::NotIndexed,
            QueryOutcome::NoMatches => QueryOutcome::NoMatches,
            QueryOutcome::Found(value) => QueryOutcome::Found(f(value)),
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            QueryOutcome::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// 버퍼 모드 답변
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// 컨텍스트로 사용된 검색 결과 (거리 오름차순)
    pub hits: Vec<SearchHit>,
    pub prompt: String,
}

/// 스트림 모드 답변
pub struct AnswerStream {
    pub hits: Vec<SearchHit>,
    pub prompt: String,
    pub stream: TextStream,
}

impl AnswerStream {
    /// 스트림을 끝까지 소비해 하나의 문자열로
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(piece) = self.stream.next().await {
            text.push_str(&piece?);
        }
        Ok(text)
    }
}

// ============================================================================
// Retrieval
// ============================================================================

/// 질의용 디스크 인덱스 열기
///
/// 인덱스가 생성된 적 없으면 `Ok(None)`입니다. 모델 불일치 등 다른 에러는 그대로 전달합니다.
pub async fn open_index(
    dir: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
) -> Result<Option<DocumentIndex>> {
    match DocumentIndex::open_existing(dir, embedder, chunker).await {
        Ok(index) => Ok(Some(index)),
        Err(QaError::NoIndex(path)) => {
            tracing::info!("No index found at {:?}", path);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// 질문과 가장 가까운 청크 최대 `k`개 검색
pub async fn retrieve(
    index: Option<&DocumentIndex>,
    question: &str,
    k: usize,
) -> Result<QueryOutcome<Vec<SearchHit>>> {
    let Some(index) = index else {
        return Ok(QueryOutcome::NotIndexed);
    };

    let hits = index.search(question, k).await?;
    if hits.is_empty() {
        return Ok(QueryOutcome::NoMatches);
    }
    Ok(QueryOutcome::Found(hits))
}

// ============================================================================
// Query Engine
// ============================================================================

/// 질의 엔진
///
/// LLM 클라이언트는 프로세스 수명 동안 하나를 주입받아 재사용합니다.
pub struct QueryEngine {
    llm: Arc<dyn CompletionProvider>,
    prompt: PromptBuilder,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(llm: Arc<dyn CompletionProvider>, prompt: PromptBuilder, top_k: usize) -> Self {
        Self { llm, prompt, top_k }
    }

    /// 설정값(top_k, 대체 응답 문장)으로 생성
    pub fn from_config(config: &Config, llm: Arc<dyn CompletionProvider>) -> Self {
        Self::new(llm, PromptBuilder::new(config.fallback_answer.clone()), config.top_k)
    }

    /// 검색 개수 변경
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn prompt_builder(&self) -> &PromptBuilder {
        &self.prompt
    }

    pub fn llm(&self) -> &Arc<dyn CompletionProvider> {
        &self.llm
    }

    /// 검색 결과와 질문으로 프롬프트 생성
    pub fn build_prompt(&self, hits: &[SearchHit], question: &str) -> String {
        self.prompt.build(&assemble_context(hits), question)
    }

    /// 검색 + 프롬프트까지 (LLM 호출 없음)
    pub async fn prepare(
        &self,
        index: Option<&DocumentIndex>,
        question: &str,
    ) -> Result<QueryOutcome<(Vec<SearchHit>, String)>> {
        let outcome = retrieve(index, question, self.top_k).await?;
        Ok(outcome.map(|hits| {
            let prompt = self.build_prompt(&hits, question);
            (hits, prompt)
        }))
    }

    /// 버퍼 모드 답변
    pub async fn answer(&self, index: Option<&DocumentIndex>, question: &str) -> Result<QueryOutcome<Answer>> {
        let (hits, prompt) = match self.prepare(index, question).await? {
            QueryOutcome::Found(prepared) => prepared,
            QueryOutcome::NotIndexed => return Ok(QueryOutcome::NotIndexed),
            QueryOutcome::NoMatches => return Ok(QueryOutcome::NoMatches),
        };

        tracing::debug!("Prompt built from {} chunks ({} chars)", hits.len(), prompt.len());
        let text = self.llm.complete(&prompt).await?;

        Ok(QueryOutcome::Found(Answer { text, hits, prompt }))
    }

    /// 스트림 모드 답변
    ///
    /// 반환된 스트림을 드롭하면 생성이 중단됩니다.
    pub async fn answer_stream(
        &self,
        index: Option<&DocumentIndex>,
        question: &str,
    ) -> Result<QueryOutcome<AnswerStream>> {
        let (hits, prompt) = match self.prepare(index, question).await? {
            QueryOutcome::Found(prepared) => prepared,
            QueryOutcome::NotIndexed => return Ok(QueryOutcome::NotIndexed),
            QueryOutcome::NoMatches => return Ok(QueryOutcome::NoMatches),
        };

        let stream = self.llm.complete_stream(&prompt).await?;
        Ok(QueryOutcome::Found(AnswerStream { hits, prompt, stream }))
    }
}

// ============================================================================
// Tests
// ============================================================================
