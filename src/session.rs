//! 대화 세션
//!
//! 대화 모드의 상태(세션 범위 메모리 인덱스, 대화 기록)를 하나의 객체로 묶어
//! 핸들러에 명시적으로 전달합니다. 세션이 끝나면 모두 사라집니다.
//! 대화 기록은 화면 표시용이며 LLM 프롬프트에는 들어가지 않습니다.

use std::path::Path;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::engine::{AnswerStream, QueryEngine, QueryOutcome};
use crate::error::Result;
use crate::extractor;
use crate::ingest::IngestedFile;
use crate::knowledge::{Document, DocumentIndex, TextChunker};

/// 발화 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// 대화 한 턴
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// 대화 세션 컨텍스트
pub struct ChatSession {
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    index: Option<DocumentIndex>,
    history: Vec<Turn>,
}

impl ChatSession {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, chunker: TextChunker) -> Self {
        Self {
            embedder,
            chunker,
            index: None,
            history: Vec::new(),
        }
    }

    /// PDF를 새 세션 인덱스에 로드 (이전 문서는 대체)
    ///
    /// 읽기에 실패하면 기존 인덱스를 그대로 둡니다.
    pub async fn load_pdf(&mut self, path: &Path) -> Result<IngestedFile> {
        let pages = extractor::load_pdf(path).await?;
        let chunks = self.load_documents(path, &pages).await?;
        Ok(IngestedFile {
            path: path.to_path_buf(),
            pages: pages.len(),
            chunks,
        })
    }

    /// 이미 로드된 페이지 문서로 세션 인덱스 구성 (이전 문서는 대체)
    pub async fn load_documents(&mut self, source: &Path, pages: &[Document]) -> Result<usize> {
        let index = self.fresh_index();
        let chunks = index.ingest(source, pages).await?;
        self.index = Some(index);
        Ok(chunks)
    }

    fn fresh_index(&self) -> DocumentIndex {
        DocumentIndex::in_memory(self.embedder.clone(), self.chunker.clone())
    }

    /// 활성 인덱스 (문서를 로드하지 않았으면 None)
    pub fn index(&self) -> Option<&DocumentIndex> {
        self.index.as_ref()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// 질문을 기록하고 스트림 답변 요청
    ///
    /// 스트림을 다 소비한 뒤 [`ChatSession::record_answer`]로 답변을 기록합니다.
    pub async fn ask(&mut self, engine: &QueryEngine, question: &str) -> Result<QueryOutcome<AnswerStream>> {
        self.history.push(Turn {
            role: Role::User,
            content: question.to_string(),
        });
        engine.answer_stream(self.index.as_ref(), question).await
    }

    /// 어시스턴트 답변 기록 (빈 답변은 건너뜀)
    pub fn record_answer(&mut self, answer: impl Into<String>) {
        let content = answer.into();
        if content.trim().is_empty() {
            return;
        }
        self.history.push(Turn {
            role: Role::Assistant,
            content,
        });
    }

    /// 대화 기록 초기화 (인덱스는 유지)
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::llm::{CompletionProvider, TextStream};
    use crate::prompt::PromptBuilder;
    use async_trait::async_trait;

    struct FixedLlm;

    #[async_trait]
    impl CompletionProvider for FixedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok("Twelve months.".to_string())
        }

        async fn complete_stream(&self, _prompt: &str) -> Result<TextStream> {
            let pieces = vec![Ok("Twelve ".to_string()), Ok("months.".to_string())];
            Ok(Box::pin(futures::stream::iter(pieces)))
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    fn session() -> ChatSession {
        ChatSession::new(Arc::new(HashEmbedding::new(64)), TextChunker::with_defaults())
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(Arc::new(FixedLlm), PromptBuilder::default(), 3)
    }

    #[tokio::test]
    async fn test_ask_without_document_is_not_indexed() {
        let mut session = session();
        let outcome = session.ask(&engine(), "What is the term?").await.unwrap();
        assert!(matches!(outcome, QueryOutcome::NotIndexed));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_conversation_records_turns() {
        let mut session = session();
        let pages = vec![Document::new(
            "The term of this agreement is 12 months.",
            "lease.pdf",
            Some(1),
        )];
        assert_eq!(session.load_documents(Path::new("lease.pdf"), &pages).await.unwrap(), 1);

        let stream = session
            .ask(&engine(), "What is the term?")
            .await
            .unwrap()
            .found()
            .unwrap();
        let answer = stream.collect_text().await.unwrap();
        session.record_answer(answer.clone());

        assert_eq!(answer, "Twelve months.");
        assert_eq!(
            session.history(),
            &[
                Turn {
                    role: Role::User,
                    content: "What is the term?".to_string()
                },
                Turn {
                    role: Role::Assistant,
                    content: "Twelve months.".to_string()
                },
            ]
        );

        session.clear_history();
        assert!(session.history().is_empty());
        assert!(session.index().is_some());
    }

    #[test]
    fn test_empty_answer_is_not_recorded() {
        let mut session = session();
        session.record_answer("  ");
        assert!(session.history().is_empty());

        session.record_answer("The term ");
        assert_eq!(session.history()[0].content, "The term ");
    }

    #[tokio::test]
    async fn test_load_pdf_indexes_each_page() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lease.pdf");
        std::fs::write(
            &path,
            extractor::pdf::fixtures::pdf_with_pages(&[
                "The tenant shall pay rent monthly.",
                "The term of this agreement is 12 months.",
            ]),
        )
        .unwrap();

        let mut session = session();
        let file = session.load_pdf(&path).await.unwrap();
        assert_eq!(file.pages, 2);
        assert_eq!(file.chunks, 2);

        let hits = session.index().unwrap().search("term of this agreement", 1).await.unwrap();
        assert_eq!(hits[0].page, Some(2));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"not a pdf").unwrap();

        let mut session = session();
        session
            .load_documents(Path::new("a.pdf"), &[Document::new("Alpha clause.", "a.pdf", Some(1))])
            .await
            .unwrap();

        assert!(session.load_pdf(&broken).await.is_err());
        let hits = session.index().unwrap().search("clause", 1).await.unwrap();
        assert_eq!(hits[0].source, "a.pdf");
    }

    #[tokio::test]
    async fn test_loading_replaces_previous_document() {
        let mut session = session();
        session
            .load_documents(Path::new("a.pdf"), &[Document::new("Alpha clause.", "a.pdf", Some(1))])
            .await
            .unwrap();
        session
            .load_documents(Path::new("b.pdf"), &[Document::new("Beta clause.", "b.pdf", Some(1))])
            .await
            .unwrap();

        let index = session.index().unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.search("clause", 3).await.unwrap();
        assert_eq!(hits[0].source, "b.pdf");
    }
}
