//! pdfqa - PDF 문서 기반 질의응답 (RAG)
//!
//! PDF를 페이지 단위로 읽어 청킹/임베딩 후 LanceDB 벡터 인덱스에 저장하고,
//! 질문과 가까운 청크만을 컨텍스트로 LLM에 답변을 요청합니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod prompt;
pub mod session;

// Re-exports
pub use config::{get_data_dir, Config};
pub use embedding::{
    create_embedder, EmbeddingModel, EmbeddingProvider, GeminiEmbedding, HashEmbedding, OnnxEmbedding,
};
pub use engine::{open_index, retrieve, Answer, AnswerStream, QueryEngine, QueryOutcome};
pub use error::{QaError, Result, ServiceErrorKind};
pub use ingest::{ingest_batch, ingest_file, IngestReport, IngestedFile};
pub use knowledge::{
    default_chunker, ChunkConfig, Chunk, Document, DocumentIndex, IndexStats, SearchHit, TextChunker,
};
pub use llm::{CompletionProvider, GroqClient, LazyCompletion, RetryPolicy, TextStream};
pub use prompt::{assemble_context, PromptBuilder, DEFAULT_FALLBACK_ANSWER};
pub use session::{ChatSession, Role, Turn};
