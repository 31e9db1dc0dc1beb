//! Knowledge 모듈 - 청킹, 벡터 인덱스, 카탈로그
//!
//! - Chunker: 경계 인식 오버랩 청킹
//! - LanceDB: 디스크 벡터 인덱스
//! - Memory: 세션 범위 벡터 인덱스
//! - Catalog: SQLite 인덱스 메타데이터 (임베딩 모델 식별자, 원본 기록)

mod catalog;
mod chunker;
mod document;
mod index;
mod lance;
mod memory;
mod vector;

// Re-exports
pub use catalog::{Catalog, CatalogStats, IndexManifest, SourceRecord, CATALOG_FILE};
pub use chunker::{default_chunker, ChunkConfig, Spans, TextChunker, TextSpan};
pub use document::{Chunk, Document, SearchHit};
pub use index::{read_manifest, DocumentIndex, IndexStats};
pub use lance::LanceVectorStore;
pub use memory::MemoryVectorStore;
pub use vector::{rank_hits, squared_l2, IndexEntry, VectorStore};
