//! Document Index - 인제스트/검색 오케스트레이션
//!
//! 청커 + 임베더 + 벡터 저장소 + 카탈로그를 묶습니다.
//!
//! - 디스크 인덱스: `catalog.db` (모델 식별자, 원본 기록) + `chunks.lance/`
//! - 세션 인덱스: 메모리 저장소, 카탈로그 없음
//!
//! 디스크 인덱스를 열 때마다 저장된 임베딩 모델 식별자를 현재 임베더와
//! 비교하고, 다르면 즉시 실패합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::{QaError, Result};

use super::catalog::{Catalog, CatalogStats, IndexManifest};
use super::chunker::TextChunker;
use super::document::{Chunk, Document, SearchHit};
use super::lance::LanceVectorStore;
use super::memory::MemoryVectorStore;
use super::vector::{IndexEntry, VectorStore};

/// LanceDB 데이터 디렉토리 이름
const LANCE_DIR: &str = "chunks.lance";

// ============================================================================
// Types
// ============================================================================

/// 인덱스 상태 요약
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub backend: &'static str,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub catalog: Option<CatalogStats>,
}

// ============================================================================
// DocumentIndex
// ============================================================================

/// 문서 인덱스
pub struct DocumentIndex {
    location: Option<PathBuf>,
    catalog: Option<Catalog>,
    store: Box<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
}

impl DocumentIndex {
    /// 인제스트용: 디스크 인덱스를 열거나 새로 생성
    ///
    /// 이미 존재하면 임베딩 모델 식별자를 검증합니다.
    pub async fn create_or_open(
        dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: TextChunker,
    ) -> Result<Self> {
        let catalog = Catalog::open(dir).map_err(QaError::storage)?;

        match catalog.manifest().map_err(QaError::storage)? {
            Some(manifest) => check_manifest(dir, &manifest, embedder.as_ref())?,
            None => {
                let manifest = IndexManifest {
                    embedding_model: embedder.model_id(),
                    dimension: embedder.dimension(),
                    created_at: Utc::now(),
                };
                catalog.write_manifest(&manifest).map_err(QaError::storage)?;
                tracing::info!("Created new index at {:?}", dir);
            }
        }

        Self::with_catalog(dir, catalog, embedder, chunker).await
    }

    /// 질의용: 기존 디스크 인덱스 열기
    ///
    /// 인제스트가 한 번도 실행되지 않았으면 [`QaError::NoIndex`]입니다.
    pub async fn open_existing(
        dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: TextChunker,
    ) -> Result<Self> {
        if !Catalog::exists(dir) {
            return Err(QaError::NoIndex(dir.to_path_buf()));
        }

        let catalog = Catalog::open(dir).map_err(QaError::storage)?;
        let manifest = catalog
            .manifest()
            .map_err(QaError::storage)?
            .ok_or_else(|| QaError::NoIndex(dir.to_path_buf()))?;
        check_manifest(dir, &manifest, embedder.as_ref())?;

        Self::with_catalog(dir, catalog, embedder, chunker).await
    }

    async fn with_catalog(
        dir: &Path,
        catalog: Catalog,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: TextChunker,
    ) -> Result<Self> {
        let store = LanceVectorStore::open(&dir.join(LANCE_DIR), embedder.dimension())
            .await
            .map_err(QaError::storage)?;

        Ok(Self {
            location: Some(dir.to_path_buf()),
            catalog: Some(catalog),
            store: Box::new(store),
            embedder,
            chunker,
        })
    }

    /// 세션 범위 메모리 인덱스 (대화 모드)
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>, chunker: TextChunker) -> Self {
        Self {
            location: None,
            catalog: None,
            store: Box::new(MemoryVectorStore::new()),
            embedder,
            chunker,
        }
    }

    /// 디스크 인덱스 경로 (메모리 인덱스는 None)
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 청크와 벡터를 짝지어 저장
    pub async fn upsert(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<usize> {
        if chunks.len() != vectors.len() {
            return Err(QaError::Storage(format!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let dimension = self.embedder.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(QaError::Storage(format!(
                "embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        self.store.upsert(&entries).await.map_err(QaError::storage)
    }

    /// 한 원본 파일의 페이지 문서들을 인제스트
    ///
    /// 청킹 → 임베딩 → 저장 후 카탈로그에 기록합니다. 저장된 청크 수를 반환합니다.
    pub async fn ingest(&self, source: &Path, pages: &[Document]) -> Result<usize> {
        let chunks: Vec<Chunk> = pages
            .iter()
            .flat_map(|page| self.chunker.chunk_document(page))
            .collect();

        if chunks.is_empty() {
            tracing::warn!("No chunks generated for {:?}", source);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        let stored = self.upsert(chunks, vectors).await?;

        if let Some(catalog) = &self.catalog {
            catalog
                .record_source(&source.display().to_string(), pages.len(), stored)
                .map_err(QaError::storage)?;
        }

        tracing::info!(
            "Indexed {:?} (pages={}, chunks={})",
            source,
            pages.len(),
            stored
        );
        Ok(stored)
    }

    /// 질의 텍스트로 최근접 `k`개 검색 (거리 오름차순)
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_embedding = self.embedder.embed(query).await?;
        self.search_vector(&query_embedding, k).await
    }

    /// 임베딩 벡터로 검색
    pub async fn search_vector(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let hits = self
            .store
            .search(query_embedding, k)
            .await
            .map_err(QaError::storage)?;

        tracing::debug!("Vector search returned {} hits (k={})", hits.len(), k);
        Ok(hits)
    }

    /// 저장된 청크 수
    pub async fn count(&self) -> Result<usize> {
        self.store.count().await.map_err(QaError::storage)
    }

    /// 인덱스 통계
    pub async fn stats(&self) -> Result<IndexStats> {
        let catalog = match &self.catalog {
            Some(catalog) => Some(catalog.stats().map_err(QaError::storage)?),
            None => None,
        };

        Ok(IndexStats {
            backend: self.store.backend(),
            embedding_model: self.embedder.model_id(),
            dimension: self.embedder.dimension(),
            chunk_count: self.count().await?,
            catalog,
        })
    }

    /// 카탈로그 접근 (디스크 인덱스만)
    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }
}

/// 저장된 매니페스트와 현재 임베더 비교
fn check_manifest(dir: &Path, manifest: &IndexManifest, embedder: &dyn EmbeddingProvider) -> Result<()> {
    let configured = embedder.model_id();
    if manifest.embedding_model != configured || manifest.dimension != embedder.dimension() {
        return Err(QaError::ModelMismatch {
            path: dir.to_path_buf(),
            indexed: format!("{} ({} dims)", manifest.embedding_model, manifest.dimension),
            configured: format!("{} ({} dims)", configured, embedder.dimension()),
        });
    }
    Ok(())
}

/// 인덱스 디렉토리의 매니페스트만 읽기 (임베더 생성 없이 상태 확인용)
pub fn read_manifest(dir: &Path) -> Result<Option<IndexManifest>> {
    if !Catalog::exists(dir) {
        return Ok(None);
    }
    Catalog::open(dir)
        .and_then(|c| c.manifest())
        .map_err(QaError::storage)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::ChunkConfig;
    use tempfile::TempDir;

    fn embedder(dim: usize) -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashEmbedding::new(dim))
    }

    fn page(text: &str, n: u32) -> Document {
        Document::new(text, "data/contract.pdf", Some(n))
    }

    #[tokio::test]
    async fn test_open_existing_without_ingest_is_no_index() {
        let dir = TempDir::new().unwrap();
        let result =
            DocumentIndex::open_existing(&dir.path().join("index"), embedder(64), TextChunker::with_defaults())
                .await;
        assert!(matches!(result, Err(QaError::NoIndex(_))));
    }

    #[tokio::test]
    async fn test_created_but_empty_index_returns_empty() {
        let dir = TempDir::new().unwrap();
        DocumentIndex::create_or_open(dir.path(), embedder(64), TextChunker::with_defaults())
            .await
            .unwrap();

        let index =
            DocumentIndex::open_existing(dir.path(), embedder(64), TextChunker::with_defaults())
                .await
                .unwrap();
        assert!(index.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_model_mismatch_fails_fast() {
        let dir = TempDir::new().unwrap();
        DocumentIndex::create_or_open(dir.path(), embedder(64), TextChunker::with_defaults())
            .await
            .unwrap();

        let result =
            DocumentIndex::open_existing(dir.path(), embedder(128), TextChunker::with_defaults())
                .await;
        assert!(matches!(result, Err(QaError::ModelMismatch { .. })));

        let result =
            DocumentIndex::create_or_open(dir.path(), embedder(128), TextChunker::with_defaults())
                .await;
        assert!(matches!(result, Err(QaError::ModelMismatch { .. })));
    }

    #[tokio::test]
    async fn test_ingest_appends_and_records_sources() {
        let dir = TempDir::new().unwrap();
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 60,
            overlap_characters: 10,
        });
        let index = DocumentIndex::create_or_open(dir.path(), embedder(64), chunker.clone())
            .await
            .unwrap();

        let pages = vec![
            page("The term of this agreement is 12 months from the effective date.", 1),
            page("Either party may renew the agreement by written notice.", 2),
        ];
        let stored = index.ingest(Path::new("data/contract.pdf"), &pages).await.unwrap();
        assert!(stored >= 2);
        assert_eq!(index.count().await.unwrap(), stored);
        drop(index);

        // 두 번째 실행은 기존 인덱스에 추가
        let index = DocumentIndex::create_or_open(dir.path(), embedder(64), chunker)
            .await
            .unwrap();
        let more = index
            .ingest(Path::new("data/addendum.pdf"), &[page("Payment is due monthly.", 1)])
            .await
            .unwrap();
        assert_eq!(more, 1);

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunk_count, stored + 1);
        assert_eq!(stats.embedding_model, "hash-64");
        let catalog = stats.catalog.unwrap();
        assert_eq!(catalog.source_count, 2);
        assert_eq!(catalog.chunk_count, stored + 1);
    }

    #[tokio::test]
    async fn test_search_respects_k_and_order() {
        let index = DocumentIndex::in_memory(embedder(256), TextChunker::with_defaults());
        let pages: Vec<Document> = [
            "The term of this agreement is 12 months.",
            "Payment is due within thirty days of invoice.",
            "This agreement is governed by the laws of Delaware.",
            "Confidential information must not be disclosed.",
        ]
        .iter()
        .enumerate()
        .map(|(i, t)| page(t, i as u32 + 1))
        .collect();
        index.ingest(Path::new("contract.pdf"), &pages).await.unwrap();

        let hits = index.search("What is the term?", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(hits[0].text.contains("term"));

        let all = index.search("agreement", 10).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_upsert_rejects_mismatched_lengths() {
        let index = DocumentIndex::in_memory(embedder(16), TextChunker::with_defaults());
        let chunk = TextChunker::with_defaults()
            .chunk_document(&page("hello world", 1))
            .next()
            .unwrap();

        let result = index.upsert(vec![chunk.clone()], vec![]).await;
        assert!(matches!(result, Err(QaError::Storage(_))));

        let result = index.upsert(vec![chunk], vec![vec![0.0; 8]]).await;
        assert!(matches!(result, Err(QaError::Storage(_))));
    }

    #[tokio::test]
    async fn test_in_memory_has_no_catalog() {
        let index = DocumentIndex::in_memory(embedder(16), TextChunker::with_defaults());
        assert!(index.location().is_none());
        assert!(index.catalog().is_none());
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.backend, "memory");
        assert!(stats.catalog.is_none());
    }

    #[test]
    fn test_read_manifest_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_manifest(dir.path()).unwrap().is_none());
    }
}
