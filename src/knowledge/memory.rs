//! In-memory Vector Store
//!
//! 대화 세션 단위 인덱스용 전수 탐색 저장소입니다. 프로세스가 끝나면 사라집니다.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::document::SearchHit;
use super::vector::{rank_hits, squared_l2, IndexEntry, VectorStore};

/// 메모리 벡터 저장소
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        let mut stored = self.entries.write().await;
        for entry in entries {
            match stored.iter_mut().find(|e| e.chunk.id == entry.chunk.id) {
                Some(existing) => *existing = entry.clone(),
                None => stored.push(entry.clone()),
            }
        }
        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let stored = self.entries.read().await;

        let hits = stored
            .iter()
            .map(|entry| SearchHit {
                chunk_id: entry.chunk.id.clone(),
                text: entry.chunk.text.clone(),
                source: entry.chunk.source.clone(),
                page: entry.chunk.page,
                chunk_index: entry.chunk.chunk_index,
                distance: squared_l2(&entry.embedding, query_embedding),
            })
            .collect();

        Ok(rank_hits(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
