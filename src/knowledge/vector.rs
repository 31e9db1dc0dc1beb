//! Vector Store - 벡터 저장/검색 트레이트 및 유틸리티

use anyhow::Result;
use async_trait::async_trait;

use super::document::{Chunk, SearchHit};

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// 원본 청크 (텍스트 + 메타데이터)
    pub chunk: Chunk,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 검색 결과는 거리 오름차순이며 `k`개 이하입니다.
/// 비어있는 저장소 검색은 빈 결과입니다 (에러 아님).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 엔트리 추가. 반환 시점에 내구성이 보장됨
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize>;

    /// 최근접 `k`개 검색
    async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// 저장된 엔트리 수
    async fn count(&self) -> Result<usize>;

    /// 백엔드 이름 (진단용)
    fn backend(&self) -> &'static str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 제곱 유클리드 거리 (LanceDB 기본 L2 메트릭과 같은 척도)
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 거리 오름차순 정렬 후 `k`개로 자르기
pub fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits.truncate(k);
    hits
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, distance: f32) -> SearchHit {
        SearchHit {
            chunk_id: id.to_string(),
            text: format!("text {}", id),
            source: "doc.pdf".to_string(),
            page: Some(1),
            chunk_index: 0,
            distance,
        }
    }

    #[test]
    fn test_squared_l2_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert_eq!(squared_l2(&a, &a), 0.0);
    }

    #[test]
    fn test_squared_l2_orthogonal_unit() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((squared_l2(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_squared_l2_dimension_mismatch() {
        assert_eq!(squared_l2(&[1.0], &[1.0, 2.0]), f32::INFINITY);
    }

    #[test]
    fn test_rank_hits_orders_and_truncates() {
        let ranked = rank_hits(vec![hit("c", 0.9), hit("a", 0.1), hit("b", 0.5)], 2);
        let ids: Vec<_> = ranked.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
