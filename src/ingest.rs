//! 인제스트 배치 처리
//!
//! PDF 로드 → 청킹 → 임베딩 → 저장을 파일 단위로 수행합니다.
//! 문서 하나를 읽지 못해도([`QaError::Input`]) 배치는 계속되고,
//! 실패는 [`IngestReport`]에 모입니다. 저장소/서비스 에러는 배치를 중단합니다.

use std::path::{Path, PathBuf};

use crate::error::{QaError, Result};
use crate::extractor;
use crate::knowledge::DocumentIndex;

/// 인제스트된 파일 한 건
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub pages: usize,
    pub chunks: usize,
}

/// 건너뛴 파일 한 건
#[derive(Debug)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub error: QaError,
}

/// 배치 결과
#[derive(Debug, Default)]
pub struct IngestReport {
    pub ingested: Vec<IngestedFile>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn total_pages(&self) -> usize {
        self.ingested.iter().map(|f| f.pages).sum()
    }

    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|f| f.chunks).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 파일별 진행 상황
#[derive(Debug)]
pub enum IngestProgress<'a> {
    Started { index: usize, total: usize, path: &'a Path },
    Done(&'a IngestedFile),
    Skipped(&'a IngestFailure),
}

/// PDF 파일 하나를 인덱스에 추가
pub async fn ingest_file(index: &DocumentIndex, path: &Path) -> Result<IngestedFile> {
    let pages = extractor::load_pdf(path).await?;
    let chunks = index.ingest(path, &pages).await?;

    Ok(IngestedFile {
        path: path.to_path_buf(),
        pages: pages.len(),
        chunks,
    })
}

/// 여러 PDF 파일을 순서대로 인제스트
///
/// `on_progress`는 파일마다 시작/완료/건너뜀 시점에 호출됩니다.
pub async fn ingest_batch<F>(index: &DocumentIndex, paths: &[PathBuf], mut on_progress: F) -> Result<IngestReport>
where
    F: FnMut(IngestProgress<'_>),
{
    let mut report = IngestReport::default();

    for (i, path) in paths.iter().enumerate() {
        on_progress(IngestProgress::Started {
            index: i,
            total: paths.len(),
            path,
        });

        match ingest_file(index, path).await {
            Ok(file) => {
                on_progress(IngestProgress::Done(&file));
                report.ingested.push(file);
            }
            Err(error @ QaError::Input { .. }) => {
                tracing::warn!("Skipping {:?}: {}", path, error);
                let failure = IngestFailure {
                    path: path.clone(),
                    error,
                };
                on_progress(IngestProgress::Skipped(&failure));
                report.failures.push(failure);
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "Ingestion finished: {} files, {} pages, {} chunks, {} skipped",
        report.ingested.len(),
        report.total_pages(),
        report.total_chunks(),
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::TextChunker;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_batch_continues_past_unreadable_documents() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"this is not a pdf").unwrap();
        let missing = dir.path().join("missing.pdf");

        let index = DocumentIndex::in_memory(Arc::new(HashEmbedding::new(32)), TextChunker::with_defaults());

        let mut events = Vec::new();
        let report = ingest_batch(&index, &[broken.clone(), missing.clone()], |event| {
            events.push(match event {
                IngestProgress::Started { .. } => "started",
                IngestProgress::Done(_) => "done",
                IngestProgress::Skipped(_) => "skipped",
            })
        })
        .await
        .unwrap();

        assert_eq!(events, vec!["started", "skipped", "started", "skipped"]);
        assert!(report.ingested.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].path, broken);
        assert_eq!(report.failures[1].path, missing);
        assert!(!report.is_clean());
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_ingests_readable_pdf_beside_broken_one() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("lease.pdf");
        std::fs::write(
            &good,
            extractor::pdf::fixtures::pdf_with_pages(&[
                "The tenant shall pay rent monthly.",
                "The landlord handles structural repairs.",
            ]),
        )
        .unwrap();
        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"this is not a pdf").unwrap();

        let index = DocumentIndex::in_memory(Arc::new(HashEmbedding::new(32)), TextChunker::with_defaults());
        let report = ingest_batch(&index, &[broken, good.clone()], |_| {}).await.unwrap();

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.ingested[0].path, good);
        assert_eq!(report.total_pages(), 2);
        assert_eq!(report.total_chunks(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(index.count().await.unwrap(), 2);

        let hits = index.search("structural repairs", 1).await.unwrap();
        assert_eq!(hits[0].page, Some(2));
    }

    #[test]
    fn test_report_totals() {
        let report = IngestReport {
            ingested: vec![
                IngestedFile {
                    path: "a.pdf".into(),
                    pages: 2,
                    chunks: 5,
                },
                IngestedFile {
                    path: "b.pdf".into(),
                    pages: 1,
                    chunks: 1,
                },
            ],
            failures: vec![],
        };
        assert_eq!(report.total_pages(), 3);
        assert_eq!(report.total_chunks(), 6);
        assert!(report.is_clean());
    }
}
