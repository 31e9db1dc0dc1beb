//! 문서 로더
//!
//! PDF 파일을 페이지 단위 [`Document`] 목록으로 변환합니다.
//! 읽기/파싱 실패는 해당 문서 하나의 [`QaError::Input`]으로 보고되며,
//! 배치의 다른 문서 처리를 막지 않습니다.

pub mod pdf;

use std::path::{Path, PathBuf};

use crate::error::{QaError, Result};
use crate::knowledge::Document;

/// PDF 파일을 페이지별 Document로 로드
pub async fn load_pdf(path: &Path) -> Result<Vec<Document>> {
    // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
    let owned = path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&owned))
        .await
        .map_err(|e| input_error(path, format!("PDF extraction task failed: {}", e)))?
        .map_err(|e| input_error(path, format!("{:#}", e)))?;

    let documents = pages_to_documents(path, pages);
    tracing::debug!("Loaded {} pages from {:?}", documents.len(), path);
    Ok(documents)
}

/// (페이지 번호, 텍스트) 목록을 Document로 변환
pub fn pages_to_documents(source: &Path, pages: Vec<(u32, String)>) -> Vec<Document> {
    pages
        .into_iter()
        .map(|(page, text)| Document::new(text, source, Some(page)))
        .collect()
}

fn input_error(path: &Path, message: String) -> QaError {
    QaError::Input {
        source_path: PathBuf::from(path),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pages_to_documents_inherit_source() {
        let docs = pages_to_documents(
            Path::new("data/lease.pdf"),
            vec![(1, "First page".into()), (2, "Second page".into())],
        );
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].page, Some(2));
        assert_eq!(docs[1].source, PathBuf::from("data/lease.pdf"));
        assert_eq!(docs[0].text, "First page");
    }

    #[tokio::test]
    async fn test_load_pdf_returns_one_document_per_page() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("contract.pdf");
        std::fs::write(
            &path,
            pdf::fixtures::pdf_with_pages(&["Alpha page text here", "Beta page text here"]),
        )
        .unwrap();

        let docs = load_pdf(&path).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page, Some(1));
        assert_eq!(docs[0].text, "Alpha page text here");
        assert_eq!(docs[1].page, Some(2));
        assert_eq!(docs[1].text, "Beta page text here");
        assert!(docs.iter().all(|d| d.source == path));
    }

    #[tokio::test]
    async fn test_load_missing_pdf_is_input_error() {
        let dir = TempDir::new().unwrap();
        let result = load_pdf(&dir.path().join("missing.pdf")).await;
        assert!(matches!(result, Err(QaError::Input { .. })));
    }

    #[tokio::test]
    async fn test_load_corrupt_pdf_is_input_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();

        match load_pdf(&path).await {
            Err(QaError::Input { source_path, .. }) => assert_eq!(source_path, path),
            other => panic!("expected input error, got {:?}", other.map(|d| d.len())),
        }
    }
}
