//! 파일 수집 모듈
//!
//! 인제스트할 PDF 파일을 폴더 또는 단일 경로에서 수집합니다.
//! .gitignore 패턴을 존중하고, `.pdf` 확장자만 수집합니다.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use ignore::WalkBuilder;

/// PDF 확장자인지 확인 (대소문자 무시)
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 PDF 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 경로
    pub path: PathBuf,
    /// 파일 크기 (바이트)
    pub size: u64,
    /// 수정 시간
    pub modified_at: Option<SystemTime>,
}

impl CollectedFile {
    /// 경로에서 CollectedFile 생성 (PDF가 아니거나 파일이 아니면 None)
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        if !is_pdf(&path) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            size: metadata.len(),
            modified_at: metadata.modified().ok(),
        }))
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 문서 폴더 준비: 없으면 생성하고 `true` 반환
    pub fn prepare_directory(path: &Path) -> Result<bool> {
        if path.is_dir() {
            return Ok(false);
        }
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create documents directory: {:?}", path))?;
        tracing::info!("Created documents directory {:?}", path);
        Ok(true)
    }

    /// 단일 파일 수집
    pub fn collect_file(&self, path: &Path) -> Result<CollectedFile> {
        if !path.exists() {
            anyhow::bail!("File not found: {:?}", path);
        }

        if !path.is_file() {
            anyhow::bail!("Not a file: {:?}", path);
        }

        let file = CollectedFile::from_path(path.to_path_buf())?
            .ok_or_else(|| anyhow::anyhow!("Not a PDF file: {:?}", path))?;

        if self.exceeds_size_limit(&file) {
            anyhow::bail!(
                "File too large: {:?} ({} bytes, limit {})",
                path,
                file.size,
                self.config.max_file_size
            );
        }

        Ok(file)
    }

    /// 폴더 재귀 수집 (경로순 정렬)
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        if !path.exists() {
            anyhow::bail!("Directory not found: {:?}", path);
        }

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {:?}", path);
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) => {
                    if self.exceeds_size_limit(&file) {
                        tracing::warn!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
                    } else {
                        files.push(file);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to collect file: {}", e);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!("Collected {} PDF files from {:?}", files.len(), path);
        Ok(files)
    }

    fn exceeds_size_limit(&self, file: &CollectedFile) -> bool {
        self.config.max_file_size > 0 && file.size > self.config.max_file_size
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    pub fn from_files(files: &[CollectedFile]) -> Self {
        Self {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(Path::new("contract.pdf")));
        assert!(is_pdf(Path::new("data/LEASE.PDF")));
        assert!(!is_pdf(Path::new("notes.txt")));
        assert!(!is_pdf(Path::new("pdf")));
    }

    #[test]
    fn test_collect_directory_only_pdfs_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"# notes").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.PDF"), b"%PDF-1.4").unwrap();

        let files = FileCollector::with_defaults()
            .collect_directory(dir.path())
            .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf", "c.PDF"]);

        let stats = CollectionStats::from_files(&files);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_size, 24);
    }

    #[test]
    fn test_collect_directory_missing() {
        let dir = TempDir::new().unwrap();
        let result = FileCollector::with_defaults().collect_directory(&dir.path().join("nope"));
        assert!(result.is_err());
    }

    #[test]
    fn test_collect_file_rejects_non_pdf() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, b"hello").unwrap();

        let collector = FileCollector::with_defaults();
        assert!(collector.collect_file(&txt).is_err());
        assert!(collector.collect_file(&dir.path().join("missing.pdf")).is_err());
    }

    #[test]
    fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("big.pdf");
        std::fs::write(&pdf, vec![0u8; 64]).unwrap();

        let collector = FileCollector::new(CollectorConfig {
            max_file_size: 16,
            ..Default::default()
        });
        assert!(collector.collect_file(&pdf).is_err());
        assert!(collector.collect_directory(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_prepare_directory() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("data");
        assert!(FileCollector::prepare_directory(&docs).unwrap());
        assert!(docs.is_dir());
        assert!(!FileCollector::prepare_directory(&docs).unwrap());
    }
}
