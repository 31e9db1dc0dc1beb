//! 문서 / 청크 타입

use std::path::PathBuf;

/// 로드된 원문 문서 (PDF 한 페이지 단위)
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// 추출된 텍스트
    pub text: String,
    /// 원본 파일 경로
    pub source: PathBuf,
    /// 페이지 번호 (1부터 시작, 페이지 개념이 없으면 None)
    pub page: Option<u32>,
}

impl Document {
    pub fn new(text: impl Into<String>, source: impl Into<PathBuf>, page: Option<u32>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            page,
        }
    }

    /// 표시용 출처 문자열
    pub fn source_display(&self) -> String {
        self.source.display().to_string()
    }
}

/// 문서에서 잘라낸 청크 (임베딩/검색 단위)
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 청크 식별자 (UUID v4)
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    /// 원본 파일 경로
    pub source: String,
    /// 원본 페이지 번호
    pub page: Option<u32>,
    /// 문서 내 청크 순번 (0-based)
    pub chunk_index: u32,
    /// 문서 내 시작 위치 (문자 단위)
    pub start: usize,
}

/// 검색 결과 한 건
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub page: Option<u32>,
    pub chunk_index: u32,
    /// 벡터 거리 (낮을수록 유사)
    pub distance: f32,
}
