//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 페이지마다 텍스트를 따로 뽑습니다.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

/// PDF에서 페이지별 텍스트 추출
///
/// (페이지 번호, 텍스트) 목록을 반환합니다. 페이지 번호는 1부터 시작합니다.
pub fn extract_pages(path: &Path) -> Result<Vec<(u32, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;
    extract_pages_from_mem(&bytes).with_context(|| format!("Failed to extract text from PDF: {:?}", path))
}

/// 메모리의 PDF 바이트에서 페이지별 텍스트 추출
///
/// 텍스트가 없는 페이지도 번호를 유지한 채 빈 문자열로 남깁니다.
/// 문서 전체에 텍스트가 없으면 (스캔 문서 등) 빈 목록을 반환합니다.
pub fn extract_pages_from_mem(bytes: &[u8]) -> Result<Vec<(u32, String)>> {
    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes)?;
    let blank_lines = Regex::new(r"\n\s*\n(?:\s*\n)+")?;

    let pages: Vec<(u32, String)> = raw_pages
        .iter()
        .enumerate()
        .map(|(i, text)| (i as u32 + 1, normalize_page(&blank_lines, text)))
        .collect();

    if pages.iter().all(|(_, text)| text.is_empty()) {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(Vec::new());
    }

    Ok(pages)
}

/// 페이지 앞뒤 공백 제거, 연속된 빈 줄은 문단 구분 하나로 축약
fn normalize_page(blank_lines: &Regex, text: &str) -> String {
    blank_lines.replace_all(text.trim(), "\n\n").into_owned()
}

// ============================================================================
// Test fixtures
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
