//! 컨텍스트 조립 / 프롬프트 생성
//!
//! 검색된 청크 텍스트만 구분자로 이어 붙여 컨텍스트 블록을 만들고,
//! 컨텍스트와 질문 두 슬롯만 가진 고정 템플릿에 채웁니다.
//! 거리 점수는 진단용이며 모델에게 전달하지 않습니다.

use crate::knowledge::SearchHit;

/// 컨텍스트 블록 내 청크 구분자
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

/// 컨텍스트에 답이 없을 때의 기본 응답 문장
pub const DEFAULT_FALLBACK_ANSWER: &str = "I cannot find that information in the document.";

/// 검색 결과를 컨텍스트 블록으로 조립 (인덱스 반환 순서 유지)
pub fn assemble_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// 프롬프트 빌더
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    fallback_answer: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_ANSWER)
    }
}

impl PromptBuilder {
    pub fn new(fallback_answer: impl Into<String>) -> Self {
        Self {
            fallback_answer: fallback_answer.into(),
        }
    }

    pub fn fallback_answer(&self) -> &str {
        &self.fallback_answer
    }

    /// 컨텍스트 블록과 질문으로 프롬프트 생성
    pub fn build(&self, context: &str, question: &str) -> String {
        format!(
            "You are an expert legal assistant. Answer the user's question using ONLY the context below.\n\
             Do not use outside knowledge.\n\
             If the answer is not in the context, reply exactly: \"{fallback}\"\n\
             \n\
             CONTEXT:\n\
             {context}\n\
             \n\
             USER QUESTION:\n\
             {question}\n\
             \n\
             ANSWER:\n",
            fallback = self.fallback_answer,
            context = context,
            question = question.trim(),
        )
    }
}
