//! 에러 타입
//!
//! 파이프라인 단계 경계에서 하위 에러(anyhow, reqwest, rusqlite, lancedb)를
//! 사용자에게 보여줄 수 있는 종류 + 메시지로 변환합니다.

use std::path::PathBuf;

use thiserror::Error;

/// 서비스 에러 분류 (재시도 가능 여부)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// 네트워크 오류, 429, 5xx 등 일시적 실패
    Transient,
    /// 인증 실패, 잘못된 요청 등 재시도해도 실패
    Permanent,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceErrorKind::Transient => write!(f, "transient"),
            ServiceErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// pdfqa 에러
#[derive(Debug, Error)]
pub enum QaError {
    /// 설정 오류 (API 키 누락, 잘못된 경로/값). 치명적, 재시도 없음
    #[error("Configuration error: {0}")]
    Config(String),

    /// 인덱스의 임베딩 모델과 현재 설정이 다름
    #[error(
        "Embedding model mismatch: index at {path:?} was built with '{indexed}', \
         but '{configured}' is configured"
    )]
    ModelMismatch {
        path: PathBuf,
        indexed: String,
        configured: String,
    },

    /// 문서를 읽거나 파싱할 수 없음 (문서 단위로 보고)
    #[error("Input error ({source_path:?}): {message}")]
    Input {
        source_path: PathBuf,
        message: String,
    },

    /// 인덱스가 한 번도 생성되지 않음
    #[error("No documents indexed at {0:?}. Run `pdfqa ingest` first.")]
    NoIndex(PathBuf),

    /// 임베딩/LLM 서비스 호출 실패
    #[error("Service error ({service}, {kind}): {message}")]
    Service {
        service: String,
        kind: ServiceErrorKind,
        message: String,
    },

    /// 벡터 저장소 또는 카탈로그 실패
    #[error("Storage error: {0}")]
    Storage(String),
}

impl QaError {
    /// 서비스 에러 생성 헬퍼
    pub fn service(service: impl Into<String>, kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            kind,
            message: message.into(),
        }
    }

    /// 하위 저장소 에러를 Storage로 변환 (원인 체인 포함)
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    /// 재시도하면 성공할 수 있는 에러인지
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QaError::Service {
                kind: ServiceErrorKind::Transient,
                ..
            }
        )
    }

    /// 설정/전제조건 에러인지 (대화 모드는 이 에러에서 세션을 끝냄)
    pub fn is_config(&self) -> bool {
        matches!(self, QaError::Config(_) | QaError::ModelMismatch { .. })
    }
}

/// pdfqa Result 타입
pub type Result<T> = std::result::Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_display() {
        let err = QaError::service("groq", ServiceErrorKind::Transient, "rate limited");
        assert_eq!(err.to_string(), "Service error (groq, transient): rate limited");
        assert!(err.is_transient());
        assert!(!err.is_config());
    }

    #[test]
    fn test_storage_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to add vectors");
        let err = QaError::storage(inner);
        assert_eq!(err.to_string(), "Storage error: Failed to add vectors: disk full");
    }

    #[test]
    fn test_config_kinds() {
        assert!(QaError::Config("missing key".into()).is_config());
        let mismatch = QaError::ModelMismatch {
            path: PathBuf::from("idx"),
            indexed: "hash-384".into(),
            configured: "gemini-embedding-001@768".into(),
        };
        assert!(mismatch.is_config());
        assert!(!QaError::NoIndex(PathBuf::from("idx")).is_config());
    }
}
