//! 설정 모듈
//!
//! JSON 설정 파일 로드, 기본값, 환경변수 오버라이드, 검증을 담당합니다.
//! 설정 파일이 없으면 기본값으로 동작합니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QaError, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.pdfqa/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pdfqa")
}

// ============================================================================
// Defaults
// ============================================================================

fn default_index_dir() -> PathBuf {
    get_data_dir().join("index")
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_embedding_model() -> String {
    crate::embedding::DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_llm_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    3
}

fn default_temperature() -> f32 {
    0.0
}

fn default_fallback_answer() -> String {
    crate::prompt::DEFAULT_FALLBACK_ANSWER.to_string()
}

// ============================================================================
// Config
// ============================================================================

/// 환경변수 오버라이드 키
const ENV_INDEX_DIR: &str = "PDFQA_INDEX_DIR";
const ENV_EMBEDDING_MODEL: &str = "PDFQA_EMBEDDING_MODEL";
const ENV_LLM_MODEL: &str = "PDFQA_LLM_MODEL";

/// pdfqa 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 인덱스 저장 디렉토리
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// `ingest` 기본 PDF 폴더
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// 임베딩 모델 식별자 (예: `all-MiniLM-L6-v2`, `hash-384`, `gemini-embedding-001@768`)
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// LLM 모델 식별자
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// 최대 청크 크기 (문자 수)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// 청크 간 오버랩 (문자 수)
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// 질의당 검색 청크 수
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// 디코딩 temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// 컨텍스트에 답이 없을 때 모델이 말해야 하는 문장
    #[serde(default = "default_fallback_answer")]
    pub fallback_answer: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            documents_dir: default_documents_dir(),
            embedding_model: default_embedding_model(),
            llm_model: default_llm_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            temperature: default_temperature(),
            fallback_answer: default_fallback_answer(),
        }
    }
}

impl Config {
    /// 기본 설정 파일 경로 (~/.pdfqa/config.json)
    pub fn default_path() -> PathBuf {
        get_data_dir().join("config.json")
    }

    /// 설정 로드
    ///
    /// `path`가 주어졌는데 파일이 없으면 설정 오류입니다.
    /// 기본 경로에 파일이 없으면 기본값을 사용합니다.
    /// 로드 후 환경변수 오버라이드와 검증을 적용합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::debug!("No config file at {:?}, using defaults", default_path);
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// JSON 파일에서 읽기 (검증 없음)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QaError::Config(format!("cannot read config file {:?}: {}", path, e))
        })?;

        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            QaError::Config(format!("invalid config file {:?}: {}", path, e))
        })?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// 환경변수 오버라이드 적용
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = non_empty_env(ENV_INDEX_DIR) {
            self.index_dir = PathBuf::from(dir);
        }
        if let Some(model) = non_empty_env(ENV_EMBEDDING_MODEL) {
            self.embedding_model = model;
        }
        if let Some(model) = non_empty_env(ENV_LLM_MODEL) {
            self.llm_model = model;
        }
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(QaError::Config("chunk_size must be greater than 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QaError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(QaError::Config("top_k must be greater than 0".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(QaError::Config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.index_dir.as_os_str().is_empty() {
            return Err(QaError::Config("index_dir must not be empty".into()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(QaError::Config("embedding_model must not be empty".into()));
        }
        if self.llm_model.trim().is_empty() {
            return Err(QaError::Config("llm_model must not be empty".into()));
        }
        Ok(())
    }

    /// 청킹 설정으로 변환
    pub fn chunk_config(&self) -> crate::knowledge::ChunkConfig {
        crate::knowledge::ChunkConfig {
            max_characters: self.chunk_size,
            overlap_characters: self.chunk_overlap,
        }
    }
}

/// 비어있지 않은 환경변수 값
pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Tests
// ============================================================================
