//! 로컬 문장 임베딩 (ONNX Runtime)
//!
//! all-MiniLM-L6-v2 ONNX 모델을 `ort`로 실행하고, 어텐션 마스크 가중 평균 풀링 후
//! L2 정규화합니다. 모델 파일이 없으면 HuggingFace에서 한 번 내려받습니다.
//!
//! `ort`는 `load-dynamic`으로 빌드되므로 실행 시 ONNX Runtime 공유 라이브러리가
//! 필요합니다 (`ORT_DYLIB_PATH`).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use super::{EmbeddingModel, EmbeddingProvider};
use crate::error::{QaError, Result, ServiceErrorKind};

/// 모델 이름 (모델 식별자 접두사)
pub const MINILM_MODEL: &str = "all-MiniLM-L6-v2";

/// all-MiniLM-L6-v2 출력 차원
pub const MINILM_DIMENSION: usize = 384;

/// sentence-transformers 설정의 최대 시퀀스 길이
const MAX_SEQ_LENGTH: usize = 256;

/// HuggingFace 모델 파일 기본 URL
const HF_BASE: &str = "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

/// 필요한 파일 (로컬 이름, 원격 경로)
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
];

// ============================================================================
// Model Files
// ============================================================================

/// 모델 디렉토리 (`PDFQA_MODEL_DIR` 우선, 기본: <데이터 디렉토리>/models/all-MiniLM-L6-v2)
pub fn default_model_dir() -> PathBuf {
    crate::config::non_empty_env("PDFQA_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| crate::config::get_data_dir().join("models").join(MINILM_MODEL))
}

/// 모델 파일이 모두 있는지
pub fn all_model_files_present(model_dir: &Path) -> bool {
    MODEL_FILES.iter().all(|(name, _)| model_dir.join(name).is_file())
}

/// 없는 모델 파일 다운로드
///
/// 이미 있는 파일은 건너뜁니다. 내려받는 중에는 `.part` 파일에 쓰고
/// 완료 후 이름을 바꾸므로 중단되어도 반쪽 파일이 남지 않습니다.
pub async fn download_model_files(model_dir: &Path) -> Result<()> {
    if all_model_files_present(model_dir) {
        return Ok(());
    }

    tokio::fs::create_dir_all(model_dir).await.map_err(|e| {
        QaError::Config(format!("Failed to create model directory {:?}: {}", model_dir, e))
    })?;

    let client = reqwest::Client::new();

    for &(filename, remote_path) in MODEL_FILES {
        let dest = model_dir.join(filename);
        if dest.is_file() {
            continue;
        }

        let url = format!("{}/{}", HF_BASE, remote_path);
        tracing::info!("Downloading {} from {}", filename, url);

        let bytes = client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(filename, e))?
            .bytes()
            .await
            .map_err(|e| download_error(filename, e))?;

        let partial = dest.with_extension("part");
        let write_error = |e: std::io::Error| QaError::Config(format!("Failed to write {:?}: {}", dest, e));
        tokio::fs::write(&partial, &bytes).await.map_err(write_error)?;
        tokio::fs::rename(&partial, &dest).await.map_err(write_error)?;

        tracing::info!("Downloaded {} ({} bytes)", filename, bytes.len());
    }

    Ok(())
}

fn download_error(filename: &str, err: reqwest::Error) -> QaError {
    QaError::service(
        "huggingface",
        ServiceErrorKind::Transient,
        format!("Failed to download {}: {}", filename, err),
    )
}

// ============================================================================
// OnnxEmbedding
// ============================================================================

/// ONNX 세션과 토크나이저
struct MiniLmModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

/// all-MiniLM-L6-v2 로컬 임베딩
#[derive(Clone)]
pub struct OnnxEmbedding {
    model: Arc<MiniLmModel>,
}

impl std::fmt::Debug for OnnxEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbedding").field("model", &MINILM_MODEL).finish()
    }
}

impl OnnxEmbedding {
    /// 모델 디렉토리에서 로드 (`model.onnx`, `tokenizer.json` 필요)
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !all_model_files_present(model_dir) {
            return Err(QaError::Config(format!(
                "{} model files not found in {:?} (expected model.onnx and tokenizer.json)",
                MINILM_MODEL, model_dir
            )));
        }

        tracing::info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| QaError::Config(format!("Failed to create ONNX session: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| QaError::Config(format!("Failed to configure ONNX threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| QaError::Config(format!("Failed to load ONNX model: {}", e)))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| QaError::Config(format!("Failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| QaError::Config(format!("Failed to configure tokenizer: {}", e)))?;
        tokenizer.with_padding(None::<PaddingParams>);

        Ok(Self {
            model: Arc::new(MiniLmModel {
                session: Mutex::new(session),
                tokenizer,
            }),
        })
    }

    /// 모델 파일을 준비(필요 시 다운로드)한 뒤 로드
    pub async fn from_model_dir(model_dir: &Path) -> Result<Self> {
        download_model_files(model_dir).await?;
        let dir = model_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::load(&dir))
            .await
            .map_err(|e| QaError::Config(format!("Model loading task failed: {}", e)))?
    }

    fn inference_error(message: String) -> QaError {
        QaError::service(MINILM_MODEL, ServiceErrorKind::Permanent, message)
    }
}

impl MiniLmModel {
    /// 동기 임베딩 (blocking 스레드에서 호출)
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| OnnxEmbedding::inference_error(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
        let seq_len = input_ids.len();

        let tensor = |data: Vec<i64>, name: &str| {
            Tensor::from_array(([1usize, seq_len], data))
                .map_err(|e| OnnxEmbedding::inference_error(format!("Invalid {} tensor: {}", name, e)))
        };
        let input_ids_val = tensor(input_ids, "input_ids")?;
        let attention_mask_val = tensor(attention_mask.clone(), "attention_mask")?;
        let token_type_ids_val = tensor(vec![0i64; seq_len], "token_type_ids")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| OnnxEmbedding::inference_error(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| OnnxEmbedding::inference_error(format!("Inference failed: {}", e)))?;

        // last_hidden_state: [1, seq_len, 384]
        let (_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OnnxEmbedding::inference_error(format!("Unexpected model output: {}", e)))?;

        if hidden.len() != seq_len * MINILM_DIMENSION {
            return Err(OnnxEmbedding::inference_error(format!(
                "Unexpected hidden state size {} for {} tokens",
                hidden.len(),
                seq_len
            )));
        }

        Ok(l2_normalize(mean_pooling(hidden, &attention_mask, MINILM_DIMENSION)))
    }
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || model.embed_sync(&text))
            .await
            .map_err(|e| Self::inference_error(format!("Embedding task failed: {}", e)))?
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || texts.iter().map(|t| model.embed_sync(t)).collect::<Result<Vec<_>>>())
            .await
            .map_err(|e| Self::inference_error(format!("Embedding task failed: {}", e)))?
    }

    fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }

    fn model_id(&self) -> String {
        EmbeddingModel::MiniLm.id()
    }
}

// ============================================================================
// Pooling
// ============================================================================

/// 어텐션 마스크 가중 평균 풀링
///
/// `hidden`은 `[seq_len, hidden_size]`를 평탄화한 배열입니다.
fn mean_pooling(hidden: &[f32], attention_mask: &[i64], hidden_size: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_size];
    let mut mask_sum = 0.0f32;

    for (token, row) in hidden.chunks_exact(hidden_size).enumerate() {
        let mask = attention_mask.get(token).copied().unwrap_or(0) as f32;
        if mask == 0.0 {
            continue;
        }
        mask_sum += mask;
        for (acc, value) in pooled.iter_mut().zip(row) {
            *acc += value * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut pooled {
            *v /= mask_sum;
        }
    }
    pooled
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mean_pooling_ignores_padding() {
        // 토큰 2개, hidden 2, 두 번째는 패딩
        let hidden = vec![1.0, 2.0, 10.0, 20.0];
        assert_eq!(mean_pooling(&hidden, &[1, 0], 2), vec![1.0, 2.0]);
    }

    #[test]
    fn test_mean_pooling_averages_real_tokens() {
        let hidden = vec![1.0, 3.0, 3.0, 5.0];
        assert_eq!(mean_pooling(&hidden, &[1, 1], 2), vec![2.0, 4.0]);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_all_files_present() {
        let dir = TempDir::new().unwrap();
        assert!(!all_model_files_present(dir.path()));

        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
        assert!(!all_model_files_present(dir.path()));

        std::fs::write(dir.path().join("model.onnx"), "stub").unwrap();
        assert!(all_model_files_present(dir.path()));
    }

    #[test]
    fn test_load_without_model_files_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = OnnxEmbedding::load(dir.path()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("model.onnx"));
    }

    /// 실제 모델 파일과 ONNX Runtime 필요: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_minilm_embeds_unit_vectors() {
        let embedder = OnnxEmbedding::from_model_dir(&default_model_dir()).await.unwrap();
        let vectors = embedder
            .embed_batch(&["The term is 12 months.".to_string(), "Rent is due monthly.".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        for vector in &vectors {
            assert_eq!(vector.len(), MINILM_DIMENSION);
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-3);
        }
        assert_eq!(embedder.embed("The term is 12 months.").await.unwrap(), vectors[0]);
    }
}
