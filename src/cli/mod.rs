//! CLI 모듈
//!
//! pdfqa CLI 명령어 정의 및 구현

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::collector::{CollectionStats, FileCollector};
use crate::config::Config;
use crate::embedding::{all_model_files_present, create_embedder, default_model_dir, EmbeddingModel, EmbeddingProvider};
use crate::engine::{open_index, retrieve, QueryEngine, QueryOutcome};
use crate::ingest::{ingest_batch, IngestProgress};
use crate::knowledge::{read_manifest, DocumentIndex, SearchHit, TextChunker};
use crate::llm::{has_groq_api_key, CompletionProvider, LazyCompletion, TextStream};
use crate::session::{ChatSession, Role};

/// 검색 진단 출력 시 본문 미리보기 길이
const PREVIEW_CHARS: usize = 300;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "pdfqa")]
#[command(version, about = "PDF 문서 기반 질의응답 (RAG)", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: <데이터 디렉토리>/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 인덱스 디렉토리 (설정값보다 우선)
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF 파일 또는 폴더를 인덱스에 추가
    Ingest {
        /// 수집할 폴더 경로 (재귀, 기본: 설정의 documents_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 수집할 PDF 파일 경로
        #[arg(long, conflicts_with = "dir")]
        file: Option<PathBuf>,
    },

    /// 검색 결과 진단 (LLM 호출 없음)
    Search {
        /// 질문
        question: String,

        /// 검색 개수
        #[arg(short)]
        k: Option<usize>,
    },

    /// 문서 기반 답변
    Query {
        /// 질문
        question: String,

        /// 검색 개수
        #[arg(short)]
        k: Option<usize>,

        /// 답변을 생성되는 대로 출력
        #[arg(long)]
        stream: bool,
    },

    /// 대화 모드 (세션 범위 인덱스)
    Chat {
        /// 시작 시 로드할 PDF 파일
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(index_dir) = cli.index_dir {
        config.index_dir = index_dir;
    }

    match cli.command {
        Commands::Ingest { dir, file } => cmd_ingest(&config, dir, file).await,
        Commands::Search { question, k } => cmd_search(&config, &question, k).await,
        Commands::Query { question, k, stream } => cmd_query(&config, &question, k, stream).await,
        Commands::Chat { file } => cmd_chat(&config, file).await,
        Commands::Status => cmd_status(&config, cli.config.as_deref()).await,
    }
}

fn chunker(config: &Config) -> TextChunker {
    TextChunker::new(config.chunk_config())
}

async fn embedder(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(create_embedder(&config.embedding_model).await?)
}

/// Groq 클라이언트 (API 키는 첫 LLM 호출 때 확인)
fn llm_client(config: &Config) -> Arc<dyn CompletionProvider> {
    Arc::new(LazyCompletion::groq(config.llm_model.clone(), config.temperature))
}

fn resolve_k(k: Option<usize>, config: &Config) -> Result<usize> {
    match k {
        Some(0) => bail!("-k는 1 이상이어야 합니다"),
        Some(k) => Ok(k),
        None => Ok(config.top_k),
    }
}

fn print_not_indexed(config: &Config) {
    println!("[!] 인덱싱된 문서가 없습니다: {}", config.index_dir.display());
    println!("    먼저 실행: pdfqa ingest --dir <PDF 폴더>");
}

fn print_no_matches() {
    println!("[!] 인덱스가 비어 있어 관련 문서를 찾지 못했습니다.");
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인제스트 명령어 (ingest)
///
/// PDF를 페이지 단위로 읽어 청킹/임베딩 후 디스크 인덱스에 추가합니다.
async fn cmd_ingest(config: &Config, dir: Option<PathBuf>, file: Option<PathBuf>) -> Result<()> {
    let collector = FileCollector::with_defaults();

    let files = if let Some(ref file_path) = file {
        vec![collector.collect_file(file_path)?]
    } else {
        let dir = dir.unwrap_or_else(|| config.documents_dir.clone());
        if FileCollector::prepare_directory(&dir)? {
            println!("[!] 문서 폴더가 없어 생성했습니다: {}", dir.display());
            println!("    PDF 파일을 넣은 뒤 다시 실행하세요.");
            return Ok(());
        }
        collector.collect_directory(&dir)?
    };

    if files.is_empty() {
        println!("[!] 수집할 PDF 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: PDF {} 개 ({})", stats.total_files, format_bytes(stats.total_size));
    println!("[*] 임베딩 모델: {}", config.embedding_model);
    println!();

    let index = DocumentIndex::create_or_open(&config.index_dir, embedder(config).await?, chunker(config)).await?;

    let paths: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();
    let report = ingest_batch(&index, &paths, |progress| match progress {
        IngestProgress::Started { index, total, path } => {
            print!("[{}/{}] {}... ", index + 1, total, file_name(path));
            std::io::stdout().flush().ok();
        }
        IngestProgress::Done(file) => {
            println!("완료 ({} 페이지, {} 청크)", file.pages, file.chunks);
        }
        IngestProgress::Skipped(failure) => {
            println!("실패: {}", failure.error);
        }
    })
    .await?;

    println!();
    println!(
        "[OK] 완료: 성공 {}, 실패 {} ({} 페이지, 청크 {} 개)",
        report.ingested.len(),
        report.failures.len(),
        report.total_pages(),
        report.total_chunks()
    );
    println!("     인덱스: {}", config.index_dir.display());

    Ok(())
}

/// 검색 진단 명령어 (search)
///
/// 순위, 거리, 출처, 본문 앞부분을 출력합니다.
async fn cmd_search(config: &Config, question: &str, k: Option<usize>) -> Result<()> {
    let k = resolve_k(k, config)?;
    let index = open_index(&config.index_dir, embedder(config).await?, chunker(config)).await?;

    println!("[*] 검색 중: \"{}\"", question);

    let hits = match retrieve(index.as_ref(), question, k).await? {
        QueryOutcome::Found(hits) => hits,
        QueryOutcome::NotIndexed => {
            print_not_indexed(config);
            return Ok(());
        }
        QueryOutcome::NoMatches => {
            print_no_matches();
            return Ok(());
        }
    };

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [거리: {:.4}] {}", i + 1, hit.distance, format_location(hit));
        println!("   내용: {}", truncate_text(&hit.text, PREVIEW_CHARS));
        println!();
    }

    Ok(())
}

/// 질의 명령어 (query)
///
/// 검색 결과가 없으면 LLM 클라이언트를 만들지 않고 끝납니다.
async fn cmd_query(config: &Config, question: &str, k: Option<usize>, stream: bool) -> Result<()> {
    let k = resolve_k(k, config)?;
    let index = open_index(&config.index_dir, embedder(config).await?, chunker(config)).await?;
    let engine = QueryEngine::from_config(config, llm_client(config)).with_top_k(k);

    println!("[*] 질문: \"{}\"", question);
    println!();

    let hits = if stream {
        match engine.answer_stream(index.as_ref(), question).await? {
            QueryOutcome::Found(mut answer) => {
                let mut text = String::new();
                render_stream(
                    &mut answer.stream,
                    &mut std::io::stdout(),
                    &mut text,
                    futures::future::pending::<()>(),
                )
                .await?;
                answer.hits
            }
            QueryOutcome::NotIndexed => {
                print_not_indexed(config);
                return Ok(());
            }
            QueryOutcome::NoMatches => {
                print_no_matches();
                return Ok(());
            }
        }
    } else {
        match engine.answer(index.as_ref(), question).await? {
            QueryOutcome::Found(answer) => {
                println!("{}", answer.text.trim());
                answer.hits
            }
            QueryOutcome::NotIndexed => {
                print_not_indexed(config);
                return Ok(());
            }
            QueryOutcome::NoMatches => {
                print_no_matches();
                return Ok(());
            }
        }
    };

    println!();
    print_sources(&hits);
    Ok(())
}

/// 대화 명령어 (chat)
///
/// 세션 범위 메모리 인덱스에 PDF를 로드하고 질문마다 스트림으로 답변합니다.
/// 세션 명령: `/load <파일>`, `/history`, `/clear`, `/quit`
///
/// 답변 중 Ctrl-C는 생성만 중단하고, 프롬프트에서 Ctrl-C/Ctrl-D 또는 `/quit`은 종료합니다.
/// 설정 에러(API 키 누락 등)는 세션을 끝내고 비정상 종료합니다.
async fn cmd_chat(config: &Config, file: Option<PathBuf>) -> Result<()> {
    let engine = QueryEngine::from_config(config, llm_client(config));
    let mut session = ChatSession::new(embedder(config).await?, chunker(config));

    println!("pdfqa chat (모델: {})", engine.llm().model());
    println!("    /load <파일>, /history, /clear");
    println!("    종료: /quit (또는 프롬프트에서 Ctrl-C / Ctrl-D), 답변 중 Ctrl-C는 생성 중단");
    if !has_groq_api_key() {
        println!("[!] GROQ_API_KEY가 설정되지 않아 질문에 답할 수 없습니다.");
    }
    println!();

    if let Some(path) = file {
        load_into_session(&mut session, &path).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("입력 읽기 실패")?,
            _ = interrupted() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" | "exit" => break,
                "load" if !arg.trim().is_empty() => {
                    load_into_session(&mut session, Path::new(arg.trim())).await;
                }
                "history" => {
                    for turn in session.history() {
                        let who = match turn.role {
                            Role::User => "사용자",
                            Role::Assistant => "답변",
                        };
                        println!("[{}] {}", who, truncate_text(&turn.content, 120));
                    }
                }
                "clear" => {
                    session.clear_history();
                    println!("[OK] 대화 기록을 지웠습니다.");
                }
                _ => println!("[!] 알 수 없는 명령: /{}", command),
            }
            continue;
        }

        match session.ask(&engine, line).await {
            Ok(QueryOutcome::Found(mut answer)) => {
                let mut reply = String::new();
                let end = render_stream(&mut answer.stream, &mut std::io::stdout(), &mut reply, interrupted()).await;
                match end {
                    Ok(StreamEnd::Completed) => {}
                    Ok(StreamEnd::Cancelled) => println!("[!] 답변 생성을 중단했습니다."),
                    Err(e) => println!("[!] {}", e),
                }
                // 중단/에러 때도 받은 부분까지 기록
                session.record_answer(reply);
            }
            Ok(QueryOutcome::NotIndexed) => {
                println!("[!] 먼저 PDF를 로드하세요: /load <파일>");
            }
            Ok(QueryOutcome::NoMatches) => print_no_matches(),
            Err(e) if e.is_config() => return Err(e.into()),
            Err(e) => println!("[!] {}", e),
        }
        println!();
    }

    Ok(())
}

async fn load_into_session(session: &mut ChatSession, path: &Path) {
    println!("[*] 로드 중: {}", path.display());
    match session.load_pdf(path).await {
        Ok(file) => println!("[OK] {} 페이지, {} 청크", file.pages, file.chunks),
        Err(e) => println!("[!] 로드 실패: {}", e),
    }
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config, config_path: Option<&Path>) -> Result<()> {
    println!("pdfqa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config_path = config_path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);
    println!("[*] 설정 파일: {}", config_path.display());
    println!("[*] 인덱스 디렉토리: {}", config.index_dir.display());
    println!("[*] 임베딩 모델: {}", config.embedding_model);
    println!("[*] LLM 모델: {} (temperature {})", config.llm_model, config.temperature);
    println!(
        "[*] 청크: {} 자 / 오버랩 {} 자, k = {}",
        config.chunk_size, config.chunk_overlap, config.top_k
    );

    if has_groq_api_key() {
        println!("[OK] GROQ_API_KEY: 설정됨");
    } else {
        println!("[!] GROQ_API_KEY: 미설정");
        println!("    설정: export GROQ_API_KEY=your-key");
    }

    let model = EmbeddingModel::parse(&config.embedding_model)?;
    if model == EmbeddingModel::MiniLm {
        let model_dir = default_model_dir();
        if all_model_files_present(&model_dir) {
            println!("[OK] 임베딩 모델 파일: {}", model_dir.display());
        } else {
            println!("[!] 임베딩 모델 파일 없음: {} (첫 인제스트/질의 때 다운로드)", model_dir.display());
        }
    }
    if model.requires_api_key() {
        if crate::embedding::get_gemini_api_key().is_ok() {
            println!("[OK] GEMINI_API_KEY: 설정됨");
        } else {
            println!("[!] GEMINI_API_KEY: 미설정 (임베딩 모델에 필요)");
        }
    }

    println!();

    let Some(manifest) = read_manifest(&config.index_dir)? else {
        print_not_indexed(config);
        return Ok(());
    };

    println!(
        "[OK] 인덱스 생성: {} ({}, {} 차원)",
        manifest.created_at.format("%Y-%m-%d %H:%M"),
        manifest.embedding_model,
        manifest.dimension
    );

    if manifest.embedding_model != model.id() {
        println!(
            "[!] 설정된 임베딩 모델({})이 인덱스와 다릅니다. 질의 전에 다시 인제스트하세요.",
            model.id()
        );
        return Ok(());
    }

    match DocumentIndex::open_existing(&config.index_dir, embedder(config).await?, chunker(config)).await {
        Ok(index) => {
            let stats = index.stats().await?;
            println!("[OK] 벡터 인덱스: {} 청크", stats.chunk_count);
            if let Some(catalog) = stats.catalog {
                println!("[OK] 인제스트된 파일: {} 건", catalog.source_count);
            }
            if let Some(catalog) = index.catalog() {
                for source in catalog.list_sources(5)? {
                    println!(
                        "     {} | {} ({} 페이지, {} 청크)",
                        source.ingested_at.format("%Y-%m-%d %H:%M"),
                        source.path,
                        source.pages,
                        source.chunks
                    );
                }
            }
        }
        Err(e) => {
            println!("[!] 인덱스 열기 실패: {}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Rendering
// ============================================================================

/// 스트림 출력이 끝난 방식
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Completed,
    Cancelled,
}

/// 스트림 답변을 조각마다 `out`에 쓰고 `text`에 모음
///
/// `cancel`이 먼저 끝나면 멈춥니다. 에러나 취소 때도 받은 조각은 `text`에 남습니다.
async fn render_stream<W, C>(stream: &mut TextStream, out: &mut W, text: &mut String, cancel: C) -> Result<StreamEnd>
where
    W: Write,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    loop {
        let piece = tokio::select! {
            piece = stream.next() => piece,
            _ = &mut cancel => {
                writeln!(out)?;
                return Ok(StreamEnd::Cancelled);
            }
        };

        let Some(piece) = piece else {
            break;
        };
        let piece = match piece {
            Ok(piece) => piece,
            Err(e) => {
                writeln!(out)?;
                return Err(e.into());
            }
        };
        write!(out, "{}", piece)?;
        out.flush()?;
        text.push_str(&piece);
    }
    writeln!(out)?;

    Ok(StreamEnd::Completed)
}

/// Ctrl-C 대기 (핸들러를 설치할 수 없으면 끝나지 않음)
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        futures::future::pending::<()>().await;
    }
}

fn print_sources(hits: &[SearchHit]) {
    println!("출처:");
    for hit in hits {
        println!("  - {}", format_location(hit));
    }
}

fn format_location(hit: &SearchHit) -> String {
    match hit.page {
        Some(page) => format!("{} (p.{})", hit.source, page),
        None => hit.source.clone(),
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("unknown")
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
