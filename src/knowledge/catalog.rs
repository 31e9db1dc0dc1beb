//! Index Catalog - rusqlite 기반 인덱스 메타데이터
//!
//! 인덱스 디렉토리의 `catalog.db`에 임베딩 모델 식별자/차원과
//! 인제스트된 원본 파일 기록을 저장합니다.
//! 카탈로그 파일이 없으면 인덱스가 생성된 적 없는 것으로 봅니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

/// 카탈로그 파일 이름
pub const CATALOG_FILE: &str = "catalog.db";

const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_DIMENSION: &str = "dimension";
const META_CREATED_AT: &str = "created_at";

// ============================================================================
// Types
// ============================================================================

/// 인덱스 생성 시점에 고정되는 정보
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
}

/// 인제스트된 원본 파일 기록
#[derive(Debug, Clone, Serialize)]
pub struct SourceRecord {
    pub id: i64,
    pub path: String,
    pub pages: usize,
    pub chunks: usize,
    pub ingested_at: DateTime<Utc>,
}

/// 카탈로그 통계
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub source_count: usize,
    pub chunk_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// Catalog
// ============================================================================

/// 인덱스 카탈로그
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl Catalog {
    /// 인덱스 디렉토리에 카탈로그가 있는지
    pub fn exists(index_dir: &Path) -> bool {
        index_dir.join(CATALOG_FILE).is_file()
    }

    /// 카탈로그 열기 (없으면 생성)
    pub fn open(index_dir: &Path) -> Result<Self> {
        if !index_dir.exists() {
            std::fs::create_dir_all(index_dir).context("Failed to create index directory")?;
        }

        let db_path = index_dir.join(CATALOG_FILE);
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open catalog database")?;

        let catalog = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        };

        catalog.initialize()?;
        Ok(catalog)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                pages INTEGER NOT NULL,
                chunks INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sources_path ON sources(path);",
        )
        .context("Failed to create catalog tables")?;

        tracing::debug!("Catalog initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 저장된 매니페스트 조회 (아직 없으면 None)
    pub fn manifest(&self) -> Result<Option<IndexManifest>> {
        let conn = self.lock()?;

        let get = |key: &str| -> Result<Option<String>> {
            conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("Failed to read meta key {}", key))
        };

        let (Some(model), Some(dimension)) = (get(META_EMBEDDING_MODEL)?, get(META_DIMENSION)?)
        else {
            return Ok(None);
        };

        let dimension = dimension
            .parse()
            .with_context(|| format!("Corrupt dimension in catalog: {}", dimension))?;
        let created_at = get(META_CREATED_AT)?
            .map(parse_datetime)
            .unwrap_or_else(Utc::now);

        Ok(Some(IndexManifest {
            embedding_model: model,
            dimension,
            created_at,
        }))
    }

    /// 매니페스트 기록 (인덱스 최초 생성 시)
    pub fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for (key, value) in [
            (META_EMBEDDING_MODEL, manifest.embedding_model.clone()),
            (META_DIMENSION, manifest.dimension.to_string()),
            (META_CREATED_AT, manifest.created_at.to_rfc3339()),
        ] {
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .context("Failed to write manifest")?;
        }

        tx.commit().context("Failed to commit manifest")?;
        tracing::info!(
            "Index manifest written: model={}, dimension={}",
            manifest.embedding_model,
            manifest.dimension
        );
        Ok(())
    }

    /// 인제스트된 원본 파일 기록
    pub fn record_source(&self, path: &str, pages: usize, chunks: usize) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO sources (path, pages, chunks, ingested_at) VALUES (?1, ?2, ?3, ?4)",
            params![path, pages as i64, chunks as i64, now],
        )
        .context("Failed to record source")?;

        Ok(conn.last_insert_rowid())
    }

    /// 최근 인제스트 목록
    pub fn list_sources(&self, limit: usize) -> Result<Vec<SourceRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, path, pages, chunks, ingested_at FROM sources
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(SourceRecord {
                id: row.get(0)?,
                path: row.get(1)?,
                pages: row.get::<_, i64>(2)? as usize,
                chunks: row.get::<_, i64>(3)? as usize,
                ingested_at: parse_datetime(row.get::<_, String>(4)?),
            })
        })?;

        let records = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read sources")?;
        Ok(records)
    }

    /// 카탈로그 통계
    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.lock()?;

        let (sources, chunks): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(chunks), 0) FROM sources",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to read catalog stats")?;

        Ok(CatalogStats {
            source_count: sources as usize,
            chunk_count: chunks as usize,
            db_path: self.db_path.clone(),
        })
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
