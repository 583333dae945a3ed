//! Index Store - rusqlite 기반 청크/빌드 메타데이터 저장소
//!
//! 인덱스 빌드 결과(청크 목록과 빌드 설정)를 저장하고,
//! 다음 실행에서 키워드 인덱스를 다시 만들 수 있게 합니다.
//! 저장 위치: <data_dir>/index.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::chunker::{Chunk, ChunkConfig};

/// 메타데이터 스키마 버전
const SCHEMA_VERSION: i64 = 1;
/// 빌드 메타데이터 키
const BUILD_META_KEY: &str = "build";

// ============================================================================
// Types
// ============================================================================

/// 인덱스 빌드 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// 청킹 설정
    pub chunk_config: ChunkConfig,
    /// 임베딩 프로바이더 이름
    pub embedding_model: String,
    /// 임베딩 차원
    pub embedding_dimension: usize,
    /// 지식베이스 SHA-256 지문
    pub kb_fingerprint: String,
    /// 청크 수
    pub chunk_count: usize,
    /// 빌드 시각
    pub built_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub document_count: usize,
    pub total_text_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// IndexStore
// ============================================================================

/// 청크 저장소
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IndexStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
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
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                doc_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                text TEXT NOT NULL,
                start_char INTEGER NOT NULL,
                end_char INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                overlaps_previous INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id, ordinal);
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("Failed to create index tables")?;

        conn.execute(
            "INSERT OR IGNORE INTO index_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .context("Failed to record schema version")?;

        tracing::debug!("Index store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 청크 전체 교체 (하나의 트랜잭션)
    ///
    /// 청크 ID는 슬라이스 위치(0부터)입니다.
    pub fn replace_chunks(&self, chunks: &[Chunk], meta: &IndexMeta) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        tx.execute("DELETE FROM chunks", [])
            .context("Failed to clear chunks")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                 (id, doc_id, ordinal, text, start_char, end_char, token_count, overlaps_previous)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for (id, chunk) in chunks.iter().enumerate() {
                stmt.execute(params![
                    id as i64,
                    chunk.doc_id,
                    chunk.ordinal as i64,
                    chunk.text,
                    chunk.start as i64,
                    chunk.end as i64,
                    chunk.token_count as i64,
                    chunk.overlaps_previous,
                ])
                .with_context(|| format!("Failed to insert chunk {}", chunk.key()))?;
            }
        }

        let meta_json = serde_json::to_string(meta).context("Failed to serialize index meta")?;
        tx.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES (?1, ?2)",
            params![BUILD_META_KEY, meta_json],
        )
        .context("Failed to store index meta")?;

        tx.commit().context("Failed to commit chunks")?;

        tracing::info!("Stored {} chunks in {:?}", chunks.len(), self.db_path);
        Ok(chunks.len())
    }

    /// 저장된 청크 전체 (ID 순)
    pub fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, doc_id, ordinal, text, start_char, end_char, token_count, overlaps_previous
             FROM chunks ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                Chunk {
                    doc_id: row.get(1)?,
                    ordinal: row.get::<_, i64>(2)? as usize,
                    text: row.get(3)?,
                    start: row.get::<_, i64>(4)? as usize,
                    end: row.get::<_, i64>(5)? as usize,
                    token_count: row.get::<_, i64>(6)? as usize,
                    overlaps_previous: row.get(7)?,
                },
            ))
        })?;

        let mut chunks = Vec::new();
        for (expected, row) in rows.enumerate() {
            let (id, chunk) = row.context("Failed to read chunk row")?;
            if id != expected as i64 {
                anyhow::bail!("Chunk ids are not contiguous: expected {}, found {}", expected, id);
            }
            chunks.push(chunk);
        }

        Ok(chunks)
    }

    /// 마지막 빌드 메타데이터
    pub fn meta(&self) -> Result<Option<IndexMeta>> {
        let conn = self.lock()?;

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![BUILD_META_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read index meta")?;

        value
            .map(|v| serde_json::from_str(&v).context("Failed to parse index meta"))
            .transpose()
    }

    /// 청크와 빌드 메타데이터 삭제
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "DELETE FROM chunks; DELETE FROM index_meta WHERE key = '{BUILD_META_KEY}';"
        ))
        .context("Failed to clear index store")?;
        Ok(())
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let (chunk_count, document_count, total_size): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT doc_id), COALESCE(SUM(LENGTH(CAST(text AS BLOB))), 0)
                 FROM chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to read store stats")?;

        Ok(StoreStats {
            chunk_count: chunk_count as usize,
            document_count: document_count as usize,
            total_text_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, IndexStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("test.db");
        let store = IndexStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn chunk(doc: &str, ordinal: usize, text: &str) -> Chunk {
        Chunk {
            doc_id: doc.to_string(),
            ordinal,
            text: text.to_string(),
            start: ordinal * 10,
            end: ordinal * 10 + text.chars().count(),
            token_count: 2,
            overlaps_previous: ordinal > 0,
        }
    }

    fn meta(count: usize) -> IndexMeta {
        IndexMeta {
            chunk_config: ChunkConfig::default(),
            embedding_model: "hash".to_string(),
            embedding_dimension: 64,
            kb_fingerprint: "abc".to_string(),
            chunk_count: count,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_store() {
        let (_dir, store) = create_test_store();
        assert!(store.load_chunks().unwrap().is_empty());
        assert!(store.meta().unwrap().is_none());
        assert_eq!(store.stats().unwrap().chunk_count, 0);
    }

    #[test]
    fn test_replace_and_load_chunks() {
        let (_dir, store) = create_test_store();
        let chunks = vec![
            chunk("Role Prompting", 0, "Assign a persona."),
            chunk("Role Prompting", 1, "Then ask."),
            chunk("Self-Consistency", 0, "Sample many paths. 한국어"),
        ];
        let meta = meta(chunks.len());

        assert_eq!(store.replace_chunks(&chunks, &meta).unwrap(), 3);
        assert_eq!(store.load_chunks().unwrap(), chunks);
        assert_eq!(store.meta().unwrap(), Some(meta));

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.document_count, 2);
        let bytes: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert_eq!(stats.total_text_bytes, bytes);
    }

    #[test]
    fn test_replace_overwrites_previous_build() {
        let (_dir, store) = create_test_store();
        store
            .replace_chunks(&[chunk("a", 0, "one"), chunk("a", 1, "two")], &meta(2))
            .unwrap();
        store.replace_chunks(&[chunk("b", 0, "three")], &meta(1)).unwrap();

        let loaded = store.load_chunks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].doc_id, "b");
        assert_eq!(store.meta().unwrap().map(|m| m.chunk_count), Some(1));
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("persist.db");
        {
            let store = IndexStore::open(&path).unwrap();
            store.replace_chunks(&[chunk("a", 0, "kept")], &meta(1)).unwrap();
        }
        let store = IndexStore::open(&path).unwrap();
        assert_eq!(store.load_chunks().unwrap()[0].text, "kept");
    }

    #[test]
    fn test_clear() {
        let (_dir, store) = create_test_store();
        store.replace_chunks(&[chunk("a", 0, "gone")], &meta(1)).unwrap();
        store.clear().unwrap();
        assert!(store.load_chunks().unwrap().is_empty());
        assert!(store.meta().unwrap().is_none());
    }
}
