//! Document Store - rusqlite 기반 문서 저장소
//!
//! 원문 텍스트 + 메타데이터를 문서 ID로 저장하고,
//! FTS5 전문 검색과 ID 배치 조회를 제공합니다.
//!
//! ref: https://www.sqlite.org/fts5.html

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde::Serialize;
use serde_json::{json, Value};

use super::document::{Document, Metadata};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.docpage-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docpage-rag")
}

// ============================================================================
// DocumentStore Trait
// ============================================================================

/// DocumentStore 트레이트 (async)
///
/// 문서 저장소의 공통 인터페이스입니다.
/// `get`의 반환 순서는 입력 ID 순서와 일치하지 않을 수 있습니다 -
/// 호출자가 ID로 재결합해야 합니다.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 문서 배치 저장 (같은 ID면 덮어쓰기)
    async fn add(&self, docs: &[Document]) -> Result<usize>;

    /// ID 배치 조회 (순서 비보장, 없는 ID는 생략)
    async fn get(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// 전문 검색
    ///
    /// # Arguments
    /// * `text` - 검색 쿼리
    /// * `top_k` - 최대 결과 수
    /// * `scope` - 검색 대상을 제한할 문서 ID 집합 (None이면 전체)
    async fn query(&self, text: &str, top_k: usize, scope: Option<&[String]>)
        -> Result<Vec<Document>>;

    /// 문서 ID로 삭제
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 저장된 문서 개수
    async fn count(&self) -> Result<usize>;

    /// 진단용 자기 서술 (실패하지 않음)
    fn describe(&self) -> Value {
        Value::Null
    }
}

// ============================================================================
// SqliteDocumentStore
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub total_text_bytes: usize,
    pub db_path: PathBuf,
}

/// SQLite 기반 문서 저장소
///
/// 문서 본문과 메타데이터(JSON)를 저장하고 FTS5 + BM25 전문 검색을 제공합니다.
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    fts_enabled: bool,
}

impl SqliteDocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let mut store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            fts_enabled: false,
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.docpage-rag/docstore.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        }

        Self::open(&data_dir.join("docstore.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&mut self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create documents table")?;

        // FTS5 가상 테이블 (전문 검색용, external content)
        let fts_result = conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                text,
                content='documents'
            )",
            [],
        );

        let fts_enabled = match fts_result {
            Ok(_) => {
                // FTS5 동기화 트리거
                conn.execute_batch(
                    r#"
                    CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
                        INSERT INTO documents_fts(rowid, text)
                        VALUES (new.rowid, new.text);
                    END;

                    CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
                        INSERT INTO documents_fts(documents_fts, rowid, text)
                        VALUES('delete', old.rowid, old.text);
                    END;

                    CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
                        INSERT INTO documents_fts(documents_fts, rowid, text)
                        VALUES('delete', old.rowid, old.text);
                        INSERT INTO documents_fts(rowid, text)
                        VALUES (new.rowid, new.text);
                    END;
                    "#,
                )
                .context("Failed to create FTS5 triggers")?;
                true
            }
            Err(e) => {
                tracing::warn!("FTS5 not available, full-text query disabled: {}", e);
                false
            }
        };

        drop(conn);
        self.fts_enabled = fts_enabled;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 문서 목록 조회 (최신순)
    pub fn list(&self, limit: usize) -> Result<Vec<Document>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT doc_id, text, metadata FROM documents
             ORDER BY created_at DESC, doc_id
             LIMIT ?1",
        )?;

        let docs = stmt
            .query_map([limit as i64], row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap_or(0);

        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(text)), 0) FROM documents",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(StoreStats {
            document_count: count as usize,
            total_text_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn add(&self, docs: &[Document]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        for doc in docs {
            let metadata = serde_json::to_string(&doc.metadata)
                .context("Failed to serialize document metadata")?;

            // UPSERT로 갱신 (OR REPLACE는 FTS 트리거를 건너뜀)
            conn.execute(
                "INSERT INTO documents (doc_id, text, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(doc_id) DO UPDATE SET
                     text = excluded.text,
                     metadata = excluded.metadata",
                rusqlite::params![doc.doc_id, doc.text, metadata, now],
            )
            .context("Failed to insert document")?;
        }

        tracing::debug!("Added {} documents to doc store", docs.len());
        Ok(docs.len())
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.lock()?;

        let placeholders = placeholders(1, ids.len());
        let sql = format!(
            "SELECT doc_id, text, metadata FROM documents WHERE doc_id IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(ids.iter()), row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    async fn query(
        &self,
        text: &str,
        top_k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        if !self.fts_enabled {
            tracing::warn!("Full-text query skipped: FTS5 is not available");
            return Ok(vec![]);
        }

        let escaped_query = escape_fts_query(text);
        if escaped_query.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.lock()?;

        let mut params: Vec<SqlValue> = vec![SqlValue::Text(escaped_query)];
        let scope_clause = match scope {
            Some(ids) if !ids.is_empty() => {
                let clause = format!("AND d.doc_id IN ({})", placeholders(2, ids.len()));
                params.extend(ids.iter().map(|id| SqlValue::Text(id.clone())));
                clause
            }
            _ => String::new(),
        };
        params.push(SqlValue::Integer(top_k as i64));

        let sql = format!(
            r#"
            SELECT d.doc_id, d.text, d.metadata
            FROM documents_fts f
            JOIN documents d ON d.rowid = f.rowid
            WHERE documents_fts MATCH ?1 {}
            ORDER BY bm25(documents_fts)
            LIMIT ?{}
            "#,
            scope_clause,
            params.len()
        );

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(params), row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;

        let sql = format!(
            "DELETE FROM documents WHERE doc_id IN ({})",
            placeholders(1, ids.len())
        );
        let rows = conn.execute(&sql, params_from_iter(ids.iter()))?;

        Ok(rows)
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .context("Failed to count documents")?;

        Ok(count as usize)
    }

    fn describe(&self) -> Value {
        let mut info = json!({
            "backend": "sqlite-fts5",
            "path": self.db_path.display().to_string(),
            "fts_enabled": self.fts_enabled,
        });

        // 개수 조회는 best-effort (진단이 에러가 되면 안 됨)
        if let Ok(conn) = self.conn.lock() {
            if let Ok(count) =
                conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get::<_, i64>(0))
            {
                info["documents"] = json!(count);
            }
        }

        info
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 파라미터 자리 표시자 생성 (`?start, ?start+1, ...`)
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 행을 Document로 변환
fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let metadata_json: String = row.get(2)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(Document {
        doc_id: row.get(0)?,
        text: row.get(1)?,
        metadata,
    })
}

/// FTS5 쿼리 이스케이프
///
/// 특수 문자를 제거하고 단어만 추출합니다.
/// ref: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn escape_fts_query(query: &str) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    trimmed
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::document::metadata_keys;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteDocumentStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteDocumentStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, text)
    }

    #[tokio::test]
    async fn test_add_and_get_documents() {
        let (_dir, store) = create_test_store();

        let docs = vec![
            doc("a", "first document").with_metadata(metadata_keys::FILE_NAME, "a.pdf"),
            doc("b", "second document"),
        ];
        assert_eq!(store.add(&docs).await.unwrap(), 2);

        let mut fetched = store
            .get(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await
            .unwrap();
        fetched.sort_by(|x, y| x.doc_id.cmp(&y.doc_id));

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].doc_id, "a");
        assert_eq!(fetched[0].meta_str(metadata_keys::FILE_NAME), Some("a.pdf"));
        assert_eq!(fetched[1].text, "second document");
    }

    #[tokio::test]
    async fn test_fts_query() {
        let (_dir, store) = create_test_store();

        store
            .add(&[
                doc("a", "the quick brown fox"),
                doc("b", "lazy dogs sleep all day"),
                doc("c", "foxes are quick animals"),
            ])
            .await
            .unwrap();

        let results = store.query("quick", 10, None).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(!ids.contains(&"b"));
    }

    #[tokio::test]
    async fn test_fts_query_with_scope() {
        let (_dir, store) = create_test_store();

        store
            .add(&[
                doc("a", "rust is a systems language"),
                doc("b", "rust prevents data races"),
            ])
            .await
            .unwrap();

        let scope = vec!["b".to_string()];
        let results = store.query("rust", 10, Some(&scope)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "b");
    }

    #[tokio::test]
    async fn test_fts_query_respects_top_k() {
        let (_dir, store) = create_test_store();

        let docs: Vec<Document> = (0..10)
            .map(|i| doc(&format!("d{}", i), "repeated keyword phrase"))
            .collect();
        store.add(&docs).await.unwrap();

        let results = store.query("keyword", 3, None).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_updates_fts_index() {
        let (_dir, store) = create_test_store();

        store.add(&[doc("a", "original banana content")]).await.unwrap();
        store.add(&[doc("a", "replacement cherry content")]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.query("banana", 10, None).await.unwrap().is_empty());
        assert_eq!(store.query("cherry", 10, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_documents() {
        let (_dir, store) = create_test_store();

        store.add(&[doc("a", "one"), doc("b", "two")]).await.unwrap();
        let deleted = store.delete(&["a".to_string()]).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get(&["a".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let (_dir, store) = create_test_store();

        assert_eq!(store.add(&[]).await.unwrap(), 0);
        assert!(store.get(&[]).await.unwrap().is_empty());
        assert_eq!(store.delete(&[]).await.unwrap(), 0);
        assert!(store.query("   ", 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_describe() {
        let (_dir, store) = create_test_store();

        store.add(&[doc("a", "1234567890")]).await.unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.total_text_bytes, 10);

        let info = store.describe();
        assert_eq!(info["backend"], "sqlite-fts5");
        assert_eq!(info["documents"], 1);
    }

    #[test]
    fn test_escape_fts_query() {
        assert_eq!(escape_fts_query("hello world"), "hello world");
        assert_eq!(escape_fts_query("  "), "");
        assert_eq!(escape_fts_query("hello:world"), "helloworld");
        assert_eq!(escape_fts_query("test-query_123"), "test-query_123");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(2, 1), "?2");
    }
}
