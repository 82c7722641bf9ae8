//! SQLite/FTS5-backed document store.
//!
//! One store per shard, exclusively owned. The `documents` table is a
//! virtual FTS5 table in one of two shapes depending on the shard's id
//! type; persistent scalars (config, cursors) live in an ordinary `meta`
//! key/value table so each write is individually durable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, params_from_iter, types::Value, Connection, ErrorCode, OptionalExtension};

use crate::config::IdType;
use crate::error::{ShardError, ShardResult};

use super::document::{DocId, Hit, ScannedRow, StoredDocument};

/// Only persisted-state version this build can open.
pub const DB_VERSION: i64 = 1;

/// Documents per upsert statement. The deployment target allows 32 bound
/// parameters per statement; 15 documents keep us at 30.
pub const UPSERT_CHUNK_SIZE: usize = 15;

const QUOTED_RETRY_CAP: usize = 50;

pub const META_DB_VERSION: &str = "db_version";
pub const META_CONFIG: &str = "config";
pub const META_LAST_SYNCED_ROWID: &str = "last_synced_rowid";
pub const META_CURRENT_COLD_INDEX: &str = "current_cold_index";

pub struct Store {
    conn: Connection,
    path: PathBuf,
    id_type: Option<IdType>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("id_type", &self.id_type)
            .finish()
    }
}

impl Store {
    /// Open (or create) the store at `path`. Refuses databases written by a
    /// newer version. The documents table is created lazily once the id
    /// type is known, via [`Store::ensure_documents`].
    pub fn open(path: &Path) -> ShardResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(5_000))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA synchronous=NORMAL;\n\
             CREATE TABLE IF NOT EXISTS meta (\n\
               key TEXT PRIMARY KEY,\n\
               value TEXT\n\
             );",
        )?;

        let store = Self {
            conn,
            path: path.to_path_buf(),
            id_type: None,
        };

        match store.meta_get_i64(META_DB_VERSION)? {
            None => store.meta_put(META_DB_VERSION, &DB_VERSION.to_string())?,
            Some(version) if version > DB_VERSION => {
                return Err(ShardError::Config(format!(
                    "store version {} is newer than supported {}",
                    version, DB_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(store)
    }

    pub fn id_type(&self) -> Option<IdType> {
        self.id_type
    }

    /// Create the FTS5 documents table for `id_type` if it does not exist
    /// yet. Integer mode maps the document id straight onto the rowid;
    /// string mode keeps the id as an unindexed column.
    pub fn ensure_documents(&mut self, id_type: IdType) -> ShardResult<()> {
        let ddl = match id_type {
            IdType::Integer => {
                "CREATE VIRTUAL TABLE IF NOT EXISTS documents \
                 USING fts5(content, tokenize='porter unicode61')"
            }
            IdType::String => {
                "CREATE VIRTUAL TABLE IF NOT EXISTS documents \
                 USING fts5(id UNINDEXED, content, tokenize='porter unicode61')"
            }
        };
        self.conn.execute_batch(ddl)?;
        self.id_type = Some(id_type);
        Ok(())
    }

    // ---- meta key/value ----

    pub fn meta_get(&self, key: &str) -> ShardResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn meta_get_i64(&self, key: &str) -> ShardResult<Option<i64>> {
        Ok(self.meta_get(key)?.and_then(|v| v.parse().ok()))
    }

    pub fn meta_put(&self, key: &str, value: &str) -> ShardResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // ---- writes ----

    /// Upsert a batch, chunked at [`UPSERT_CHUNK_SIZE`] documents per
    /// statement. Chunks are independent statements executed in order;
    /// partial failure leaves earlier chunks committed, so callers must
    /// treat this as best-effort idempotent.
    pub fn upsert(&mut self, batch: &[StoredDocument]) -> ShardResult<()> {
        let id_type = self.require_id_type()?;
        for chunk in batch.chunks(UPSERT_CHUNK_SIZE) {
            match id_type {
                IdType::Integer => self.upsert_integer_chunk(chunk)?,
                IdType::String => self.upsert_string_chunk(chunk)?,
            }
        }
        Ok(())
    }

    fn upsert_integer_chunk(&mut self, chunk: &[StoredDocument]) -> ShardResult<()> {
        // REPLACE rewrites the FTS entry on rowid collision.
        let placeholders = vec!["(?, ?)"; chunk.len()].join(", ");
        let sql = format!("REPLACE INTO documents(rowid, content) VALUES {}", placeholders);
        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * 2);
        for doc in chunk {
            let rowid = doc.id.as_rowid().ok_or_else(|| {
                ShardError::Internal("integer-mode upsert with string id".to_string())
            })?;
            values.push(Value::Integer(rowid));
            values.push(Value::Text(doc.filtered_content.clone()));
        }
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn upsert_string_chunk(&mut self, chunk: &[StoredDocument]) -> ShardResult<()> {
        let tx = self.conn.transaction()?;
        {
            let in_list = vec!["?"; chunk.len()].join(", ");
            let delete_sql = format!("DELETE FROM documents WHERE id IN ({})", in_list);
            let ids: Vec<Value> = chunk
                .iter()
                .map(|doc| Value::Text(doc.id.to_string()))
                .collect();
            tx.execute(&delete_sql, params_from_iter(ids))?;

            let placeholders = vec!["(?, ?)"; chunk.len()].join(", ");
            let insert_sql = format!("INSERT INTO documents(id, content) VALUES {}", placeholders);
            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * 2);
            for doc in chunk {
                values.push(Value::Text(doc.id.to_string()));
                values.push(Value::Text(doc.filtered_content.clone()));
            }
            tx.execute(&insert_sql, params_from_iter(values))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every row with `rowid <= max_rowid` in one statement. Returns
    /// the number of rows removed.
    pub fn delete_up_to(&self, max_rowid: i64) -> ShardResult<usize> {
        if self.id_type.is_none() {
            return Ok(0);
        }
        let deleted = self.conn.execute(
            "DELETE FROM documents WHERE rowid <= ?1",
            params![max_rowid],
        )?;
        Ok(deleted)
    }

    // ---- reads ----

    /// Run a full-text match with a hard row limit. Query text is always a
    /// bound parameter. Queries carrying FTS metacharacters are pre-quoted
    /// into phrase form; a query the FTS parser still rejects is retried
    /// once as a quoted phrase with a conservative cap.
    pub fn match_query(&self, query: &str, limit: usize) -> ShardResult<Vec<Hit>> {
        let effective = if needs_phrase_quoting(query) {
            quote_phrase(query)
        } else {
            query.to_string()
        };

        match self.run_match(&effective, limit) {
            Ok(hits) => Ok(hits),
            Err(err) => {
                tracing::warn!(query, error = %err, "match failed, retrying as quoted phrase");
                self.run_match(&quote_phrase(query), limit.min(QUOTED_RETRY_CAP))
            }
        }
    }

    fn run_match(&self, fts_query: &str, limit: usize) -> ShardResult<Vec<Hit>> {
        let id_type = match self.id_type {
            Some(id_type) => id_type,
            None => return Ok(Vec::new()),
        };
        let sql = match id_type {
            IdType::Integer => {
                "SELECT rowid, content, rank FROM documents \
                 WHERE documents MATCH ?1 ORDER BY rank LIMIT ?2"
            }
            IdType::String => {
                "SELECT id, content, rank FROM documents \
                 WHERE documents MATCH ?1 ORDER BY rank LIMIT ?2"
            }
        };
        self.with_read_retry(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![fts_query, limit as i64], |row| {
                let id = match id_type {
                    IdType::Integer => DocId::Int(row.get(0)?),
                    IdType::String => DocId::Str(row.get(0)?),
                };
                Ok(Hit {
                    id,
                    content: row.get(1)?,
                    rank: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
    }

    /// Stream rows with `rowid > cursor` in rowid order. `limit` of `None`
    /// scans to the end.
    pub fn scan_since(&self, cursor: i64, limit: Option<usize>) -> ShardResult<Vec<ScannedRow>> {
        self.scan_ordered(
            "WHERE rowid > ?1 ORDER BY rowid ASC LIMIT ?2",
            cursor,
            limit.map(|l| l as i64).unwrap_or(-1),
        )
    }

    /// The `limit` oldest rows by insert order, for lifecycle migration.
    pub fn oldest(&self, limit: usize) -> ShardResult<Vec<ScannedRow>> {
        self.scan_ordered("WHERE rowid > ?1 ORDER BY rowid ASC LIMIT ?2", -1, limit as i64)
    }

    fn scan_ordered(&self, suffix: &str, cursor: i64, limit: i64) -> ShardResult<Vec<ScannedRow>> {
        let id_type = match self.id_type {
            Some(id_type) => id_type,
            None => return Ok(Vec::new()),
        };
        let sql = match id_type {
            IdType::Integer => format!("SELECT rowid, content FROM documents {}", suffix),
            IdType::String => format!("SELECT rowid, id, content FROM documents {}", suffix),
        };
        self.with_read_retry(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![cursor, limit], |row| {
                let rowid: i64 = row.get(0)?;
                let (id, content) = match id_type {
                    IdType::Integer => (DocId::Int(rowid), row.get(1)?),
                    IdType::String => (DocId::Str(row.get(1)?), row.get(2)?),
                };
                Ok(ScannedRow { rowid, id, content })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
    }

    /// Document count plus the actual database size in bytes
    /// (`page_count * page_size`, not an estimate).
    pub fn count_and_bytes(&self) -> ShardResult<(u64, u64)> {
        let count: i64 = if self.id_type.is_some() {
            self.with_read_retry(|conn| {
                conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            })?
        } else {
            0
        };
        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((count as u64, (page_count * page_size) as u64))
    }

    fn require_id_type(&self) -> ShardResult<IdType> {
        self.id_type.ok_or_else(|| {
            ShardError::Internal("store used before documents table was created".to_string())
        })
    }

    /// Retry a read once on a transient busy/locked fault.
    fn with_read_retry<T>(
        &self,
        f: impl Fn(&Connection) -> Result<T, rusqlite::Error>,
    ) -> ShardResult<T> {
        match f(&self.conn) {
            Ok(value) => Ok(value),
            Err(err) if is_transient(&err) => {
                tracing::debug!(error = %err, "transient read fault, retrying once");
                Ok(f(&self.conn)?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// FTS metacharacters force the query into phrase mode so user input can
/// never be parsed as FTS syntax.
fn needs_phrase_quoting(query: &str) -> bool {
    query.contains('"') || query.contains('\'') || query.contains(';') || query.contains("--")
}

fn quote_phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, id_type: IdType) -> Store {
        let mut store = Store::open(&dir.path().join("shard.db")).expect("open store");
        store.ensure_documents(id_type).expect("create documents");
        store
    }

    fn doc(id: DocId, content: &str) -> StoredDocument {
        StoredDocument::new(id, content.to_string())
    }

    #[test]
    fn test_string_mode_upsert_and_match() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        store
            .upsert(&[doc("a".into(), "javascript programming tutorial")])
            .unwrap();
        let hits = store.match_query("javascript", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, DocId::Str("a".to_string()));
    }

    #[test]
    fn test_integer_mode_rowid_is_id() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::Integer);

        store.upsert(&[doc(7.into(), "rust ownership")]).unwrap();
        let rows = store.scan_since(-1, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rowid, 7);
        assert_eq!(rows[0].id, DocId::Int(7));
    }

    #[test]
    fn test_upsert_replaces_existing_id() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        store.upsert(&[doc("u".into(), "first version")]).unwrap();
        store.upsert(&[doc("u".into(), "second version")]).unwrap();

        let (count, _) = store.count_and_bytes().unwrap();
        assert_eq!(count, 1);
        let hits = store.match_query("second", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.match_query("first", 10).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_chunks_large_batches() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        let batch: Vec<StoredDocument> = (0..40)
            .map(|i| doc(format!("doc-{}", i).as_str().into(), "unique payload"))
            .collect();
        store.upsert(&batch).unwrap();

        let (count, _) = store.count_and_bytes().unwrap();
        assert_eq!(count, 40);
    }

    #[test]
    fn test_rowids_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        for i in 0..10 {
            store
                .upsert(&[doc(format!("d{}", i).as_str().into(), "content words")])
                .unwrap();
        }
        let rows = store.scan_since(-1, None).unwrap();
        let rowids: Vec<i64> = rows.iter().map(|r| r.rowid).collect();
        let mut sorted = rowids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(rowids, sorted);
    }

    #[test]
    fn test_scan_since_cursor() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::Integer);

        for i in 1..=5 {
            store.upsert(&[doc(i.into(), "payload text")]).unwrap();
        }
        let rows = store.scan_since(3, None).unwrap();
        assert_eq!(rows.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_oldest_returns_lowest_rowids() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::Integer);

        for i in 1..=5 {
            store.upsert(&[doc(i.into(), "payload text")]).unwrap();
        }
        let rows = store.oldest(2).unwrap();
        assert_eq!(rows.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_delete_up_to() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::Integer);

        for i in 1..=5 {
            store.upsert(&[doc(i.into(), "payload text")]).unwrap();
        }
        let removed = store.delete_up_to(3).unwrap();
        assert_eq!(removed, 3);
        let rows = store.scan_since(-1, None).unwrap();
        assert_eq!(rows.iter().map(|r| r.rowid).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_match_limit_applies() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        let batch: Vec<StoredDocument> = (0..20)
            .map(|i| doc(format!("doc-{}", i).as_str().into(), "shared term"))
            .collect();
        store.upsert(&batch).unwrap();

        let hits = store.match_query("shared", 5).unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_hostile_query_forced_into_phrase_mode() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        store.upsert(&[doc("a".into(), "plain text")]).unwrap();
        // Must not error; the metacharacters are neutralized by quoting.
        let hits = store.match_query("text\"; DROP TABLE documents; --", 10).unwrap();
        assert!(hits.is_empty());
        // And the table is still there.
        let (count, _) = store.count_and_bytes().unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unbalanced_syntax_retried_as_phrase() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        store.upsert(&[doc("a".into(), "left paren story")]).unwrap();
        // A dangling "(" is an FTS5 syntax error; the retry quotes the
        // whole query into a phrase.
        let result = store.match_query("paren (", 10);
        assert!(result.is_ok());
    }

    #[test]
    fn test_bytes_reports_database_size() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir, IdType::String);

        let (_, empty_bytes) = store.count_and_bytes().unwrap();
        assert!(empty_bytes > 0);

        let batch: Vec<StoredDocument> = (0..200)
            .map(|i| doc(format!("doc-{}", i).as_str().into(), &"word ".repeat(80)))
            .collect();
        store.upsert(&batch).unwrap();

        let (_, full_bytes) = store.count_and_bytes().unwrap();
        assert!(full_bytes > empty_bytes);
    }

    #[test]
    fn test_meta_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("shard.db")).unwrap();

        assert_eq!(store.meta_get("missing").unwrap(), None);
        store.meta_put("cursor", "42").unwrap();
        assert_eq!(store.meta_get_i64("cursor").unwrap(), Some(42));
        store.meta_put("cursor", "43").unwrap();
        assert_eq!(store.meta_get_i64("cursor").unwrap(), Some(43));
    }

    #[test]
    fn test_refuses_newer_db_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard.db");
        {
            let store = Store::open(&path).unwrap();
            store.meta_put(META_DB_VERSION, "2").unwrap();
        }
        assert!(Store::open(&path).is_err());
    }

    #[test]
    fn test_fresh_store_counts_zero() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("shard.db")).unwrap();
        let (count, bytes) = store.count_and_bytes().unwrap();
        assert_eq!(count, 0);
        assert!(bytes > 0);
    }
}
