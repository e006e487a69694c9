//! Evidence Ledger: durable, indexed store of encrypted events
//!
//! Events are redacted, serialized whole, and sealed into the
//! `attributes` BLOB column; identity and all fields survive a
//! read-decrypt round trip intact. The remaining columns (category,
//! severity, source, timestamps, sequence number, uploaded flag) are
//! stored in clear for indexed querying.
//!
//! One writer process. All operations on a ledger instance are
//! serialized behind an internal async mutex, so the snapshot loop
//! (append) and the uploader loop (fetch/mark) interleave safely with
//! no caller-side locking.

use crate::crypto::EventCipher;
use crate::error::{Result, VigilError};
use crate::redact::Redactor;
use crate::types::{now_secs, Category, Event, Severity};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Fixed per-event size heuristic used by `estimate_pending_bytes`
const ESTIMATED_EVENT_BYTES: u64 = 1024;

/// Row ceiling enforced on guarded read-only SQL
const READONLY_ROW_LIMIT: usize = 500;

/// Keywords that disqualify a statement from the read-only path
const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "REINDEX",
];

/// A decrypted event together with its ledger-side upload state
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: Event,
    pub uploaded: bool,
}

/// Filters for the paged operator query surface
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub severity: Option<Severity>,
    pub category: Option<Category>,
    pub source: Option<String>,
    pub uploaded: Option<bool>,
    /// Case-insensitive substring match on the event name
    pub search: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<f64>,
    /// Inclusive upper bound on `created_at`
    pub to: Option<f64>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            severity: None,
            category: None,
            source: None,
            uploaded: None,
            search: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Aggregate count for one severity × category cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityCategoryCount {
    pub severity: String,
    pub category: String,
    pub count: u64,
}

/// One column of a table schema dump
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Result of a guarded read-only query
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

struct LedgerInner {
    conn: Connection,
    cipher: EventCipher,
    redactor: Redactor,
    path: Option<PathBuf>,
}

/// Durable table of encrypted events keyed by event id
pub struct EvidenceLedger {
    inner: Mutex<LedgerInner>,
}

impl EvidenceLedger {
    /// Open or create the ledger database at the given path
    pub fn open(db_path: &Path, cipher: EventCipher, redactor: Redactor) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VigilError::Storage {
                context: format!("creating {}", parent.display()),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(db_path).map_err(|e| VigilError::Storage {
            context: format!("opening {}", db_path.display()),
            reason: e.to_string(),
        })?;
        Self::init_schema(&conn)?;

        Ok(Self {
            inner: Mutex::new(LedgerInner {
                conn,
                cipher,
                redactor,
                path: Some(db_path.to_path_buf()),
            }),
        })
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_in_memory(cipher: EventCipher) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| VigilError::Storage {
            context: "opening in-memory database".to_string(),
            reason: e.to_string(),
        })?;
        Self::init_schema(&conn)?;

        Ok(Self {
            inner: Mutex::new(LedgerInner {
                conn,
                cipher,
                redactor: Redactor::default(),
                path: None,
            }),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                device_id TEXT,
                created_at REAL,
                category TEXT,
                severity TEXT,
                name TEXT,
                attributes BLOB,
                source TEXT,
                sequence_number INTEGER,
                uploaded INTEGER DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_uploaded ON events(uploaded);
            CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
            "#,
        )
        .map_err(|e| VigilError::Storage {
            context: "initializing schema".to_string(),
            reason: e.to_string(),
        })
    }

    /// Redact, encrypt, and insert one event
    ///
    /// Non-finite or non-positive timestamps are rejected before any
    /// I/O. A write failure surfaces with the event id and timestamp in
    /// the error; the row is never partially written.
    pub async fn append(&self, event: &Event) -> Result<()> {
        if !event.timestamp.is_finite() || event.timestamp <= 0.0 {
            return Err(VigilError::Validation {
                id: event.id.clone(),
                timestamp: event.timestamp,
                reason: "timestamp must be finite and positive".to_string(),
            });
        }

        let inner = self.inner.lock().await;

        let redacted = inner.redactor.redact_event(event.clone());
        let serialized = serde_json::to_vec(&redacted)?;
        let blob = inner.cipher.encrypt(&serialized)?;

        inner
            .conn
            .execute(
                r#"INSERT INTO events
                   (id, device_id, created_at, category, severity, name,
                    attributes, source, sequence_number, uploaded)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)"#,
                params![
                    redacted.id,
                    redacted.device_id,
                    redacted.timestamp,
                    redacted.category.as_str(),
                    redacted.severity.as_str(),
                    redacted.name,
                    blob,
                    redacted.source,
                    redacted.sequence_number as i64,
                ],
            )
            .map_err(|e| {
                VigilError::storage_for_event(&redacted.id, redacted.timestamp, e.to_string())
            })?;

        tracing::debug!(
            event_id = %redacted.id,
            name = %redacted.name,
            seq = redacted.sequence_number,
            "Event appended to ledger"
        );
        Ok(())
    }

    /// Fetch up to `limit` pending events, oldest first, decrypted
    ///
    /// Rows whose blob fails to decrypt or decode are skipped with a
    /// warning rather than surfaced — a single corrupt row must not
    /// stall the upload pipeline.
    pub async fn fetch_batch(&self, limit: usize) -> Result<Vec<Event>> {
        let inner = self.inner.lock().await;

        let mut stmt = inner
            .conn
            .prepare(
                "SELECT id, attributes FROM events WHERE uploaded = 0
                 ORDER BY created_at ASC LIMIT ?1",
            )
            .map_err(storage("preparing pending fetch"))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(storage("fetching pending events"))?;

        let mut events = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(storage("reading pending row"))?;
            match decode_event(&inner.cipher, &blob) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(event_id = %id, error = %e, "Skipping undecryptable event");
                }
            }
        }
        Ok(events)
    }

    /// Flip `uploaded` to 1 for each id; already-uploaded ids are a
    /// no-op. Returns the number of rows actually transitioned.
    pub async fn mark_uploaded(&self, ids: &[String]) -> Result<usize> {
        let mut inner = self.inner.lock().await;

        let tx = inner
            .conn
            .transaction()
            .map_err(storage("starting mark-uploaded transaction"))?;
        let mut flipped = 0usize;
        {
            let mut stmt = tx
                .prepare("UPDATE events SET uploaded = 1 WHERE id = ?1 AND uploaded = 0")
                .map_err(storage("preparing mark-uploaded"))?;
            for id in ids {
                flipped += stmt
                    .execute(params![id])
                    .map_err(storage("marking event uploaded"))?;
            }
        }
        tx.commit().map_err(storage("committing mark-uploaded"))?;

        tracing::debug!(requested = ids.len(), flipped, "Marked events uploaded");
        Ok(flipped)
    }

    /// Count of events not yet uploaded
    pub async fn count_pending(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        let count: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM events WHERE uploaded = 0", [], |row| {
                row.get(0)
            })
            .map_err(storage("counting pending events"))?;
        Ok(count as u64)
    }

    /// Rough pending payload size — a fixed-size-per-event heuristic,
    /// not an exact measurement
    pub async fn estimate_pending_bytes(&self) -> Result<u64> {
        Ok(self.count_pending().await? * ESTIMATED_EVENT_BYTES)
    }

    /// On-disk size of the ledger file (0 for in-memory ledgers)
    pub async fn store_size_bytes(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        match &inner.path {
            Some(path) => std::fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| VigilError::Storage {
                    context: format!("sizing {}", path.display()),
                    reason: e.to_string(),
                }),
            None => Ok(0),
        }
    }

    /// Delete uploaded events older than `retention_days`; pending
    /// events are never deleted regardless of age. Returns rows removed.
    pub async fn prune(&self, retention_days: u32) -> Result<usize> {
        let cutoff = now_secs() - f64::from(retention_days) * 86_400.0;
        let inner = self.inner.lock().await;
        let deleted = inner
            .conn
            .execute(
                "DELETE FROM events WHERE uploaded = 1 AND created_at < ?1",
                params![cutoff],
            )
            .map_err(storage("pruning uploaded events"))?;

        if deleted > 0 {
            tracing::info!(deleted, retention_days, "Pruned uploaded events");
        }
        Ok(deleted)
    }

    /// Paged operator query over the clear columns, newest first
    pub async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        let inner = self.inner.lock().await;

        let mut sql =
            String::from("SELECT id, attributes, uploaded FROM events WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(severity) = query.severity {
            sql.push_str(" AND severity = ?");
            args.push(Box::new(severity.as_str().to_string()));
        }
        if let Some(category) = query.category {
            sql.push_str(" AND category = ?");
            args.push(Box::new(category.as_str().to_string()));
        }
        if let Some(source) = &query.source {
            sql.push_str(" AND source = ?");
            args.push(Box::new(source.clone()));
        }
        if let Some(uploaded) = query.uploaded {
            sql.push_str(" AND uploaded = ?");
            args.push(Box::new(i64::from(uploaded)));
        }
        if let Some(search) = &query.search {
            sql.push_str(" AND name LIKE ? COLLATE NOCASE");
            args.push(Box::new(format!("%{}%", search)));
        }
        if let Some(from) = query.from {
            sql.push_str(" AND created_at >= ?");
            args.push(Box::new(from));
        }
        if let Some(to) = query.to {
            sql.push_str(" AND created_at <= ?");
            args.push(Box::new(to));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        args.push(Box::new(query.limit as i64));
        args.push(Box::new(query.offset as i64));

        let mut stmt = inner.conn.prepare(&sql).map_err(storage("preparing query"))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| &**a)),
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map_err(storage("running query"))?;

        let mut results = Vec::new();
        for row in rows {
            let (id, blob, uploaded) = row.map_err(storage("reading query row"))?;
            match decode_event(&inner.cipher, &blob) {
                Ok(event) => results.push(StoredEvent {
                    event,
                    uploaded: uploaded != 0,
                }),
                Err(e) => {
                    tracing::warn!(event_id = %id, error = %e, "Skipping undecryptable event");
                }
            }
        }
        Ok(results)
    }

    /// Fetch and decrypt one event by id
    pub async fn fetch_by_id(&self, id: &str) -> Result<Option<StoredEvent>> {
        let inner = self.inner.lock().await;

        let row = inner
            .conn
            .query_row(
                "SELECT attributes, uploaded FROM events WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(storage("fetching event by id"))?;

        match row {
            Some((blob, uploaded)) => {
                let event = decode_event(&inner.cipher, &blob)?;
                Ok(Some(StoredEvent {
                    event,
                    uploaded: uploaded != 0,
                }))
            }
            None => Ok(None),
        }
    }

    /// Decrypted events in a `created_at` range, oldest first
    pub async fn fetch_range(&self, from: f64, to: f64) -> Result<Vec<Event>> {
        let inner = self.inner.lock().await;

        let mut stmt = inner
            .conn
            .prepare(
                "SELECT id, attributes FROM events
                 WHERE created_at >= ?1 AND created_at <= ?2
                 ORDER BY created_at ASC",
            )
            .map_err(storage("preparing range fetch"))?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(storage("fetching range"))?;

        let mut events = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(storage("reading range row"))?;
            match decode_event(&inner.cipher, &blob) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(event_id = %id, error = %e, "Skipping undecryptable event");
                }
            }
        }
        Ok(events)
    }

    /// Aggregate severity × category counts over the whole table
    pub async fn severity_category_counts(&self) -> Result<Vec<SeverityCategoryCount>> {
        let inner = self.inner.lock().await;

        let mut stmt = inner
            .conn
            .prepare(
                "SELECT severity, category, COUNT(*) FROM events
                 GROUP BY severity, category ORDER BY severity, category",
            )
            .map_err(storage("preparing aggregate counts"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SeverityCategoryCount {
                    severity: row.get(0)?,
                    category: row.get(1)?,
                    count: row.get::<_, i64>(2)? as u64,
                })
            })
            .map_err(storage("aggregating counts"))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("reading aggregate rows"))
    }

    /// Names of all tables in the store
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut stmt = inner
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(storage("listing tables"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage("listing tables"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("reading table names"))
    }

    /// Column layout of one table
    pub async fn table_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        validate_identifier(table)?;
        let inner = self.inner.lock().await;

        let mut stmt = inner
            .conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .map_err(storage("reading table schema"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    decl_type: row.get(2)?,
                    not_null: row.get::<_, i64>(3)? != 0,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })
            .map_err(storage("reading table schema"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage("reading schema rows"))
    }

    /// Raw row dump of one table (clear columns as JSON, blobs elided)
    pub async fn table_rows(&self, table: &str, limit: usize) -> Result<QueryOutput> {
        validate_identifier(table)?;
        let inner = self.inner.lock().await;
        run_select(
            &inner.conn,
            &format!("SELECT * FROM {} LIMIT {}", table, limit),
        )
    }

    /// Guarded read-only SQL for operator tooling
    ///
    /// The statement must begin with SELECT, must not contain mutating
    /// keywords, and is wrapped to enforce an implicit row limit.
    pub async fn execute_readonly(&self, sql: &str) -> Result<QueryOutput> {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        let upper = trimmed.to_uppercase();

        if !upper.starts_with("SELECT") {
            return Err(VigilError::QueryRejected(
                "only SELECT statements are allowed".to_string(),
            ));
        }
        for keyword in MUTATING_KEYWORDS {
            if upper
                .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .any(|word| word == *keyword)
            {
                return Err(VigilError::QueryRejected(format!(
                    "mutating keyword not allowed: {}",
                    keyword
                )));
            }
        }

        let inner = self.inner.lock().await;
        run_select(
            &inner.conn,
            &format!("SELECT * FROM ({}) LIMIT {}", trimmed, READONLY_ROW_LIMIT),
        )
    }
}

/// Decrypt and decode one stored blob back into the full event
fn decode_event(cipher: &EventCipher, blob: &[u8]) -> Result<Event> {
    let plaintext = cipher.decrypt(blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Map a rusqlite error into a contextual storage error
fn storage(context: &'static str) -> impl Fn(rusqlite::Error) -> VigilError {
    move |e| VigilError::Storage {
        context: context.to_string(),
        reason: e.to_string(),
    }
}

/// Reject table names that are not plain identifiers
fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VigilError::QueryRejected(format!(
            "invalid table name: {:?}",
            name
        )))
    }
}

/// Run a prepared SELECT and render every cell as JSON; blobs are
/// elided to a size marker.
fn run_select(conn: &Connection, sql: &str) -> Result<QueryOutput> {
    let mut stmt = conn.prepare(sql).map_err(storage("preparing select"))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let column_count = columns.len();

    let rows = stmt
        .query_map([], |row| {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => serde_json::Value::from(v),
                    rusqlite::types::ValueRef::Real(v) => serde_json::Value::from(v),
                    rusqlite::types::ValueRef::Text(v) => {
                        serde_json::Value::from(String::from_utf8_lossy(v).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(v) => {
                        serde_json::Value::from(format!("<blob {} bytes>", v.len()))
                    }
                };
                values.push(value);
            }
            Ok(values)
        })
        .map_err(storage("running select"))?;

    let rows = rows
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(storage("reading select rows"))?;

    Ok(QueryOutput { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Severity};

    fn test_ledger() -> EvidenceLedger {
        EvidenceLedger::open_in_memory(EventCipher::from_key(&[0x42; 32]).unwrap()).unwrap()
    }

    fn test_event(name: &str, seq: u64) -> Event {
        Event::new(
            "device-1",
            Category::Performance,
            Severity::Warning,
            name,
            "rule.high_cpu",
            seq,
        )
        .at(1_700_000_000.0 + seq as f64)
        .with_attribute("cpuLoad", 0.9)
    }

    #[tokio::test]
    async fn test_append_and_fetch_roundtrip() {
        let ledger = test_ledger();
        let event = test_event("High CPU Usage Detected", 1);

        ledger.append(&event).await.unwrap();
        let batch = ledger.fetch_batch(10).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, event.id);
        assert_eq!(batch[0].name, event.name);
        assert_eq!(batch[0].sequence_number, 1);
        assert_eq!(batch[0].attributes, event.attributes);
    }

    #[tokio::test]
    async fn test_append_rejects_bad_timestamps() {
        let ledger = test_ledger();

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let event = test_event("Bad", 1).at(bad);
            let err = ledger.append(&event).await.unwrap_err();
            assert!(
                matches!(err, VigilError::Validation { .. }),
                "timestamp {} should be rejected",
                bad
            );
        }
        assert_eq!(ledger.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_surfaces_with_context() {
        let ledger = test_ledger();
        let event = test_event("Dup", 1);

        ledger.append(&event).await.unwrap();
        let err = ledger.append(&event).await.unwrap_err();
        match err {
            VigilError::Storage { context, .. } => {
                assert!(context.contains(&event.id));
            }
            other => panic!("expected storage error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_append_redacts_before_persisting() {
        let ledger = test_ledger();
        let event = test_event("Redacted", 1).with_attribute("apiToken", "sensitive");

        ledger.append(&event).await.unwrap();
        let batch = ledger.fetch_batch(10).await.unwrap();

        assert!(!batch[0].attributes.contains_key("apiToken"));
        assert!(batch[0].attributes.contains_key("cpuLoad"));
    }

    #[tokio::test]
    async fn test_mark_uploaded_lifecycle() {
        let ledger = test_ledger();
        let event = test_event("Lifecycle", 1);
        ledger.append(&event).await.unwrap();

        assert_eq!(ledger.count_pending().await.unwrap(), 1);

        let flipped = ledger.mark_uploaded(&[event.id.clone()]).await.unwrap();
        assert_eq!(flipped, 1);
        assert_eq!(ledger.count_pending().await.unwrap(), 0);
        assert!(ledger.fetch_batch(10).await.unwrap().is_empty());

        // Idempotent: re-marking transitions nothing
        let flipped = ledger.mark_uploaded(&[event.id.clone()]).await.unwrap();
        assert_eq!(flipped, 0);
    }

    #[tokio::test]
    async fn test_fetch_batch_oldest_first_with_limit() {
        let ledger = test_ledger();
        for seq in [3u64, 1, 2] {
            ledger.append(&test_event("Ordered", seq)).await.unwrap();
        }

        let batch = ledger.fetch_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sequence_number, 1);
        assert_eq!(batch[1].sequence_number, 2);
    }

    #[tokio::test]
    async fn test_fetch_batch_skips_corrupt_rows() {
        let ledger = test_ledger();
        ledger.append(&test_event("Good", 1)).await.unwrap();
        ledger.append(&test_event("Corrupt", 2)).await.unwrap();

        {
            let inner = ledger.inner.lock().await;
            inner
                .conn
                .execute(
                    "UPDATE events SET attributes = ?1 WHERE sequence_number = 2",
                    params![b"garbage".to_vec()],
                )
                .unwrap();
        }

        let batch = ledger.fetch_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name, "Good");
    }

    #[tokio::test]
    async fn test_estimate_and_store_size() {
        let ledger = test_ledger();
        ledger.append(&test_event("A", 1)).await.unwrap();
        ledger.append(&test_event("B", 2)).await.unwrap();

        assert_eq!(
            ledger.estimate_pending_bytes().await.unwrap(),
            2 * ESTIMATED_EVENT_BYTES
        );
        // In-memory ledger has no backing file
        assert_eq!(ledger.store_size_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disk_backed_store_size() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = EvidenceLedger::open(
            &dir.path().join("evidence.db"),
            EventCipher::from_key(&[0x42; 32]).unwrap(),
            Redactor::default(),
        )
        .unwrap();
        ledger.append(&test_event("A", 1)).await.unwrap();

        assert!(ledger.store_size_bytes().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_prune_spares_pending() {
        let ledger = test_ledger();

        let old_uploaded = test_event("OldUploaded", 1).at(1_000.0);
        let old_pending = test_event("OldPending", 2).at(1_000.0);
        let fresh = test_event("Fresh", 3).at(now_secs());

        ledger.append(&old_uploaded).await.unwrap();
        ledger.append(&old_pending).await.unwrap();
        ledger.append(&fresh).await.unwrap();
        ledger
            .mark_uploaded(&[old_uploaded.id.clone()])
            .await
            .unwrap();

        let deleted = ledger.prune(7).await.unwrap();
        assert_eq!(deleted, 1);

        // Pending events survive regardless of age
        assert!(ledger.fetch_by_id(&old_pending.id).await.unwrap().is_some());
        assert!(ledger.fetch_by_id(&old_uploaded.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_filters() {
        let ledger = test_ledger();
        ledger.append(&test_event("High CPU Usage Detected", 1)).await.unwrap();

        let mut security = test_event("Unexpected Destination", 2);
        security.category = Category::Security;
        security.severity = Severity::Error;
        security.source = "rule.destination_allowlist".to_string();
        ledger.append(&security).await.unwrap();

        let hits = ledger
            .query(&EventQuery {
                category: Some(Category::Security),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event.name, "Unexpected Destination");

        let hits = ledger
            .query(&EventQuery {
                search: Some("cpu usage".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = ledger
            .query(&EventQuery {
                severity: Some(Severity::Critical),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_query_uploaded_filter_and_paging() {
        let ledger = test_ledger();
        for seq in 1..=5u64 {
            ledger.append(&test_event("Paged", seq)).await.unwrap();
        }
        let first = ledger.fetch_batch(1).await.unwrap();
        ledger.mark_uploaded(&[first[0].id.clone()]).await.unwrap();

        let pending = ledger
            .query(&EventQuery {
                uploaded: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 4);
        assert!(pending.iter().all(|s| !s.uploaded));

        let page = ledger
            .query(&EventQuery {
                limit: 2,
                offset: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_range() {
        let ledger = test_ledger();
        for seq in 1..=4u64 {
            ledger.append(&test_event("Range", seq)).await.unwrap();
        }

        let events = ledger
            .fetch_range(1_700_000_002.0, 1_700_000_003.0)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence_number, 2);
        assert_eq!(events[1].sequence_number, 3);
    }

    #[tokio::test]
    async fn test_severity_category_counts() {
        let ledger = test_ledger();
        ledger.append(&test_event("A", 1)).await.unwrap();
        ledger.append(&test_event("B", 2)).await.unwrap();

        let mut critical = test_event("C", 3);
        critical.severity = Severity::Critical;
        critical.category = Category::Thermal;
        ledger.append(&critical).await.unwrap();

        let counts = ledger.severity_category_counts().await.unwrap();
        assert!(counts.contains(&SeverityCategoryCount {
            severity: "warning".to_string(),
            category: "performance".to_string(),
            count: 2,
        }));
        assert!(counts.contains(&SeverityCategoryCount {
            severity: "critical".to_string(),
            category: "thermal".to_string(),
            count: 1,
        }));
    }

    #[tokio::test]
    async fn test_table_introspection() {
        let ledger = test_ledger();
        ledger.append(&test_event("A", 1)).await.unwrap();

        let tables = ledger.table_names().await.unwrap();
        assert!(tables.contains(&"events".to_string()));

        let schema = ledger.table_schema("events").await.unwrap();
        let id = schema.iter().find(|c| c.name == "id").unwrap();
        assert!(id.primary_key);
        let uploaded = schema.iter().find(|c| c.name == "uploaded").unwrap();
        assert_eq!(uploaded.decl_type, "INTEGER");

        let dump = ledger.table_rows("events", 10).await.unwrap();
        assert_eq!(dump.rows.len(), 1);
        let blob_col = dump.columns.iter().position(|c| c == "attributes").unwrap();
        assert!(dump.rows[0][blob_col]
            .as_str()
            .unwrap()
            .starts_with("<blob"));

        assert!(ledger.table_schema("events; DROP").await.is_err());
    }

    #[tokio::test]
    async fn test_execute_readonly_guard() {
        let ledger = test_ledger();
        ledger.append(&test_event("A", 1)).await.unwrap();

        let out = ledger
            .execute_readonly("SELECT id, severity FROM events")
            .await
            .unwrap();
        assert_eq!(out.columns, vec!["id", "severity"]);
        assert_eq!(out.rows.len(), 1);

        for rejected in [
            "DELETE FROM events",
            "SELECT * FROM events; DROP TABLE events",
            "select id from events where id in (delete from events)",
            "PRAGMA journal_mode",
            "  update events set uploaded = 1",
        ] {
            assert!(
                matches!(
                    ledger.execute_readonly(rejected).await,
                    Err(VigilError::QueryRejected(_))
                ),
                "{:?} should be rejected",
                rejected
            );
        }
    }

    #[tokio::test]
    async fn test_execute_readonly_implicit_limit() {
        let ledger = test_ledger();
        for seq in 1..=(READONLY_ROW_LIMIT as u64 + 50) {
            ledger.append(&test_event("Bulk", seq)).await.unwrap();
        }

        let out = ledger
            .execute_readonly("SELECT id FROM events")
            .await
            .unwrap();
        assert_eq!(out.rows.len(), READONLY_ROW_LIMIT);
    }
}
