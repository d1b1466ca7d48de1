//! Long-term engram store on SQLite (WAL mode, ACID transactions).
//!
//! Three embedding representations coexist per row: the full float vector,
//! an int8-quantised copy, and a 1-bit-per-dimension binary form used by the
//! Hamming prefilter. Superseded rows stay in place but are excluded from
//! default scans.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use mimo_domain::engram::{Engram, MemoryCategory, SupersessionKind};
use mimo_domain::error::{Error, Result};

use crate::embedding::{binarize, quantize_i8};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// New-engram input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Row content for an insert; ids and timestamps are assigned here.
#[derive(Debug, Clone)]
pub struct NewEngram {
    pub content: String,
    pub category: MemoryCategory,
    pub importance: f64,
    pub decay_rate: f64,
    pub protected: bool,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A lightweight row used by retrieval prefilters.
#[derive(Debug, Clone)]
pub struct BinaryRow {
    pub id: i64,
    pub binary: Vec<u8>,
}

/// Decay-relevant fields, streamed by the decay pass.
#[derive(Debug, Clone)]
pub struct DecayRow {
    pub id: i64,
    pub importance: f64,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
    pub decay_rate: f64,
    pub protected: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// SQLite-backed long-term store. The connection is guarded by a mutex:
/// writers serialize here, readers take short critical sections.
pub struct LongTermStore {
    conn: Mutex<Connection>,
    cap: usize,
}

impl LongTermStore {
    /// Open (or create) the store at `path`. `":memory:"` works for tests.
    pub fn open(path: &Path, cap: usize) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("open {}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Storage(format!("journal_mode: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::Storage(format!("foreign_keys: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
            cap,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS engrams (
                id INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                importance REAL NOT NULL DEFAULT 0.5,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                decay_rate REAL NOT NULL DEFAULT 1.0,
                protected INTEGER NOT NULL DEFAULT 0,
                embedding BLOB NOT NULL,
                embedding_i8 BLOB NOT NULL,
                embedding_i8_scale REAL NOT NULL,
                embedding_bin BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                superseded_by INTEGER REFERENCES engrams(id)
            );
            CREATE INDEX IF NOT EXISTS idx_engrams_superseded
                ON engrams(superseded_by);
            CREATE INDEX IF NOT EXISTS idx_engrams_category
                ON engrams(category);
            CREATE TABLE IF NOT EXISTS supersessions (
                old_id INTEGER NOT NULL,
                new_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                at TEXT NOT NULL,
                PRIMARY KEY (old_id, new_id)
            );
            CREATE TABLE IF NOT EXISTS active_days (
                day TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS patterns (
                pattern_id TEXT PRIMARY KEY,
                signature TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                promoted INTEGER NOT NULL DEFAULT 0,
                callable_as TEXT
            );",
        )
        .map_err(|e| Error::Storage(format!("schema: {e}")))?;
        Ok(())
    }

    // ── Inserts ──────────────────────────────────────────────────────

    /// Insert one engram inside a transaction. At the cap, exactly one
    /// least-scoring unprotected row is evicted first; when every existing
    /// row is protected the insert is rejected.
    pub fn insert(&self, new: NewEngram) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        enforce_cap(&tx, self.cap)?;
        let id = insert_row(&tx, &new)?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))?;
        Ok(id)
    }

    /// Insert a replacement engram and link it over `old_id` in the same
    /// transaction, so no default scan ever observes both versions live.
    pub fn insert_superseding(
        &self,
        new: NewEngram,
        old_id: i64,
        kind: SupersessionKind,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        enforce_cap(&tx, self.cap)?;
        let id = insert_row(&tx, &new)?;
        let updated = tx
            .execute(
                "UPDATE engrams SET superseded_by = ?1 WHERE id = ?2",
                params![id, old_id],
            )
            .map_err(|e| Error::Storage(format!("supersede: {e}")))?;
        if updated == 0 {
            // Dropping the transaction rolls the insert back.
            return Err(Error::NotFound(format!("memory {old_id}")));
        }
        tx.execute(
            "INSERT OR REPLACE INTO supersessions (old_id, new_id, kind, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![old_id, id, kind.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Storage(format!("supersede link: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))?;
        Ok(id)
    }

    /// Insert a batch inside one transaction. The cap is enforced per row
    /// exactly as in [`LongTermStore::insert`]; a failure rolls back only
    /// this batch.
    pub fn insert_batch(&self, batch: &[NewEngram]) -> Result<Vec<i64>> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        let mut ids = Vec::with_capacity(batch.len());
        for new in batch {
            enforce_cap(&tx, self.cap)?;
            ids.push(insert_row(&tx, new)?);
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))?;
        Ok(ids)
    }

    /// Delete lowest-importance, oldest unprotected rows until the store
    /// is back at the cap. A no-op while the count is within bounds;
    /// returns how many rows were evicted.
    pub fn evict_overflow(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        let count: usize = tx
            .query_row("SELECT COUNT(*) FROM engrams", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("count: {e}")))?;
        if count <= self.cap {
            return Ok(0);
        }
        let overflow = count - self.cap;
        let evicted = tx
            .execute(
                "DELETE FROM engrams WHERE id IN (
                    SELECT id FROM engrams WHERE protected = 0
                    ORDER BY importance ASC, created_at ASC, id ASC LIMIT ?1)",
                params![overflow as i64],
            )
            .map_err(|e| Error::Storage(format!("evict_overflow: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))?;
        if evicted > 0 {
            tracing::info!(evicted, cap = self.cap, "overflow pruned back to cap");
        }
        Ok(evicted)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: i64) -> Result<Option<Engram>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ENGRAM_COLUMNS} FROM engrams WHERE id = ?1"),
            params![id],
            row_to_engram,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("get: {e}")))
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM engrams", [], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("count: {e}")))
    }

    /// Live (non-superseded) count per category, for the aggregation surface.
    pub fn count_by_category(&self) -> Result<HashMap<String, usize>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT category, COUNT(*) FROM engrams
                 WHERE superseded_by IS NULL GROUP BY category",
            )
            .map_err(|e| Error::Storage(format!("count_by_category: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)))
            .map_err(|e| Error::Storage(format!("count_by_category: {e}")))?;
        let mut out = HashMap::new();
        for row in rows {
            let (category, count) = row.map_err(|e| Error::Storage(e.to_string()))?;
            out.insert(category, count);
        }
        Ok(out)
    }

    /// Bounded-batch scan of full engrams ordered by id. `after_id` pages;
    /// callers must not retain rows beyond their batch.
    pub fn scan(&self, after_id: i64, limit: usize, include_superseded: bool) -> Result<Vec<Engram>> {
        let conn = self.conn.lock();
        let filter = if include_superseded {
            ""
        } else {
            "AND superseded_by IS NULL"
        };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENGRAM_COLUMNS} FROM engrams WHERE id > ?1 {filter}
                 ORDER BY id ASC LIMIT ?2"
            ))
            .map_err(|e| Error::Storage(format!("scan: {e}")))?;
        let rows = stmt
            .query_map(params![after_id, limit as i64], row_to_engram)
            .map_err(|e| Error::Storage(format!("scan: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("scan: {e}")))
    }

    /// All binary embeddings of live rows, for the Hamming prefilter.
    pub fn binary_rows(&self) -> Result<Vec<BinaryRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, embedding_bin FROM engrams WHERE superseded_by IS NULL")
            .map_err(|e| Error::Storage(format!("binary_rows: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BinaryRow {
                    id: row.get(0)?,
                    binary: row.get(1)?,
                })
            })
            .map_err(|e| Error::Storage(format!("binary_rows: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("binary_rows: {e}")))
    }

    /// Load specific rows by id (rescoring stage).
    pub fn get_many(&self, ids: &[i64]) -> Result<Vec<Engram>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(engram) = self.get(*id)? {
                out.push(engram);
            }
        }
        Ok(out)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Atomically bump `access_count` and refresh `last_accessed_at`.
    pub fn update_access(&self, id: i64) -> Result<()> {
        self.apply_access_batch(&[id])
    }

    /// Apply a drained batch of access bumps in one transaction.
    pub fn apply_access_batch(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        for id in ids {
            tx.execute(
                "UPDATE engrams
                 SET access_count = access_count + 1, last_accessed_at = ?1
                 WHERE id = ?2",
                params![now, id],
            )
            .map_err(|e| Error::Storage(format!("update_access: {e}")))?;
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))
    }

    /// Link `new_id` as the replacement of `old_id`. Atomic with respect to
    /// default searches: a scan sees either no link or the completed link.
    pub fn supersede(&self, old_id: i64, new_id: i64, kind: SupersessionKind) -> Result<()> {
        if old_id == new_id {
            return Err(Error::InvalidArguments(
                "a memory cannot supersede itself".into(),
            ));
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        let updated = tx
            .execute(
                "UPDATE engrams SET superseded_by = ?1 WHERE id = ?2",
                params![new_id, old_id],
            )
            .map_err(|e| Error::Storage(format!("supersede: {e}")))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("memory {old_id}")));
        }
        tx.execute(
            "INSERT OR REPLACE INTO supersessions (old_id, new_id, kind, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![old_id, new_id, kind.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Storage(format!("supersede link: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))
    }

    pub fn set_protected(&self, id: i64, protected: bool) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE engrams SET protected = ?1 WHERE id = ?2",
                params![protected as i64, id],
            )
            .map_err(|e| Error::Storage(format!("set_protected: {e}")))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    pub fn set_importance(&self, id: i64, importance: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(Error::InvalidArguments(format!(
                "importance must be within [0, 1], got {importance}"
            )));
        }
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE engrams SET importance = ?1 WHERE id = ?2",
                params![importance, id],
            )
            .map_err(|e| Error::Storage(format!("set_importance: {e}")))?;
        if updated == 0 {
            return Err(Error::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM engrams WHERE id = ?1", params![id])
            .map_err(|e| Error::Storage(format!("delete: {e}")))?;
        Ok(deleted > 0)
    }

    /// Delete a set of decayed rows in one transaction. Protected rows are
    /// skipped regardless of what the caller passes.
    pub fn prune(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("begin: {e}")))?;
        let mut pruned = 0;
        for id in ids {
            pruned += tx
                .execute(
                    "DELETE FROM engrams WHERE id = ?1 AND protected = 0",
                    params![id],
                )
                .map_err(|e| Error::Storage(format!("prune: {e}")))?;
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("commit: {e}")))?;
        Ok(pruned)
    }

    /// Decay-relevant fields for every unprotected live row.
    pub fn decay_rows(&self) -> Result<Vec<DecayRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, importance, last_accessed_at, access_count, decay_rate, protected
                 FROM engrams WHERE superseded_by IS NULL",
            )
            .map_err(|e| Error::Storage(format!("decay_rows: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(|e| Error::Storage(format!("decay_rows: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, importance, last, access_count, decay_rate, protected) =
                row.map_err(|e| Error::Storage(e.to_string()))?;
            out.push(DecayRow {
                id,
                importance,
                last_accessed_at: parse_ts(&last)?,
                access_count,
                decay_rate,
                protected: protected != 0,
            });
        }
        Ok(out)
    }

    // ── Active days ──────────────────────────────────────────────────

    /// Record today as an active day (a day with at least one tool call).
    pub fn record_active_day(&self) -> Result<()> {
        let today = Utc::now().date_naive().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO active_days (day) VALUES (?1)",
            params![today],
        )
        .map_err(|e| Error::Storage(format!("record_active_day: {e}")))?;
        Ok(())
    }

    /// All recorded active days, ascending.
    pub fn active_days(&self) -> Result<Vec<NaiveDate>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT day FROM active_days ORDER BY day ASC")
            .map_err(|e| Error::Storage(format!("active_days: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Storage(format!("active_days: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            let day = row.map_err(|e| Error::Storage(e.to_string()))?;
            let parsed = day
                .parse::<NaiveDate>()
                .map_err(|e| Error::Storage(format!("active day '{day}': {e}")))?;
            out.push(parsed);
        }
        Ok(out)
    }

    // ── Patterns (emergence collaborator surface) ────────────────────

    pub fn record_pattern_use(&self, signature: &str, success: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO patterns (pattern_id, signature, usage_count, success_count)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(pattern_id) DO UPDATE SET
                usage_count = usage_count + 1,
                success_count = success_count + ?3",
            params![signature, signature, success as i64],
        )
        .map_err(|e| Error::Storage(format!("record_pattern_use: {e}")))?;
        Ok(())
    }

    pub fn patterns(&self, limit: usize) -> Result<Vec<mimo_domain::triple::Pattern>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT pattern_id, signature, usage_count, success_count, promoted, callable_as
                 FROM patterns ORDER BY usage_count DESC LIMIT ?1",
            )
            .map_err(|e| Error::Storage(format!("patterns: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(mimo_domain::triple::Pattern {
                    pattern_id: row.get(0)?,
                    signature: row.get(1)?,
                    usage_count: row.get::<_, i64>(2)? as u64,
                    success_count: row.get::<_, i64>(3)? as u64,
                    promoted: row.get::<_, i64>(4)? != 0,
                    callable_as: row.get(5)?,
                })
            })
            .map_err(|e| Error::Storage(format!("patterns: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("patterns: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ENGRAM_COLUMNS: &str = "id, content, category, importance, created_at, \
     last_accessed_at, access_count, decay_rate, protected, embedding, \
     metadata, superseded_by";

/// Evict one least-scoring unprotected row when the cap is reached.
fn enforce_cap(tx: &rusqlite::Transaction<'_>, cap: usize) -> Result<()> {
    let count: usize = tx
        .query_row("SELECT COUNT(*) FROM engrams", [], |row| row.get(0))
        .map_err(|e| Error::Storage(format!("count: {e}")))?;
    if count < cap {
        return Ok(());
    }
    let victim: Option<i64> = tx
        .query_row(
            "SELECT id FROM engrams WHERE protected = 0
             ORDER BY importance ASC, created_at ASC, id ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("evict select: {e}")))?;
    match victim {
        Some(id) => {
            tx.execute("DELETE FROM engrams WHERE id = ?1", params![id])
                .map_err(|e| Error::Storage(format!("evict: {e}")))?;
            tracing::debug!(evicted = id, "memory cap reached, evicted one engram");
            Ok(())
        }
        None => Err(Error::Conflict(
            "memory cap reached and every engram is protected".into(),
        )),
    }
}

fn insert_row(tx: &rusqlite::Transaction<'_>, new: &NewEngram) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let embedding_bytes = f32s_to_bytes(&new.embedding);
    let (quantised, scale) = quantize_i8(&new.embedding);
    let quantised_bytes: Vec<u8> = quantised.iter().map(|v| *v as u8).collect();
    let binary = binarize(&new.embedding);
    let metadata = serde_json::to_string(&new.metadata)
        .map_err(|e| Error::Storage(format!("metadata encode: {e}")))?;

    tx.execute(
        "INSERT INTO engrams
            (content, category, importance, created_at, last_accessed_at,
             access_count, decay_rate, protected, embedding, embedding_i8,
             embedding_i8_scale, embedding_bin, metadata)
         VALUES (?1, ?2, ?3, ?4, ?4, 0, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            new.content,
            new.category.as_str(),
            new.importance,
            now,
            new.decay_rate,
            new.protected as i64,
            embedding_bytes,
            quantised_bytes,
            scale as f64,
            binary,
            metadata,
        ],
    )
    .map_err(|e| Error::Storage(format!("insert: {e}")))?;
    Ok(tx.last_insert_rowid())
}

fn row_to_engram(row: &rusqlite::Row<'_>) -> rusqlite::Result<Engram> {
    let category: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    let last_accessed_at: String = row.get(5)?;
    let embedding_bytes: Vec<u8> = row.get(9)?;
    let metadata_raw: String = row.get(10)?;

    Ok(Engram {
        id: row.get(0)?,
        content: row.get(1)?,
        category: MemoryCategory::parse(&category).unwrap_or(MemoryCategory::Fact),
        importance: row.get(3)?,
        created_at: parse_ts_sql(&created_at, 4)?,
        last_accessed_at: parse_ts_sql(&last_accessed_at, 5)?,
        access_count: row.get(6)?,
        decay_rate: row.get(7)?,
        protected: row.get::<_, i64>(8)? != 0,
        embedding: bytes_to_f32s(&embedding_bytes),
        metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
        superseded_by: row.get(11)?,
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("timestamp '{raw}': {e}")))
}

fn parse_ts_sql(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn f32s_to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub(crate) fn bytes_to_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash_embedding;

    fn store() -> LongTermStore {
        LongTermStore::open(Path::new(":memory:"), 100_000).unwrap()
    }

    fn engram(content: &str) -> NewEngram {
        NewEngram {
            content: content.into(),
            category: MemoryCategory::Fact,
            importance: 0.5,
            decay_rate: 1.0,
            protected: false,
            embedding: hash_embedding(content, 64),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = store();
        let id = store.insert(engram("hello")).unwrap();
        let got = store.get(id).unwrap().expect("row should exist");
        assert_eq!(got.content, "hello");
        assert_eq!(got.access_count, 0);
        assert_eq!(got.embedding, hash_embedding("hello", 64));
        assert!(got.superseded_by.is_none());
    }

    #[test]
    fn access_bump_is_monotonic() {
        let store = store();
        let id = store.insert(engram("bump")).unwrap();
        let before = store.get(id).unwrap().unwrap();
        store.update_access(id).unwrap();
        store.update_access(id).unwrap();
        let after = store.get(id).unwrap().unwrap();
        assert_eq!(after.access_count, before.access_count + 2);
        assert!(after.last_accessed_at >= before.last_accessed_at);
    }

    #[test]
    fn supersede_excludes_old_from_default_scans() {
        let store = store();
        let old = store.insert(engram("postgres")).unwrap();
        let new = store.insert(engram("mysql")).unwrap();
        store
            .supersede(old, new, SupersessionKind::Correction)
            .unwrap();

        let default_ids: Vec<i64> = store.scan(0, 100, false).unwrap().iter().map(|e| e.id).collect();
        assert!(!default_ids.contains(&old));
        assert!(default_ids.contains(&new));

        let all_ids: Vec<i64> = store.scan(0, 100, true).unwrap().iter().map(|e| e.id).collect();
        assert!(all_ids.contains(&old));
    }

    #[test]
    fn insert_superseding_is_atomic() {
        let store = store();
        let old = store.insert(engram("old fact")).unwrap();
        let new = store
            .insert_superseding(engram("new fact"), old, SupersessionKind::Update)
            .unwrap();

        let live: Vec<i64> = store.scan(0, 10, false).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(live, vec![new]);

        // A missing target rolls the insert back too.
        let before = store.count().unwrap();
        let err = store
            .insert_superseding(engram("orphan"), 9999, SupersessionKind::Update)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.count().unwrap(), before);
    }

    #[test]
    fn supersede_self_is_rejected() {
        let store = store();
        let id = store.insert(engram("loop")).unwrap();
        assert!(matches!(
            store.supersede(id, id, SupersessionKind::Update),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn cap_evicts_exactly_one_unprotected() {
        let store = LongTermStore::open(Path::new(":memory:"), 3).unwrap();
        let mut low = engram("low importance");
        low.importance = 0.1;
        let low_id = store.insert(low).unwrap();
        store.insert(engram("two")).unwrap();
        store.insert(engram("three")).unwrap();
        assert_eq!(store.count().unwrap(), 3);

        store.insert(engram("four")).unwrap();
        assert_eq!(store.count().unwrap(), 3);
        assert!(store.get(low_id).unwrap().is_none(), "lowest importance row evicted");
    }

    #[test]
    fn insert_batch_enforces_cap_per_row() {
        let store = LongTermStore::open(Path::new(":memory:"), 3).unwrap();
        let batch: Vec<NewEngram> = (0..5).map(|i| engram(&format!("row {i}"))).collect();
        store.insert_batch(&batch).unwrap();
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn evict_overflow_prunes_back_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cap.db");

        // Build an overflowed store by reopening with a smaller cap.
        {
            let store = LongTermStore::open(&db_path, 10).unwrap();
            let mut keeper = engram("protected low");
            keeper.importance = 0.0;
            keeper.protected = true;
            store.insert(keeper).unwrap();
            for i in 0..5 {
                let mut row = engram(&format!("row {i}"));
                row.importance = 0.1 * (i + 1) as f64;
                store.insert(row).unwrap();
            }
        }

        let store = LongTermStore::open(&db_path, 3).unwrap();
        assert_eq!(store.count().unwrap(), 6);
        let evicted = store.evict_overflow().unwrap();
        assert_eq!(evicted, 3);
        assert_eq!(store.count().unwrap(), 3);

        // The protected row survives even at importance zero; the lowest
        // unprotected importances were evicted.
        let survivors = store.scan(0, 10, true).unwrap();
        assert!(survivors.iter().any(|e| e.protected));
        assert!(survivors
            .iter()
            .filter(|e| !e.protected)
            .all(|e| e.importance > 0.3));

        // Within bounds it is a no-op.
        assert_eq!(store.evict_overflow().unwrap(), 0);
    }

    #[test]
    fn cap_with_all_protected_rejects() {
        let store = LongTermStore::open(Path::new(":memory:"), 1).unwrap();
        let mut protected = engram("keep me");
        protected.protected = true;
        store.insert(protected).unwrap();
        assert!(matches!(
            store.insert(engram("overflow")),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn importance_out_of_range_is_rejected() {
        let store = store();
        let id = store.insert(engram("clamp")).unwrap();
        assert!(store.set_importance(id, 1.5).is_err());
        assert!(store.set_importance(id, -0.1).is_err());
        assert!(store.set_importance(id, 0.9).is_ok());
    }

    #[test]
    fn prune_skips_protected_rows() {
        let store = store();
        let mut protected = engram("protected");
        protected.protected = true;
        let protected_id = store.insert(protected).unwrap();
        let plain_id = store.insert(engram("plain")).unwrap();
        let pruned = store.prune(&[protected_id, plain_id]).unwrap();
        assert_eq!(pruned, 1);
        assert!(store.get(protected_id).unwrap().is_some());
    }

    #[test]
    fn scan_pages_by_id() {
        let store = store();
        for i in 0..10 {
            store.insert(engram(&format!("row {i}"))).unwrap();
        }
        let first = store.scan(0, 4, false).unwrap();
        assert_eq!(first.len(), 4);
        let next = store.scan(first.last().unwrap().id, 4, false).unwrap();
        assert_eq!(next.len(), 4);
        assert!(next[0].id > first[3].id);
    }

    #[test]
    fn active_days_dedupe() {
        let store = store();
        store.record_active_day().unwrap();
        store.record_active_day().unwrap();
        assert_eq!(store.active_days().unwrap().len(), 1);
    }
}
