//! SQLite store for the four record collections
//!
//! All writes are durable before the call returns. Uniqueness constraints
//! (catalog fingerprint, one pricing record per catalog entry) are
//! enforced by the schema and surface as `ConstraintViolation` instead of
//! silently overwriting. Cross-collection writes are not atomic as a
//! unit; callers that need a scan record plus a sync task issue two calls
//! and tolerate the gap.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::info;

use crate::catalog::{CatalogEntry, PricingRecord, PricingSnapshot};
use crate::error::{Result, ScanError};
use crate::storage::ScanRecord;
use crate::sync::{SyncTask, SyncTaskKind, SyncTaskStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS catalog (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    manufacturer  TEXT NOT NULL,
    casino        TEXT,
    fingerprint   TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS pricing (
    id               TEXT PRIMARY KEY,
    catalog_id       TEXT NOT NULL UNIQUE REFERENCES catalog(id),
    buy_price        REAL NOT NULL,
    sell_price       REAL NOT NULL,
    last_updated     TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    data_source      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_history (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL,
    catalog_id  TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    confidence  REAL NOT NULL,
    buy_price   REAL NOT NULL,
    sell_price  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scan_history_session ON scan_history(session_id);

CREATE TABLE IF NOT EXISTS sync_queue (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    payload_key TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending'
);
";

/// Durable keyed store over the catalog, pricing, scan history, and
/// sync queue collections.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScanError::Initialization(format!("cannot create data dir: {e}"))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ScanError::Initialization(format!("cannot open database: {e}")))?;
        let store = Self::init(conn)?;
        info!("Store opened at {:?}", path);
        Ok(store)
    }

    /// Open an in-memory database (used by tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScanError::Initialization(format!("cannot open database: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- catalog ---

    /// Insert a catalog entry. Fails with `ConstraintViolation` on a
    /// duplicate id or fingerprint.
    pub fn insert_catalog_entry(&self, entry: &CatalogEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO catalog (id, name, manufacturer, casino, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.name,
                entry.manufacturer,
                entry.casino,
                entry.fingerprint,
            ],
        )
        .map_err(map_constraint)?;
        Ok(())
    }

    pub fn get_catalog_entry(&self, id: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, manufacturer, casino, fingerprint
             FROM catalog WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(catalog_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Secondary-index lookup: catalog entry by visual fingerprint.
    pub fn get_catalog_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, manufacturer, casino, fingerprint
             FROM catalog WHERE fingerprint = ?1",
        )?;
        let mut rows = stmt.query(params![fingerprint])?;
        match rows.next()? {
            Some(row) => Ok(Some(catalog_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn catalog_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM catalog", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    // --- pricing ---

    /// Insert or replace the pricing record for a catalog entry. At most
    /// one active record per entry; refreshes replace in place.
    pub fn upsert_pricing(&self, record: &PricingRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pricing
                 (id, catalog_id, buy_price, sell_price, last_updated, confidence_score, data_source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(catalog_id) DO UPDATE SET
                 buy_price = excluded.buy_price,
                 sell_price = excluded.sell_price,
                 last_updated = excluded.last_updated,
                 confidence_score = excluded.confidence_score,
                 data_source = excluded.data_source",
            params![
                record.id,
                record.catalog_id,
                record.buy_price,
                record.sell_price,
                record.last_updated.to_rfc3339(),
                record.confidence_score,
                record.data_source,
            ],
        )
        .map_err(map_constraint)?;
        Ok(())
    }

    /// Secondary-index lookup: pricing by catalog id.
    pub fn get_pricing_for(&self, catalog_id: &str) -> Result<Option<PricingRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, catalog_id, buy_price, sell_price, last_updated, confidence_score, data_source
             FROM pricing WHERE catalog_id = ?1",
        )?;
        let mut rows = stmt.query(params![catalog_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(PricingRecord {
                id: row.get(0)?,
                catalog_id: row.get(1)?,
                buy_price: row.get(2)?,
                sell_price: row.get(3)?,
                last_updated: parse_datetime(&row.get::<_, String>(4)?)?,
                confidence_score: row.get(5)?,
                data_source: row.get(6)?,
            })),
            None => Ok(None),
        }
    }

    // --- scan history ---

    pub fn insert_scan_record(&self, record: &ScanRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scan_history
                 (id, session_id, catalog_id, observed_at, confidence, buy_price, sell_price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.session_id,
                record.catalog_id,
                record.observed_at.to_rfc3339(),
                record.classification_confidence as f64,
                record.pricing_snapshot.buy_price,
                record.pricing_snapshot.sell_price,
            ],
        )
        .map_err(map_constraint)?;
        Ok(())
    }

    pub fn get_scan_record(&self, id: &str) -> Result<Option<ScanRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, catalog_id, observed_at, confidence, buy_price, sell_price
             FROM scan_history WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(scan_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Secondary-index lookup: scan records for a session, in
    /// observation order.
    pub fn get_scan_history(&self, session_id: &str) -> Result<Vec<ScanRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, catalog_id, observed_at, confidence, buy_price, sell_price
             FROM scan_history WHERE session_id = ?1
             ORDER BY observed_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![session_id])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(scan_from_row(row)?);
        }
        Ok(records)
    }

    // --- sync queue ---

    /// Append a sync task. Returns its monotonic id.
    pub fn enqueue_task(&self, kind: SyncTaskKind, payload_key: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_queue (kind, payload_key, enqueued_at, status)
             VALUES (?1, ?2, ?3, 'pending')",
            params![kind.as_str(), payload_key, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Pending sync tasks in enqueue order.
    pub fn list_pending(&self) -> Result<Vec<SyncTask>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload_key, enqueued_at, status
             FROM sync_queue WHERE status = 'pending'
             ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_str: String = row.get(1)?;
            let status_str: String = row.get(4)?;
            tasks.push(SyncTask {
                id: row.get(0)?,
                kind: SyncTaskKind::parse(&kind_str)
                    .ok_or_else(|| corrupt_column(1, &kind_str))?,
                payload_key: row.get(2)?,
                enqueued_at: parse_datetime(&row.get::<_, String>(3)?)?,
                status: SyncTaskStatus::parse(&status_str)
                    .ok_or_else(|| corrupt_column(4, &status_str))?,
            });
        }
        Ok(tasks)
    }

    /// Mark a task done. Marking an already-done task is a no-op.
    pub fn mark_done(&self, task_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sync_queue SET status = 'done' WHERE id = ?1",
            params![task_id],
        )?;
        Ok(())
    }
}

fn catalog_from_row(row: &rusqlite::Row<'_>) -> Result<CatalogEntry> {
    Ok(CatalogEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        manufacturer: row.get(2)?,
        casino: row.get(3)?,
        fingerprint: row.get(4)?,
    })
}

fn scan_from_row(row: &rusqlite::Row<'_>) -> Result<ScanRecord> {
    Ok(ScanRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        catalog_id: row.get(2)?,
        observed_at: parse_datetime(&row.get::<_, String>(3)?)?,
        classification_confidence: row.get::<_, f64>(4)? as f32,
        pricing_snapshot: PricingSnapshot {
            buy_price: row.get(5)?,
            sell_price: row.get(6)?,
        },
    })
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ScanError::Storage(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))
        })
}

fn corrupt_column(index: usize, value: &str) -> ScanError {
    ScanError::Storage(rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unrecognized value '{value}'"),
        )),
    ))
}

/// Map SQLite constraint failures onto the pipeline's error taxonomy.
fn map_constraint(err: rusqlite::Error) -> ScanError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ScanError::ConstraintViolation(
                msg.clone().unwrap_or_else(|| "uniqueness breach".to_string()),
            )
        }
        _ => ScanError::Storage(err),
    }
}
