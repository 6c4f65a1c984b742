// 🗄️ Record Store - SQLite + WAL
//
// Every entity is stored as a versioned JSON body in one `records` table.
// Updates and deletes never lose data: the previous body is appended to
// `record_history`, and every change is written to the `events` audit trail.

use crate::entities::{
    Asset, AssetCategory, Expense, ExpenseCategory, Frequency, Income, IncomeKind, Liability,
    LiabilityKind, Profile, PropertyScenario, Record, RecordKind,
};
use crate::entities::profile::PROFILE_ID;
use crate::error::{FinanceError, Result};
use crate::projection::FinancialSnapshot;
use anyhow::Context as AnyhowContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// A superseded version of a record
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub record_id: String,
    pub kind: String,
    pub version: i64,
    pub body: serde_json::Value,
    pub superseded_at: DateTime<Utc>,
    pub reason: String,
}

pub fn open_database(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;
    setup_database(&conn).context("Failed to initialize database schema")?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Records (one row per entity, JSON body)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            body TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            idempotency_hash TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Record history (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS record_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            version INTEGER NOT NULL,
            body TEXT NOT NULL,
            superseded_at TEXT NOT NULL,
            reason TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Pending actions proposed by the assistant
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pending_actions (
            id TEXT PRIMARY KEY,
            intent TEXT NOT NULL,
            summary TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            result TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute("CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_name ON records(kind, name COLLATE NOCASE)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_record ON record_history(record_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_actions(status)",
        [],
    )?;

    Ok(())
}

/// Cheap liveness check for health endpoints
pub fn ping(conn: &Connection) -> Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

fn idempotency_hash<T: Record>(record: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}", T::KIND, record.idempotency_key()));
    format!("{:x}", hasher.finalize())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Run `write` so that all of its statements land or none do. Savepoints nest,
/// so this also works inside an open transaction (e.g. confirming an action).
fn in_savepoint<T>(conn: &Connection, write: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute_batch("SAVEPOINT record_write")?;
    match write(conn) {
        Ok(value) => {
            conn.execute_batch("RELEASE record_write")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK TO record_write; RELEASE record_write") {
                tracing::error!(error = %rollback, "failed to roll back record write");
            }
            Err(e)
        }
    }
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

// ============================================================================
// RECORD CRUD
// ============================================================================

/// Insert a new record. Invalid records and duplicates are rejected.
pub fn insert_record<T: Record>(conn: &Connection, record: &T, actor: &str) -> Result<()> {
    record.validate().map_err(FinanceError::Validation)?;
    in_savepoint(conn, |conn| write_insert(conn, record, actor))
}

fn write_insert<T: Record>(conn: &Connection, record: &T, actor: &str) -> Result<()> {

    let now = Utc::now();
    let body = serde_json::to_string(record)?;
    let result = conn.execute(
        "INSERT INTO records (id, kind, name, body, version, idempotency_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            record.id(),
            T::KIND,
            record.name(),
            body,
            record.version(),
            idempotency_hash(record),
            now.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(FinanceError::Conflict(format!(
                "{} '{}' already exists",
                T::KIND,
                record.name()
            )));
        }
        Err(e) => return Err(e.into()),
    }

    insert_event(
        conn,
        &Event::new(
            "record_created",
            T::KIND,
            record.id(),
            serde_json::json!({ "name": record.name() }),
            actor,
        ),
    )?;
    tracing::info!(kind = T::KIND, id = record.id(), name = record.name(), "record created");
    Ok(())
}

pub fn get_record<T: Record>(conn: &Connection, id: &str) -> Result<T> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM records WHERE kind = ?1 AND id = ?2",
            params![T::KIND, id],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(serde_json::from_str(&body)?),
        None => Err(FinanceError::not_found(T::KIND, id)),
    }
}

pub fn list_records<T: Record>(conn: &Connection) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(
        "SELECT body FROM records WHERE kind = ?1 ORDER BY name COLLATE NOCASE, created_at",
    )?;
    let bodies = stmt
        .query_map([T::KIND], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(FinanceError::from))
        .collect()
}

/// Case-insensitive lookup by display name
pub fn find_record_by_name<T: Record>(conn: &Connection, name: &str) -> Result<Option<T>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM records WHERE kind = ?1 AND name = ?2 COLLATE NOCASE
             ORDER BY created_at LIMIT 1",
            params![T::KIND, name.trim()],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| serde_json::from_str(&b).map_err(FinanceError::from))
        .transpose()
}

fn archive(conn: &Connection, kind: &str, id: &str, reason: &str) -> Result<i64> {
    let current: Option<(String, i64)> = conn
        .query_row(
            "SELECT body, version FROM records WHERE kind = ?1 AND id = ?2",
            params![kind, id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (body, version) = current.ok_or_else(|| FinanceError::not_found(kind, id))?;
    conn.execute(
        "INSERT INTO record_history (record_id, kind, version, body, superseded_at, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, kind, version, body, Utc::now().to_rfc3339(), reason],
    )?;
    Ok(version)
}

/// Replace a record's values. Identity is preserved; the version is bumped
/// and the previous body is kept in history.
pub fn update_record<T: Record>(conn: &Connection, record: &mut T, actor: &str) -> Result<()> {
    record.validate().map_err(FinanceError::Validation)?;

    let version = record.version();
    let outcome = in_savepoint(conn, |conn| write_update(conn, record, actor));
    if outcome.is_err() {
        record.set_version(version);
    }
    outcome
}

fn write_update<T: Record>(conn: &Connection, record: &mut T, actor: &str) -> Result<()> {

    let previous_version = archive(conn, T::KIND, record.id(), "updated")?;
    let now = Utc::now();
    record.set_version(previous_version + 1);
    record.touch(now);

    let body = serde_json::to_string(record)?;
    let result = conn.execute(
        "UPDATE records
         SET name = ?1, body = ?2, version = ?3, idempotency_hash = ?4, updated_at = ?5
         WHERE kind = ?6 AND id = ?7",
        params![
            record.name(),
            body,
            record.version(),
            idempotency_hash(record),
            now.to_rfc3339(),
            T::KIND,
            record.id(),
        ],
    );
    match result {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(FinanceError::Conflict(format!(
                "another {} has the same values as '{}'",
                T::KIND,
                record.name()
            )));
        }
        Err(e) => return Err(e.into()),
    }

    insert_event(
        conn,
        &Event::new(
            "record_updated",
            T::KIND,
            record.id(),
            serde_json::json!({ "name": record.name(), "version": record.version() }),
            actor,
        ),
    )?;
    tracing::info!(kind = T::KIND, id = record.id(), version = record.version(), "record updated");
    Ok(())
}

pub fn delete_record<T: Record>(conn: &Connection, id: &str, actor: &str) -> Result<()> {
    in_savepoint(conn, |conn| write_delete::<T>(conn, id, actor))
}

fn write_delete<T: Record>(conn: &Connection, id: &str, actor: &str) -> Result<()> {
    let version = archive(conn, T::KIND, id, "deleted")?;
    conn.execute(
        "DELETE FROM records WHERE kind = ?1 AND id = ?2",
        params![T::KIND, id],
    )?;
    insert_event(
        conn,
        &Event::new(
            "record_deleted",
            T::KIND,
            id,
            serde_json::json!({ "version": version }),
            actor,
        ),
    )?;
    tracing::info!(kind = T::KIND, id, "record deleted");
    Ok(())
}

/// Overlay `patch` onto a stored record and save it as a new version.
/// `id`, `created_at` and `version` can't be patched; a `version` that doesn't
/// match the stored one is a conflict (the caller edited a stale copy).
pub fn patch_record<T: Record>(
    conn: &Connection,
    id: &str,
    patch: &serde_json::Value,
    actor: &str,
) -> Result<T> {
    let current: T = get_record(conn, id)?;
    let serde_json::Value::Object(fields) = patch else {
        return Err(FinanceError::invalid("body", "Expected a JSON object"));
    };

    if let Some(expected) = fields.get("version").and_then(|v| v.as_i64()) {
        if expected != current.version() {
            return Err(FinanceError::Conflict(format!(
                "{} {} is at version {}, not {}",
                T::KIND,
                id,
                current.version(),
                expected
            )));
        }
    }

    let mut merged = serde_json::to_value(&current)?;
    if let serde_json::Value::Object(target) = &mut merged {
        for (key, value) in fields {
            if !matches!(key.as_str(), "id" | "created_at" | "version") {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    let mut record: T = serde_json::from_value(merged)
        .map_err(|e| FinanceError::invalid("body", e.to_string()))?;
    update_record(conn, &mut record, actor)?;
    Ok(record)
}

/// Superseded versions of a record, oldest first
pub fn record_history(conn: &Connection, kind: &str, id: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT record_id, kind, version, body, superseded_at, reason
         FROM record_history
         WHERE kind = ?1 AND record_id = ?2
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![kind, id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(record_id, kind, version, body, superseded_at, reason)| {
            Ok(HistoryEntry {
                record_id,
                kind,
                version,
                body: serde_json::from_str(&body)?,
                superseded_at: parse_time(&superseded_at),
                reason,
            })
        })
        .collect()
}

pub fn count_records(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records WHERE kind != ?1",
        [Profile::KIND],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// PROFILE
// ============================================================================

pub fn load_profile(conn: &Connection) -> Result<Profile> {
    match get_record::<Profile>(conn, PROFILE_ID) {
        Ok(profile) => Ok(profile),
        Err(FinanceError::NotFound { .. }) => Ok(Profile::default()),
        Err(e) => Err(e),
    }
}

/// Insert or update the singleton profile
pub fn save_profile(conn: &Connection, profile: &mut Profile, actor: &str) -> Result<()> {
    profile.id = PROFILE_ID.to_string();
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE kind = ?1 AND id = ?2)",
        params![Profile::KIND, PROFILE_ID],
        |row| row.get(0),
    )?;
    if exists {
        update_record(conn, profile, actor)
    } else {
        insert_record(conn, profile, actor)
    }
}

/// Everything the projection engine needs
pub fn load_snapshot(conn: &Connection) -> Result<FinancialSnapshot> {
    Ok(FinancialSnapshot {
        profile: load_profile(conn)?,
        assets: list_records(conn)?,
        liabilities: list_records(conn)?,
        incomes: list_records(conn)?,
        expenses: list_records(conn)?,
        scenarios: list_records(conn)?,
    })
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_time(&timestamp_str),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).unwrap_or(serde_json::Value::Null),
                actor: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One line of an import file. Columns that don't apply to a kind are left blank.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub amount: f64,
    #[serde(default)]
    pub frequency: String,
    /// Growth or interest rate as a fraction
    #[serde(default)]
    pub rate: Option<f64>,
    /// Monthly repayment for liabilities
    #[serde(default)]
    pub payment: Option<f64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub cpf: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: Vec<String>,
}

pub fn load_csv(csv_path: &Path) -> anyhow::Result<Vec<ImportRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .context("Failed to open CSV file")?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let row: ImportRow =
            result.with_context(|| format!("Failed to deserialize row {}", line + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

fn parse_tag<T: serde::de::DeserializeOwned>(tag: &str, fallback: T) -> T {
    if tag.trim().is_empty() {
        return fallback;
    }
    serde_json::from_value(serde_json::json!(tag.trim().to_lowercase())).unwrap_or(fallback)
}

impl ImportRow {
    fn frequency(&self) -> Frequency {
        Frequency::parse(&self.frequency).unwrap_or_default()
    }

    fn insert(&self, conn: &Connection, actor: &str) -> Result<()> {
        let kind = RecordKind::parse(&self.kind)
            .ok_or_else(|| FinanceError::invalid("kind", format!("unknown kind '{}'", self.kind)))?;

        match kind {
            RecordKind::Asset => {
                let mut asset = Asset::new(
                    &self.name,
                    parse_tag(&self.category, AssetCategory::Other),
                    self.amount,
                );
                asset.growth_rate = self.rate;
                insert_record(conn, &asset, actor)
            }
            RecordKind::Liability => {
                let liability = Liability::new(
                    &self.name,
                    parse_tag(&self.category, LiabilityKind::Other),
                    self.amount,
                    self.rate.unwrap_or(0.0),
                    self.payment.unwrap_or(0.0),
                );
                insert_record(conn, &liability, actor)
            }
            RecordKind::Income => {
                let mut income = Income::new(
                    &self.name,
                    parse_tag(&self.category, IncomeKind::Other),
                    self.amount,
                    self.frequency(),
                );
                income.growth_rate = self.rate;
                income.cpf_applicable = self.cpf.unwrap_or(false);
                income.start_date = self.start_date;
                income.end_date = self.end_date;
                insert_record(conn, &income, actor)
            }
            RecordKind::Expense => {
                let mut expense = Expense::new(
                    &self.name,
                    parse_tag(&self.category, ExpenseCategory::Other),
                    self.amount,
                    self.frequency(),
                );
                expense.start_date = self.start_date;
                expense.end_date = self.end_date;
                insert_record(conn, &expense, actor)
            }
            RecordKind::Scenario => Err(FinanceError::invalid(
                "kind",
                "scenarios cannot be imported from CSV",
            )),
        }
    }
}

/// Insert rows, skipping duplicates and collecting per-row rejections
pub fn import_rows(conn: &Connection, rows: &[ImportRow]) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for (i, row) in rows.iter().enumerate() {
        match row.insert(conn, "csv_importer") {
            Ok(()) => report.inserted += 1,
            Err(FinanceError::Conflict(_)) => report.duplicates += 1,
            Err(e @ FinanceError::Validation(_)) => {
                report.rejected.push(format!("row {}: {}", i + 2, e));
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        inserted = report.inserted,
        duplicates = report.duplicates,
        rejected = report.rejected.len(),
        "csv import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_get_record() {
        let conn = test_conn();
        let asset = Asset::new("DBS Multiplier", AssetCategory::Cash, 40_000.0);
        insert_record(&conn, &asset, "test").unwrap();

        let loaded: Asset = get_record(&conn, &asset.id).unwrap();
        assert_eq!(loaded.name, "DBS Multiplier");
        assert_eq!(loaded.value, 40_000.0);
        assert_eq!(count_records(&conn).unwrap(), 1);
    }

    #[test]
    fn test_patch_record_merges_fields() {
        let conn = test_conn();
        let asset = Asset::new("Brokerage", AssetCategory::Investment, 20_000.0).with_growth(0.06);
        insert_record(&conn, &asset, "test").unwrap();

        let patch = serde_json::json!({ "value": 25_000.0, "id": "hijack" });
        let updated: Asset = patch_record(&conn, &asset.id, &patch, "test").unwrap();

        assert_eq!(updated.id, asset.id);
        assert_eq!(updated.value, 25_000.0);
        assert_eq!(updated.growth_rate, Some(0.06));
        assert_eq!(updated.version, 2);
        assert_eq!(record_history(&conn, "asset", &asset.id).unwrap().len(), 1);
    }

    #[test]
    fn test_patch_record_rejects_stale_version_and_bad_values() {
        let conn = test_conn();
        let asset = Asset::new("Brokerage", AssetCategory::Investment, 20_000.0);
        insert_record(&conn, &asset, "test").unwrap();

        let stale = serde_json::json!({ "value": 1.0, "version": 7 });
        let err = patch_record::<Asset>(&conn, &asset.id, &stale, "test").unwrap_err();
        assert!(matches!(err, FinanceError::Conflict(_)));

        let wrong_type = serde_json::json!({ "value": "lots" });
        let err = patch_record::<Asset>(&conn, &asset.id, &wrong_type, "test").unwrap_err();
        assert!(matches!(err, FinanceError::Validation(_)));

        let missing = patch_record::<Asset>(&conn, "nope", &serde_json::json!({}), "test");
        assert!(matches!(missing, Err(FinanceError::NotFound { .. })));
    }

    #[test]
    fn test_conflicting_update_leaves_no_trace() {
        let conn = test_conn();
        let savings = Asset::new("Savings", AssetCategory::Cash, 1_000.0);
        let mut other = Asset::new("Emergency", AssetCategory::Cash, 2_000.0);
        insert_record(&conn, &savings, "test").unwrap();
        insert_record(&conn, &other, "test").unwrap();

        let clash = serde_json::json!({ "name": "Savings", "value": 1_000.0 });
        let err = patch_record::<Asset>(&conn, &other.id, &clash, "test").unwrap_err();
        assert!(matches!(err, FinanceError::Conflict(_)));

        let stored: Asset = get_record(&conn, &other.id).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.name, "Emergency");
        assert!(record_history(&conn, Asset::KIND, &other.id).unwrap().is_empty());
        assert_eq!(get_events_for_entity(&conn, Asset::KIND, &other.id).unwrap().len(), 1);

        other.name = "Savings".to_string();
        other.value = 1_000.0;
        assert!(update_record(&conn, &mut other, "test").is_err());
        assert_eq!(other.version, 1);

        // A failed write doesn't poison later ones
        let mut stored = stored;
        stored.value = 2_500.0;
        update_record(&conn, &mut stored, "test").unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(record_history(&conn, Asset::KIND, &other.id).unwrap().len(), 1);
    }

    #[test]
    fn test_get_is_scoped_by_kind() {
        let conn = test_conn();
        let asset = Asset::new("Car", AssetCategory::Vehicle, 30_000.0);
        insert_record(&conn, &asset, "test").unwrap();

        let wrong_kind = get_record::<Liability>(&conn, &asset.id);
        assert!(matches!(wrong_kind, Err(FinanceError::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_insert_is_conflict() {
        let conn = test_conn();
        let first = Asset::new("Savings", AssetCategory::Cash, 1_000.0);
        let second = Asset::new("savings", AssetCategory::Cash, 1_000.0);
        insert_record(&conn, &first, "test").unwrap();

        let err = insert_record(&conn, &second, "test").unwrap_err();
        assert!(matches!(err, FinanceError::Conflict(_)));
        assert_eq!(list_records::<Asset>(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_record_rejected() {
        let conn = test_conn();
        let bad = Asset::new("", AssetCategory::Cash, -1.0);
        assert!(matches!(
            insert_record(&conn, &bad, "test"),
            Err(FinanceError::Validation(_))
        ));
    }

    #[test]
    fn test_update_bumps_version_and_keeps_history() {
        let conn = test_conn();
        let mut asset = Asset::new("ETF", AssetCategory::Investment, 10_000.0);
        insert_record(&conn, &asset, "test").unwrap();

        asset.value = 12_500.0;
        update_record(&conn, &mut asset, "test").unwrap();
        asset.value = 13_000.0;
        update_record(&conn, &mut asset, "test").unwrap();

        let current: Asset = get_record(&conn, &asset.id).unwrap();
        assert_eq!(current.version, 3);
        assert_eq!(current.value, 13_000.0);

        let history = record_history(&conn, Asset::KIND, &asset.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].body["value"], serde_json::json!(10_000.0));
        assert_eq!(history[1].version, 2);
    }

    #[test]
    fn test_update_missing_record_is_not_found() {
        let conn = test_conn();
        let mut ghost = Asset::new("Ghost", AssetCategory::Other, 1.0);
        assert!(matches!(
            update_record(&conn, &mut ghost, "test"),
            Err(FinanceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_keeps_history_and_events() {
        let conn = test_conn();
        let loan = Liability::new("Car loan", LiabilityKind::CarLoan, 20_000.0, 0.03, 500.0);
        insert_record(&conn, &loan, "test").unwrap();
        delete_record::<Liability>(&conn, &loan.id, "test").unwrap();

        assert!(get_record::<Liability>(&conn, &loan.id).is_err());
        assert_eq!(record_history(&conn, Liability::KIND, &loan.id).unwrap().len(), 1);

        let events = get_events_for_entity(&conn, Liability::KIND, &loan.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "record_deleted");
        assert_eq!(events[1].event_type, "record_created");
    }

    #[test]
    fn test_find_by_name_is_case_insensitive() {
        let conn = test_conn();
        let income = Income::new("Salary", IncomeKind::Salary, 6_000.0, Frequency::Monthly);
        insert_record(&conn, &income, "test").unwrap();

        let found: Option<Income> = find_record_by_name(&conn, "  salary ").unwrap();
        assert_eq!(found.unwrap().id, income.id);
        assert!(find_record_by_name::<Income>(&conn, "bonus").unwrap().is_none());
    }

    #[test]
    fn test_profile_upsert_and_snapshot() {
        let conn = test_conn();
        assert_eq!(load_profile(&conn).unwrap().version, 1);

        let mut profile = Profile {
            name: "Wei Ling".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 3, 1),
            ..Profile::default()
        };
        save_profile(&conn, &mut profile, "test").unwrap();
        profile.cpf.oa = 50_000.0;
        save_profile(&conn, &mut profile, "test").unwrap();

        insert_record(&conn, &Asset::new("Savings", AssetCategory::Cash, 5_000.0), "test").unwrap();

        let snapshot = load_snapshot(&conn).unwrap();
        assert_eq!(snapshot.profile.version, 2);
        assert_eq!(snapshot.profile.cpf.oa, 50_000.0);
        assert_eq!(snapshot.assets.len(), 1);
        assert_eq!(count_records(&conn).unwrap(), 1);
    }

    #[test]
    fn test_event_log() {
        let conn = test_conn();
        let event = Event::new(
            "test_event",
            "asset",
            "test_id_123",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "asset", "test_id_123").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["test"], "data");
    }

    #[test]
    fn test_csv_import_is_idempotent() {
        let conn = test_conn();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "kind,name,category,amount,frequency,rate,payment,start_date,end_date,cpf").unwrap();
        writeln!(file, "asset,Savings,cash,20000,,,,,,").unwrap();
        writeln!(file, "liability,Car loan,car_loan,30000,,0.028,650,,,").unwrap();
        writeln!(file, "income,Salary,salary,6500,monthly,,,2025-01-01,,true").unwrap();
        writeln!(file, "expense,Groceries,food,700,monthly,,,,,").unwrap();
        writeln!(file, "expense,,food,-5,monthly,,,,,").unwrap();
        file.flush().unwrap();

        let rows = load_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 5);

        let first = import_rows(&conn, &rows).unwrap();
        assert_eq!(first.inserted, 4);
        assert_eq!(first.rejected.len(), 1);
        assert!(first.rejected[0].starts_with("row 6"));

        let second = import_rows(&conn, &rows).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 4);

        let incomes: Vec<Income> = list_records(&conn).unwrap();
        assert!(incomes[0].cpf_applicable);
        assert_eq!(incomes[0].start_date, NaiveDate::from_ymd_opt(2025, 1, 1));
        let loans: Vec<Liability> = list_records(&conn).unwrap();
        assert_eq!(loans[0].kind, LiabilityKind::CarLoan);
        assert_eq!(loans[0].monthly_payment, 650.0);
    }
}
