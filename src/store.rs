use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::compare::ComparisonResult;
use crate::extract::Bulletin;

pub const DEFAULT_DB_PATH: &str = "visa_bulletin.db";

pub fn connect(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Create tables and indexes if missing. Safe to call on every startup.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id               INTEGER PRIMARY KEY,
            run_type         TEXT    NOT NULL DEFAULT 'official',
            started_at       TEXT    NOT NULL,
            completed_at     TEXT,
            success          INTEGER NOT NULL DEFAULT 0,
            bulletin_date    TEXT,
            source_url       TEXT,
            data_json        TEXT,
            error_message    TEXT,
            categories_count INTEGER,
            CONSTRAINT chk_run_type CHECK (run_type IN ('official','test','benchmark','manual'))
        );
        CREATE INDEX IF NOT EXISTS idx_runs_type_success_started
            ON runs (run_type, success, started_at DESC);

        CREATE TABLE IF NOT EXISTS comparisons (
            id              INTEGER PRIMARY KEY,
            run_id          INTEGER NOT NULL REFERENCES runs(id),
            previous_run_id INTEGER NOT NULL REFERENCES runs(id),
            compared_at     TEXT    NOT NULL,
            has_changes     INTEGER NOT NULL DEFAULT 0,
            diff_json       TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comparisons_run_id ON comparisons (run_id);
        ",
    )?;
    Ok(())
}

/// Time-based 17-digit id: YYYYMMDDHHmmSS plus a 3-digit sequence within the
/// second, derived from the highest existing id in that window.
fn generate_id(conn: &Connection, table: &str) -> Result<i64> {
    let sql = match table {
        "runs" => "SELECT MAX(id) FROM runs WHERE id >= ?1 AND id <= ?2",
        "comparisons" => "SELECT MAX(id) FROM comparisons WHERE id >= ?1 AND id <= ?2",
        other => bail!("Unknown id table: {}", other),
    };
    let prefix = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let low: i64 = format!("{}000", prefix).parse()?;
    let high: i64 = format!("{}999", prefix).parse()?;
    let max_id: Option<i64> =
        conn.query_row(sql, rusqlite::params![low, high], |row| row.get(0))?;
    match max_id {
        None => Ok(low + 1),
        Some(id) => {
            let seq = (id % 1000) + 1;
            if seq > 999 {
                bail!("More than 999 {} ids generated in the same second", table);
            }
            Ok(low + seq)
        }
    }
}

pub struct NewRun<'a> {
    pub run_type: &'a str,
    pub started_at: &'a str,
    pub completed_at: Option<&'a str>,
    pub success: bool,
    pub bulletin_date: Option<&'a str>,
    pub source_url: Option<&'a str>,
    pub data: Option<&'a Bulletin>,
    pub error_message: Option<&'a str>,
}

#[derive(Debug)]
pub struct RunRecord {
    pub id: i64,
    pub run_type: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub success: bool,
    pub bulletin_date: Option<String>,
    pub source_url: Option<String>,
    pub error_message: Option<String>,
    pub categories_count: Option<i64>,
    /// Deserialized bulletin payload; None for failed runs and list queries.
    pub data: Option<Bulletin>,
}

pub fn insert_run(conn: &Connection, run: &NewRun) -> Result<i64> {
    let run_id = generate_id(conn, "runs")?;
    let data_json = run.data.map(serde_json::to_string).transpose()?;
    let categories_count = run.data.map(|b| b.categories.len() as i64);
    conn.execute(
        "INSERT INTO runs
            (id, run_type, started_at, completed_at, success,
             bulletin_date, source_url, data_json, error_message, categories_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            run_id,
            run.run_type,
            run.started_at,
            run.completed_at,
            run.success,
            run.bulletin_date,
            run.source_url,
            data_json,
            run.error_message,
            categories_count,
        ],
    )?;
    info!(
        "Recorded run {} (type={}, success={})",
        run_id, run.run_type, run.success
    );
    Ok(run_id)
}

fn run_from_row(row: &rusqlite::Row, with_data: bool) -> rusqlite::Result<(RunRecord, Option<String>)> {
    let data_json: Option<String> = if with_data { row.get("data_json")? } else { None };
    Ok((
        RunRecord {
            id: row.get("id")?,
            run_type: row.get("run_type")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            success: row.get("success")?,
            bulletin_date: row.get("bulletin_date")?,
            source_url: row.get("source_url")?,
            error_message: row.get("error_message")?,
            categories_count: row.get("categories_count")?,
            data: None,
        },
        data_json,
    ))
}

/// Most recent successful run of the given type, with its bulletin payload
/// deserialized. `exclude_run_id` skips a run (typically the one just made).
pub fn last_successful_run(
    conn: &Connection,
    run_type: &str,
    exclude_run_id: Option<i64>,
) -> Result<Option<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM runs
         WHERE run_type = ?1 AND success = 1 AND (?2 IS NULL OR id != ?2)
         ORDER BY started_at DESC LIMIT 1",
    )?;
    let found = stmt
        .query_map(rusqlite::params![run_type, exclude_run_id], |row| {
            run_from_row(row, true)
        })?
        .next()
        .transpose()?;

    let Some((mut record, data_json)) = found else {
        debug!("No previous successful '{}' run found", run_type);
        return Ok(None);
    };
    if let Some(json) = data_json {
        record.data = Some(serde_json::from_str(&json)?);
    }
    debug!(
        "Found previous run {} (bulletin: {:?})",
        record.id, record.bulletin_date
    );
    Ok(Some(record))
}

pub fn insert_comparison(
    conn: &Connection,
    run_id: i64,
    previous_run_id: i64,
    diff: &ComparisonResult,
) -> Result<i64> {
    let cmp_id = generate_id(conn, "comparisons")?;
    let diff_json = serde_json::to_string(diff)?;
    conn.execute(
        "INSERT INTO comparisons
            (id, run_id, previous_run_id, compared_at, has_changes, diff_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            cmp_id,
            run_id,
            previous_run_id,
            diff.compared_at,
            diff.has_changes,
            diff_json,
        ],
    )?;
    info!(
        "Recorded comparison {} (run {} vs {}, has_changes={})",
        cmp_id, run_id, previous_run_id, diff.has_changes
    );
    Ok(cmp_id)
}

/// Runs in reverse chronological order. Bulletin payloads are not loaded.
pub fn list_runs(
    conn: &Connection,
    run_type: Option<&str>,
    limit: usize,
    success_only: bool,
) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, run_type, started_at, completed_at, success,
                bulletin_date, source_url, error_message, categories_count
         FROM runs
         WHERE (?1 IS NULL OR run_type = ?1) AND (?2 = 0 OR success = 1)
         ORDER BY started_at DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![run_type, success_only, limit as i64],
            |row| run_from_row(row, false).map(|(record, _)| record),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Default)]
pub struct StoreStats {
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub comparisons: i64,
    pub comparisons_with_changes: i64,
}

pub fn get_stats(conn: &Connection) -> Result<StoreStats> {
    let (total_runs, successful_runs): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM runs",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let (comparisons, comparisons_with_changes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(has_changes), 0) FROM comparisons",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(StoreStats {
        total_runs,
        successful_runs,
        failed_runs: total_runs - successful_runs,
        comparisons,
        comparisons_with_changes,
    })
}

// ── Tests ──
