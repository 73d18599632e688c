use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS crawl_runs (
            id            INTEGER PRIMARY KEY,
            run_date      TEXT NOT NULL,
            mode          TEXT NOT NULL CHECK(mode IN ('incremental','full')),
            cutoff        TEXT,
            pages_fetched INTEGER NOT NULL,
            emitted       INTEGER NOT NULL,
            stop_reason   TEXT NOT NULL,
            error         TEXT,
            snapshot_path TEXT,
            finished_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_crawl_runs_date ON crawl_runs(run_date);

        CREATE TABLE IF NOT EXISTS merge_runs (
            id              INTEGER PRIMARY KEY,
            inputs          TEXT NOT NULL,
            rows_in         INTEGER NOT NULL,
            rows_out        INTEGER NOT NULL,
            duplicate_ids   INTEGER NOT NULL,
            empty_ids       INTEGER NOT NULL,
            policy          TEXT NOT NULL,
            canonical_path  TEXT NOT NULL,
            archive_version INTEGER,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Daily snapshot files already folded into the canonical snapshot
        CREATE TABLE IF NOT EXISTS merged_snapshots (
            file         TEXT PRIMARY KEY,
            merge_run_id INTEGER NOT NULL REFERENCES merge_runs(id),
            merged_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Crawls ──

pub struct CrawlRunRow {
    pub run_date: String,
    pub mode: &'static str,
    pub cutoff: Option<String>,
    pub pages_fetched: usize,
    pub emitted: usize,
    pub stop_reason: &'static str,
    pub error: Option<String>,
    pub snapshot_path: Option<String>,
}

pub fn record_crawl(conn: &Connection, row: &CrawlRunRow) -> Result<i64> {
    conn.execute(
        "INSERT INTO crawl_runs
         (run_date, mode, cutoff, pages_fetched, emitted, stop_reason, error, snapshot_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            row.run_date,
            row.mode,
            row.cutoff,
            row.pages_fetched as i64,
            row.emitted as i64,
            row.stop_reason,
            row.error,
            row.snapshot_path,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub struct CrawlSummary {
    pub run_date: String,
    pub mode: String,
    pub cutoff: Option<String>,
    pub pages_fetched: i64,
    pub emitted: i64,
    pub stop_reason: String,
}

pub fn recent_crawls(conn: &Connection, limit: usize) -> Result<Vec<CrawlSummary>> {
    let mut stmt = conn.prepare(
        "SELECT run_date, mode, cutoff, pages_fetched, emitted, stop_reason
         FROM crawl_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(CrawlSummary {
                run_date: row.get(0)?,
                mode: row.get(1)?,
                cutoff: row.get(2)?,
                pages_fetched: row.get(3)?,
                emitted: row.get(4)?,
                stop_reason: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Merges ──

pub struct MergeRunRow {
    pub inputs: Vec<String>,
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicate_ids: usize,
    pub empty_ids: usize,
    pub policy: String,
    pub canonical_path: String,
}

/// Record a merge and mark `daily_files` as folded in, atomically.
pub fn record_merge(conn: &Connection, row: &MergeRunRow, daily_files: &[String]) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO merge_runs
         (inputs, rows_in, rows_out, duplicate_ids, empty_ids, policy, canonical_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.inputs.join(","),
            row.rows_in as i64,
            row.rows_out as i64,
            row.duplicate_ids as i64,
            row.empty_ids as i64,
            row.policy,
            row.canonical_path,
        ],
    )?;
    let id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO merged_snapshots (file, merge_run_id) VALUES (?1, ?2)",
        )?;
        for f in daily_files {
            stmt.execute(params![f, id])?;
        }
    }
    tx.commit()?;
    Ok(id)
}

pub fn set_archive_version(conn: &Connection, merge_run_id: i64, version: u32) -> Result<()> {
    conn.execute(
        "UPDATE merge_runs SET archive_version = ?1 WHERE id = ?2",
        params![version, merge_run_id],
    )?;
    Ok(())
}

pub fn merged_files(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT file FROM merged_snapshots")?;
    let files = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(files)
}

/// Daily files whose merge made it into archive `version` or an earlier one.
pub fn merged_files_through(conn: &Connection, version: u32) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT s.file FROM merged_snapshots s
         JOIN merge_runs m ON m.id = s.merge_run_id
         WHERE m.archive_version IS NOT NULL AND m.archive_version <= ?1",
    )?;
    let files = stmt
        .query_map([version], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(files)
}

/// Archive version of the newest merge run. `None` when nothing was merged yet,
/// `Some(None)` when that run was never pushed.
pub fn last_merge_archive_version(conn: &Connection) -> Result<Option<Option<u32>>> {
    let version = conn
        .query_row(
            "SELECT archive_version FROM merge_runs ORDER BY id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(version)
}

// ── Stats ──

pub struct Stats {
    pub crawls: i64,
    pub failed_crawls: i64,
    pub records_crawled: i64,
    pub last_crawl: Option<String>,
    pub merges: i64,
    pub merged_files: i64,
    pub canonical_rows: Option<i64>,
    pub archive_version: Option<i64>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let (crawls, failed_crawls, records_crawled, last_crawl): (i64, i64, i64, Option<String>) =
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(stop_reason = 'fetch_failed'), 0),
                    COALESCE(SUM(emitted), 0),
                    MAX(run_date)
             FROM crawl_runs",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
    let merges: i64 = conn.query_row("SELECT COUNT(*) FROM merge_runs", [], |r| r.get(0))?;
    let merged_files: i64 =
        conn.query_row("SELECT COUNT(*) FROM merged_snapshots", [], |r| r.get(0))?;
    let canonical_rows: Option<i64> = conn
        .query_row(
            "SELECT rows_out FROM merge_runs ORDER BY id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    let archive_version: Option<i64> = conn.query_row(
        "SELECT MAX(archive_version) FROM merge_runs",
        [],
        |r| r.get(0),
    )?;

    Ok(Stats {
        crawls,
        failed_crawls,
        records_crawled,
        last_crawl,
        merges,
        merged_files,
        canonical_rows,
        archive_version,
    })
}
