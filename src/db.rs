use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::error::FlushError;
use crate::pipeline::RunSummary;
use crate::sink::RecordStore;

pub const DEFAULT_DB_PATH: &str = "data/top250.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tb_top_movie (
            id         INTEGER PRIMARY KEY,
            title      TEXT,
            rating     REAL,
            subject    TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS crawl_runs (
            id                INTEGER PRIMARY KEY,
            started_at        TEXT NOT NULL,
            finished_at       TEXT NOT NULL,
            pages_requested   INTEGER NOT NULL,
            pages_fetched     INTEGER NOT NULL,
            pages_failed      INTEGER NOT NULL,
            records_extracted INTEGER NOT NULL,
            records_written   INTEGER NOT NULL,
            flushes           INTEGER NOT NULL,
            cancelled         BOOLEAN NOT NULL,
            outcome           TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Records ──

/// One listing entry. Any field the page did not carry is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub title: Option<String>,
    pub rating: Option<f64>,
    pub subject: Option<String>,
}

/// The durable store for one crawl. Owns its connection; dropping it closes the connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = connect(path)?;
        init_schema(&conn)?;
        Ok(Self::new(conn))
    }
}

impl RecordStore for SqliteStore {
    fn insert_many(&mut self, records: &[Record]) -> Result<usize, FlushError> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt =
                tx.prepare("INSERT INTO tb_top_movie (title, rating, subject) VALUES (?1, ?2, ?3)")?;
            for r in records {
                count += stmt.execute(rusqlite::params![r.title, r.rating, r.subject])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }
}

pub fn fetch_records(conn: &Connection, limit: Option<usize>) -> Result<Vec<Record>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT title, rating, subject FROM tb_top_movie ORDER BY id LIMIT {}",
            n
        ),
        None => "SELECT title, rating, subject FROM tb_top_movie ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Record {
                title: row.get(0)?,
                rating: row.get(1)?,
                subject: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Runs ──

pub fn record_run(
    conn: &Connection,
    started_at: &str,
    summary: &RunSummary,
    outcome: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO crawl_runs
         (started_at, finished_at, pages_requested, pages_fetched, pages_failed,
          records_extracted, records_written, flushes, cancelled, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            started_at,
            chrono::Utc::now().to_rfc3339(),
            summary.pages_requested,
            summary.pages_fetched,
            summary.pages_failed,
            summary.records_extracted,
            summary.records_written,
            summary.flushes,
            summary.cancelled,
            outcome,
        ],
    )?;
    Ok(())
}

pub struct LastRun {
    pub finished_at: String,
    pub records_extracted: usize,
    pub records_written: usize,
    pub pages_failed: usize,
    pub outcome: String,
}

// ── Stats ──

pub struct Stats {
    pub movies: usize,
    pub missing_rating: usize,
    pub missing_subject: usize,
    pub runs: usize,
    pub last_run: Option<LastRun>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let movies: usize = conn.query_row("SELECT COUNT(*) FROM tb_top_movie", [], |r| r.get(0))?;
    let missing_rating: usize = conn.query_row(
        "SELECT COUNT(*) FROM tb_top_movie WHERE rating IS NULL",
        [],
        |r| r.get(0),
    )?;
    let missing_subject: usize = conn.query_row(
        "SELECT COUNT(*) FROM tb_top_movie WHERE subject IS NULL",
        [],
        |r| r.get(0),
    )?;
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM crawl_runs", [], |r| r.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT finished_at, records_extracted, records_written, pages_failed, outcome
         FROM crawl_runs ORDER BY id DESC LIMIT 1",
    )?;
    let last_run = stmt
        .query_map([], |row| {
            Ok(LastRun {
                finished_at: row.get(0)?,
                records_extracted: row.get(1)?,
                records_written: row.get(2)?,
                pages_failed: row.get(3)?,
                outcome: row.get(4)?,
            })
        })?
        .next()
        .transpose()?;

    Ok(Stats {
        movies,
        missing_rating,
        missing_subject,
        runs,
        last_run,
    })
}
