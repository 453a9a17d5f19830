//! Persistence for analysis records and their gaps.
//!
//! Session acquisition retries on transient connection failures (a locked
//! database file, a not-yet-ready mount) with the same exponential
//! 1s/2s/4s backoff the original service used for DNS resolution failures
//! against its network database — the failure mode changes with the
//! storage engine, but the retry discipline at the boundary does not.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::StoreError;
use crate::models::{AnalysisCounters, AnalysisStatus, ExtractedContent, ExtractedSection, PaperData};

const SESSION_RETRY_ATTEMPTS: u32 = 3;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, retrying with
    /// exponential backoff (1s, 2s, 4s) on transient open failures.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut attempt = 0;
        loop {
            match Self::try_open(&path) {
                Ok(store) => return Ok(store),
                Err(e) if attempt + 1 < SESSION_RETRY_ATTEMPTS => {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << (attempt - 1));
                    warn!(attempt, delay_secs = delay.as_secs(), error = %e, "retrying store open");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(StoreError::DnsRetriesExhausted(e.to_string())),
            }
        }
    }

    fn try_open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// The idempotency gate: a second delivery of the same correlation id
    /// reuses the existing row instead of creating a duplicate analysis.
    pub fn upsert_analysis(
        &self,
        correlation_id: &str,
        request_id: &str,
        paper_id: &str,
        paper_extraction_id: &str,
        config: &serde_json::Value,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO gap_analyses
                (correlation_id, request_id, paper_id, paper_extraction_id, status, config, started_at)
             VALUES (?1, ?2, ?3, ?4, 'PROCESSING', ?5, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
             ON CONFLICT(correlation_id) DO UPDATE SET
                status = 'PROCESSING',
                started_at = strftime('%Y-%m-%dT%H:%M:%fZ','now'),
                error_message = NULL,
                request_id = excluded.request_id,
                config = excluded.config",
            params![
                correlation_id,
                request_id,
                paper_id,
                paper_extraction_id,
                config.to_string()
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM gap_analyses WHERE correlation_id = ?1",
            params![correlation_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn analysis_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<(i64, AnalysisStatus, AnalysisCounters)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, status, total_gaps_identified, valid_gaps_count,
                        invalid_gaps_count, modified_gaps_count
                 FROM gap_analyses WHERE correlation_id = ?1",
                params![correlation_id],
                |row| {
                    let status: String = row.get(1)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        parse_status(&status),
                        AnalysisCounters {
                            total_gaps_identified: row.get(2)?,
                            valid_gaps_count: row.get(3)?,
                            invalid_gaps_count: row.get(4)?,
                            modified_gaps_count: row.get(5)?,
                        },
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Loads the externally-owned paper record and its extracted content.
    /// This worker never writes to these tables.
    pub fn load_paper(
        &self,
        paper_id: &str,
        extraction_id: &str,
    ) -> Result<(PaperData, ExtractedContent), StoreError> {
        let conn = self.conn.lock().unwrap();
        let paper = conn
            .query_row(
                "SELECT id, title, abstract_text FROM papers WHERE id = ?1",
                params![paper_id],
                |row| {
                    Ok(PaperData {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        abstract_text: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::PaperNotFound(paper_id.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT heading, text FROM extracted_sections
             WHERE paper_extraction_id = ?1 ORDER BY order_index",
        )?;
        let sections: Vec<ExtractedSection> = stmt
            .query_map(params![extraction_id], |row| {
                Ok(ExtractedSection {
                    heading: row.get(0)?,
                    text: row.get(1)?,
                })
            })?
            .filter_map(Result::ok)
            .collect();

        let (methods, results, conclusion) = derive_method_result_conclusion(&sections);

        let content = ExtractedContent {
            title: Some(paper.title.clone()),
            abstract_text: paper.abstract_text.clone(),
            sections,
            methods,
            results,
            conclusion,
            extraction_success: true,
            error: None,
        };
        Ok((paper, content))
    }

    pub fn finalize(
        &self,
        analysis_id: i64,
        status: AnalysisStatus,
        counters: &AnalysisCounters,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE gap_analyses SET
                status = ?2,
                total_gaps_identified = ?3,
                valid_gaps_count = ?4,
                invalid_gaps_count = ?5,
                modified_gaps_count = ?6,
                error_message = ?7,
                completed_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE id = ?1",
            params![
                analysis_id,
                status.to_string(),
                counters.total_gaps_identified,
                counters.valid_gaps_count,
                counters.invalid_gaps_count,
                counters.modified_gaps_count,
                error_message,
            ],
        )?;
        Ok(())
    }

    /// Supports the retry surface: resets an analysis to PENDING without
    /// re-publishing to the bus (re-publishing is the orchestrator's
    /// responsibility, see the design ledger).
    pub fn reset_to_pending(&self, analysis_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE gap_analyses SET
                status = 'PENDING', error_message = NULL, started_at = NULL, completed_at = NULL
             WHERE id = ?1",
            params![analysis_id],
        )?;
        Ok(())
    }

    pub fn ready(&self) -> bool {
        self.conn
            .lock()
            .unwrap()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    /// Seeds a paper and a single section directly into the owned tables.
    /// Production traffic never calls this; it exists so integration tests
    /// and local development can populate data normally written by the
    /// upstream extraction service.
    pub fn seed_for_tests(&self, paper_id: &str, extraction_id: &str, title: &str, abstract_text: Option<&str>) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO papers (id, title, abstract_text) VALUES (?1, ?2, ?3)",
            params![paper_id, title, abstract_text],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO extracted_sections (paper_extraction_id, order_index, heading, text)
             VALUES (?1, 0, 'Methods', 'Seeded methods text')",
            params![extraction_id],
        )
        .unwrap();
    }
}

fn parse_status(s: &str) -> AnalysisStatus {
    match s {
        "PROCESSING" => AnalysisStatus::Processing,
        "COMPLETED" => AnalysisStatus::Completed,
        "FAILED" => AnalysisStatus::Failed,
        _ => AnalysisStatus::Pending,
    }
}

fn derive_method_result_conclusion(
    sections: &[ExtractedSection],
) -> (Option<String>, Option<String>, Option<String>) {
    let find = |needles: &[&str]| {
        sections
            .iter()
            .find(|s| {
                let h = s.heading.to_lowercase();
                needles.iter().any(|n| h.contains(n))
            })
            .map(|s| s.text.clone())
    };
    (
        find(&["method", "approach"]),
        find(&["result", "experiment"]),
        find(&["conclusion", "discussion"]),
    )
}

/// Tables the worker itself owns. `papers`/`extracted_sections` below are
/// declared only so standalone tests and local development can seed data;
/// in production those tables are created and populated by the upstream
/// extraction service.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gap_analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL UNIQUE,
    request_id TEXT NOT NULL,
    paper_id TEXT NOT NULL,
    paper_extraction_id TEXT NOT NULL,
    status TEXT NOT NULL,
    config TEXT,
    total_gaps_identified INTEGER NOT NULL DEFAULT 0,
    valid_gaps_count INTEGER NOT NULL DEFAULT 0,
    invalid_gaps_count INTEGER NOT NULL DEFAULT 0,
    modified_gaps_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    started_at TEXT,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS papers (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    abstract_text TEXT
);

CREATE TABLE IF NOT EXISTS extracted_sections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_extraction_id TEXT NOT NULL,
    order_index INTEGER NOT NULL,
    heading TEXT NOT NULL,
    text TEXT NOT NULL
);
";
