//! SQL migration definitions for the SubjectScan database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: raw_results, seen_urls, content_items, keywords, scan_jobs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Raw result log, one row per new URL found by a scan run
CREATE TABLE IF NOT EXISTS raw_results (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      TEXT NOT NULL,
    subject_key TEXT NOT NULL,
    title       TEXT NOT NULL,
    url         TEXT NOT NULL,
    snippet     TEXT NOT NULL,
    query       TEXT NOT NULL,
    page        INTEGER NOT NULL,
    date        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_results_job ON raw_results(job_id);
CREATE INDEX IF NOT EXISTS idx_raw_results_subject ON raw_results(subject_key);

-- Persisted cross-run dedup index
CREATE TABLE IF NOT EXISTS seen_urls (
    subject_key TEXT NOT NULL,
    url_hash    TEXT NOT NULL,
    first_seen  TEXT NOT NULL,
    PRIMARY KEY (subject_key, url_hash)
);

-- Master Content Dataset
CREATE TABLE IF NOT EXISTS content_items (
    subject_key     TEXT NOT NULL,
    url             TEXT NOT NULL,
    title           TEXT NOT NULL,
    snippet         TEXT NOT NULL,
    query           TEXT NOT NULL,
    page            INTEGER NOT NULL,
    date            TEXT NOT NULL,
    domain          TEXT NOT NULL,
    content_type    TEXT,
    confidence      REAL NOT NULL,
    risk_score      REAL NOT NULL,
    discovered_date TEXT NOT NULL,
    last_checked    TEXT NOT NULL,
    dmca_status     TEXT NOT NULL DEFAULT 'not_filed',
    PRIMARY KEY (subject_key, url)
);

-- Keyword Dataset
CREATE TABLE IF NOT EXISTS keywords (
    subject_key TEXT NOT NULL,
    keyword     TEXT NOT NULL,
    occurrence  INTEGER NOT NULL DEFAULT 1,
    first_seen  TEXT NOT NULL,
    last_seen   TEXT NOT NULL,
    PRIMARY KEY (subject_key, keyword)
);

-- Scan job status records
CREATE TABLE IF NOT EXISTS scan_jobs (
    id            TEXT PRIMARY KEY,
    subject       TEXT NOT NULL,
    subject_key   TEXT NOT NULL,
    status        TEXT NOT NULL,
    keywords_json TEXT NOT NULL,
    date_restrict TEXT,
    budget        INTEGER NOT NULL,
    api_calls     INTEGER NOT NULL DEFAULT 0,
    new_results   INTEGER NOT NULL DEFAULT 0,
    inserted      INTEGER NOT NULL DEFAULT 0,
    started_at    TEXT NOT NULL,
    finished_at   TEXT,
    error         TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_jobs_subject ON scan_jobs(subject_key);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
