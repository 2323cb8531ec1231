//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding, per subject, the
//! raw result log, the seen-URL index, the Master Content Dataset and the
//! Keyword Dataset, plus the scan job status records.
//!
//! Multi-row writes run in a transaction on a dedicated connection so a
//! checkpoint or merge is applied completely or not at all.

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database, Row, params};
use tracing::warn;

use subjectscan_shared::{
    ContentItem, DmcaStatus, JobId, JobStatus, KeywordRecord, Result, ScanError, ScanJob,
    SearchResult, SubjectKey, url_hash,
};

/// Date format used for every day-granularity column.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScanError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| ScanError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ScanError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// A fresh connection for transactional writes.
    fn write_conn(&self) -> Result<Connection> {
        self.db.connect().map_err(|e| ScanError::Storage(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Raw result log + seen-URL index
    // -----------------------------------------------------------------------

    /// Persist one batch of new results for a job and index their URLs.
    ///
    /// Both writes share one transaction, so a crash leaves either the whole
    /// batch or none of it.
    pub async fn checkpoint_batch(
        &self,
        job_id: &JobId,
        subject: &SubjectKey,
        results: &[SearchResult],
    ) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        let conn = self.write_conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let job = job_id.to_string();
        for result in results {
            let date = result.date.format(DATE_FORMAT).to_string();
            tx.execute(
                "INSERT INTO raw_results (job_id, subject_key, title, url, snippet, query, page, date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    job.as_str(),
                    subject.as_str(),
                    result.title.as_str(),
                    result.url.as_str(),
                    result.snippet.as_str(),
                    result.query.as_str(),
                    i64::from(result.page),
                    date.as_str(),
                ],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

            tx.execute(
                "INSERT OR IGNORE INTO seen_urls (subject_key, url_hash, first_seen)
                 VALUES (?1, ?2, ?3)",
                params![subject.as_str(), url_hash(&result.url), date.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All raw results logged by a job, in insertion order.
    pub async fn raw_results_for_job(&self, job_id: &JobId) -> Result<Vec<SearchResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, url, snippet, query, page, date
                 FROM raw_results WHERE job_id = ?1 ORDER BY id",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_search_result(&row, 0) {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "skipping corrupt raw result row"),
            }
        }
        Ok(results)
    }

    /// Logged results of a subject whose URL never reached the content
    /// dataset (runs interrupted between checkpoint and merge), oldest first.
    pub async fn unmerged_raw_results(&self, subject: &SubjectKey) -> Result<Vec<SearchResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT r.title, r.url, r.snippet, r.query, r.page, r.date
                 FROM raw_results r
                 WHERE r.subject_key = ?1
                   AND NOT EXISTS (
                     SELECT 1 FROM content_items c
                     WHERE c.subject_key = r.subject_key AND c.url = r.url
                   )
                 ORDER BY r.id",
                params![subject.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_search_result(&row, 0) {
                Ok(result) => results.push(result),
                Err(e) => warn!(subject = %subject, error = %e, "skipping corrupt raw result row"),
            }
        }
        Ok(results)
    }

    /// URL hashes seen by any previous run for a subject.
    pub async fn seen_url_hashes(&self, subject: &SubjectKey) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url_hash FROM seen_urls WHERE subject_key = ?1",
                params![subject.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut hashes = HashSet::new();
        while let Ok(Some(row)) = rows.next().await {
            hashes.insert(
                row.get::<String>(0)
                    .map_err(|e| ScanError::Storage(e.to_string()))?,
            );
        }
        Ok(hashes)
    }

    // -----------------------------------------------------------------------
    // Master Content Dataset
    // -----------------------------------------------------------------------

    /// Load a subject's content items in discovery order. Corrupt rows are skipped.
    pub async fn load_content_items(&self, subject: &SubjectKey) -> Result<Vec<ContentItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, url, snippet, query, page, date, domain, content_type,
                        confidence, risk_score, discovered_date, last_checked, dmca_status
                 FROM content_items WHERE subject_key = ?1 ORDER BY rowid",
                params![subject.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_content_item(&row) {
                Ok(item) => items.push(item),
                Err(e) => warn!(subject = %subject, error = %e, "skipping corrupt content row"),
            }
        }
        Ok(items)
    }

    /// Insert new content items. Rows whose URL already exists are ignored.
    /// Returns the number of rows actually inserted.
    pub async fn insert_content_items(
        &self,
        subject: &SubjectKey,
        items: &[ContentItem],
    ) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let conn = self.write_conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut inserted = 0usize;
        for item in items {
            let changed = tx
                .execute(
                    "INSERT OR IGNORE INTO content_items
                       (subject_key, url, title, snippet, query, page, date, domain, content_type,
                        confidence, risk_score, discovered_date, last_checked, dmca_status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        subject.as_str(),
                        item.result.url.as_str(),
                        item.result.title.as_str(),
                        item.result.snippet.as_str(),
                        item.result.query.as_str(),
                        i64::from(item.result.page),
                        item.result.date.format(DATE_FORMAT).to_string(),
                        item.domain.as_str(),
                        item.content_type.as_deref(),
                        item.confidence,
                        item.risk_score,
                        item.discovered_date.format(DATE_FORMAT).to_string(),
                        item.last_checked.format(DATE_FORMAT).to_string(),
                        item.dmca_status.as_str(),
                    ],
                )
                .await
                .map_err(|e| ScanError::Storage(e.to_string()))?;
            inserted += changed as usize;
        }

        tx.commit()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        Ok(inserted)
    }

    /// Refresh `last_checked` for URLs encountered again.
    pub async fn touch_content_items(
        &self,
        subject: &SubjectKey,
        urls: &[String],
        checked: NaiveDate,
    ) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let conn = self.write_conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let checked = checked.format(DATE_FORMAT).to_string();
        for url in urls {
            tx.execute(
                "UPDATE content_items SET last_checked = ?1 WHERE subject_key = ?2 AND url = ?3",
                params![checked.as_str(), subject.as_str(), url.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Keyword Dataset
    // -----------------------------------------------------------------------

    /// Load a subject's keywords ranked by occurrence (desc), then keyword.
    pub async fn load_keywords(&self, subject: &SubjectKey) -> Result<Vec<KeywordRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT keyword, occurrence, first_seen, last_seen
                 FROM keywords WHERE subject_key = ?1
                 ORDER BY occurrence DESC, keyword ASC",
                params![subject.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_keyword(&row) {
                Ok(record) => records.push(record),
                Err(e) => warn!(subject = %subject, error = %e, "skipping corrupt keyword row"),
            }
        }
        Ok(records)
    }

    /// Count one learning-run occurrence for each keyword.
    ///
    /// Existing keywords get `occurrence + 1` and `last_seen = seen`; new ones
    /// are inserted with occurrence 1. Callers pass normalized keywords; a
    /// keyword listed twice is counted twice.
    pub async fn record_keywords(
        &self,
        subject: &SubjectKey,
        keywords: &[String],
        seen: NaiveDate,
    ) -> Result<()> {
        if keywords.is_empty() {
            return Ok(());
        }

        let conn = self.write_conn()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let seen = seen.format(DATE_FORMAT).to_string();
        for keyword in keywords {
            tx.execute(
                "INSERT INTO keywords (subject_key, keyword, occurrence, first_seen, last_seen)
                 VALUES (?1, ?2, 1, ?3, ?3)
                 ON CONFLICT(subject_key, keyword) DO UPDATE SET
                   occurrence = keywords.occurrence + 1,
                   last_seen = excluded.last_seen",
                params![subject.as_str(), keyword.as_str(), seen.as_str()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scan jobs
    // -----------------------------------------------------------------------

    /// Insert a new scan job record.
    pub async fn insert_job(&self, job: &ScanJob) -> Result<()> {
        let keywords_json =
            serde_json::to_string(&job.keywords).map_err(|e| ScanError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO scan_jobs
                   (id, subject, subject_key, status, keywords_json, date_restrict, budget,
                    api_calls, new_results, inserted, started_at, finished_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    job.id.to_string(),
                    job.subject.as_str(),
                    SubjectKey::new(&job.subject).as_str(),
                    job.status.as_str(),
                    keywords_json,
                    job.date_restrict.as_deref(),
                    i64::from(job.budget),
                    i64::from(job.api_calls),
                    job.new_results as i64,
                    job.inserted as i64,
                    job.started_at.to_rfc3339(),
                    job.finished_at.map(|t| t.to_rfc3339()),
                    job.error.as_deref(),
                ],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Write a job's mutable fields (status, counters, completion).
    pub async fn update_job(&self, job: &ScanJob) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE scan_jobs SET status = ?2, api_calls = ?3, new_results = ?4,
                   inserted = ?5, finished_at = ?6, error = ?7
                 WHERE id = ?1",
                params![
                    job.id.to_string(),
                    job.status.as_str(),
                    i64::from(job.api_calls),
                    job.new_results as i64,
                    job.inserted as i64,
                    job.finished_at.map(|t| t.to_rfc3339()),
                    job.error.as_deref(),
                ],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(ScanError::Storage(format!("scan job {} not found", job.id)));
        }
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<ScanJob>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ScanError::Storage(e.to_string())),
        }
    }

    /// Most recent jobs first.
    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<ScanJob>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM scan_jobs ORDER BY started_at DESC LIMIT ?1"),
                params![limit as i64],
            )
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_job(&row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "skipping corrupt scan job row"),
            }
        }
        Ok(jobs)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "id, subject, status, keywords_json, date_restrict, budget, api_calls, \
                           new_results, inserted, started_at, finished_at, error";

fn get_string(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| ScanError::Storage(e.to_string()))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| ScanError::parse(format!("invalid date {raw:?}: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScanError::parse(format!("invalid timestamp {raw:?}: {e}")))
}

/// Map `title, url, snippet, query, page, date` starting at `offset`.
fn row_to_search_result(row: &Row, offset: i32) -> Result<SearchResult> {
    let page = row
        .get::<i64>(offset + 4)
        .map_err(|e| ScanError::Storage(e.to_string()))?;
    Ok(SearchResult {
        title: get_string(row, offset)?,
        url: get_string(row, offset + 1)?,
        snippet: get_string(row, offset + 2)?,
        query: get_string(row, offset + 3)?,
        page: u32::try_from(page).map_err(|e| ScanError::parse(e.to_string()))?,
        date: parse_date(&get_string(row, offset + 5)?)?,
    })
}

fn row_to_content_item(row: &Row) -> Result<ContentItem> {
    let dmca_status: DmcaStatus = get_string(row, 12)?
        .parse()
        .map_err(|e: String| ScanError::parse(e))?;

    Ok(ContentItem {
        result: row_to_search_result(row, 0)?,
        domain: get_string(row, 6)?,
        content_type: row
            .get::<Option<String>>(7)
            .map_err(|e| ScanError::Storage(e.to_string()))?,
        confidence: row
            .get::<f64>(8)
            .map_err(|e| ScanError::Storage(e.to_string()))?,
        risk_score: row
            .get::<f64>(9)
            .map_err(|e| ScanError::Storage(e.to_string()))?,
        discovered_date: parse_date(&get_string(row, 10)?)?,
        last_checked: parse_date(&get_string(row, 11)?)?,
        dmca_status,
    })
}

fn row_to_keyword(row: &Row) -> Result<KeywordRecord> {
    let occurrence = row
        .get::<i64>(1)
        .map_err(|e| ScanError::Storage(e.to_string()))?;
    Ok(KeywordRecord {
        keyword: get_string(row, 0)?,
        occurrence: u32::try_from(occurrence).map_err(|e| ScanError::parse(e.to_string()))?,
        first_seen: parse_date(&get_string(row, 2)?)?,
        last_seen: parse_date(&get_string(row, 3)?)?,
    })
}

fn row_to_job(row: &Row) -> Result<ScanJob> {
    let id: JobId = get_string(row, 0)?
        .parse()
        .map_err(|e: uuid::Error| ScanError::parse(e.to_string()))?;
    let status: JobStatus = get_string(row, 2)?
        .parse()
        .map_err(|e: String| ScanError::parse(e))?;
    let keywords: Vec<String> = serde_json::from_str(&get_string(row, 3)?)
        .map_err(|e| ScanError::parse(format!("invalid keywords_json: {e}")))?;
    let int = |idx: i32| -> Result<i64> {
        row.get::<i64>(idx)
            .map_err(|e| ScanError::Storage(e.to_string()))
    };
    let finished_at = row
        .get::<Option<String>>(10)
        .map_err(|e| ScanError::Storage(e.to_string()))?
        .map(|raw| parse_timestamp(&raw))
        .transpose()?;

    Ok(ScanJob {
        id,
        subject: get_string(row, 1)?,
        status,
        keywords,
        date_restrict: row
            .get::<Option<String>>(4)
            .map_err(|e| ScanError::Storage(e.to_string()))?,
        budget: int(5)? as u32,
        api_calls: int(6)? as u32,
        new_results: int(7)? as usize,
        inserted: int(8)? as usize,
        started_at: parse_timestamp(&get_string(row, 9)?)?,
        finished_at,
        error: row
            .get::<Option<String>>(11)
            .map_err(|e| ScanError::Storage(e.to_string()))?,
    })
}
