//! Core domain types for SubjectScan subject datasets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SubjectKey
// ---------------------------------------------------------------------------

/// Normalized subject name used to key every per-subject dataset.
///
/// Normalization trims, lowercases and collapses whitespace runs into `_`,
/// so `"Jane  Doe"` and `" jane doe "` share the key `jane_doe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectKey(String);

impl SubjectKey {
    /// Normalize a display name into a subject key.
    pub fn new(subject: &str) -> Self {
        let key = subject
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("_");
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SearchResult
// ---------------------------------------------------------------------------

/// One item returned by a single search-API page fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// The batch query that produced this result.
    pub query: String,
    /// 1-based result page the item was found on.
    pub page: u32,
    /// Day the result was fetched.
    pub date: NaiveDate,
}

// ---------------------------------------------------------------------------
// KeywordRecord
// ---------------------------------------------------------------------------

/// A learned discovery keyword for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRecord {
    /// Normalized keyword (see [`normalize_keyword`]).
    pub keyword: String,
    /// How many learning runs produced this keyword. Never decreases.
    pub occurrence: u32,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

/// Normalize a keyword for storage: lowercase and trim.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// ContentItem
// ---------------------------------------------------------------------------

/// Takedown state of a discovered item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmcaStatus {
    #[default]
    NotFiled,
    Filed,
    Removed,
    Rejected,
}

impl DmcaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFiled => "not_filed",
            Self::Filed => "filed",
            Self::Removed => "removed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for DmcaStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_filed" => Ok(Self::NotFiled),
            "filed" => Ok(Self::Filed),
            "removed" => Ok(Self::Removed),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown dmca status: {other}")),
        }
    }
}

/// A scored, deduplicated entry of a subject's Master Content Dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(flatten)]
    pub result: SearchResult,
    /// Host with protocol and leading `www.` stripped, lowercased.
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Likelihood the item belongs to the subject, in `[0.05, 0.95]`.
    pub confidence: f64,
    /// Likelihood the item is unauthorized content, in `[0, 1]`.
    pub risk_score: f64,
    pub discovered_date: NaiveDate,
    pub last_checked: NaiveDate,
    #[serde(default)]
    pub dmca_status: DmcaStatus,
}

impl ContentItem {
    pub fn url(&self) -> &str {
        &self.result.url
    }
}

// ---------------------------------------------------------------------------
// Scan jobs
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for scan job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of a detached scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    /// Budget or batches exhausted normally.
    Completed,
    /// Stopped early by a search quota error.
    Aborted,
    /// Stopped by an unexpected internal error (storage, I/O).
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Persisted status record of one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    /// Subject display name as requested.
    pub subject: String,
    pub status: JobStatus,
    /// Fully prepared search keywords.
    pub keywords: Vec<String>,
    /// Resolved date-restriction code (`None` = no restriction).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_restrict: Option<String>,
    pub budget: u32,
    pub api_calls: u32,
    /// New unique URLs found by the search phase.
    pub new_results: usize,
    /// Items inserted into the Master Content Dataset.
    pub inserted: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Stable hex SHA-256 of a URL, used by the persisted seen-URL index.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Today's date (UTC), the stamp used for every `*_date`/`*_seen` field.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_key_normalizes_whitespace_and_case() {
        assert_eq!(SubjectKey::new("Jane Doe").as_str(), "jane_doe");
        assert_eq!(SubjectKey::new("  Jane \t  DOE ").as_str(), "jane_doe");
        assert!(SubjectKey::new("   ").is_empty());
    }

    #[test]
    fn keyword_normalization() {
        assert_eq!(normalize_keyword("  Leaked Photos "), "leaked photos");
    }

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Aborted,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Aborted.is_terminal());
    }

    #[test]
    fn url_hash_is_stable() {
        assert_eq!(url_hash("https://a.com/x"), url_hash("https://a.com/x"));
        assert_ne!(url_hash("https://a.com/x"), url_hash("https://a.com/y"));
        assert_eq!(url_hash("https://a.com/x").len(), 64);
    }

    #[test]
    fn content_item_serializes_flat() {
        let item = ContentItem {
            result: SearchResult {
                title: "Jane Doe".into(),
                url: "https://janedoe.com".into(),
                snippet: "Official site".into(),
                query: "jane doe".into(),
                page: 1,
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            },
            domain: "janedoe.com".into(),
            content_type: None,
            confidence: 0.95,
            risk_score: 0.12,
            discovered_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            last_checked: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            dmca_status: DmcaStatus::NotFiled,
        };

        let json = serde_json::to_value(&item).expect("serialize");
        assert_eq!(json["url"], "https://janedoe.com");
        assert_eq!(json["dmca_status"], "not_filed");
        assert_eq!(json["date"], "2026-03-01");
        assert!(json.get("content_type").is_none());

        let parsed: ContentItem = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, item);
    }
}
