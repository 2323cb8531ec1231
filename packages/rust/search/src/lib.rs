//! Web search API access for SubjectScan.
//!
//! The orchestrator talks to search backends through [`SearchProvider`].
//! [`GoogleSearchClient`] is the production implementation against the
//! Custom Search JSON API; tests substitute in-memory fakes.

mod query;
mod timeframe;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use subjectscan_shared::{Result, ScanError, SearchSettings};

pub use query::{batch_keywords, build_query, prepare_keywords};
pub use timeframe::{DEFAULT_DATE_RESTRICT, date_restrict};

/// Items per page. The API never returns more than this per call.
pub const PAGE_SIZE: u32 = 10;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("SubjectScan/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// One page request against the search backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// OR-joined batch query.
    pub query: String,
    /// Phrase that must appear verbatim in every result (the subject name).
    pub exact_terms: String,
    /// Day-count restriction code (`d30`), `None` for no restriction.
    pub date_restrict: Option<String>,
    /// 1-based result offset.
    pub start: u32,
}

impl SearchRequest {
    /// Build the request for a 1-based `page` of `query`.
    pub fn for_page(
        query: impl Into<String>,
        exact_terms: impl Into<String>,
        date_restrict: Option<String>,
        page: u32,
    ) -> Self {
        Self {
            query: query.into(),
            exact_terms: exact_terms.into(),
            date_restrict,
            start: page_offset(page),
        }
    }
}

/// Result offset for a 1-based page: `(page - 1) * 10 + 1`.
pub fn page_offset(page: u32) -> u32 {
    page.saturating_sub(1) * PAGE_SIZE + 1
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// One page of hits. An empty page means the query is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<SearchItem>,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SearchProvider trait
// ---------------------------------------------------------------------------

/// A paginated web search backend.
///
/// Implementations must report quota exhaustion as
/// [`ScanError::QuotaExceeded`] so the caller can abort the run.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage>;

    /// Provider name for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

// ---------------------------------------------------------------------------
// Google Custom Search client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Option<Vec<SearchItem>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// Custom Search JSON API client.
#[derive(Debug, Clone)]
pub struct GoogleSearchClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    engine_id: String,
}

impl GoogleSearchClient {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        let endpoint = Url::parse(&settings.base_url).map_err(|e| {
            ScanError::config(format!("invalid search base_url {}: {e}", settings.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ScanError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
            engine_id: settings.engine_id.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for GoogleSearchClient {
    #[instrument(skip_all, fields(start = request.start))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("cx", self.engine_id.clone()),
            ("q", request.query.clone()),
            ("num", PAGE_SIZE.to_string()),
            ("start", request.start.to_string()),
        ];
        if let Some(code) = &request.date_restrict {
            params.push(("dateRestrict", code.clone()));
        }
        params.push(("exactTerms", request.exact_terms.clone()));

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&params)
            .send()
            .await
            .map_err(|e| ScanError::Network(format!("search request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Network(format!("failed to read search response: {e}")))?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();

        if let Some(err) = parsed.as_ref().and_then(|p| p.error.as_ref()) {
            return Err(classify_api_error(status, err.code, &err.message));
        }
        if !status.is_success() {
            return Err(classify_api_error(status, None, &format!("HTTP {status}")));
        }

        let parsed = parsed
            .ok_or_else(|| ScanError::parse("search response is not valid JSON".to_string()))?;
        let items = parsed.items.unwrap_or_default();
        debug!(items = items.len(), "search page fetched");

        Ok(SearchPage { items })
    }

    fn name(&self) -> &str {
        "google-custom-search"
    }
}

/// Map an API failure to the error the orchestrator branches on.
fn classify_api_error(status: StatusCode, code: Option<u16>, message: &str) -> ScanError {
    let quota = status == StatusCode::TOO_MANY_REQUESTS
        || code == Some(429)
        || message.to_lowercase().contains("quota");

    if quota {
        warn!(%status, %message, "search quota exhausted");
        ScanError::QuotaExceeded(message.to_string())
    } else {
        ScanError::Search(message.to_string())
    }
}
