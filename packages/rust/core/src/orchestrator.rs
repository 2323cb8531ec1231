//! Scan Orchestrator: one budget-bounded search run for a subject.
//!
//! Keywords are processed batch by batch, each batch paginated until the
//! backend runs dry, the budget is spent or the quota is exhausted. Only
//! URLs never seen for the subject (in earlier runs or earlier in this run)
//! are kept. Every finished batch is checkpointed to the raw result log.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use subjectscan_search::{SearchProvider, SearchRequest, batch_keywords, build_query};
use subjectscan_shared::{JobId, Result, ScanSettings, SearchResult, today, url_hash};

use crate::knowledge::KnowledgeStore;
use crate::scoring::extract_domain;

/// Number of domains in the frequency summary.
pub const TOP_DOMAINS: usize = 10;

/// Everything a run needs to know, fully resolved.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub job_id: JobId,
    /// Display name; sent as the exact-terms filter.
    pub subject: String,
    pub keywords: Vec<String>,
    pub date_restrict: Option<String>,
    pub budget: u32,
}

/// What happened to one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Items received; `new_urls` of them were unseen.
    NextPage { new_urls: usize },
    /// The page failed twice; move on to the next page.
    Skipped,
    /// No items; the batch is done.
    Exhausted,
    /// Budget reached before the call; the run is done.
    BudgetSpent,
    /// The backend reported quota exhaustion; the run is aborted.
    QuotaAbort(String),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum ScanEnd {
    /// Every batch was paged to the end.
    Completed,
    /// Stopped early because the call budget was spent.
    BudgetExhausted,
    /// Stopped by a quota error from the search backend.
    Aborted(String),
}

impl ScanEnd {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

/// Result of one scan run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    /// One entry per new unique URL, in discovery order.
    pub results: Vec<SearchResult>,
    /// Most frequent domains among `results`, at most [`TOP_DOMAINS`].
    pub top_domains: Vec<(String, usize)>,
    pub api_calls: u32,
    pub end: ScanEnd,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting scan status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a batch starts paging.
    fn batch_started(&self, index: usize, total: usize, query: &str);
    /// Called after each search call.
    fn page_fetched(&self, page: u32, new_urls: usize, api_calls: u32, budget: u32);
    /// Called when the search phase ends.
    fn done(&self, outcome: &ScanOutcome);
}

/// No-op progress reporter for detached jobs and tests.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn batch_started(&self, _index: usize, _total: usize, _query: &str) {}
    fn page_fetched(&self, _page: u32, _new_urls: usize, _api_calls: u32, _budget: u32) {}
    fn done(&self, _outcome: &ScanOutcome) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Mutable state of a run in progress.
struct RunState {
    api_calls: u32,
    seen: HashSet<String>,
}

/// Drives a scan against a search backend and the knowledge store.
pub struct ScanOrchestrator<'a> {
    search: &'a dyn SearchProvider,
    store: &'a KnowledgeStore,
    settings: &'a ScanSettings,
}

impl<'a> ScanOrchestrator<'a> {
    pub fn new(
        search: &'a dyn SearchProvider,
        store: &'a KnowledgeStore,
        settings: &'a ScanSettings,
    ) -> Self {
        Self {
            search,
            store,
            settings,
        }
    }

    /// Execute the plan. Storage failures are the only errors; search
    /// failures end up in the outcome.
    #[instrument(skip_all, fields(job_id = %plan.job_id, subject = %plan.subject, budget = plan.budget))]
    pub async fn run(&self, plan: &ScanPlan, progress: &dyn ProgressReporter) -> Result<ScanOutcome> {
        let mut state = RunState {
            api_calls: 0,
            seen: self.store.seen_url_hashes(&plan.subject).await?,
        };
        let batches = batch_keywords(&plan.keywords, self.settings.batch_size);

        info!(
            provider = self.search.name(),
            batches = batches.len(),
            known_urls = state.seen.len(),
            date_restrict = plan.date_restrict.as_deref().unwrap_or("none"),
            "starting scan"
        );
        progress.phase("Searching");

        let mut results = Vec::new();
        let mut end = ScanEnd::Completed;

        'batches: for (idx, batch) in batches.iter().enumerate() {
            let query = build_query(batch);
            progress.batch_started(idx + 1, batches.len(), &query);
            info!(batch = idx + 1, %query, "searching batch");

            let mut batch_results = Vec::new();
            let mut stop = false;

            for page in 1..=self.settings.max_pages {
                let outcome = self
                    .fetch_page(plan, &query, page, &mut state, &mut batch_results)
                    .await;

                match outcome {
                    PageOutcome::NextPage { new_urls } => {
                        progress.page_fetched(page, new_urls, state.api_calls, plan.budget);
                    }
                    PageOutcome::Skipped => {
                        progress.page_fetched(page, 0, state.api_calls, plan.budget);
                    }
                    PageOutcome::Exhausted => {
                        debug!(page, "no more results for batch");
                        break;
                    }
                    PageOutcome::BudgetSpent => {
                        info!(api_calls = state.api_calls, "search budget reached");
                        end = ScanEnd::BudgetExhausted;
                        stop = true;
                        break;
                    }
                    PageOutcome::QuotaAbort(reason) => {
                        warn!(%reason, "search quota exceeded, aborting scan");
                        end = ScanEnd::Aborted(reason);
                        stop = true;
                        break;
                    }
                }
            }

            self.store
                .checkpoint(&plan.job_id, &plan.subject, &batch_results)
                .await?;
            info!(batch = idx + 1, new_urls = batch_results.len(), "batch checkpointed");
            results.append(&mut batch_results);

            if stop {
                break 'batches;
            }
        }

        let outcome = ScanOutcome {
            top_domains: top_domains(&results, TOP_DOMAINS),
            results,
            api_calls: state.api_calls,
            end,
        };

        info!(
            new_urls = outcome.results.len(),
            api_calls = outcome.api_calls,
            end = ?outcome.end,
            "scan finished"
        );
        progress.done(&outcome);
        Ok(outcome)
    }

    /// Fetch one page, retrying once on a non-quota error.
    async fn fetch_page(
        &self,
        plan: &ScanPlan,
        query: &str,
        page: u32,
        state: &mut RunState,
        batch_results: &mut Vec<SearchResult>,
    ) -> PageOutcome {
        let request =
            SearchRequest::for_page(query, &plan.subject, plan.date_restrict.clone(), page);
        let mut retried = false;

        loop {
            if state.api_calls >= plan.budget {
                return PageOutcome::BudgetSpent;
            }

            let pause = if retried {
                self.settings.retry_backoff
            } else if state.api_calls > 0 {
                self.settings.request_interval
            } else {
                Duration::ZERO
            };
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            state.api_calls += 1;
            match self.search.search(&request).await {
                Ok(found) if found.is_empty() => return PageOutcome::Exhausted,
                Ok(found) => {
                    let fetched = today();
                    let before = batch_results.len();
                    for item in found.items {
                        if item.link.is_empty() || !state.seen.insert(url_hash(&item.link)) {
                            continue;
                        }
                        batch_results.push(SearchResult {
                            title: item.title,
                            url: item.link,
                            snippet: item.snippet,
                            query: query.to_string(),
                            page,
                            date: fetched,
                        });
                    }
                    let new_urls = batch_results.len() - before;
                    debug!(page, new_urls, api_calls = state.api_calls, "page fetched");
                    return PageOutcome::NextPage { new_urls };
                }
                Err(e) if e.is_quota_exceeded() => return PageOutcome::QuotaAbort(e.to_string()),
                Err(e) if retried => {
                    warn!(page, error = %e, "search page failed again, skipping");
                    return PageOutcome::Skipped;
                }
                Err(e) => {
                    warn!(page, error = %e, "search page failed, retrying");
                    retried = true;
                }
            }
        }
    }
}

/// Domain frequency over `results`, highest first, ties alphabetical.
pub fn top_domains(results: &[SearchResult], n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for result in results {
        *counts.entry(extract_domain(&result.url)).or_default() += 1;
    }
    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use subjectscan_search::{SearchItem, SearchPage};
    use subjectscan_shared::ScanError;

    use super::*;
    use crate::knowledge::tests::test_store;

    /// Scripted search backend: replays responses in order, then returns empty pages.
    pub(crate) struct ScriptedSearch {
        responses: Mutex<VecDeque<Result<SearchPage>>>,
        pub(crate) requests: Mutex<Vec<SearchRequest>>,
    }

    impl ScriptedSearch {
        pub(crate) fn new(responses: Vec<Result<SearchPage>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SearchPage::default()))
        }
    }

    /// A page of `n` items with URLs `https://<host>/<prefix>-<i>`.
    pub(crate) fn page(host: &str, prefix: &str, n: usize) -> Result<SearchPage> {
        Ok(SearchPage {
            items: (0..n)
                .map(|i| SearchItem {
                    title: format!("Jane Doe {prefix} {i}"),
                    link: format!("https://{host}/{prefix}-{i}"),
                    snippet: "snippet".into(),
                })
                .collect(),
        })
    }

    pub(crate) fn fast_settings() -> ScanSettings {
        ScanSettings {
            request_interval: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            ..ScanSettings::default()
        }
    }

    fn plan(keywords: &[&str], budget: u32) -> ScanPlan {
        ScanPlan {
            job_id: JobId::new(),
            subject: "Jane Doe".into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            date_restrict: Some("d30".into()),
            budget,
        }
    }

    #[tokio::test]
    async fn budget_stops_run_with_partial_results() {
        let store = test_store().await;
        let search = ScriptedSearch::new(
            (1..=5).map(|p| page("leaks.to", &format!("p{p}"), 10)).collect(),
        );
        let settings = fast_settings();
        let plan = plan(&["Jane Doe leaks"], 3);

        let outcome = ScanOrchestrator::new(&search, &store, &settings)
            .run(&plan, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(search.calls(), 3);
        assert_eq!(outcome.api_calls, 3);
        assert_eq!(outcome.results.len(), 30);
        assert_eq!(outcome.end, ScanEnd::BudgetExhausted);
        assert_eq!(store.raw_results(&plan.job_id).await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn requests_carry_offsets_and_filters() {
        let store = test_store().await;
        let search = ScriptedSearch::new(vec![page("a.com", "x", 10), page("a.com", "y", 3)]);
        let settings = fast_settings();

        let outcome = ScanOrchestrator::new(&search, &store, &settings)
            .run(&plan(&["Jane Doe leaks"], 50), &SilentProgress)
            .await
            .unwrap();

        let requests = search.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].start, 1);
        assert_eq!(requests[1].start, 11);
        assert_eq!(requests[2].start, 21);
        assert!(requests.iter().all(|r| r.exact_terms == "Jane Doe"));
        assert!(requests.iter().all(|r| r.date_restrict.as_deref() == Some("d30")));
        assert_eq!(outcome.end, ScanEnd::Completed);
        assert_eq!(outcome.results[10].page, 2);
        assert_eq!(outcome.top_domains, vec![("a.com".to_string(), 13)]);
    }

    #[tokio::test]
    async fn quota_error_aborts_all_batches() {
        let store = test_store().await;
        let search = ScriptedSearch::new(vec![
            page("a.com", "x", 10),
            Err(ScanError::QuotaExceeded("daily limit".into())),
            page("b.com", "never", 10),
        ]);
        let settings = fast_settings();
        let plan = plan(&["one", "two"], 50);

        let outcome = ScanOrchestrator::new(&search, &store, &settings)
            .run(&plan, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(search.calls(), 2);
        assert!(outcome.end.is_aborted());
        assert_eq!(outcome.results.len(), 10);
        // the aborted batch was still checkpointed
        assert_eq!(store.raw_results(&plan.job_id).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn other_errors_retry_once_then_skip() {
        let store = test_store().await;
        let search = ScriptedSearch::new(vec![
            Err(ScanError::Search("backend error".into())),
            page("a.com", "retried", 2),
            Err(ScanError::Network("timeout".into())),
            Err(ScanError::Network("timeout".into())),
            page("a.com", "page3", 1),
        ]);
        let settings = fast_settings();

        let outcome = ScanOrchestrator::new(&search, &store, &settings)
            .run(&plan(&["kw"], 50), &SilentProgress)
            .await
            .unwrap();

        // p1 fail+ok, p2 fail+fail, p3 ok, p4 empty
        let requests = search.requests.lock().unwrap();
        let starts: Vec<u32> = requests.iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![1, 1, 11, 11, 21, 31]);
        assert_eq!(outcome.api_calls, 6);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.end, ScanEnd::Completed);
    }

    #[tokio::test]
    async fn urls_seen_in_earlier_runs_or_batches_are_dropped() {
        let store = test_store().await;
        let settings = fast_settings();

        let first = ScriptedSearch::new(vec![page("a.com", "x", 3)]);
        ScanOrchestrator::new(&first, &store, &settings)
            .run(&plan(&["kw"], 50), &SilentProgress)
            .await
            .unwrap();

        let second = ScriptedSearch::new(vec![
            page("a.com", "x", 5),
            Ok(SearchPage::default()),
            page("a.com", "x", 6),
        ]);
        let outcome = ScanOrchestrator::new(&second, &store, &settings)
            .run(&plan(&["kw", "other"], 50), &SilentProgress)
            .await
            .unwrap();

        let urls: Vec<_> = outcome.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.com/x-3", "https://a.com/x-4", "https://a.com/x-5"]
        );
    }

    #[test]
    fn domain_summary_is_ranked_and_capped() {
        let mk = |url: &str| SearchResult {
            title: String::new(),
            url: url.into(),
            snippet: String::new(),
            query: "q".into(),
            page: 1,
            date: today(),
        };
        let results: Vec<_> = (0..12)
            .map(|i| mk(&format!("https://d{i}.com/x")))
            .chain([mk("https://www.d5.com/y"), mk("https://d5.com/z")])
            .collect();

        let top = top_domains(&results, TOP_DOMAINS);
        assert_eq!(top.len(), 10);
        assert_eq!(top[0], ("d5.com".to_string(), 3));
        assert_eq!(top[1], ("d0.com".to_string(), 1));
    }
}
