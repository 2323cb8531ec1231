//! Service facade: the operations exposed to the CLI (and any other front end).
//!
//! A scan resolves its inputs, records a pending job, merges anything an
//! interrupted earlier run left behind, then runs search -> learn -> merge. [`ScanService::start_scan`] runs that pipeline
//! as a detached task and returns immediately; [`ScanService::run_scan`]
//! awaits it in the foreground.

use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, error, info, info_span, instrument};

use subjectscan_search::{GoogleSearchClient, SearchProvider, date_restrict, prepare_keywords};
use subjectscan_shared::{
    AppConfig, JobId, KeywordRecord, LlmSettings, Result, ScanError, ScanJob, ScanSettings,
    SearchSettings, resolve_data_dir,
};
use subjectscan_storage::Storage;

use crate::completion::{ChatCompletionClient, TextCompletion};
use crate::export::{ExportFormat, ExportedFile};
use crate::jobs::JobTracker;
use crate::knowledge::KnowledgeStore;
use crate::learner::{self, KeywordLearner};
use crate::orchestrator::{ProgressReporter, ScanEnd, ScanOrchestrator, ScanPlan, SilentProgress};
use crate::stats::ContentStats;

/// Database file name under the data directory.
pub const DATABASE_FILE: &str = "subjectscan.db";

/// Where scan keywords come from.
#[derive(Debug, Clone)]
pub enum KeywordSource {
    Explicit(Vec<String>),
    /// The subject's top learned keywords (or the defaults).
    Suggested,
}

/// Input of a scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub subject: String,
    pub keywords: KeywordSource,
    /// Free-form timeframe such as `"7 days"`; the configured default if unset.
    pub timeframe: Option<String>,
    /// Search call budget; the configured default if unset.
    pub budget: Option<u32>,
}

/// Immediate acknowledgement of a started scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanAck {
    pub job_id: JobId,
    pub subject: String,
    pub keywords: Vec<String>,
    pub date_restrict: Option<String>,
    pub budget: u32,
}

/// Summary of a finished scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub job: ScanJob,
    pub end: ScanEnd,
    pub top_domains: Vec<(String, usize)>,
    /// The subject's full keyword ranking after learning.
    pub keywords: Vec<KeywordRecord>,
}

#[derive(Clone)]
struct Backends {
    search: Arc<dyn SearchProvider>,
    learner: KeywordLearner,
}

/// Entry point for every SubjectScan operation.
#[derive(Clone)]
pub struct ScanService {
    store: Arc<KnowledgeStore>,
    jobs: JobTracker,
    settings: ScanSettings,
    default_timeframe: String,
    backends: Option<Backends>,
}

impl ScanService {
    /// Open the database under the configured data directory.
    ///
    /// The returned service can read and export datasets; scanning also
    /// needs [`connect_backends`](Self::connect_backends).
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let data_dir = resolve_data_dir(config)?;
        let storage = Storage::open(&data_dir.join(DATABASE_FILE)).await?;
        let store = KnowledgeStore::new(Arc::new(storage), data_dir.join("exports"));
        info!(data_dir = %data_dir.display(), "service opened");
        Ok(Self::new(store, config))
    }

    pub fn new(store: KnowledgeStore, config: &AppConfig) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: JobTracker::new(store.storage().clone()),
            store,
            settings: ScanSettings::from(config),
            default_timeframe: config.defaults.timeframe.clone(),
            backends: None,
        }
    }

    /// Build the search and LLM clients from config and environment secrets.
    pub fn connect_backends(self, config: &AppConfig) -> Result<Self> {
        let search = GoogleSearchClient::new(&SearchSettings::from_config(config)?)?;
        let completion = ChatCompletionClient::new(&LlmSettings::from_config(config)?)?;
        Ok(self.with_backends(Arc::new(search), Arc::new(completion)))
    }

    pub fn with_backends(
        mut self,
        search: Arc<dyn SearchProvider>,
        completion: Arc<dyn TextCompletion>,
    ) -> Self {
        self.backends = Some(Backends {
            search,
            learner: KeywordLearner::new(completion),
        });
        self
    }

    // -----------------------------------------------------------------------
    // Keywords
    // -----------------------------------------------------------------------

    /// Top learned keywords for the subject, or the defaults without history.
    pub async fn suggest_keywords(&self, subject: &str, count: Option<usize>) -> Result<Vec<String>> {
        let subject = validate_subject(subject)?;
        let count = count.unwrap_or(self.settings.suggestion_count);
        learner::suggest_keywords(&self.store, subject, count).await
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    /// Validate the request, record a pending job and run it detached.
    #[instrument(skip_all, fields(subject = %request.subject))]
    pub async fn start_scan(&self, request: ScanRequest) -> Result<ScanAck> {
        let backends = self.backends()?.clone();
        let (job, plan) = self.prepare(&request).await?;
        let ack = ack_for(&plan);

        let service = self.clone();
        let span = info_span!("scan_job", job_id = %job.id);
        tokio::spawn(
            async move {
                if let Err(e) = service.execute(&backends, job, plan, &SilentProgress).await {
                    error!(error = %e, "detached scan failed");
                }
            }
            .instrument(span),
        );

        info!(job_id = %ack.job_id, "scan started");
        Ok(ack)
    }

    /// Run a scan to completion in the foreground.
    #[instrument(skip_all, fields(subject = %request.subject))]
    pub async fn run_scan(
        &self,
        request: ScanRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<ScanReport> {
        let backends = self.backends()?;
        let (job, plan) = self.prepare(&request).await?;
        self.execute(backends, job, plan, progress).await
    }

    pub async fn job_status(&self, job_id: &JobId) -> Result<Option<ScanJob>> {
        self.jobs.get(job_id).await
    }

    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<ScanJob>> {
        self.jobs.recent(limit).await
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    /// Write the subject's Master Content Dataset; `None` when it is empty.
    pub async fn export_data(&self, subject: &str, format: ExportFormat) -> Result<Option<ExportedFile>> {
        let subject = validate_subject(subject)?;
        self.store.export(subject, format).await
    }

    pub async fn get_stats(&self, subject: &str) -> Result<ContentStats> {
        let subject = validate_subject(subject)?;
        self.store.stats(subject).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn backends(&self) -> Result<&Backends> {
        self.backends
            .as_ref()
            .ok_or_else(|| ScanError::config("search and LLM backends are not configured"))
    }

    /// Resolve keywords, timeframe and budget, then persist a pending job.
    async fn prepare(&self, request: &ScanRequest) -> Result<(ScanJob, ScanPlan)> {
        let subject = validate_subject(&request.subject)?;

        let budget = request.budget.unwrap_or(self.settings.default_budget);
        if budget == 0 {
            return Err(ScanError::validation("budget must be greater than zero"));
        }

        let raw = match &request.keywords {
            KeywordSource::Explicit(list) => list.clone(),
            KeywordSource::Suggested => {
                learner::suggest_keywords(&self.store, subject, self.settings.suggestion_count)
                    .await?
            }
        };
        let keywords = prepare_keywords(subject, &raw, self.settings.max_keywords);
        if keywords.is_empty() {
            return Err(ScanError::validation("at least one keyword is required"));
        }

        let timeframe = request
            .timeframe
            .as_deref()
            .unwrap_or(&self.default_timeframe);
        let date_restrict = date_restrict(timeframe);

        let job = self
            .jobs
            .create(subject, keywords.clone(), date_restrict.clone(), budget)
            .await?;
        let plan = ScanPlan {
            job_id: job.id.clone(),
            subject: subject.to_string(),
            keywords,
            date_restrict,
            budget,
        };
        Ok((job, plan))
    }

    /// Recover, search, learn and merge; the job record follows every step.
    async fn execute(
        &self,
        backends: &Backends,
        mut job: ScanJob,
        plan: ScanPlan,
        progress: &dyn ProgressReporter,
    ) -> Result<ScanReport> {
        if let Err(e) = self.jobs.mark_running(&mut job).await {
            self.jobs.fail(&mut job, &e.to_string()).await;
            return Err(e);
        }

        let run = async {
            // Checkpointed URLs are already in the seen index, so a search
            // will never return them again.
            let recovered = self.store.recover_unmerged(&plan.subject).await?;

            let outcome = ScanOrchestrator::new(backends.search.as_ref(), &self.store, &self.settings)
                .run(&plan, progress)
                .await?;

            progress.phase("Learning keywords");
            let keywords = backends
                .learner
                .learn(&self.store, &plan.job_id, &plan.subject)
                .await?;

            progress.phase("Merging results");
            let merged = self.store.merge_results(&plan.subject, &outcome.results).await?;
            Ok::<_, ScanError>((outcome, keywords, recovered + merged))
        };

        match run.await {
            Ok((outcome, keywords, inserted)) => {
                self.jobs.finish(&mut job, &outcome, inserted).await?;
                Ok(ScanReport {
                    job,
                    end: outcome.end,
                    top_domains: outcome.top_domains,
                    keywords,
                })
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "scan failed");
                self.jobs.fail(&mut job, &e.to_string()).await;
                Err(e)
            }
        }
    }
}

fn validate_subject(subject: &str) -> Result<&str> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(ScanError::validation("subject must not be empty"));
    }
    Ok(subject)
}

fn ack_for(plan: &ScanPlan) -> ScanAck {
    ScanAck {
        job_id: plan.job_id.clone(),
        subject: plan.subject.clone(),
        keywords: plan.keywords.clone(),
        date_restrict: plan.date_restrict.clone(),
        budget: plan.budget,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use subjectscan_shared::JobStatus;

    use super::*;
    use crate::knowledge::tests::test_store;
    use crate::learner::DEFAULT_SUGGESTIONS;
    use crate::orchestrator::tests::{ScriptedSearch, page};

    struct FixedReply(&'static str);

    #[async_trait]
    impl TextCompletion for FixedReply {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.search.request_interval_ms = 0;
        config.search.retry_backoff_ms = 0;
        config
    }

    async fn service(search: ScriptedSearch) -> (ScanService, Arc<ScriptedSearch>) {
        let search = Arc::new(search);
        let service = ScanService::new(test_store().await, &fast_config()).with_backends(
            search.clone(),
            Arc::new(FixedReply(r#"["Jane Doe Mega", "exclusive pics"]"#)),
        );
        (service, search)
    }

    fn request(keywords: KeywordSource, budget: Option<u32>) -> ScanRequest {
        ScanRequest {
            subject: "Jane Doe".into(),
            keywords,
            timeframe: Some("1 week".into()),
            budget,
        }
    }

    #[tokio::test]
    async fn foreground_scan_merges_and_learns() {
        let (service, search) =
            service(ScriptedSearch::new(vec![page("leaks.to", "a", 10), page("leaks.to", "b", 4)]))
                .await;

        let report = service
            .run_scan(
                request(KeywordSource::Explicit(vec!["leaks".into()]), None),
                &SilentProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.end, ScanEnd::Completed);
        assert_eq!(report.job.status, JobStatus::Completed);
        assert_eq!(report.job.api_calls, 3);
        assert_eq!(report.job.new_results, 14);
        assert_eq!(report.job.inserted, 14);
        assert_eq!(report.job.date_restrict.as_deref(), Some("d7"));
        assert_eq!(report.top_domains, vec![("leaks.to".to_string(), 14)]);

        let learned: Vec<_> = report.keywords.iter().map(|k| k.keyword.as_str()).collect();
        assert!(learned.contains(&"jane doe mega"));
        assert!(learned.contains(&"exclusive pics"));

        let first_query = search.requests.lock().unwrap()[0].query.clone();
        assert_eq!(first_query, "Jane Doe leaks");

        let stats = service.get_stats("jane  doe").await.unwrap();
        assert_eq!(stats.total, 14);

        let stored = service.job_status(&report.job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn quota_abort_still_merges_partial_results() {
        let (service, _) = service(ScriptedSearch::new(vec![
            page("a.com", "x", 10),
            Err(ScanError::QuotaExceeded("daily limit".into())),
        ]))
        .await;

        let report = service
            .run_scan(
                request(KeywordSource::Explicit(vec!["leaks".into()]), None),
                &SilentProgress,
            )
            .await
            .unwrap();

        assert!(report.end.is_aborted());
        assert_eq!(report.job.status, JobStatus::Aborted);
        assert_eq!(report.job.inserted, 10);
        assert!(!report.keywords.is_empty());
        assert_eq!(service.get_stats("Jane Doe").await.unwrap().total, 10);
    }

    #[tokio::test]
    async fn detached_scan_reaches_terminal_status() {
        let (service, _) = service(ScriptedSearch::new(vec![page("a.com", "x", 3)])).await;

        let ack = service
            .start_scan(request(KeywordSource::Explicit(vec!["leaks".into()]), Some(5)))
            .await
            .unwrap();
        assert_eq!(ack.budget, 5);
        assert_eq!(ack.keywords, vec!["Jane Doe leaks".to_string()]);

        let mut job = None;
        for _ in 0..200 {
            let current = service.job_status(&ack.job_id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                job = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let job = job.expect("job finished");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.inserted, 3);
    }

    #[tokio::test]
    async fn results_of_an_interrupted_run_are_merged_by_the_next_scan() {
        let (service, _) = service(ScriptedSearch::new(vec![page("a.com", "x", 5)])).await;

        // A run that checkpointed its batch but stopped before merging.
        let interrupted = ScriptedSearch::new(vec![page("a.com", "x", 5)]);
        let plan = ScanPlan {
            job_id: JobId::new(),
            subject: "Jane Doe".into(),
            keywords: vec!["Jane Doe leaks".into()],
            date_restrict: None,
            budget: 10,
        };
        let first = ScanOrchestrator::new(&interrupted, &service.store, &service.settings)
            .run(&plan, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.results.len(), 5);
        assert!(service.get_stats("Jane Doe").await.unwrap().is_empty());

        let report = service
            .run_scan(
                request(KeywordSource::Explicit(vec!["leaks".into()]), None),
                &SilentProgress,
            )
            .await
            .unwrap();

        assert_eq!(report.job.new_results, 0);
        assert_eq!(report.job.inserted, 5);
        assert_eq!(service.get_stats("Jane Doe").await.unwrap().total, 5);
    }

    #[tokio::test]
    async fn suggested_keywords_fall_back_to_defaults() {
        let (service, search) = service(ScriptedSearch::new(vec![])).await;

        let suggested = service.suggest_keywords("Jane Doe", None).await.unwrap();
        assert_eq!(suggested.len(), DEFAULT_SUGGESTIONS.len());

        service
            .run_scan(request(KeywordSource::Suggested, Some(50)), &SilentProgress)
            .await
            .unwrap();

        // one empty page per default keyword batch
        let requests = search.requests.lock().unwrap();
        assert_eq!(requests.len(), DEFAULT_SUGGESTIONS.len());
        assert_eq!(requests[0].query, "Jane Doe onlyfans leaks");
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_job() {
        let (service, search) = service(ScriptedSearch::new(vec![])).await;

        let empty_subject = ScanRequest {
            subject: "  ".into(),
            ..request(KeywordSource::Explicit(vec!["x".into()]), None)
        };
        let zero_budget = request(KeywordSource::Explicit(vec!["x".into()]), Some(0));
        let no_keywords = request(KeywordSource::Explicit(vec![" ".into()]), None);

        for bad in [empty_subject, zero_budget, no_keywords] {
            let err = service.run_scan(bad, &SilentProgress).await.unwrap_err();
            assert!(matches!(err, ScanError::Validation { .. }));
        }
        assert_eq!(search.calls(), 0);
        assert!(service.recent_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scanning_without_backends_is_a_config_error() {
        let service = ScanService::new(test_store().await, &fast_config());
        let err = service
            .start_scan(request(KeywordSource::Suggested, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Config { .. }));

        // read-only operations still work
        assert!(service.get_stats("Jane Doe").await.unwrap().is_empty());
        assert!(service.export_data("Jane Doe", ExportFormat::Csv).await.unwrap().is_none());
    }
}
