//! Scan job lifecycle: pending -> running -> completed | aborted | failed.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use subjectscan_shared::{JobId, JobStatus, Result, ScanJob};
use subjectscan_storage::Storage;

use crate::orchestrator::{ScanEnd, ScanOutcome};

/// Persists every status transition of a scan job.
#[derive(Clone)]
pub struct JobTracker {
    storage: Arc<Storage>,
}

impl JobTracker {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Record a new pending job.
    pub async fn create(
        &self,
        subject: &str,
        keywords: Vec<String>,
        date_restrict: Option<String>,
        budget: u32,
    ) -> Result<ScanJob> {
        let job = ScanJob {
            id: JobId::new(),
            subject: subject.to_string(),
            status: JobStatus::Pending,
            keywords,
            date_restrict,
            budget,
            api_calls: 0,
            new_results: 0,
            inserted: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        self.storage.insert_job(&job).await?;
        info!(job_id = %job.id, subject, "scan job created");
        Ok(job)
    }

    pub async fn mark_running(&self, job: &mut ScanJob) -> Result<()> {
        job.status = JobStatus::Running;
        self.storage.update_job(job).await
    }

    /// Record the end of a run that produced an outcome.
    ///
    /// A quota abort is terminal but not a failure: its partial results
    /// were merged like any other run's.
    pub async fn finish(
        &self,
        job: &mut ScanJob,
        outcome: &ScanOutcome,
        inserted: usize,
    ) -> Result<()> {
        job.api_calls = outcome.api_calls;
        job.new_results = outcome.results.len();
        job.inserted = inserted;
        job.finished_at = Some(Utc::now());
        match &outcome.end {
            ScanEnd::Aborted(reason) => {
                job.status = JobStatus::Aborted;
                job.error = Some(reason.clone());
            }
            ScanEnd::Completed | ScanEnd::BudgetExhausted => job.status = JobStatus::Completed,
        }
        self.storage.update_job(job).await?;
        info!(job_id = %job.id, status = job.status.as_str(), inserted, "scan job finished");
        Ok(())
    }

    /// Record an internal error. Persisting the failure is best-effort.
    pub async fn fail(&self, job: &mut ScanJob, error: &str) {
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.finished_at = Some(Utc::now());
        if let Err(e) = self.storage.update_job(job).await {
            warn!(job_id = %job.id, error = %e, "failed to record job failure");
        }
    }

    pub async fn get(&self, id: &JobId) -> Result<Option<ScanJob>> {
        self.storage.get_job(id).await
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<ScanJob>> {
        self.storage.recent_jobs(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::tests::test_store;

    fn outcome(end: ScanEnd) -> ScanOutcome {
        ScanOutcome {
            results: Vec::new(),
            top_domains: Vec::new(),
            api_calls: 7,
            end,
        }
    }

    #[tokio::test]
    async fn lifecycle_is_persisted() {
        let store = test_store().await;
        let tracker = JobTracker::new(store.storage().clone());

        let mut job = tracker
            .create("Jane Doe", vec!["jane doe leaks".into()], Some("d7".into()), 20)
            .await
            .unwrap();
        assert_eq!(tracker.get(&job.id).await.unwrap().unwrap().status, JobStatus::Pending);

        tracker.mark_running(&mut job).await.unwrap();
        assert_eq!(tracker.get(&job.id).await.unwrap().unwrap().status, JobStatus::Running);

        tracker
            .finish(&mut job, &outcome(ScanEnd::BudgetExhausted), 4)
            .await
            .unwrap();
        let stored = tracker.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.api_calls, 7);
        assert_eq!(stored.inserted, 4);
        assert_eq!(stored.keywords, vec!["jane doe leaks".to_string()]);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn quota_abort_and_failure_are_distinct() {
        let store = test_store().await;
        let tracker = JobTracker::new(store.storage().clone());

        let mut aborted = tracker.create("Jane Doe", vec![], None, 5).await.unwrap();
        tracker
            .finish(&mut aborted, &outcome(ScanEnd::Aborted("daily limit".into())), 0)
            .await
            .unwrap();

        let mut failed = tracker.create("Jane Doe", vec![], None, 5).await.unwrap();
        tracker.fail(&mut failed, "disk full").await;

        let aborted = tracker.get(&aborted.id).await.unwrap().unwrap();
        assert_eq!(aborted.status, JobStatus::Aborted);
        assert_eq!(aborted.error.as_deref(), Some("daily limit"));

        let failed = tracker.get(&failed.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("disk full"));

        assert_eq!(tracker.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let store = test_store().await;
        let tracker = JobTracker::new(store.storage().clone());
        assert!(tracker.get(&JobId::new()).await.unwrap().is_none());
    }
}
