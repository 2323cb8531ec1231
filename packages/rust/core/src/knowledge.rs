//! Knowledge Store: the per-subject repository over [`Storage`].
//!
//! Owns the Master Content Dataset and Keyword Dataset of every subject.
//! Datasets are loaded lazily on first read and cached until
//! [`KnowledgeStore::invalidate`] is called or a write changes them.
//! Writes for one store are serialised by an async mutex.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use subjectscan_shared::{
    ContentItem, DmcaStatus, JobId, KeywordRecord, Result, ScanError, SearchResult, SubjectKey,
    normalize_keyword, today,
};
use subjectscan_storage::Storage;

use crate::export::{self, ExportFormat, ExportedFile};
use crate::scoring::{self, SubjectMatcher};
use crate::stats::ContentStats;

/// Repository of subject datasets.
pub struct KnowledgeStore {
    storage: Arc<Storage>,
    exports_dir: PathBuf,
    content: Mutex<HashMap<SubjectKey, Vec<ContentItem>>>,
    keywords: Mutex<HashMap<SubjectKey, Vec<KeywordRecord>>>,
}

impl KnowledgeStore {
    pub fn new(storage: Arc<Storage>, exports_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            exports_dir: exports_dir.into(),
            content: Mutex::new(HashMap::new()),
            keywords: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    /// Drop cached datasets for `subject`; the next read reloads from storage.
    pub async fn invalidate(&self, subject: &str) {
        let key = SubjectKey::new(subject);
        self.content.lock().await.remove(&key);
        self.keywords.lock().await.remove(&key);
        debug!(subject = %key, "cache invalidated");
    }

    // -----------------------------------------------------------------------
    // Master Content Dataset
    // -----------------------------------------------------------------------

    /// The subject's content items in discovery order.
    pub async fn content_items(&self, subject: &str) -> Result<Vec<ContentItem>> {
        let key = SubjectKey::new(subject);
        let mut cache = self.content.lock().await;
        Ok(self.loaded_content(&mut cache, &key).await?.clone())
    }

    async fn loaded_content<'c>(
        &self,
        cache: &'c mut HashMap<SubjectKey, Vec<ContentItem>>,
        key: &SubjectKey,
    ) -> Result<&'c mut Vec<ContentItem>> {
        if !cache.contains_key(key) {
            let items = self.storage.load_content_items(key).await?;
            debug!(subject = %key, items = items.len(), "content dataset loaded");
            cache.insert(key.clone(), items);
        }
        cache
            .get_mut(key)
            .ok_or_else(|| ScanError::Storage(format!("content cache miss for {key}")))
    }

    /// Score and append results whose URL is not yet in the dataset.
    ///
    /// Returns the number of newly inserted items. URLs already present only
    /// get their `last_checked` date refreshed.
    #[instrument(skip_all, fields(subject = %subject, incoming = results.len()))]
    pub async fn merge_results(&self, subject: &str, results: &[SearchResult]) -> Result<usize> {
        let key = SubjectKey::new(subject);
        if key.is_empty() {
            return Err(ScanError::validation("subject must not be empty"));
        }

        let mut cache = self.content.lock().await;
        let dataset = self.loaded_content(&mut cache, &key).await?;

        let mut known: HashSet<String> = dataset.iter().map(|i| i.url().to_string()).collect();
        let matcher = SubjectMatcher::new(subject);
        let stamp = today();

        let mut fresh = Vec::new();
        let mut revisited = Vec::new();
        for result in results {
            if result.url.is_empty() {
                continue;
            }
            if !known.insert(result.url.clone()) {
                revisited.push(result.url.clone());
                continue;
            }

            let domain = scoring::extract_domain(&result.url);
            let confidence = matcher.confidence(result, &domain);
            fresh.push(ContentItem {
                result: result.clone(),
                content_type: scoring::content_type_for(&domain).map(str::to_string),
                risk_score: scoring::risk_score(&domain, confidence),
                confidence,
                domain,
                discovered_date: stamp,
                last_checked: stamp,
                dmca_status: DmcaStatus::NotFiled,
            });
        }

        let inserted = self.storage.insert_content_items(&key, &fresh).await?;
        self.storage
            .touch_content_items(&key, &revisited, stamp)
            .await?;

        if inserted == fresh.len() {
            for item in dataset.iter_mut() {
                if revisited.iter().any(|u| u == item.url()) {
                    item.last_checked = stamp;
                }
            }
            dataset.extend(fresh);
        } else {
            // Another writer stored some of these URLs first.
            *dataset = self.storage.load_content_items(&key).await?;
        }

        info!(inserted, revisited = revisited.len(), total = dataset.len(), "results merged");
        Ok(inserted)
    }

    /// Aggregate statistics; the empty structure when nothing is stored.
    pub async fn stats(&self, subject: &str) -> Result<ContentStats> {
        let items = self.content_items(subject).await?;
        Ok(ContentStats::compute(&items))
    }

    /// Export the subject's dataset. `None` when the subject has no items.
    pub async fn export(&self, subject: &str, format: ExportFormat) -> Result<Option<ExportedFile>> {
        let key = SubjectKey::new(subject);
        let items = self.content_items(subject).await?;
        let exports_dir = self.exports_dir.clone();
        tokio::task::spawn_blocking(move || {
            export::export_items(&items, &key, &exports_dir, format)
        })
        .await
        .map_err(|e| ScanError::Export(format!("export task failed: {e}")))?
    }

    // -----------------------------------------------------------------------
    // Keyword Dataset
    // -----------------------------------------------------------------------

    /// All keywords for the subject ranked by occurrence, highest first.
    pub async fn keywords(&self, subject: &str) -> Result<Vec<KeywordRecord>> {
        let key = SubjectKey::new(subject);
        let mut cache = self.keywords.lock().await;
        if let Some(records) = cache.get(&key) {
            return Ok(records.clone());
        }
        let records = self.storage.load_keywords(&key).await?;
        cache.insert(key, records.clone());
        Ok(records)
    }

    /// Count one occurrence for every generated keyword (repeats included)
    /// and return the updated ranking.
    #[instrument(skip_all, fields(subject = %subject, generated = generated.len()))]
    pub async fn record_keywords(
        &self,
        subject: &str,
        generated: &[String],
    ) -> Result<Vec<KeywordRecord>> {
        let key = SubjectKey::new(subject);

        let keywords: Vec<String> = generated
            .iter()
            .map(|k| normalize_keyword(k))
            .filter(|k| !k.is_empty())
            .collect();

        {
            let mut cache = self.keywords.lock().await;
            self.storage.record_keywords(&key, &keywords, today()).await?;
            cache.remove(&key);
        }

        self.keywords(subject).await
    }

    // -----------------------------------------------------------------------
    // Raw result log + seen-URL index
    // -----------------------------------------------------------------------

    /// Persist a finished batch of a scan run.
    pub async fn checkpoint(
        &self,
        job_id: &JobId,
        subject: &str,
        results: &[SearchResult],
    ) -> Result<()> {
        self.storage
            .checkpoint_batch(job_id, &SubjectKey::new(subject), results)
            .await
    }

    /// Raw results logged by a scan job (empty for unknown jobs).
    pub async fn raw_results(&self, job_id: &JobId) -> Result<Vec<SearchResult>> {
        self.storage.raw_results_for_job(job_id).await
    }

    /// Merge results that were checkpointed by an earlier run but never
    /// reached the content dataset. Returns the number of items inserted.
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn recover_unmerged(&self, subject: &str) -> Result<usize> {
        let pending = self
            .storage
            .unmerged_raw_results(&SubjectKey::new(subject))
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(pending = pending.len(), "merging results left by an interrupted run");
        self.merge_results(subject, &pending).await
    }

    /// URL hashes recorded by earlier runs for the subject.
    pub async fn seen_url_hashes(&self, subject: &str) -> Result<HashSet<String>> {
        self.storage
            .seen_url_hashes(&SubjectKey::new(subject))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::*;

    pub(crate) async fn test_store() -> KnowledgeStore {
        let root = std::env::temp_dir().join(format!("ss_store_{}", Uuid::now_v7()));
        let storage = Storage::open(&root.join("subjectscan.db"))
            .await
            .expect("open test db");
        KnowledgeStore::new(Arc::new(storage), root.join("exports"))
    }

    pub(crate) fn result(url: &str, title: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: url.into(),
            snippet: String::new(),
            query: "jane doe leaks".into(),
            page: 1,
            date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn merge_counts_only_new_urls() {
        let store = test_store().await;
        store
            .merge_results("Jane Doe", &[result("https://a.com/1", "Jane Doe")])
            .await
            .unwrap();

        let inserted = store
            .merge_results(
                "Jane Doe",
                &[result("https://a.com/1", "Jane Doe"), result("https://b.com/2", "other")],
            )
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.content_items("Jane Doe").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn merge_never_duplicates_urls() {
        let store = test_store().await;
        let batch = vec![
            result("https://a.com/1", "x"),
            result("https://a.com/1", "x again"),
            result("https://b.com/1", "y"),
        ];
        store.merge_results("jane doe", &batch).await.unwrap();
        store.merge_results("Jane  Doe", &batch).await.unwrap();

        store.invalidate("jane doe").await;
        let items = store.content_items("JANE DOE").await.unwrap();
        let urls: HashSet<_> = items.iter().map(|i| i.url()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(urls.len(), 2);
    }

    #[tokio::test]
    async fn merged_items_are_scored_and_stamped() {
        let store = test_store().await;
        store
            .merge_results(
                "Jane Doe",
                &[
                    result("https://www.janedoe.com/", "Home"),
                    result("https://leakhub.to/jane", "jane doe leaked"),
                    result("https://youtube.com/watch?v=1", "clip"),
                ],
            )
            .await
            .unwrap();

        let items = store.content_items("Jane Doe").await.unwrap();
        assert_eq!(items[0].domain, "janedoe.com");
        assert!((items[0].confidence - 0.95).abs() < 1e-9);
        assert_eq!(items[2].content_type.as_deref(), Some("video"));
        for item in &items {
            assert!((0.05..=0.95).contains(&item.confidence));
            assert!((0.0..=1.0).contains(&item.risk_score));
            assert_eq!(item.dmca_status, DmcaStatus::NotFiled);
            assert_eq!(item.discovered_date, today());
        }
        assert!(items[1].risk_score > items[0].risk_score);
    }

    #[tokio::test]
    async fn empty_subject_has_empty_stats_and_no_export() {
        let store = test_store().await;
        let stats = store.stats("Nobody").await.unwrap();
        assert!(stats.is_empty());
        assert!(store.export("Nobody", ExportFormat::Csv).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn export_writes_master_file() {
        let store = test_store().await;
        store
            .merge_results("Jane Doe", &[result("https://a.com/1", "Jane Doe")])
            .await
            .unwrap();
        let file = store
            .export("Jane Doe", ExportFormat::Json)
            .await
            .unwrap()
            .expect("export written");
        assert_eq!(file.rows, 1);
        assert!(file.path.starts_with(store.exports_dir()));
        assert!(file.path.ends_with("jane_doe_master.json"));
    }

    #[tokio::test]
    async fn keyword_occurrence_is_monotonic() {
        let store = test_store().await;
        let first = store
            .record_keywords("Jane Doe", &["Mega Folder".into(), "  ".into()])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].occurrence, 1);

        let second = store
            .record_keywords("Jane Doe", &["leaks".into()])
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|r| r.occurrence == 1));

        let third = store
            .record_keywords("Jane Doe", &["Mega Folder".into()])
            .await
            .unwrap();
        assert_eq!(third[0].keyword, "mega folder");
        assert_eq!(third[0].occurrence, 2);
        let leaks = third.iter().find(|r| r.keyword == "leaks").unwrap();
        assert_eq!(leaks.occurrence, 1);
    }

    #[tokio::test]
    async fn repeated_keyword_in_one_reply_counts_each_time() {
        let store = test_store().await;
        let ranked = store
            .record_keywords("Jane Doe", &["leaks".into(), "LEAKS".into(), " Leaks ".into()])
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].keyword, "leaks");
        assert_eq!(ranked[0].occurrence, 3);
    }

    #[tokio::test]
    async fn checkpointed_but_unmerged_results_are_recovered() {
        let store = test_store().await;
        let job_id = JobId::new();
        store
            .checkpoint(
                &job_id,
                "Jane Doe",
                &[result("https://a.com/1", "x"), result("https://a.com/2", "y")],
            )
            .await
            .unwrap();
        store
            .merge_results("Jane Doe", &[result("https://a.com/1", "x")])
            .await
            .unwrap();

        assert_eq!(store.recover_unmerged("jane doe").await.unwrap(), 1);
        assert_eq!(store.content_items("Jane Doe").await.unwrap().len(), 2);
        assert_eq!(store.recover_unmerged("Jane Doe").await.unwrap(), 0);
    }
}
