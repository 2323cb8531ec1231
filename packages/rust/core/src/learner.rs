//! Keyword Learner: mines fresh results, asks an LLM for better discovery
//! keywords and folds them into the subject's Keyword Dataset.
//!
//! The learning step never fails because of the LLM. Transport errors and
//! unusable replies end as [`KeywordParse::Failed`] and leave the dataset
//! untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, instrument, warn};

use subjectscan_shared::{JobId, KeywordRecord, Result, SearchResult};

use crate::completion::TextCompletion;
use crate::knowledge::KnowledgeStore;

/// Returned by the suggestion API when a subject has no keyword history.
pub const DEFAULT_SUGGESTIONS: [&str; 5] = [
    "onlyfans leaks",
    "leaked content",
    "private photos",
    "nude leaks",
    "xxx content",
];

const MAX_EXTRACTED_TERMS: usize = 50;
const PROMPT_TERMS: usize = 30;
const PROMPT_PREVIOUS_KEYWORDS: usize = 15;
const PROMPT_SAMPLE_ROWS: usize = 30;
const PROMPT_SAMPLE_CHARS: usize = 2000;
const MIN_TERM_LEN: usize = 4;
const MAX_FALLBACK_KEYWORDS: usize = 10;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word regex"));

/// A bracketed list of single- or double-quoted strings, trailing comma allowed.
static QUOTED_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\[\s*(?:(?:'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*")\s*,\s*)*(?:'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*")?\s*\]$"#,
    )
    .expect("quoted list regex")
});

static QUOTED_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)""#).expect("quoted item regex")
});

static ESCAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\(.)").expect("escape regex"));

// ---------------------------------------------------------------------------
// Term extraction
// ---------------------------------------------------------------------------

/// Frequent alphabetic terms (length > 3, seen more than once), most frequent
/// first, ties alphabetical, at most 50.
pub fn extract_terms(corpus: &str) -> Vec<String> {
    let lower = corpus.to_lowercase();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in WORD.find_iter(&lower).map(|m| m.as_str()) {
        if word.chars().count() >= MIN_TERM_LEN && word.chars().all(char::is_alphabetic) {
            *counts.entry(word).or_default() += 1;
        }
    }

    let mut frequent: Vec<(&str, usize)> = counts.into_iter().filter(|(_, c)| *c > 1).collect();
    frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    frequent
        .into_iter()
        .take(MAX_EXTRACTED_TERMS)
        .map(|(w, _)| w.to_string())
        .collect()
}

fn corpus_of(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("{} {}", r.title, r.snippet))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Build the keyword-generation prompt.
pub fn build_prompt(
    subject: &str,
    previous: &[KeywordRecord],
    extracted: &[String],
    sample: &[SearchResult],
) -> String {
    let previous_text = if previous.is_empty() {
        "No previous keywords available".to_string()
    } else {
        previous
            .iter()
            .take(PROMPT_PREVIOUS_KEYWORDS)
            .map(|r| r.keyword.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let terms_text = extracted
        .iter()
        .take(PROMPT_TERMS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    let sample_text: String = sample
        .iter()
        .take(PROMPT_SAMPLE_ROWS)
        .map(|r| format!("{} | {} | {}", r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n")
        .chars()
        .take(PROMPT_SAMPLE_CHARS)
        .collect();

    format!(
        r#"You are a search intelligence analyst tracking unauthorized copies of content belonging to "{subject}".

PREVIOUSLY SUCCESSFUL KEYWORDS:
{previous_text}

EXTRACTED FREQUENT WORDS:
{terms_text}

SAMPLE CONTENT (title | url | snippet):
{sample_text}

TASK:
- Identify search keywords most likely to surface more unauthorized or leaked copies of this subject's content.
- Include terms for file types, hosting platforms or content types where relevant.
- Do NOT include the subject's name; it is added separately.

OUTPUT:
Return exactly 8-10 keywords as a JSON array of strings and nothing else.
Example: ["leaked archive", "mega folder", "private video"]"#
    )
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// How a completion reply was turned into keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordParse {
    /// The reply contained a well-formed JSON string array.
    Parsed(Vec<String>),
    /// The array was missing or malformed; keywords came from [`fallback_keywords`].
    FallbackExtracted(Vec<String>),
    /// Nothing usable.
    Failed,
}

impl KeywordParse {
    pub fn keywords(&self) -> &[String] {
        match self {
            Self::Parsed(k) | Self::FallbackExtracted(k) => k,
            Self::Failed => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Parsed(_) => "parsed",
            Self::FallbackExtracted(_) => "fallback",
            Self::Failed => "failed",
        }
    }
}

/// Parse the substring from the first `[` to the last `]` as a string list
/// (JSON, or single-quoted items), falling back to [`fallback_keywords`].
pub fn parse_reply(reply: &str) -> KeywordParse {
    let cleaned = reply.replace('\n', " ");
    let listed = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            let candidate = &cleaned[start..=end];
            serde_json::from_str::<Vec<String>>(candidate)
                .ok()
                .or_else(|| parse_quoted_list(candidate))
        }
        _ => None,
    };

    if let Some(list) = listed {
        let keywords: Vec<String> = list
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if !keywords.is_empty() {
            return KeywordParse::Parsed(keywords);
        }
    }

    let fallback = fallback_keywords(reply);
    if fallback.is_empty() {
        KeywordParse::Failed
    } else {
        KeywordParse::FallbackExtracted(fallback)
    }
}

/// `['a', "b"]` style lists as LLMs often write them; `None` for anything else.
fn parse_quoted_list(candidate: &str) -> Option<Vec<String>> {
    if !QUOTED_LIST.is_match(candidate) {
        return None;
    }
    let items = QUOTED_ITEM
        .captures_iter(candidate)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| ESCAPE.replace_all(m.as_str(), "$1").into_owned())
        .collect();
    Some(items)
}

/// Line scanner for replies without a usable list.
///
/// Lines longer than four characters that are not `#` headings contribute
/// their double-quoted substrings, or the whole line when it has no quotes,
/// is shorter than 30 characters and is not bracketed. Deduplicated, at most 10.
pub fn fallback_keywords(text: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |kw: &str| {
        if seen.insert(kw.to_string()) {
            keywords.push(kw.to_string());
        }
    };

    for line in text.lines().map(str::trim) {
        if line.chars().count() <= 4 || line.starts_with('#') {
            continue;
        }
        if line.contains('"') {
            for quoted in line.split('"').skip(1).step_by(2) {
                let quoted = quoted.trim();
                if !quoted.is_empty() {
                    push(quoted);
                }
            }
        } else if line.chars().count() < 30 && !line.starts_with('[') && !line.ends_with(']') {
            push(line);
        }
    }

    keywords.truncate(MAX_FALLBACK_KEYWORDS);
    keywords
}

// ---------------------------------------------------------------------------
// Learner
// ---------------------------------------------------------------------------

/// Runs one learning round per scan job.
#[derive(Clone)]
pub struct KeywordLearner {
    completion: Arc<dyn TextCompletion>,
}

impl KeywordLearner {
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self { completion }
    }

    /// Learn from the raw results logged by `job_id` and return the subject's
    /// full keyword ranking. No logged results yields an empty list.
    #[instrument(skip_all, fields(job_id = %job_id, subject = %subject))]
    pub async fn learn(
        &self,
        store: &KnowledgeStore,
        job_id: &JobId,
        subject: &str,
    ) -> Result<Vec<KeywordRecord>> {
        let results = store.raw_results(job_id).await?;
        if results.is_empty() {
            info!("no logged results for job, skipping keyword learning");
            return Ok(Vec::new());
        }

        let extracted = extract_terms(&corpus_of(&results));
        let previous = store.keywords(subject).await?;
        let prompt = build_prompt(subject, &previous, &extracted, &results);

        let parse = match self.completion.complete(&prompt).await {
            Ok(reply) => parse_reply(&reply),
            Err(e) => {
                warn!(error = %e, "keyword generation failed");
                KeywordParse::Failed
            }
        };

        info!(
            outcome = parse.label(),
            generated = parse.keywords().len(),
            extracted = extracted.len(),
            "keyword generation finished"
        );

        match parse {
            KeywordParse::Failed => store.keywords(subject).await,
            other => store.record_keywords(subject, other.keywords()).await,
        }
    }
}

/// Top `count` learned keywords, or [`DEFAULT_SUGGESTIONS`] without history.
pub async fn suggest_keywords(
    store: &KnowledgeStore,
    subject: &str,
    count: usize,
) -> Result<Vec<String>> {
    let records = store.keywords(subject).await?;
    if records.is_empty() {
        return Ok(DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect());
    }
    Ok(records.into_iter().take(count).map(|r| r.keyword).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use subjectscan_shared::ScanError;

    use super::*;
    use crate::knowledge::tests::{result, test_store};

    /// Replies with canned text and records prompts.
    struct CannedCompletion {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedCompletion {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("connection refused".into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextCompletion for CannedCompletion {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(ScanError::Completion)
        }
    }

    async fn seeded_store(job: &JobId) -> KnowledgeStore {
        let store = test_store().await;
        store
            .checkpoint(
                job,
                "Jane Doe",
                &[
                    result("https://a.com/1", "Jane Doe mega folder download"),
                    result("https://b.com/2", "Jane Doe mega folder leaked"),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[test]
    fn term_extraction_keeps_repeated_long_words() {
        let terms = extract_terms("Mega folder MEGA folder mega pics pics 2024 2024 leak_zone leak_zone");
        assert_eq!(terms, vec!["mega".to_string(), "folder".into(), "pics".into()]);
    }

    #[test]
    fn term_extraction_keeps_non_ascii_words_whole() {
        let terms = extract_terms("Müller Müller Björk Björk naïve naïve Éva Éva x2go x2go");
        assert_eq!(terms, vec!["björk".to_string(), "müller".into(), "naïve".into()]);
    }

    #[test]
    fn parses_embedded_json_list() {
        let parse = parse_reply("Sure! Here you go:\n[\"mega folder\", \" leaked pics \", \"\"]\nEnjoy");
        assert_eq!(
            parse,
            KeywordParse::Parsed(vec!["mega folder".into(), "leaked pics".into()])
        );
    }

    #[test]
    fn single_quoted_list_is_parsed() {
        let parse = parse_reply("Here:\n['leaked pics', 'mega folder',\n 'telegram leak']");
        assert_eq!(
            parse,
            KeywordParse::Parsed(vec![
                "leaked pics".into(),
                "mega folder".into(),
                "telegram leak".into()
            ])
        );

        let mixed = parse_reply(r#"['it\'s leaked', "onlyfans dump",]"#);
        assert_eq!(
            mixed,
            KeywordParse::Parsed(vec!["it's leaked".into(), "onlyfans dump".into()])
        );
    }

    #[test]
    fn non_list_brackets_fall_back_to_quotes() {
        let parse = parse_reply("Keywords [see below]\n1. \"mega folder\" and \"telegram leak\"");
        assert_eq!(
            parse,
            KeywordParse::FallbackExtracted(vec!["mega folder".into(), "telegram leak".into()])
        );
    }

    #[test]
    fn unusable_reply_is_failed() {
        assert_eq!(parse_reply(""), KeywordParse::Failed);
        assert_eq!(parse_reply("[]"), KeywordParse::Failed);
    }

    #[test]
    fn fallback_scanner_rules() {
        let text = "# Heading line\nabc\nshort phrase\n[bracketed line]\n\
                    this line is definitely far too long to be a keyword\n\
                    \"quoted one\" plus \"quoted two\"\nshort phrase";
        assert_eq!(
            fallback_keywords(text),
            vec!["short phrase".to_string(), "quoted one".into(), "quoted two".into()]
        );

        let many: String = (0..15).map(|i| format!("keyword number {i}\n")).collect();
        assert_eq!(fallback_keywords(&many).len(), 10);
    }

    #[test]
    fn prompt_mentions_history_terms_and_samples() {
        let prompt = build_prompt("Jane Doe", &[], &["mega".into()], &[result("https://a.com", "T")]);
        assert!(prompt.contains("No previous keywords available"));
        assert!(prompt.contains("mega"));
        assert!(prompt.contains("T | https://a.com | "));
        assert!(prompt.contains("8-10 keywords"));
    }

    #[tokio::test]
    async fn learning_merges_generated_keywords() {
        let job = JobId::new();
        let store = seeded_store(&job).await;
        let llm = CannedCompletion::ok("[\"Mega Folder\", \"telegram leak\"]");
        let learner = KeywordLearner::new(llm.clone());

        let ranked = learner.learn(&store, &job, "Jane Doe").await.unwrap();
        assert_eq!(ranked.len(), 2);

        let ranked = learner.learn(&store, &job, "Jane Doe").await.unwrap();
        assert_eq!(ranked[0].occurrence, 2);
        assert!(ranked.iter().any(|r| r.keyword == "mega folder"));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("No previous keywords available"));
        assert!(prompts[1].contains("mega folder"));
    }

    #[tokio::test]
    async fn missing_result_set_yields_empty_list() {
        let store = test_store().await;
        let llm = CannedCompletion::ok("[\"x\"]");
        let learner = KeywordLearner::new(llm.clone());

        let ranked = learner.learn(&store, &JobId::new(), "Jane Doe").await.unwrap();
        assert!(ranked.is_empty());
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn llm_failure_leaves_dataset_untouched() {
        let job = JobId::new();
        let store = seeded_store(&job).await;
        store.record_keywords("Jane Doe", &["existing".into()]).await.unwrap();

        let learner = KeywordLearner::new(CannedCompletion::failing());
        let ranked = learner.learn(&store, &job, "Jane Doe").await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].occurrence, 1);
    }

    #[tokio::test]
    async fn suggestions_fall_back_to_defaults() {
        let store = test_store().await;
        let defaults = suggest_keywords(&store, "Jane Doe", 10).await.unwrap();
        assert_eq!(defaults.len(), DEFAULT_SUGGESTIONS.len());

        store
            .record_keywords("Jane Doe", &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        store.record_keywords("Jane Doe", &["b".into()]).await.unwrap();
        let top = suggest_keywords(&store, "Jane Doe", 2).await.unwrap();
        assert_eq!(top, vec!["b".to_string(), "a".to_string()]);
    }
}
