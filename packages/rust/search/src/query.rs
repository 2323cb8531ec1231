//! Keyword preparation, batching and query building.

/// Cap an explicit keyword list and make sure every keyword names the subject.
///
/// Blank entries and case-insensitive duplicates are dropped before the cap.
/// Keywords that do not already mention the subject get `"<subject> "` prepended.
pub fn prepare_keywords(subject: &str, keywords: &[String], max_keywords: usize) -> Vec<String> {
    let subject = subject.trim();
    let subject_lower = subject.to_lowercase();
    let mut seen = std::collections::HashSet::new();

    keywords
        .iter()
        .map(|kw| kw.trim())
        .filter(|kw| !kw.is_empty())
        .filter(|kw| seen.insert(kw.to_lowercase()))
        .take(max_keywords)
        .map(|kw| {
            if kw.to_lowercase().contains(&subject_lower) {
                kw.to_string()
            } else {
                format!("{subject} {kw}")
            }
        })
        .collect()
}

/// Partition keywords into ordered batches of at most `batch_size` entries.
pub fn batch_keywords(keywords: &[String], batch_size: usize) -> Vec<Vec<String>> {
    keywords
        .chunks(batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

/// Join a batch into one OR query.
///
/// Keywords are passed through verbatim: quoted phrases and `site:` filters
/// keep their exact form.
pub fn build_query(batch: &[String]) -> String {
    batch
        .iter()
        .map(|kw| kw.trim())
        .filter(|kw| !kw.is_empty())
        .collect::<Vec<_>>()
        .join(" OR ")
}
