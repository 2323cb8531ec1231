//! Read-only statistics over a subject's Master Content Dataset.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use subjectscan_shared::ContentItem;

/// Confidence at or above this is "high".
pub const HIGH_CONFIDENCE: f64 = 0.75;
/// Confidence at or above this (and below high) is "medium".
pub const MEDIUM_CONFIDENCE: f64 = 0.40;
/// Risk at or above this is "high".
pub const HIGH_RISK: f64 = 0.7;
/// Risk at or above this (and below high) is "medium".
pub const MEDIUM_RISK: f64 = 0.4;

/// Bucket name for items without a content type.
const UNKNOWN_TYPE: &str = "unknown";

/// High / medium / low counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl TierCounts {
    fn add(&mut self, value: f64, high: f64, medium: f64) {
        if value >= high {
            self.high += 1;
        } else if value >= medium {
            self.medium += 1;
        } else {
            self.low += 1;
        }
    }
}

/// Aggregate view of one subject's dataset.
///
/// `ContentStats::default()` is the explicit empty result for a subject
/// with no stored data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentStats {
    pub total: usize,
    pub domains: BTreeMap<String, usize>,
    pub content_types: BTreeMap<String, usize>,
    /// Tiers on the 0–1 confidence scale.
    pub confidence: TierCounts,
    pub risk: TierCounts,
    /// `YYYY-MM` of `discovered_date` → item count.
    pub timeline: BTreeMap<String, usize>,
    pub oldest: Option<NaiveDate>,
    pub newest: Option<NaiveDate>,
}

impl ContentStats {
    pub fn compute(items: &[ContentItem]) -> Self {
        let mut stats = Self {
            total: items.len(),
            ..Self::default()
        };

        for item in items {
            *stats.domains.entry(item.domain.clone()).or_default() += 1;

            let kind = item.content_type.as_deref().unwrap_or(UNKNOWN_TYPE);
            *stats.content_types.entry(kind.to_string()).or_default() += 1;

            stats
                .confidence
                .add(item.confidence, HIGH_CONFIDENCE, MEDIUM_CONFIDENCE);
            stats.risk.add(item.risk_score, HIGH_RISK, MEDIUM_RISK);

            let month = item.discovered_date.format("%Y-%m").to_string();
            *stats.timeline.entry(month).or_default() += 1;

            let date = item.discovered_date;
            stats.oldest = Some(stats.oldest.map_or(date, |d| d.min(date)));
            stats.newest = Some(stats.newest.map_or(date, |d| d.max(date)));
        }

        stats
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// The `n` most frequent domains, ties broken alphabetically.
    pub fn top_domains(&self, n: usize) -> Vec<(String, usize)> {
        let mut ranked: Vec<_> = self
            .domains
            .iter()
            .map(|(d, c)| (d.clone(), *c))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }
}
