//! Rule-based confidence and risk scoring for discovered content.
//!
//! Confidence answers "does this page belong to the subject?", risk answers
//! "is this likely unauthorized content?". Both are heuristics over the
//! URL, domain, title and snippet.

use subjectscan_shared::SearchResult;

/// Starting confidence before any rule applies.
const BASE_CONFIDENCE: f64 = 0.15;
const MIN_CONFIDENCE: f64 = 0.05;
const MAX_CONFIDENCE: f64 = 0.95;

const OFFICIAL_DOMAIN_BOOST: f64 = 0.8;
const PROFILE_BOOST: f64 = 0.75;
const PROFILE_CAP: f64 = 0.9;
const VERIFIED_BOOST: f64 = 0.6;
const EXACT_NAME_BOOST: f64 = 0.3;
const NAME_PARTS_WEIGHT: f64 = 0.2;
const LEAK_PENALTY: f64 = 0.4;
const REPUTABLE_BOOST: f64 = 0.1;

const BASE_RISK: f64 = 0.5;
const HIGH_RISK_DOMAIN_BOOST: f64 = 0.3;
const CONFIDENCE_RISK_WEIGHT: f64 = 0.4;

const OFFICIAL_TLDS: &[&str] = &[".com", ".net", ".org", ".co", ".io", ".me"];

const VERIFIED_INDICATORS: &[&str] = &[
    "verified account",
    "official account",
    "verified profile",
    "official profile",
    "blue check",
];

const LEAK_INDICATORS: &[&str] = &[
    "leaked",
    "leak",
    "hacked",
    "stolen",
    "private content",
    "exclusive content",
    "paid content",
    "premium content",
];

const REPUTABLE_PLATFORMS: &[&str] = &[
    "youtube.com",
    "instagram.com",
    "twitter.com",
    "facebook.com",
    "linkedin.com",
    "tiktok.com",
];

const HIGH_RISK_DOMAIN_TERMS: &[&str] = &["leak", "hack", "porn", "xxx", "nude", "stolen"];

const VIDEO_PLATFORMS: &[&str] = &["youtube.com", "vimeo.com", "tiktok.com", "twitch.tv"];
const IMAGE_PLATFORMS: &[&str] = &["instagram.com", "imgur.com", "flickr.com", "pinterest.com"];

// ---------------------------------------------------------------------------
// Profile pattern table
// ---------------------------------------------------------------------------

/// Placeholder replaced by each subject-name variant.
const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// A known profile URL shape on a social or content platform.
#[derive(Debug, Clone, Copy)]
pub struct ProfilePattern {
    pub platform: &'static str,
    /// URL fragment containing [`SUBJECT_PLACEHOLDER`].
    pub template: &'static str,
}

const fn profile(platform: &'static str, template: &'static str) -> ProfilePattern {
    ProfilePattern { platform, template }
}

/// Profile URL shapes. Adding a platform is one more row.
pub const PROFILE_PATTERNS: &[ProfilePattern] = &[
    profile("YouTube", "youtube.com/c/{subject}"),
    profile("YouTube", "youtube.com/user/{subject}"),
    profile("YouTube", "youtube.com/@{subject}"),
    profile("Instagram", "instagram.com/{subject}"),
    profile("Twitter", "twitter.com/{subject}"),
    profile("X", "x.com/{subject}"),
    profile("TikTok", "tiktok.com/@{subject}"),
    profile("Facebook", "facebook.com/{subject}"),
    profile("OnlyFans", "onlyfans.com/{subject}"),
    profile("Patreon", "patreon.com/{subject}"),
    profile("Fansly", "fansly.com/{subject}"),
    profile("Fanhouse", "fanhouse.app/{subject}"),
    profile("Twitch", "twitch.tv/{subject}"),
    profile("LinkedIn", "linkedin.com/in/{subject}"),
    profile("Threads", "threads.net/@{subject}"),
];

// ---------------------------------------------------------------------------
// Domain helpers
// ---------------------------------------------------------------------------

/// Host of a URL with protocol, port-free path and leading `www.` removed, lowercased.
pub fn extract_domain(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = match lower.find("://") {
        Some(idx) => &lower[idx + 3..],
        None => lower.as_str(),
    };
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

fn domain_matches(domain: &str, platform: &str) -> bool {
    domain == platform
        || domain
            .strip_suffix(platform)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Coarse media type of a domain: `video`, `image`, or `None` when unknown.
pub fn content_type_for(domain: &str) -> Option<&'static str> {
    if VIDEO_PLATFORMS.iter().any(|p| domain_matches(domain, p)) {
        Some("video")
    } else if IMAGE_PLATFORMS.iter().any(|p| domain_matches(domain, p)) {
        Some("image")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// SubjectMatcher
// ---------------------------------------------------------------------------

/// Precomputed name variants for scoring many results against one subject.
#[derive(Debug, Clone)]
pub struct SubjectMatcher {
    name: String,
    name_parts: Vec<String>,
    variants: Vec<String>,
    official_domains: Vec<String>,
    profile_fragments: Vec<String>,
}

impl SubjectMatcher {
    pub fn new(subject: &str) -> Self {
        let name_parts: Vec<String> = subject.split_whitespace().map(str::to_lowercase).collect();
        let name = name_parts.join(" ");

        let mut variants = if name_parts.is_empty() {
            Vec::new()
        } else {
            vec![name_parts.concat(), name_parts.join("-"), name_parts.join("_")]
        };
        variants.dedup();

        let official_domains = variants
            .iter()
            .flat_map(|v| OFFICIAL_TLDS.iter().map(move |tld| format!("{v}{tld}")))
            .collect();

        let mut profile_fragments: Vec<String> = PROFILE_PATTERNS
            .iter()
            .flat_map(|p| {
                variants
                    .iter()
                    .map(move |v| p.template.replace(SUBJECT_PLACEHOLDER, v))
            })
            .collect();
        profile_fragments.sort();
        profile_fragments.dedup();

        Self {
            name,
            name_parts,
            variants,
            official_domains,
            profile_fragments,
        }
    }

    /// Whether `domain` is one of the subject's own site candidates.
    pub fn is_official_domain(&self, domain: &str) -> bool {
        self.official_domains.iter().any(|d| d == domain)
    }

    /// The platform whose profile URL shape `url` matches, if any.
    pub fn matched_platform(&self, url: &str) -> Option<&'static str> {
        let url = url.to_lowercase();
        PROFILE_PATTERNS
            .iter()
            .find(|p| {
                self.variants
                    .iter()
                    .any(|v| url.contains(&p.template.replace(SUBJECT_PLACEHOLDER, v)))
            })
            .map(|p| p.platform)
    }

    /// Confidence that `result` (hosted on `domain`) belongs to the subject.
    pub fn confidence(&self, result: &SearchResult, domain: &str) -> f64 {
        let mut score = BASE_CONFIDENCE;

        if self.is_official_domain(domain) {
            score += OFFICIAL_DOMAIN_BOOST;
            return score.min(MAX_CONFIDENCE);
        }

        let url = result.url.to_lowercase();
        if self.profile_fragments.iter().any(|f| url.contains(f.as_str())) {
            score += PROFILE_BOOST;
            return score.min(PROFILE_CAP);
        }

        let text = format!("{} {} {}", result.title, result.url, result.snippet).to_lowercase();
        let mentions_name = !self.name.is_empty() && text.contains(&self.name);

        if mentions_name && VERIFIED_INDICATORS.iter().any(|i| text.contains(i)) {
            score += VERIFIED_BOOST;
        }
        if mentions_name {
            score += EXACT_NAME_BOOST;
        }
        if !self.name_parts.is_empty() {
            let found = self
                .name_parts
                .iter()
                .filter(|part| part.chars().count() > 2 && text.contains(part.as_str()))
                .count();
            score += NAME_PARTS_WEIGHT * found as f64 / self.name_parts.len() as f64;
        }
        if LEAK_INDICATORS.iter().any(|i| text.contains(i)) {
            score -= LEAK_PENALTY;
        }
        if REPUTABLE_PLATFORMS.iter().any(|p| url.contains(p)) {
            score += REPUTABLE_BOOST;
        }

        score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }
}

/// Risk that content on `domain` with the given confidence is unauthorized.
pub fn risk_score(domain: &str, confidence: f64) -> f64 {
    let mut score = BASE_RISK;
    if HIGH_RISK_DOMAIN_TERMS.iter().any(|t| domain.contains(t)) {
        score += HIGH_RISK_DOMAIN_BOOST;
    }
    score -= confidence * CONFIDENCE_RISK_WEIGHT;
    score.clamp(0.0, 1.0)
}
