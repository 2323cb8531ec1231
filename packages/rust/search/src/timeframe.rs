//! Timeframe descriptors → search API `dateRestrict` codes.

use std::sync::LazyLock;

use regex::Regex;

/// Restriction used when a descriptor is not recognized.
pub const DEFAULT_DATE_RESTRICT: &str = "d30";

static RELATIVE_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:last\s+|past\s+)?(\d+)\s+(day|week|month)s?$").expect("timeframe regex")
});

/// Resolve a timeframe descriptor into a day-count restriction code.
///
/// | descriptor | code |
/// |---|---|
/// | `today` | `d1` |
/// | `<n> days` | `d<n>` |
/// | `<n> weeks` | `d<7n>` |
/// | `<n> months` | `d<30n>` |
/// | `lifetime` / `all time` | no restriction |
/// | anything else | `d30` |
///
/// A leading `last` (`"last 7 days"`) and singular units are accepted.
pub fn date_restrict(timeframe: &str) -> Option<String> {
    let normalized = timeframe.trim().to_lowercase();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

    match normalized.as_str() {
        "today" => return Some("d1".into()),
        "lifetime" | "all time" => return None,
        _ => {}
    }

    let days = RELATIVE_SPAN.captures(&normalized).and_then(|caps| {
        let n: u32 = caps[1].parse().ok()?;
        let factor = match &caps[2] {
            "week" => 7,
            "month" => 30,
            _ => 1,
        };
        n.checked_mul(factor).filter(|d| *d > 0)
    });

    match days {
        Some(days) => Some(format!("d{days}")),
        None => {
            tracing::debug!(%timeframe, "unrecognized timeframe, using default restriction");
            Some(DEFAULT_DATE_RESTRICT.into())
        }
    }
}
