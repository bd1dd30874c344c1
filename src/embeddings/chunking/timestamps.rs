// Timestamp extraction for chunk provenance. Log lines carry wildly mixed
// formats; everything found is normalized to ISO-8601 before comparison.

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

struct Pattern {
    regex: Regex,
    normalize: fn(&str) -> Option<String>,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // ISO 8601: 2024-01-15T10:30:45.123Z
            Pattern {
                regex: Regex::new(
                    r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?",
                )
                .expect("valid regex"),
                normalize: |m| Some(m.to_string()),
            },
            // YYYY-MM-DD HH:MM:SS
            Pattern {
                regex: Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?")
                    .expect("valid regex"),
                normalize: |m| Some(m.replacen(' ', "T", 1)),
            },
            // Apache/nginx: DD/Mon/YYYY:HH:MM:SS
            Pattern {
                regex: Regex::new(r"\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2}")
                    .expect("valid regex"),
                normalize: |m| {
                    NaiveDateTime::parse_from_str(m, "%d/%b/%Y:%H:%M:%S")
                        .ok()
                        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
                },
            },
            // Epoch seconds (10 digits)
            Pattern {
                regex: Regex::new(r"\b\d{10}\b").expect("valid regex"),
                normalize: |m| {
                    let secs: i64 = m.parse().ok()?;
                    DateTime::from_timestamp(secs, 0)
                        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
                },
            },
            // Epoch milliseconds (13 digits)
            Pattern {
                regex: Regex::new(r"\b\d{13}\b").expect("valid regex"),
                normalize: |m| {
                    let millis: i64 = m.parse().ok()?;
                    DateTime::from_timestamp_millis(millis)
                        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
                },
            },
        ]
    })
}

/// Earliest and latest timestamp found in `text`, normalized to ISO-8601.
/// Returns `None` when no recognizable timestamp is present.
#[inline]
pub fn timestamp_range(text: &str) -> Option<(String, String)> {
    let mut timestamps: Vec<String> = Vec::new();

    for pattern in patterns() {
        for m in pattern.regex.find_iter(text) {
            if let Some(normalized) = (pattern.normalize)(m.as_str()) {
                timestamps.push(normalized);
            }
        }
    }

    if timestamps.is_empty() {
        return None;
    }

    timestamps.sort_unstable();
    let last = timestamps.last()?.clone();
    let first = timestamps.first()?.clone();
    Some((first, last))
}
