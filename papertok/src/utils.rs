use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub fn s(str: &str) -> String {
    str.to_string()
}

/// Collapse consecutive whitespace (newlines, tabs, spaces) into a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fractional days from `then` to `now`; negative when `then` is in the future.
pub fn days_elapsed(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_milliseconds() as f64 / 86_400_000.0
}

/// Parse "cs.AI, cs.LG cs.CL" style input into a set of category codes.
pub fn parse_categories(text: &str) -> BTreeSet<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

/// Truncate to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
