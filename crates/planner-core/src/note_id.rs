//! Note id scheme and title derivation.
//!
//! A note id is either the day's date (`2025-10-06`, one note per day) or a
//! `{date}_{unix_millis}` composite when a day holds several notes.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::defaults::{TITLE_MAX_CHARS, UNTITLED};

const DATE_FORMAT: &str = "%Y-%m-%d";

static BLOCK_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|h[1-6]|blockquote)>").expect("valid regex")
});
static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Date-derived id for the single note of a day.
pub fn for_day(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Composite id for an additional note on `date`, created at `at`.
pub fn timestamped(date: NaiveDate, at: DateTime<Utc>) -> String {
    format!("{}_{}", for_day(date), at.timestamp_millis())
}

/// The calendar day encoded at the start of a note id, if any.
pub fn date_of(id: &str) -> Option<NaiveDate> {
    let head = id.get(..10)?;
    match id.get(10..) {
        Some("") | None => {}
        Some(rest) if rest.starts_with('_') => {}
        Some(_) => return None,
    }
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Title derived from note content: the first non-empty text line with
/// markup stripped, truncated to [`TITLE_MAX_CHARS`] characters.
///
/// Accepts a plain string or an object carrying `html` or `text`. Drawing
/// snapshots and other payloads yield `None`.
pub fn extract_title(content: &JsonValue) -> Option<String> {
    let raw = match content {
        JsonValue::String(s) => s.as_str(),
        JsonValue::Object(map) => map
            .get("html")
            .or_else(|| map.get("text"))
            .and_then(JsonValue::as_str)?,
        _ => return None,
    };

    let broken = BLOCK_BREAK.replace_all(raw, "\n");
    let plain = MARKUP_TAG.replace_all(&broken, "");
    let plain = plain.replace("&nbsp;", " ");

    plain
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(TITLE_MAX_CHARS).collect())
}

/// Fallback title: `"{date} note"`, or [`UNTITLED`] without a date.
pub fn default_title(date: Option<&str>) -> String {
    match date {
        Some(d) if !d.is_empty() => format!("{d} note"),
        _ => UNTITLED.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 6).unwrap()
    }

    #[test]
    fn test_for_day_is_iso_date() {
        assert_eq!(for_day(day()), "2025-10-06");
    }

    #[test]
    fn test_timestamped_appends_millis() {
        let at = Utc.timestamp_millis_opt(1_759_700_000_123).unwrap();
        assert_eq!(timestamped(day(), at), "2025-10-06_1759700000123");
    }

    #[test]
    fn test_date_of_both_forms() {
        assert_eq!(date_of("2025-10-06"), Some(day()));
        assert_eq!(date_of("2025-10-06_1759700000123"), Some(day()));
    }

    #[test]
    fn test_date_of_rejects_other_ids() {
        assert_eq!(date_of("free-note"), None);
        assert_eq!(date_of("2025-10-06x"), None);
        assert_eq!(date_of("2025-13-40"), None);
        assert_eq!(date_of(""), None);
    }

    #[test]
    fn test_extract_title_strips_markup() {
        let content = json!("<h1>Algorithms week 3</h1><p>BFS and DFS</p>");
        assert_eq!(
            extract_title(&content).as_deref(),
            Some("Algorithms week 3")
        );
    }

    #[test]
    fn test_extract_title_skips_blank_lines() {
        let content = json!({"html": "<p>&nbsp;</p><p><br></p><p>  Team meeting </p>"});
        assert_eq!(extract_title(&content).as_deref(), Some("Team meeting"));
    }

    #[test]
    fn test_extract_title_truncates_by_chars() {
        let long = "가".repeat(100);
        let title = extract_title(&json!(long)).unwrap();
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_extract_title_ignores_drawings() {
        assert_eq!(extract_title(&json!({"layers": []})), None);
        assert_eq!(extract_title(&JsonValue::Null), None);
        assert_eq!(extract_title(&json!("<p></p>")), None);
    }

    #[test]
    fn test_default_title() {
        assert_eq!(default_title(Some("2025-10-06")), "2025-10-06 note");
        assert_eq!(default_title(None), "Untitled");
        assert_eq!(default_title(Some("")), "Untitled");
    }
}
