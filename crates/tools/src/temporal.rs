//! Deterministic resolution of relative time phrases.
//!
//! Phrases are anchored to a caller-supplied "now" so the same input and
//! anchor always produce the same instant. Day words shift the date, day-part
//! words pick the hour (noon when absent); minutes and seconds are zero.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone,
    Utc,
};

/// Day words and their offset in days. Longer phrases come first.
const DAY_WORDS: &[(&str, i64)] = &[
    ("前天", -2),
    ("昨天", -1),
    ("明天", 1),
    ("后天", 2),
    ("今天", 0),
    ("今晚", 0),
    ("day before yesterday", -2),
    ("day after tomorrow", 2),
    ("yesterday", -1),
    ("tomorrow", 1),
    ("today", 0),
    ("tonight", 0),
];

/// Day-part words and their hour. `afternoon` precedes `noon`.
const DAY_PARTS: &[(&str, u32)] = &[
    ("凌晨", 2),
    ("早上", 8),
    ("清晨", 8),
    ("上午", 8),
    ("中午", 12),
    ("下午", 15),
    ("傍晚", 18),
    ("晚上", 20),
    ("今晚", 20),
    ("afternoon", 15),
    ("morning", 8),
    ("noon", 12),
    ("evening", 18),
    ("tonight", 20),
    ("night", 20),
];

const DEFAULT_HOUR: u32 = 12;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Returns whether `text` contains a relative day or day-part phrase.
pub fn mentions_relative_time(text: &str) -> bool {
    let lowered = text.to_lowercase();
    DAY_WORDS.iter().any(|(w, _)| lowered.contains(w))
        || DAY_PARTS.iter().any(|(w, _)| lowered.contains(w))
}

/// Parses an absolute timestamp. Inputs without an offset are read in `offset`.
pub fn parse_absolute(text: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return offset.from_local_datetime(&naive).single();
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    offset.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).single()
}

/// Returns whether `text` is already an absolute timestamp.
pub fn is_absolute(text: &str) -> bool {
    parse_absolute(text, Utc.fix()).is_some()
}

/// Resolves a relative phrase against `now`. `None` when no phrase is present.
pub fn resolve_relative(text: &str, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let lowered = text.to_lowercase();
    let shift = DAY_WORDS
        .iter()
        .find(|(w, _)| lowered.contains(w))
        .map(|(_, d)| *d);
    let hour = DAY_PARTS
        .iter()
        .find(|(w, _)| lowered.contains(w))
        .map(|(_, h)| *h);
    if shift.is_none() && hour.is_none() {
        return None;
    }

    let date = now.date_naive() + Duration::days(shift.unwrap_or(0));
    let naive = date.and_hms_opt(hour.unwrap_or(DEFAULT_HOUR), 0, 0)?;
    now.offset().from_local_datetime(&naive).single()
}

/// Absolute input wins; otherwise relative phrases are resolved against `now`.
pub fn resolve(text: &str, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    parse_absolute(text, *now.offset()).or_else(|| resolve_relative(text, now))
}

/// Canonical wire format for resolved timestamps (RFC 3339, seconds precision).
pub fn format_timestamp(dt: DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}
