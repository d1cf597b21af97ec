//! Raw entry to [`Article`] mapping and publication-date handling.
//!
//! Articles keep the feed's date string untouched; everything here that
//! needs a point in time parses it on demand. Strings that carry an offset
//! or a zone abbreviation are read as written, strings without one are read
//! as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::article::Article;
use crate::fetcher::RawFeedEntry;
use crate::registry::FeedSource;

pub const UNKNOWN_DATE: &str = "Unknown date";

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S %z",
    "%a, %d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S %z",
    "%a %b %d %Y %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M",
    "%a %b %d %Y %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y", "%b %d, %Y", "%B %d, %Y"];

/// Zone abbreviations seen in the wild, with their offset in seconds.
const ZONES: &[(&str, i32)] = &[
    ("UT", 0),
    ("UTC", 0),
    ("GMT", 0),
    ("Z", 0),
    ("EST", -5 * 3600),
    ("EDT", -4 * 3600),
    ("CST", -6 * 3600),
    ("CDT", -5 * 3600),
    ("MST", -7 * 3600),
    ("MDT", -6 * 3600),
    ("PST", -8 * 3600),
    ("PDT", -7 * 3600),
    ("BST", 3600),
    ("CET", 3600),
    ("CEST", 2 * 3600),
    ("JST", 9 * 3600),
    ("AEST", 10 * 3600),
];

pub fn normalize(raw: &RawFeedEntry, source: &FeedSource, category: &str) -> Article {
    Article {
        title: raw.title.clone(),
        link: raw.link.clone(),
        description: raw.description.clone(),
        source: source.display_name.clone(),
        category: category.to_string(),
        published_at: raw.published.clone(),
        image_url: None,
    }
}

/// Parse a feed-supplied date string. `None` when no known shape matches.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    parse_any(raw).or_else(|| strip_weekday(raw).and_then(parse_any))
}

fn parse_any(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| parse_with_zone_abbreviation(raw))
        .or_else(|| parse_naive(raw).map(|naive| naive.and_utc()))
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn parse_with_zone_abbreviation(raw: &str) -> Option<DateTime<Utc>> {
    let (rest, zone) = raw.rsplit_once(char::is_whitespace)?;
    let seconds = ZONES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(zone))
        .map(|(_, seconds)| *seconds)?;

    let offset = FixedOffset::east_opt(seconds)?;
    let naive = parse_naive(rest.trim())?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drop a leading `Mon, ` style weekday, which some feeds get wrong.
fn strip_weekday(raw: &str) -> Option<&str> {
    let (day, rest) = raw.split_once(',')?;
    if day.len() >= 3 && day.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// Relative label for a feed date, measured against the current time.
pub fn time_ago(raw: &str) -> String {
    time_ago_at(raw, Utc::now())
}

/// Relative label for a feed date, measured against `now`.
///
/// More than six whole days old renders as a short date (`Dec 9`);
/// otherwise whole hours (`2h`), whole minutes (`30m`) or `just now`.
pub fn time_ago_at(raw: &str, now: DateTime<Utc>) -> String {
    let Some(published) = parse_published(raw) else {
        return UNKNOWN_DATE.to_string();
    };

    let elapsed = now.signed_duration_since(published);
    if elapsed.num_days() > 6 {
        return published.format("%b %-d").to_string();
    }

    let hours = elapsed.num_hours();
    let minutes = elapsed.num_minutes();
    if hours >= 1 {
        format!("{}h", hours)
    } else if minutes >= 1 {
        format!("{}m", minutes)
    } else {
        "just now".to_string()
    }
}
