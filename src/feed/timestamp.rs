//! Publish-date resolution for feed items.
//!
//! RSS feeds in the wild use several date conventions. [`resolve`] tries a
//! fixed list of layouts in order and returns the first instant that parses.
//! An unresolvable date is not an error: the caller stores the post with no
//! publish date.

use chrono::{DateTime, FixedOffset, NaiveDateTime};

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A date-time layout accepted by [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLayout {
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// `02 Jan 06 15:04 -0700`
    Rfc822Z,
    /// `02 Jan 06 15:04 MST`
    Rfc822,
    /// `2006-01-02T15:04:05Z07:00`
    Rfc3339,
}

/// Layouts in precedence order. Changing the order changes which instant an
/// ambiguous date resolves to.
pub const LAYOUTS: [DateLayout; 5] = [
    DateLayout::Rfc1123Z,
    DateLayout::Rfc1123,
    DateLayout::Rfc822Z,
    DateLayout::Rfc822,
    DateLayout::Rfc3339,
];

impl DateLayout {
    pub fn name(self) -> &'static str {
        match self {
            DateLayout::Rfc1123Z => "RFC1123Z",
            DateLayout::Rfc1123 => "RFC1123",
            DateLayout::Rfc822Z => "RFC822Z",
            DateLayout::Rfc822 => "RFC822",
            DateLayout::Rfc3339 => "RFC3339",
        }
    }

    /// Parse `raw` under this layout only.
    pub fn parse(self, raw: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            DateLayout::Rfc1123Z => {
                let rest = strip_weekday(raw)?;
                has_shape(rest, 4, true, true)
                    .then(|| DateTime::parse_from_str(rest, "%d %b %Y %H:%M:%S %z").ok())
                    .flatten()
            }
            DateLayout::Rfc1123 => {
                let rest = strip_weekday(raw)?;
                has_shape(rest, 4, true, false)
                    .then(|| parse_with_abbreviation(rest, "%d %b %Y %H:%M:%S"))
                    .flatten()
            }
            DateLayout::Rfc822Z => has_shape(raw, 2, false, true)
                .then(|| DateTime::parse_from_str(raw, "%d %b %y %H:%M %z").ok())
                .flatten(),
            DateLayout::Rfc822 => has_shape(raw, 2, false, false)
                .then(|| parse_with_abbreviation(raw, "%d %b %y %H:%M"))
                .flatten(),
            DateLayout::Rfc3339 => DateTime::parse_from_rfc3339(raw).ok(),
        }
    }
}

/// Field widths chrono does not enforce on its own: a two-digit day, a
/// fixed-width year, two-digit minutes and seconds and a `-0700` style
/// offset. Fields are separated by exactly one space.
fn has_shape(raw: &str, year_digits: usize, with_seconds: bool, numeric_zone: bool) -> bool {
    let fields: Vec<&str> = raw.split(' ').collect();
    let [day, _month, year, time, zone] = fields.as_slice() else {
        return false;
    };

    let clock: Vec<&str> = time.split(':').collect();
    let clock_ok = match clock.as_slice() {
        [h, m, s] if with_seconds => {
            is_digits(h, 1..=2) && is_digits(m, 2..=2) && is_digits(s, 2..=2)
        }
        [h, m] if !with_seconds => is_digits(h, 1..=2) && is_digits(m, 2..=2),
        _ => false,
    };
    let zone_ok = !numeric_zone
        || (zone.len() == 5
            && matches!(zone.as_bytes()[0], b'+' | b'-')
            && is_digits(&zone[1..], 4..=4));

    is_digits(day, 2..=2) && is_digits(year, year_digits..=year_digits) && clock_ok && zone_ok
}

fn is_digits(s: &str, len: std::ops::RangeInclusive<usize>) -> bool {
    len.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve a raw publish-date string to an instant.
///
/// Returns `None` when the string is empty or matches none of [`LAYOUTS`].
pub fn resolve(raw: &str) -> Option<DateTime<FixedOffset>> {
    resolve_with_layout(raw).map(|(instant, _)| instant)
}

/// Like [`resolve`], also reporting which layout matched.
pub fn resolve_with_layout(raw: &str) -> Option<(DateTime<FixedOffset>, DateLayout)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(raw).map(|instant| (instant, *layout)))
}

/// Drop a leading `"Mon, "`. The weekday name is not checked against the date.
fn strip_weekday(raw: &str) -> Option<&str> {
    let (day, rest) = raw.split_once(", ")?;
    WEEKDAYS
        .iter()
        .any(|w| w.eq_ignore_ascii_case(day))
        .then_some(rest)
}

/// Parse a date ending in a zone abbreviation such as `GMT` or `EST`.
///
/// Abbreviations carry no reliable offset, so every one of them resolves to
/// UTC.
fn parse_with_abbreviation(raw: &str, format: &str) -> Option<DateTime<FixedOffset>> {
    let (datetime, zone) = raw.rsplit_once(' ')?;
    if !is_zone_abbreviation(zone) {
        return None;
    }
    NaiveDateTime::parse_from_str(datetime, format)
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Three upper-case letters (`UTC`, `PST`), or four/five ending in `T` (`AEST`, `ACWST`).
fn is_zone_abbreviation(zone: &str) -> bool {
    if !zone.bytes().all(|b| b.is_ascii_uppercase()) {
        return false;
    }
    match zone.len() {
        3 => true,
        4 | 5 => zone.ends_with('T'),
        _ => false,
    }
}
