//! Relative time expressions ("yesterday", "last week", "past 3 days").

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use sift_core::query::TimeRange;
use std::ops::Range;

use super::lexicon::Token;

/// A recognized expression and the tokens it covers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TimeExpression {
    pub range: TimeRange,
    pub tokens: Range<usize>,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
    TimeRange {
        start: Some(start),
        end: Some(end - Duration::seconds(1)),
    }
}

fn day(date: NaiveDate) -> TimeRange {
    bounded(midnight(date), midnight(date) + Duration::days(1))
}

fn week_of(date: NaiveDate) -> TimeRange {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    bounded(midnight(monday), midnight(monday) + Duration::days(7))
}

fn month_of(year: i32, month: u32) -> Option<TimeRange> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(bounded(midnight(first), midnight(next)))
}

fn shifted_month(date: NaiveDate, by: i32) -> Option<TimeRange> {
    let index = date.year() * 12 + date.month0() as i32 + by;
    month_of(index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn unit_range(now: DateTime<Utc>, offset: &str, unit: &str) -> Option<TimeRange> {
    let today = now.date_naive();
    let shift: i64 = match offset {
        "this" | "current" => 0,
        "last" | "previous" | "past" => -1,
        "next" | "coming" | "upcoming" => 1,
        _ => return None,
    };
    match unit {
        "week" => Some(week_of(today + Duration::weeks(shift))),
        "month" => shifted_month(today, shift as i32),
        "year" => month_of(today.year() + shift as i32, 1).map(|jan| TimeRange {
            start: jan.start,
            end: month_of(today.year() + shift as i32, 12).and_then(|dec| dec.end),
        }),
        _ => None,
    }
}

/// Find the first relative time expression in `tokens`, relative to `now`.
pub(crate) fn find(tokens: &[Token<'_>], now: DateTime<Utc>) -> Option<TimeExpression> {
    let today = now.date_naive();
    let words: Vec<&str> = tokens.iter().map(|t| t.lower.as_str()).collect();

    for i in 0..words.len() {
        let single = match words[i] {
            "today" => Some(day(today)),
            "yesterday" => Some(day(today - Duration::days(1))),
            "tomorrow" => Some(day(today + Duration::days(1))),
            _ => None,
        };
        if let Some(range) = single {
            return Some(TimeExpression { range, tokens: i..i + 1 });
        }

        let Some(next) = words.get(i + 1) else {
            continue;
        };
        if let Some(range) = unit_range(now, words[i], next) {
            return Some(TimeExpression { range, tokens: i..i + 2 });
        }

        // "last 3 days", "next 2 weeks"
        if let (Some(count), Some(unit)) = (tokens[i + 1].number(), words.get(i + 2)) {
            let count = i64::from(count);
            let span = match unit.trim_end_matches('s') {
                "day" => Duration::try_days(count),
                "week" => Duration::try_weeks(count),
                "hour" => Duration::try_hours(count),
                _ => continue,
            };
            // Spans past the representable range leave that side open.
            let range = match words[i] {
                "last" | "past" | "previous" => TimeRange {
                    start: span.and_then(|span| now.checked_sub_signed(span)),
                    end: Some(now),
                },
                "next" | "coming" | "upcoming" => TimeRange {
                    start: Some(now),
                    end: span.and_then(|span| now.checked_add_signed(span)),
                },
                _ => continue,
            };
            return Some(TimeExpression { range, tokens: i..i + 3 });
        }
    }
    None
}
