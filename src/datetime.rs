//! Recognized date/time strings and their canonical storable form.
//!
//! A value is split into an optional date part and an optional time part
//! (either order, separated by a space or an ISO `T`), and each part must
//! match one of the accepted formats. Dates are read day-first. A date
//! without a time becomes midnight; a time without a date is placed on
//! today's date.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

/// Storable form for every datetime value written to a store.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy)]
enum DateShape {
    Full,
    NoDay,
    YearOnly,
}

const DATE_FORMATS: &[(&str, DateShape)] = &[
    ("%d-%m-%y", DateShape::Full),
    ("%d/%m/%y", DateShape::Full),
    ("%d.%m.%y", DateShape::Full),
    ("%d-%m-%Y", DateShape::Full),
    ("%d/%m/%Y", DateShape::Full),
    ("%d.%m.%Y", DateShape::Full),
    ("%Y-%m-%d", DateShape::Full),
    ("%Y/%m/%d", DateShape::Full),
    ("%Y", DateShape::YearOnly),
    ("%Y-%m", DateShape::NoDay),
    ("%Y-%b", DateShape::NoDay),
    ("%Y-%B", DateShape::NoDay),
    ("%m-%Y", DateShape::NoDay),
    ("%b-%Y", DateShape::NoDay),
    ("%B-%Y", DateShape::NoDay),
    ("%Y %b", DateShape::NoDay),
    ("%Y %B", DateShape::NoDay),
    ("%B %Y", DateShape::NoDay),
    ("%b %Y", DateShape::NoDay),
    ("%B %d, %Y", DateShape::Full),
    ("%b %d, %Y", DateShape::Full),
    ("%B %d %Y", DateShape::Full),
    ("%b %d %Y", DateShape::Full),
    ("%d %B, %Y", DateShape::Full),
    ("%d %b, %Y", DateShape::Full),
    ("%d %B %Y", DateShape::Full),
    ("%d %b %Y", DateShape::Full),
];

// (format, has minutes)
const TIME_FORMATS: &[(&str, bool)] = &[
    ("%I%p", false),
    ("%I:%M%p", true),
    ("%H:%M", true),
    ("%H:%M:%S", true),
    ("%H:%M:%S%.f", true),
];

#[derive(Debug, PartialEq, Eq)]
struct Parts<'a> {
    date: Option<&'a str>,
    time: Option<&'a str>,
}

pub fn is_datetime(value: &str) -> bool {
    parse_datetime(value).is_some()
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = trimmed
        .replace(" pm", "pm")
        .replace(" am", "am")
        .replace(" PM", "PM")
        .replace(" AM", "AM");
    let parts = split_parts(&cleaned)?;
    let date = match parts.date {
        Some(raw) => Some(parse_date_part(raw)?),
        None => None,
    };
    let time = match parts.time {
        Some(raw) => Some(parse_time_part(raw)?),
        None => None,
    };
    match (date, time) {
        (Some(date), Some(time)) => Some(NaiveDateTime::new(date, time)),
        (Some(date), None) => date.and_hms_opt(0, 0, 0),
        (None, Some(time)) => Some(NaiveDateTime::new(Local::now().date_naive(), time)),
        (None, None) => None,
    }
}

pub fn to_canonical(value: &NaiveDateTime) -> String {
    value.format(CANONICAL_FORMAT).to_string()
}

/// Parses and renders in one step; `None` when the value is not a usable
/// date/time string.
pub fn canonicalize(value: &str) -> Option<String> {
    parse_datetime(value).map(|dt| to_canonical(&dt))
}

fn looks_like_date(part: &str) -> bool {
    part.contains(['-', '/', '.', ',', ' '])
}

fn looks_like_time(part: &str) -> bool {
    let lowered = part.to_ascii_lowercase();
    part.contains(':') || lowered.contains("am") || lowered.contains("pm")
}

fn is_year(part: &str) -> bool {
    part.parse::<i32>()
        .is_ok_and(|year| (1..10_000).contains(&year))
}

fn split_parts(value: &str) -> Option<Parts<'_>> {
    let pieces: Vec<&str> = if value.matches('T').count() == 1 {
        value.splitn(2, 'T').collect()
    } else if value.contains(' ') {
        let first_is_time = value.split(' ').next().is_some_and(looks_like_time);
        let last_is_time = value.rsplit(' ').next().is_some_and(looks_like_time);
        if first_is_time {
            let (first, rest) = value.split_once(' ')?;
            vec![first, rest]
        } else if last_is_time {
            let (rest, last) = value.rsplit_once(' ')?;
            vec![rest, last]
        } else {
            vec![value]
        }
    } else {
        vec![value]
    };

    match pieces.as_slice() {
        [single] => {
            if is_year(single) || looks_like_date(single) {
                Some(Parts {
                    date: Some(single),
                    time: None,
                })
            } else if looks_like_time(single) {
                Some(Parts {
                    date: None,
                    time: Some(single),
                })
            } else {
                None
            }
        }
        [first, second] => {
            if looks_like_date(first) && looks_like_time(second) {
                Some(Parts {
                    date: Some(first),
                    time: Some(second),
                })
            } else if looks_like_date(second) && looks_like_time(first) {
                Some(Parts {
                    date: Some(second),
                    time: Some(first),
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_date_part(part: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|(fmt, shape)| match shape {
        DateShape::Full => NaiveDate::parse_from_str(part, fmt).ok(),
        DateShape::NoDay => {
            NaiveDate::parse_from_str(&format!("{part} 1"), &format!("{fmt} %d")).ok()
        }
        DateShape::YearOnly => {
            NaiveDate::parse_from_str(&format!("{part} 1 1"), &format!("{fmt} %m %d")).ok()
        }
    })
}

fn parse_time_part(part: &str) -> Option<NaiveTime> {
    TIME_FORMATS.iter().find_map(|(fmt, has_minutes)| {
        if *has_minutes {
            NaiveTime::parse_from_str(part, fmt).ok()
        } else {
            NaiveTime::parse_from_str(&format!("{part} 00"), &format!("{fmt} %M")).ok()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(value: &str) -> Option<String> {
        canonicalize(value)
    }

    #[test]
    fn iso_and_day_first_dates_become_midnight() {
        assert_eq!(canonical("2024-05-06").as_deref(), Some("2024-05-06 00:00:00"));
        assert_eq!(canonical("06/05/2024").as_deref(), Some("2024-05-06 00:00:00"));
        assert_eq!(canonical("6.5.24").as_deref(), Some("2024-05-06 00:00:00"));
        assert_eq!(canonical("2024/05/06").as_deref(), Some("2024-05-06 00:00:00"));
    }

    #[test]
    fn month_names_and_partial_dates_are_recognized() {
        assert_eq!(canonical("11 Feb 2010").as_deref(), Some("2010-02-11 00:00:00"));
        assert_eq!(
            canonical("February 11, 2010").as_deref(),
            Some("2010-02-11 00:00:00")
        );
        assert_eq!(canonical("Feb 2010").as_deref(), Some("2010-02-01 00:00:00"));
        assert_eq!(canonical("2015-08").as_deref(), Some("2015-08-01 00:00:00"));
        assert_eq!(canonical("2015").as_deref(), Some("2015-01-01 00:00:00"));
    }

    #[test]
    fn date_and_time_in_either_order() {
        assert_eq!(
            canonical("2011-04-14T23:33:05").as_deref(),
            Some("2011-04-14 23:33:05")
        );
        assert_eq!(
            canonical("21/12/2009 4pm").as_deref(),
            Some("2009-12-21 16:00:00")
        );
        assert_eq!(
            canonical("2:30 pm 21/12/2009").as_deref(),
            Some("2009-12-21 14:30:00")
        );
        assert_eq!(
            canonical("1 Feb 2009 14:30:15").as_deref(),
            Some("2009-02-01 14:30:15")
        );
    }

    #[test]
    fn time_only_uses_today() {
        let parsed = parse_datetime("14:30").expect("time parses");
        assert_eq!(parsed.date(), Local::now().date_naive());
        assert_eq!(parsed.time(), NaiveTime::from_hms_opt(14, 30, 0).unwrap());
    }

    #[test]
    fn rejects_text_and_malformed_values() {
        for value in ["", "   ", "abc", ".", "Test 123", "31/02/2024", "25:99", "Amsterdam"] {
            assert!(!is_datetime(value), "{value:?} should not be a datetime");
        }
    }

    #[test]
    fn split_prefers_leading_time_token() {
        assert_eq!(
            split_parts("4pm 2011/03/23"),
            Some(Parts {
                date: Some("2011/03/23"),
                time: Some("4pm"),
            })
        );
        assert_eq!(split_parts("hello"), None);
    }
}
