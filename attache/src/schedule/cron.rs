//! Five-field cron parsing and matching, plus the natural-language pre-parse.
//!
//! Fields: minute, hour, day-of-month, month, weekday. Each accepts `*`,
//! an integer, a range `a-b`, a list `a,b,c`, and a step `*/n`. Weekday 0 and
//! 7 both mean Sunday. Matching is done against a local-time projection in
//! the task's timezone (callers resolve the timezone; see `schedule::mod`).

use chrono::{Datelike, Timelike};

/// One parsed cron field.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Field {
    Any,
    Step(u32),
    Values(Vec<u32>),
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Step(n) => *n != 0 && value % n == 0,
            Field::Values(vs) => vs.contains(&value),
        }
    }
}

/// Parsed five-field cron expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    dom: Field,
    month: Field,
    dow: Field,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronParseError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid field `{0}`")]
    BadField(String),
    #[error("value {value} out of range for {field}")]
    OutOfRange { field: &'static str, value: u32 },
}

fn parse_field(
    raw: &str,
    name: &'static str,
    min: u32,
    max: u32,
    normalize: fn(u32) -> u32,
) -> Result<Field, CronParseError> {
    if raw == "*" {
        return Ok(Field::Any);
    }
    if let Some(step) = raw.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| CronParseError::BadField(raw.to_string()))?;
        if n == 0 {
            return Err(CronParseError::BadField(raw.to_string()));
        }
        return Ok(Field::Step(n));
    }
    let mut values = Vec::new();
    for part in raw.split(',') {
        if let Some((a, b)) = part.split_once('-') {
            let a: u32 = a
                .trim()
                .parse()
                .map_err(|_| CronParseError::BadField(raw.to_string()))?;
            let b: u32 = b
                .trim()
                .parse()
                .map_err(|_| CronParseError::BadField(raw.to_string()))?;
            if a > b {
                return Err(CronParseError::BadField(raw.to_string()));
            }
            for v in a..=b {
                values.push(normalize(v));
            }
        } else {
            let v: u32 = part
                .trim()
                .parse()
                .map_err(|_| CronParseError::BadField(raw.to_string()))?;
            values.push(normalize(v));
        }
    }
    for &v in &values {
        if v < min || v > max {
            return Err(CronParseError::OutOfRange { field: name, value: v });
        }
    }
    Ok(Field::Values(values))
}

impl CronExpr {
    /// Parses a five-field expression. Weekday 7 normalizes to 0 (Sunday).
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount(fields.len()));
        }
        let identity = |v: u32| v;
        let sunday7 = |v: u32| if v == 7 { 0 } else { v };
        Ok(Self {
            minute: parse_field(fields[0], "minute", 0, 59, identity)?,
            hour: parse_field(fields[1], "hour", 0, 23, identity)?,
            dom: parse_field(fields[2], "day-of-month", 1, 31, identity)?,
            month: parse_field(fields[3], "month", 1, 12, identity)?,
            dow: parse_field(fields[4], "weekday", 0, 6, sunday7)?,
        })
    }

    /// True when the projected local time matches all five fields.
    pub fn matches<T>(&self, local: &T) -> bool
    where
        T: Datelike + Timelike,
    {
        self.minute.matches(local.minute())
            && self.hour.matches(local.hour())
            && self.dom.matches(local.day())
            && self.month.matches(local.month())
            && self.dow.matches(local.weekday().num_days_from_sunday())
    }
}

/// Natural-language pre-parse applied before cron validation.
///
/// Recognizes a small bilingual (EN/ES) set; anything unrecognized passes
/// through unchanged and will simply fail [`CronExpr::parse`] later, so the
/// task never fires and no error is raised.
pub fn preparse_natural(input: &str) -> String {
    let text = input.trim().to_lowercase();

    // "every N minutes" / "cada N minutos"
    if let Some(n) = capture_after(&text, &["every ", "cada "], &[" minutes", " minutos", " min"]) {
        if let Ok(n) = n.trim().parse::<u32>() {
            if n > 0 {
                return format!("*/{n} * * * *");
            }
        }
    }

    // "every hour" / "cada hora"
    if text == "every hour" || text == "cada hora" {
        return "0 * * * *".to_string();
    }

    // "every day at HH:MM" / "todos los días a las HH:MM" / "cada día a las HH:MM"
    for prefix in ["every day at ", "todos los días a las ", "cada día a las ", "diario a las "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            if let Some((h, m)) = parse_clock(rest) {
                return format!("{m} {h} * * *");
            }
        }
    }

    // "<weekday> at HH:MM" (optionally "every "/"el "/"los " prefixed)
    let bare = text
        .trim_start_matches("every ")
        .trim_start_matches("los ")
        .trim_start_matches("el ");
    for (names, dow) in WEEKDAYS {
        for name in *names {
            for sep in [" at ", " a las "] {
                if let Some(rest) = bare.strip_prefix(&format!("{name}{sep}")) {
                    if let Some((h, m)) = parse_clock(rest) {
                        return format!("{m} {h} * * {dow}");
                    }
                }
            }
        }
    }

    input.trim().to_string()
}

const WEEKDAYS: &[(&[&str], u32)] = &[
    (&["sunday", "domingo"], 0),
    (&["monday", "lunes"], 1),
    (&["tuesday", "martes"], 2),
    (&["wednesday", "miércoles", "miercoles"], 3),
    (&["thursday", "jueves"], 4),
    (&["friday", "viernes"], 5),
    (&["saturday", "sábado", "sabado"], 6),
];

fn capture_after(text: &str, prefixes: &[&str], suffixes: &[&str]) -> Option<String> {
    for p in prefixes {
        if let Some(rest) = text.strip_prefix(p) {
            for s in suffixes {
                if let Some(mid) = rest.strip_suffix(s) {
                    return Some(mid.to_string());
                }
            }
        }
    }
    None
}

/// Parses `HH:MM` or a bare hour `HH` into (hour, minute).
fn parse_clock(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    let (h, m) = match s.split_once(':') {
        Some((h, m)) => (h.parse().ok()?, m.parse().ok()?),
        None => (s.parse().ok()?, 0),
    };
    if h > 23 || m > 59 {
        return None;
    }
    Some((h, m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn parse_and_match_daily() {
        let c = CronExpr::parse("0 14 * * *").unwrap();
        assert!(c.matches(&at(2025, 3, 10, 14, 0)));
        assert!(!c.matches(&at(2025, 3, 10, 14, 1)));
        assert!(!c.matches(&at(2025, 3, 10, 15, 0)));
    }

    #[test]
    fn parse_and_match_weekday() {
        // 2025-03-10 is a Monday
        let c = CronExpr::parse("0 9 * * 1").unwrap();
        assert!(c.matches(&at(2025, 3, 10, 9, 0)));
        assert!(!c.matches(&at(2025, 3, 11, 9, 0)));
    }

    #[test]
    fn sunday_accepts_7() {
        let c = CronExpr::parse("0 9 * * 7").unwrap();
        // 2025-03-09 is a Sunday
        assert!(c.matches(&at(2025, 3, 9, 9, 0)));
    }

    #[test]
    fn steps_ranges_lists() {
        let c = CronExpr::parse("*/15 8-10 1,15 * *").unwrap();
        assert!(c.matches(&at(2025, 6, 1, 8, 0)));
        assert!(c.matches(&at(2025, 6, 15, 10, 45)));
        assert!(!c.matches(&at(2025, 6, 2, 9, 15)));
        assert!(!c.matches(&at(2025, 6, 1, 11, 0)));
    }

    #[test]
    fn invalid_expressions_rejected() {
        assert!(CronExpr::parse("0 14 * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("wake me at nine").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn preparse_examples() {
        assert_eq!(preparse_natural("every day at 14:00"), "0 14 * * *");
        assert_eq!(preparse_natural("monday at 9:00"), "0 9 * * 1");
        assert_eq!(preparse_natural("every 5 minutes"), "*/5 * * * *");
        assert_eq!(preparse_natural("cada 10 minutos"), "*/10 * * * *");
        assert_eq!(preparse_natural("todos los días a las 8:30"), "30 8 * * *");
        assert_eq!(preparse_natural("every hour"), "0 * * * *");
    }

    #[test]
    fn preparse_passthrough_keeps_literal() {
        assert_eq!(preparse_natural("0 14 * * *"), "0 14 * * *");
        assert_eq!(preparse_natural("whenever you like"), "whenever you like");
    }
}
