//! Cron Expression Parsing
//!
//! Minimum viable five-field cron subset: discrete values, comma lists,
//! and `*` for minute / hour / day-of-month / month / day-of-week.
//! Standard rule: when both day-of-month and day-of-week are restricted,
//! either may match.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// One cron field: unrestricted or a set of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(Vec<u32>),
}

impl CronField {
    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.contains(&value),
        }
    }

    fn is_any(&self) -> bool {
        matches!(self, CronField::Any)
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    /// Parse `minute hour day-of-month month day-of-week`.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "cron expression must have 5 fields, got {}",
                fields.len()
            ));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59, "minute")?,
            hour: parse_field(fields[1], 0, 23, "hour")?,
            day_of_month: parse_field(fields[2], 1, 31, "day-of-month")?,
            month: parse_field(fields[3], 1, 12, "month")?,
            day_of_week: parse_field(fields[4], 0, 6, "day-of-week")?,
        })
    }

    /// Whether the instant (truncated to the minute) matches.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minute.matches(t.minute())
            || !self.hour.matches(t.hour())
            || !self.month.matches(t.month())
        {
            return false;
        }

        let dom_ok = self.day_of_month.matches(t.day());
        let dow_ok = self.day_of_week.matches(t.weekday().num_days_from_sunday());
        match (self.day_of_month.is_any(), self.day_of_week.is_any()) {
            // Both restricted: either may match
            (false, false) => dom_ok || dow_ok,
            _ => dom_ok && dow_ok,
        }
    }

    /// First matching instant strictly after `t`, at minute granularity.
    ///
    /// Scans up to one year ahead; a parseable expression always matches
    /// within that window.
    pub fn next_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let mut candidate = truncate_to_minute(t) + Duration::minutes(1);
        let limit = candidate + Duration::days(366);
        while candidate < limit {
            if self.matches(candidate) {
                return candidate;
            }
            candidate += Duration::minutes(1);
        }
        candidate
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(i64::from(t.second())) - Duration::nanoseconds(i64::from(t.nanosecond()))
}

fn parse_field(raw: &str, min: u32, max: u32, name: &str) -> Result<CronField, String> {
    if raw == "*" {
        return Ok(CronField::Any);
    }

    let mut values = Vec::new();
    for part in raw.split(',') {
        let value: u32 = part
            .parse()
            .map_err(|_| format!("invalid {name} value '{part}'"))?;
        if value < min || value > max {
            return Err(format!("{name} value {value} out of range {min}..={max}"));
        }
        if !values.contains(&value) {
            values.push(value);
        }
    }
    if values.is_empty() {
        return Err(format!("empty {name} field"));
    }
    Ok(CronField::Values(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!(CronSchedule::parse("0 3 * *").is_err());
        assert!(CronSchedule::parse("0 3 * * * *").is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 7").is_err());
    }

    #[test]
    fn test_default_daily_three_am() {
        let cron = CronSchedule::parse("0 3 * * *").unwrap();
        assert!(cron.matches(at(2026, 8, 1, 3, 0)));
        assert!(!cron.matches(at(2026, 8, 1, 3, 1)));
        assert!(!cron.matches(at(2026, 8, 1, 4, 0)));
    }

    #[test]
    fn test_next_after_daily() {
        let cron = CronSchedule::parse("0 3 * * *").unwrap();
        let next = cron.next_after(at(2026, 8, 1, 2, 30));
        assert_eq!(next, at(2026, 8, 1, 3, 0));

        let next = cron.next_after(at(2026, 8, 1, 3, 0));
        assert_eq!(next, at(2026, 8, 2, 3, 0));
    }

    #[test]
    fn test_comma_lists() {
        let cron = CronSchedule::parse("0,30 9,17 * * *").unwrap();
        assert!(cron.matches(at(2026, 8, 1, 9, 0)));
        assert!(cron.matches(at(2026, 8, 1, 17, 30)));
        assert!(!cron.matches(at(2026, 8, 1, 12, 0)));
    }

    #[test]
    fn test_day_of_week() {
        // 2026-08-02 is a Sunday
        let cron = CronSchedule::parse("0 3 * * 0").unwrap();
        assert!(cron.matches(at(2026, 8, 2, 3, 0)));
        assert!(!cron.matches(at(2026, 8, 3, 3, 0)));
    }

    #[test]
    fn test_dom_dow_either_matches_when_both_restricted() {
        // Day 15 of month OR Sunday
        let cron = CronSchedule::parse("0 3 15 * 0").unwrap();
        assert!(cron.matches(at(2026, 8, 15, 3, 0))); // a Saturday, dom matches
        assert!(cron.matches(at(2026, 8, 2, 3, 0))); // a Sunday, dow matches
        assert!(!cron.matches(at(2026, 8, 3, 3, 0))); // Monday the 3rd
    }

    #[test]
    fn test_every_minute() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        let next = cron.next_after(at(2026, 8, 1, 12, 0));
        assert_eq!(next, at(2026, 8, 1, 12, 1));
    }
}
