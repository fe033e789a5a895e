//! Cron schedules.
//!
//! Expressions use five fields (`min hour dom month dow`) or six with a
//! leading seconds field. Day-of-week numbers run from 1 (Sunday) to
//! 7 (Saturday); three-letter names are also accepted.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Occurrences sampled when checking the minimum interval.
const INTERVAL_SAMPLE: usize = 24;

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    normalized: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses a 5- or 6-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCronExpression` if the field count is wrong or any
    /// field fails to parse.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let normalized = match expression.split_whitespace().count() {
            5 => format!("0 {expression}"),
            6 => expression.to_string(),
            n => return Err(invalid(format!("expected 5 or 6 fields, got {n}"))),
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            normalized,
            schedule,
        })
    }

    /// The expression as written.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Checks that the schedule fires at all and never more often than
    /// `min_interval_secs`. Returns the first occurrence after `now`.
    ///
    /// # Errors
    ///
    /// Returns `CronNeverFires` or `CronTooFrequent`.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        min_interval_secs: i64,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let upcoming: Vec<DateTime<Utc>> =
            self.schedule.after(&now).take(INTERVAL_SAMPLE).collect();
        let first = *upcoming.first().ok_or_else(|| ScheduleError::CronNeverFires {
            expression: self.expression.clone(),
        })?;

        let shortest = upcoming
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_seconds())
            .min();
        if let Some(interval_secs) = shortest
            && interval_secs < min_interval_secs
        {
            return Err(ScheduleError::CronTooFrequent {
                expression: self.expression.clone(),
                interval_secs,
                min_interval_secs,
            });
        }

        Ok(first)
    }

    /// A short English rendering of the expression.
    #[must_use]
    pub fn describe(&self) -> String {
        let fields: Vec<&str> = self.normalized.split_whitespace().collect();
        let [second, minute, hour, dom, month, dow] = fields[..] else {
            return self.expression.clone();
        };

        let clock_time = is_number(minute) && is_number(hour);
        let mut text = if is_any(minute) && is_any(hour) {
            if is_any(second) { "every second" } else { "every minute" }.to_string()
        } else if let (Some(n), true) = (step(minute), is_any(hour)) {
            every(n, "minute")
        } else if is_number(minute) && is_any(hour) {
            format!("at minute {minute} past every hour")
        } else if let (true, Some(n)) = (is_number(minute), step(hour)) {
            format!("at minute {minute} past {}", every(n, "hour"))
        } else if clock_time && is_number(second) && second != "0" {
            format!("at {hour:0>2}:{minute:0>2}:{second:0>2}")
        } else if clock_time {
            format!("at {hour:0>2}:{minute:0>2}")
        } else {
            format!("at minute {minute} past hour {hour}")
        };

        if second != "0" && !clock_time && !(is_any(minute) && is_any(hour)) {
            text = format!("at second {second}, {text}");
        }

        if !is_any(dow) {
            text.push_str(" on ");
            text.push_str(&render_list(dow, day_name));
        }
        if !is_any(dom) {
            text.push_str(&format!(" on day {} of the month", render_list(dom, str::to_string)));
        }
        if !is_any(month) {
            text.push_str(" in ");
            text.push_str(&render_list(month, month_name));
        }
        if is_any(dow) && is_any(dom) && is_any(month) && clock_time {
            text.push_str(" every day");
        }

        capitalize(&text)
    }
}

fn is_any(field: &str) -> bool {
    field == "*" || field == "?"
}

fn every(n: &str, unit: &str) -> String {
    if n == "1" {
        format!("every {unit}")
    } else {
        format!("every {n} {unit}s")
    }
}

fn step(field: &str) -> Option<&str> {
    field.strip_prefix("*/").or_else(|| field.strip_prefix("0/"))
}

fn is_number(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

fn day_name(token: &str) -> String {
    if let Ok(n) = token.parse::<usize>()
        && (1..=7).contains(&n)
    {
        return DAY_NAMES[n - 1].to_string();
    }
    named(token, &DAY_NAMES)
}

fn month_name(token: &str) -> String {
    if let Ok(n) = token.parse::<usize>()
        && (1..=12).contains(&n)
    {
        return MONTH_NAMES[n - 1].to_string();
    }
    named(token, &MONTH_NAMES)
}

fn named(token: &str, names: &[&str]) -> String {
    names
        .iter()
        .find(|name| name[..3].eq_ignore_ascii_case(token))
        .map_or_else(|| token.to_string(), |name| (*name).to_string())
}

fn render_list(field: &str, name: impl Fn(&str) -> String) -> String {
    let items: Vec<String> = field
        .split(',')
        .map(|part| match part.split_once('-') {
            Some((from, to)) => format!("{} through {}", name(from), name(to)),
            None => name(part),
        })
        .collect();
    match items.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn five_field_expression_parses() {
        let schedule = CronSchedule::parse("*/5 * * * *").expect("valid");
        assert_eq!(schedule.expression(), "*/5 * * * *");
        assert_eq!(schedule.next_after(at(10, 2)), Some(at(10, 5)));
    }

    #[test]
    fn six_field_expression_has_seconds() {
        let schedule = CronSchedule::parse("30 0 9 * * *").expect("valid");
        let next = schedule.next_after(at(8, 0)).expect("fires");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 30).unwrap());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let err = CronSchedule::parse("invalid").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCronExpression { .. }));
        assert!(err.to_string().contains("expected 5 or 6 fields"));
    }

    #[test]
    fn bad_field_is_rejected() {
        let err = CronSchedule::parse("61 * * * *").unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCronExpression { .. }));
    }

    #[test]
    fn next_after_is_strictly_later() {
        let schedule = CronSchedule::parse("0 9 * * *").expect("valid");
        assert_eq!(
            schedule.next_after(at(9, 0)),
            Some(Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn validate_returns_first_occurrence() {
        let schedule = CronSchedule::parse("0 9 * * *").expect("valid");
        assert_eq!(schedule.validate(at(8, 0), 300), Ok(at(9, 0)));
    }

    #[test]
    fn frequent_schedule_is_rejected() {
        let schedule = CronSchedule::parse("* * * * *").expect("valid");
        assert_eq!(
            schedule.validate(at(8, 0), 300),
            Err(ScheduleError::CronTooFrequent {
                expression: "* * * * *".to_string(),
                interval_secs: 60,
                min_interval_secs: 300,
            })
        );
    }

    #[test]
    fn minimum_interval_is_inclusive() {
        let schedule = CronSchedule::parse("*/5 * * * *").expect("valid");
        assert!(schedule.validate(at(8, 0), 300).is_ok());
    }

    #[test]
    fn uneven_lists_use_the_shortest_gap() {
        let schedule = CronSchedule::parse("0,2 * * * *").expect("valid");
        assert!(matches!(
            schedule.validate(at(8, 0), 300),
            Err(ScheduleError::CronTooFrequent {
                interval_secs: 120,
                ..
            })
        ));
    }

    #[test]
    fn impossible_date_never_fires() {
        let schedule = CronSchedule::parse("0 0 30 2 *").expect("parses");
        assert_eq!(
            schedule.validate(at(8, 0), 300),
            Err(ScheduleError::CronNeverFires {
                expression: "0 0 30 2 *".to_string(),
            })
        );
    }

    #[test]
    fn descriptions() {
        let describe = |expr: &str| CronSchedule::parse(expr).expect("valid").describe();
        assert_eq!(describe("*/5 * * * *"), "Every 5 minutes");
        assert_eq!(describe("* * * * *"), "Every minute");
        assert_eq!(describe("0 9 * * *"), "At 09:00 every day");
        assert_eq!(describe("15 * * * *"), "At minute 15 past every hour");
        assert_eq!(describe("0 */6 * * *"), "At minute 0 past every 6 hours");
        assert_eq!(
            describe("30 8 * * 2-6"),
            "At 08:30 on Monday through Friday"
        );
        assert_eq!(describe("0 0 1 * *"), "At 00:00 on day 1 of the month");
        assert_eq!(describe("0 12 * 1,7 *"), "At 12:00 in January and July");
        assert_eq!(describe("0 9 * * 2,4,6"), "At 09:00 on Monday, Wednesday and Friday");
        assert_eq!(describe("45 0 9 * * *"), "At 09:00:45 every day");
    }
}
