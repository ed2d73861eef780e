use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

use crate::models::template::{DelayKind, Interval, NotificationConfig};

/// Cadence portion of a notification configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalSpec {
    pub interval: Interval,
    pub weekday: Option<Weekday>,
    /// 1..=31; 31 means "last day of the month" regardless of length.
    pub month_date: Option<u32>,
    pub time_of_day: Option<NaiveTime>,
}

impl IntervalSpec {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            interval: config.notify_interval,
            weekday: config.weekday.and_then(weekday_from_iso),
            month_date: config.month_date.map(u32::from),
            time_of_day: config.time_of_day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySpec {
    pub kind: DelayKind,
    pub duration_secs: i64,
}

impl DelaySpec {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            kind: config.delay,
            duration_secs: config.delay_duration_secs,
        }
    }
}

pub fn weekday_from_iso(n: u8) -> Option<Weekday> {
    match n {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Compute the next due timestamp. Deterministic given its inputs; `now` is
/// only consulted when neither `last_run` nor `expected` pins the base.
///
/// Source precedence for delays: an explicitly supplied `expected` time
/// always wins; the external `anchor` is only consulted when no expected
/// time was given. The two never combine.
pub fn next_run(
    spec: &IntervalSpec,
    last_run: Option<DateTime<Utc>>,
    expected: Option<DateTime<Utc>>,
    delay: &DelaySpec,
    anchor: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let interval_time = match spec.interval {
        Interval::Once => expected.unwrap_or(now),
        Interval::Daily => {
            let base = last_run.unwrap_or(now) + Duration::days(1);
            at_time(base, spec.time_of_day)
        }
        Interval::Weekly => {
            let base = last_run.unwrap_or(now);
            let target = spec.weekday.unwrap_or_else(|| base.weekday());
            // strictly after the base: "next Monday", never same-day
            let ahead = days_until(base.weekday(), target);
            at_time(base + Duration::days(ahead), spec.time_of_day)
        }
        Interval::Monthly => {
            let base = last_run.unwrap_or(now);
            let date = match spec.month_date {
                Some(31) => last_day_of_next_month(base.date_naive()),
                Some(d) => {
                    first_of_next_month(base.date_naive()) + Duration::days(i64::from(d) - 1)
                }
                None => first_of_next_month(base.date_naive()),
            };
            let time = spec.time_of_day.unwrap_or_else(|| base.time());
            Utc.from_utc_datetime(&date.and_time(time))
        }
    };

    match delay.kind {
        DelayKind::None => interval_time,
        DelayKind::After => {
            delay_base(interval_time, expected, anchor) + Duration::seconds(delay.duration_secs)
        }
        DelayKind::Before => {
            delay_base(interval_time, expected, anchor) - Duration::seconds(delay.duration_secs)
        }
    }
}

fn delay_base(
    interval_time: DateTime<Utc>,
    expected: Option<DateTime<Utc>>,
    anchor: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    if expected.is_none() {
        if let Some(a) = anchor {
            return a;
        }
    }
    interval_time
}

fn at_time(dt: DateTime<Utc>, time_of_day: Option<NaiveTime>) -> DateTime<Utc> {
    match time_of_day {
        Some(t) => Utc.from_utc_datetime(&dt.date_naive().and_time(t)),
        None => dt,
    }
}

fn days_until(from: Weekday, to: Weekday) -> i64 {
    let diff = (to.num_days_from_monday() as i64 - from.num_days_from_monday() as i64)
        .rem_euclid(7);
    if diff == 0 {
        7
    } else {
        diff
    }
}

fn first_of_next_month(d: NaiveDate) -> NaiveDate {
    let (y, m) = if d.month() == 12 {
        (d.year() + 1, 1)
    } else {
        (d.year(), d.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(d)
}

fn last_day_of_next_month(d: NaiveDate) -> NaiveDate {
    first_of_next_month(first_of_next_month(d)) - Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn tod(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn spec(interval: Interval) -> IntervalSpec {
        IntervalSpec {
            interval,
            weekday: None,
            month_date: None,
            time_of_day: None,
        }
    }

    const NO_DELAY: DelaySpec = DelaySpec {
        kind: DelayKind::None,
        duration_secs: 0,
    };

    #[test]
    fn once_uses_expected_then_now() {
        let now = utc(2024, 5, 10, 12, 0);
        let expected = utc(2024, 5, 12, 9, 0);
        assert_eq!(
            next_run(&spec(Interval::Once), None, Some(expected), &NO_DELAY, None, now),
            expected
        );
        assert_eq!(
            next_run(&spec(Interval::Once), None, None, &NO_DELAY, None, now),
            now
        );
    }

    #[test]
    fn daily_adds_one_day_at_configured_time() {
        let mut s = spec(Interval::Daily);
        s.time_of_day = Some(tod(8, 30));
        let last = utc(2024, 5, 10, 14, 45);
        assert_eq!(
            next_run(&s, Some(last), None, &NO_DELAY, None, utc(2024, 5, 10, 15, 0)),
            utc(2024, 5, 11, 8, 30)
        );
    }

    #[test]
    fn weekly_never_lands_same_day() {
        let mut s = spec(Interval::Weekly);
        s.weekday = Some(Weekday::Mon);
        s.time_of_day = Some(tod(9, 0));
        // 2024-05-06 is a Monday: next occurrence is the following Monday
        let last = utc(2024, 5, 6, 9, 0);
        assert_eq!(
            next_run(&s, Some(last), None, &NO_DELAY, None, last),
            utc(2024, 5, 13, 9, 0)
        );
        // from a Friday, the coming Monday
        let friday = utc(2024, 5, 10, 18, 0);
        assert_eq!(
            next_run(&s, Some(friday), None, &NO_DELAY, None, friday),
            utc(2024, 5, 13, 9, 0)
        );
    }

    #[test]
    fn monthly_regular_date() {
        let mut s = spec(Interval::Monthly);
        s.month_date = Some(15);
        s.time_of_day = Some(tod(7, 0));
        let last = utc(2024, 5, 20, 7, 0);
        assert_eq!(
            next_run(&s, Some(last), None, &NO_DELAY, None, last),
            utc(2024, 6, 15, 7, 0)
        );
    }

    #[test]
    fn monthly_day31_clamps_to_month_end() {
        let mut s = spec(Interval::Monthly);
        s.month_date = Some(31);
        s.time_of_day = Some(tod(7, 0));
        // next month has 30 days: resolves to day 30, no rollover
        let last = utc(2024, 3, 31, 7, 0);
        assert_eq!(
            next_run(&s, Some(last), None, &NO_DELAY, None, last),
            utc(2024, 4, 30, 7, 0)
        );
        // and February (leap year)
        let last = utc(2024, 1, 31, 7, 0);
        assert_eq!(
            next_run(&s, Some(last), None, &NO_DELAY, None, last),
            utc(2024, 2, 29, 7, 0)
        );
    }

    #[test]
    fn monthly_december_rolls_into_next_year() {
        let mut s = spec(Interval::Monthly);
        s.month_date = Some(1);
        s.time_of_day = Some(tod(6, 0));
        let last = utc(2024, 12, 5, 6, 0);
        assert_eq!(
            next_run(&s, Some(last), None, &NO_DELAY, None, last),
            utc(2025, 1, 1, 6, 0)
        );
    }

    #[test]
    fn delay_after_prefers_anchor_when_no_expected() {
        let now = utc(2024, 5, 10, 12, 0);
        let anchor = utc(2024, 5, 20, 10, 0);
        let delay = DelaySpec {
            kind: DelayKind::After,
            duration_secs: 3600,
        };
        assert_eq!(
            next_run(&spec(Interval::Once), None, None, &delay, Some(anchor), now),
            anchor + Duration::seconds(3600)
        );
    }

    #[test]
    fn explicit_expected_beats_anchor() {
        let now = utc(2024, 5, 10, 12, 0);
        let expected = utc(2024, 5, 15, 9, 0);
        let anchor = utc(2024, 5, 20, 10, 0);
        let delay = DelaySpec {
            kind: DelayKind::Before,
            duration_secs: 1800,
        };
        assert_eq!(
            next_run(&spec(Interval::Once), None, Some(expected), &delay, Some(anchor), now),
            expected - Duration::seconds(1800)
        );
    }

    #[test]
    fn delay_before_subtracts_from_anchor() {
        let now = utc(2024, 5, 10, 12, 0);
        let anchor = utc(2024, 5, 20, 10, 0);
        let delay = DelaySpec {
            kind: DelayKind::Before,
            duration_secs: 86_400,
        };
        assert_eq!(
            next_run(&spec(Interval::Once), None, None, &delay, Some(anchor), now),
            utc(2024, 5, 19, 10, 0)
        );
    }

    #[test]
    fn delay_without_anchor_applies_to_interval_result() {
        let mut s = spec(Interval::Daily);
        s.time_of_day = Some(tod(8, 0));
        let last = utc(2024, 5, 10, 8, 0);
        let delay = DelaySpec {
            kind: DelayKind::After,
            duration_secs: 600,
        };
        assert_eq!(
            next_run(&s, Some(last), None, &delay, None, last),
            utc(2024, 5, 11, 8, 10)
        );
    }
}
