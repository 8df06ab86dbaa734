//! Schedule gating: when is the next run of a CronJob due.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;
use kron_core::{Error, Result};

/// Upper bound on missed start times scanned when catching up.
pub const MAX_MISSED_RUNS: usize = 100;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Start at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::Release);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: TimeDelta) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::Acquire)).unwrap_or_default()
    }
}

/// Day-of-week names in standard cron order: 0 and 7 are Sunday.
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parse a cron expression.
///
/// Five fields are standard cron (minute first, day-of-week 0-7 with Sunday
/// as 0 or 7). They get a seconds field and their numeric weekdays are
/// rewritten as names. Six or seven fields are passed to `cron` as they are.
///
/// # Errors
///
/// Returns [`Error::Invalid`] for a malformed expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().collect::<Vec<_>>();
    let normalized = match fields.as_slice() {
        [minute, hour, day, month, weekday] => format!(
            "0 {minute} {hour} {day} {month} {}",
            weekday_names(weekday).map_err(|reason| {
                Error::invalid(format!("invalid schedule {expr:?}: {reason}"))
            })?
        ),
        _ => fields.join(" "),
    };
    Schedule::from_str(&normalized)
        .map_err(|e| Error::invalid(format!("invalid schedule {expr:?}: {e}")))
}

/// Rewrite a standard day-of-week field as a list of day names.
///
/// Items that already use names, `*` and `?` are kept. Numeric items,
/// ranges and steps are expanded.
fn weekday_names(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut items = Vec::new();
    let mut days = BTreeSet::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            items.push(item.to_string());
            continue;
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (
                range,
                step.parse::<usize>()
                    .map_err(|_| format!("bad step {step:?}"))?,
            ),
            None => (item, 1),
        };
        if step == 0 {
            return Err(format!("zero step in {item:?}"));
        }
        let (first, last) = match (range, range.split_once('-')) {
            ("*", _) => (0, 6),
            (_, Some((first, last))) => (weekday_number(first)?, weekday_number(last)?),
            (single, None) if item.contains('/') => {
                let first = weekday_number(single)?;
                (first, first.max(6))
            }
            (single, None) => {
                let day = weekday_number(single)?;
                (day, day)
            }
        };
        if first > last {
            return Err(format!("descending range {item:?}"));
        }
        days.extend((first..=last).step_by(step).map(|day| day % 7));
    }

    items.extend(
        days.into_iter()
            .filter_map(|day| WEEKDAYS.get(day))
            .map(ToString::to_string),
    );
    Ok(items.join(","))
}

fn weekday_number(value: &str) -> std::result::Result<usize, String> {
    value
        .parse::<usize>()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("day-of-week {value:?} is not in 0-7"))
}

/// When the next run is due.
///
/// - never run before: due `now`
/// - the first tick after `last_run` is in the future: that tick
/// - ticks were missed: the most recent tick at or before `now`, so missed
///   runs collapse into one
/// - the schedule has no tick after `last_run`: `None`
///
/// # Errors
///
/// Returns [`Error::Invalid`] for a malformed schedule.
pub fn next_run(
    schedule: &str,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let schedule = parse_schedule(schedule)?;
    let Some(last_run) = last_run else {
        return Ok(Some(now));
    };

    let mut ticks = schedule.after(&last_run);
    let Some(first) = ticks.next() else {
        return Ok(None);
    };
    if first > now {
        return Ok(Some(first));
    }

    let latest = ticks
        .take_while(|tick| *tick <= now)
        .take(MAX_MISSED_RUNS)
        .last();
    Ok(Some(latest.unwrap_or(first)))
}

/// Time from `now` until `at`, zero if `at` has passed.
pub fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    at.signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
