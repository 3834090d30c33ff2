//! Pure expiry calculation.
//!
//! Given a timer and a reference instant, computes the next wall-clock
//! instant at which the timer must fire. The calculator never reads clocks,
//! the store, or any global state; all time inputs arrive as arguments.

use crate::errors::ScheduleError;
use crate::schema::Timer;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::borrow::Cow;
use std::str::FromStr;

/// Computes the next firing instant for `timer`.
///
/// A stored `expires_at` still in the future round-trips verbatim, so an
/// absolute alarm carries its caller-supplied instant through unchanged.
/// Once that instant has passed, the next occurrence is derived from the
/// timer's schedule:
///
/// - A duration timer that has never fired expires at
///   `inserted_at + duration`, no matter how late the calculation runs.
/// - An interval timer expires at the first anchor-aligned instant strictly
///   after `now`, where the anchor is `inserted_at` plus the lead-in.
/// - A cron timer expires at the next run of its expression, evaluated in
///   the timer's time zone and converted back to UTC. `0 17 * * *` in
///   Europe/Berlin fires at 17:00 local time on both sides of a DST
///   switch.
///
/// With `skip_if_offline` disabled the wall clock is ignored entirely: the
/// next occurrence is computed relative to the previous one (or to
/// `inserted_at` for a fresh timer), so occurrences missed during downtime
/// fire one after another until the schedule has caught up.
pub fn next_expiry(timer: &Timer, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    if let Some(at) = timer.expires_at {
        if at > now {
            return Ok(at);
        }
    }

    if !timer.skip_if_offline {
        let reference = timer.expires_at.unwrap_or(timer.inserted_at);
        let caught_up = Timer {
            skip_if_offline: true,
            ..timer.clone()
        };
        return next_expiry(&caught_up, reference);
    }

    if timer.calls == 0 {
        if let Some(duration) = timer.duration {
            return Ok(timer.inserted_at + Duration::milliseconds(duration));
        }
    }

    if let Some(interval) = timer.interval {
        return next_interval(timer, interval, now);
    }

    if let Some(expression) = timer.crontab.as_deref() {
        return next_crontab(expression, timer.crontab_timezone.as_deref(), now);
    }

    // An absolute alarm in the past has nothing left to compute; it fires
    // at its stored instant and is removed by the call cap.
    timer.expires_at.ok_or_else(|| {
        ScheduleError::InvalidSpec(
            "timer has neither duration, interval, crontab nor an absolute expiry".into(),
        )
    })
}

fn next_interval(
    timer: &Timer,
    interval: i64,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    if interval <= 0 {
        return Err(ScheduleError::InvalidSpec(
            "interval must be positive".into(),
        ));
    }

    let lead_in = timer.duration.unwrap_or(interval);
    let anchor = timer.inserted_at + Duration::milliseconds(lead_in);

    let elapsed = (now - anchor).num_milliseconds();
    if elapsed < 0 {
        return Ok(anchor);
    }

    // Jump directly to the first anchor-aligned instant strictly after
    // `now`; an exact hit advances to the following one.
    let steps = elapsed / interval + 1;
    Ok(anchor + Duration::milliseconds(steps * interval))
}

fn next_crontab(
    expression: &str,
    timezone: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_crontab(expression)?;
    let tz = resolve_timezone(timezone)?;

    let local = now.with_timezone(&tz);
    let next = schedule.after(&local).next().ok_or_else(|| {
        ScheduleError::InvalidSpec(format!(
            "cron expression {expression:?} has no future occurrences"
        ))
    })?;

    Ok(next.with_timezone(&Utc))
}

/// Parses a cron expression, accepting the standard five-field form by
/// prepending the seconds field the cron library expects.
pub(crate) fn parse_crontab(expression: &str) -> Result<Schedule, ScheduleError> {
    let normalized = if expression.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {expression}"))
    } else {
        Cow::Borrowed(expression)
    };

    Ok(Schedule::from_str(&normalized)?)
}

pub(crate) fn resolve_timezone(name: Option<&str>) -> Result<Tz, ScheduleError> {
    let name = name.unwrap_or("UTC");
    name.parse()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_owned()))
}
