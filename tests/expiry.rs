#![allow(missing_docs)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]

use candle_clock::{ScheduleError, Timer, next_expiry};
use chrono::{DateTime, Utc};
use claims::{assert_ok, assert_ok_eq};

fn utc(value: &str) -> DateTime<Utc> {
    value.parse().expect("invalid test timestamp")
}

fn timer(inserted_at: &str) -> Timer {
    let inserted_at = utc(inserted_at);
    Timer {
        id: 1,
        callable_module: "default".into(),
        callable_function: "tick".into(),
        arguments: b"{}".to_vec(),
        expires_at: None,
        duration: None,
        interval: None,
        crontab: None,
        crontab_timezone: None,
        calls: 0,
        max_calls: None,
        skip_if_offline: true,
        name: None,
        executing: false,
        inserted_at,
        updated_at: inserted_at,
    }
}

fn interval_timer(calls: i32, skip_if_offline: bool) -> Timer {
    Timer {
        duration: Some(5_000),
        interval: Some(10_000),
        calls,
        skip_if_offline,
        ..timer("2020-01-01T12:00:00Z")
    }
}

#[test]
fn duration_is_anchored_to_insertion() {
    let timer = Timer {
        duration: Some(60_000),
        ..timer("2020-01-01T13:00:00Z")
    };

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T13:00:00Z")),
        utc("2020-01-01T13:01:00Z")
    );
    // A month late, the first firing is still anchored to insertion.
    assert_ok_eq!(
        next_expiry(&timer, utc("2020-02-01T00:00:00Z")),
        utc("2020-01-01T13:01:00Z")
    );
}

#[test]
fn interval_catches_up_to_the_next_aligned_instant() {
    let timer = interval_timer(3, true);

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T13:00:30Z")),
        utc("2020-01-01T13:00:35Z")
    );
}

#[test]
fn interval_skips_past_downtime() {
    let timer = interval_timer(1, true);

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T14:00:00Z")),
        utc("2020-01-01T14:00:05Z")
    );
}

#[test]
fn interval_exactly_on_an_occurrence_advances_to_the_next() {
    let timer = interval_timer(1, true);

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T14:00:05Z")),
        utc("2020-01-01T14:00:15Z")
    );
}

#[test]
fn interval_before_the_anchor_returns_the_anchor() {
    let timer = interval_timer(1, true);

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T12:00:01Z")),
        utc("2020-01-01T12:00:05Z")
    );
}

#[test]
fn interval_without_skip_returns_the_first_scheduled_firing() {
    let timer = interval_timer(0, false);

    // Two hours late, the first firing is still the scheduled one.
    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T14:00:00Z")),
        utc("2020-01-01T12:00:05Z")
    );
}

#[test]
fn interval_without_skip_advances_one_occurrence_at_a_time() {
    let timer = Timer {
        expires_at: Some(utc("2020-01-01T12:00:15Z")),
        ..interval_timer(2, false)
    };

    // Regardless of how late the reschedule runs, the next occurrence is
    // the one after the previously fired instant.
    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-01T14:00:00Z")),
        utc("2020-01-01T12:00:25Z")
    );
    assert_ok_eq!(
        next_expiry(&timer, utc("2021-06-01T00:00:00Z")),
        utc("2020-01-01T12:00:25Z")
    );
}

#[test]
fn pending_expiry_round_trips_verbatim() {
    let timer = Timer {
        expires_at: Some(utc("2020-03-01T00:00:00Z")),
        max_calls: Some(1),
        ..timer("2020-01-01T12:00:00Z")
    };

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-01-15T00:00:00Z")),
        utc("2020-03-01T00:00:00Z")
    );
}

#[test]
fn overdue_absolute_alarm_keeps_its_instant() {
    let timer = Timer {
        expires_at: Some(utc("2020-01-01T00:00:00Z")),
        max_calls: Some(1),
        ..timer("2019-12-01T00:00:00Z")
    };

    assert_ok_eq!(
        next_expiry(&timer, utc("2020-02-01T00:00:00Z")),
        utc("2020-01-01T00:00:00Z")
    );
}

#[test]
fn crontab_fires_in_local_time() {
    let timer = Timer {
        crontab: Some("0 12 15 * *".into()),
        crontab_timezone: Some("Europe/Berlin".into()),
        ..timer("2020-01-01T00:00:00Z")
    };

    // 12:00 local is 10:00 UTC during summer time.
    assert_ok_eq!(
        next_expiry(&timer, utc("2020-04-01T00:00:00Z")),
        utc("2020-04-15T10:00:00Z")
    );
}

#[test]
fn crontab_without_skip_computes_from_insertion() {
    let timer = Timer {
        crontab: Some("0 12 15 * *".into()),
        crontab_timezone: Some("Europe/Berlin".into()),
        skip_if_offline: false,
        ..timer("2020-01-01T00:00:00Z")
    };

    // 12:00 local is 11:00 UTC during winter time; the wall clock is
    // ignored entirely.
    assert_ok_eq!(
        next_expiry(&timer, utc("2020-04-01T00:00:00Z")),
        utc("2020-01-15T11:00:00Z")
    );
}

#[test]
fn crontab_crosses_dst_boundaries_in_local_time() {
    let timer = Timer {
        crontab: Some("0 17 * * *".into()),
        crontab_timezone: Some("Europe/Berlin".into()),
        calls: 3,
        ..timer("2020-01-01T00:00:00Z")
    };

    // The day before the switch to summer time: 17:00 CET.
    let first = assert_ok!(next_expiry(&timer, utc("2020-03-28T12:00:00Z")));
    assert_eq!(first, utc("2020-03-28T16:00:00Z"));

    // The day after: still 17:00 on the wall, now CEST.
    let second = assert_ok!(next_expiry(&timer, first));
    assert_eq!(second, utc("2020-03-29T15:00:00Z"));
}

#[test]
fn next_expiry_is_strictly_in_the_future_for_recurring_timers() {
    let now = utc("2020-01-01T13:00:35Z");

    let interval = interval_timer(5, true);
    let next = assert_ok!(next_expiry(&interval, now));
    assert!(next > now);

    let cron = Timer {
        crontab: Some("* * * * *".into()),
        crontab_timezone: Some("UTC".into()),
        calls: 1,
        ..timer("2020-01-01T00:00:00Z")
    };
    let next = assert_ok!(next_expiry(&cron, now));
    assert!(next > now);
}

#[test]
fn invalid_cron_expression_is_reported() {
    let timer = Timer {
        crontab: Some("61 25 * * *".into()),
        crontab_timezone: Some("UTC".into()),
        ..timer("2020-01-01T00:00:00Z")
    };

    let error = next_expiry(&timer, utc("2020-01-02T00:00:00Z")).unwrap_err();
    assert!(matches!(error, ScheduleError::InvalidCron(_)));
}

#[test]
fn unknown_timezone_is_reported() {
    let timer = Timer {
        crontab: Some("0 12 * * *".into()),
        crontab_timezone: Some("Atlantis/Central".into()),
        ..timer("2020-01-01T00:00:00Z")
    };

    let error = next_expiry(&timer, utc("2020-01-02T00:00:00Z")).unwrap_err();
    assert!(matches!(error, ScheduleError::InvalidTimezone(_)));
}

#[test]
fn timer_without_any_schedule_is_rejected() {
    let timer = timer("2020-01-01T00:00:00Z");

    let error = next_expiry(&timer, utc("2020-01-02T00:00:00Z")).unwrap_err();
    assert!(matches!(error, ScheduleError::InvalidSpec(_)));
}
