//! Timer specifications accepted by the create operations.

use crate::errors::ScheduleError;
use crate::expiry::{parse_crontab, resolve_timezone};
use crate::handler::TimerHandler;
use crate::schema::Timer;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Options accepted by every create operation.
#[derive(Debug, Clone)]
pub struct TimerOpts {
    /// Unique name for the timer.
    ///
    /// Scheduling under an existing name replaces the previous timer
    /// instead of creating a second one.
    pub name: Option<String>,
    /// Whether occurrences missed while no worker was running are skipped
    /// (`true`, the default) or fired one after another until caught up.
    pub skip_if_offline: bool,
    /// Cap on the number of firings; the timer is deleted once reached.
    /// Ignored by the one-shot operations, which always use a cap of one.
    pub max_calls: Option<i32>,
    /// Creation instant override; defaults to the current time.
    pub inserted_at: Option<DateTime<Utc>>,
    /// Last-mutation instant override; defaults to the creation instant.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for TimerOpts {
    fn default() -> Self {
        Self {
            name: None,
            skip_if_offline: true,
            max_calls: None,
            inserted_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    After(Duration),
    At(DateTime<Utc>),
    Interval {
        lead_in: Option<Duration>,
        every: Duration,
    },
    Crontab {
        expression: String,
        timezone: String,
    },
}

/// A single validated entry for [`crate::CandleClock::create_many`].
///
/// Constructed through the same four shapes the singular create operations
/// use; the handler's argument payload is serialized eagerly so a failing
/// spec is rejected before anything touches the store.
#[derive(Debug, Clone)]
pub struct TimerSpec {
    module: String,
    function: String,
    arguments: Vec<u8>,
    kind: ScheduleKind,
    opts: TimerOpts,
}

impl TimerSpec {
    /// A single-shot timer firing `duration` after its creation.
    pub fn after<H: TimerHandler>(
        handler: &H,
        duration: Duration,
        opts: TimerOpts,
    ) -> Result<Self, ScheduleError> {
        Self::new::<H>(handler, ScheduleKind::After(duration), opts)
    }

    /// A single-shot timer firing at the given absolute instant.
    pub fn at<H: TimerHandler>(
        handler: &H,
        instant: DateTime<Utc>,
        opts: TimerOpts,
    ) -> Result<Self, ScheduleError> {
        Self::new::<H>(handler, ScheduleKind::At(instant), opts)
    }

    /// A recurring timer firing every `every`, the first time `lead_in`
    /// after its creation. `lead_in` defaults to `every` when omitted.
    pub fn interval<H: TimerHandler>(
        handler: &H,
        lead_in: Option<Duration>,
        every: Duration,
        opts: TimerOpts,
    ) -> Result<Self, ScheduleError> {
        Self::new::<H>(handler, ScheduleKind::Interval { lead_in, every }, opts)
    }

    /// A recurring timer following a cron expression, evaluated in the
    /// given IANA time zone.
    pub fn crontab<H: TimerHandler>(
        handler: &H,
        expression: impl Into<String>,
        timezone: impl Into<String>,
        opts: TimerOpts,
    ) -> Result<Self, ScheduleError> {
        let kind = ScheduleKind::Crontab {
            expression: expression.into(),
            timezone: timezone.into(),
        };
        Self::new::<H>(handler, kind, opts)
    }

    fn new<H: TimerHandler>(
        handler: &H,
        kind: ScheduleKind,
        opts: TimerOpts,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            module: H::MODULE.to_owned(),
            function: H::NAME.to_owned(),
            arguments: serde_json::to_vec(handler)?,
            kind,
            opts,
        })
    }

    /// Validates the spec and turns it into a draft row created at `now`.
    /// The draft's `expires_at` is left unset for the expiry calculator.
    pub(crate) fn into_draft(self, now: DateTime<Utc>) -> Result<Timer, ScheduleError> {
        let opts = self.opts;

        if opts.name.as_deref().is_some_and(str::is_empty) {
            return Err(ScheduleError::InvalidSpec(
                "timer name must not be empty".into(),
            ));
        }
        if opts.max_calls.is_some_and(|max| max < 1) {
            return Err(ScheduleError::InvalidSpec(
                "max_calls must be at least 1".into(),
            ));
        }

        let inserted_at = opts.inserted_at.unwrap_or(now);
        let updated_at = opts.updated_at.unwrap_or(inserted_at);

        let mut timer = Timer {
            id: 0,
            callable_module: self.module,
            callable_function: self.function,
            arguments: self.arguments,
            expires_at: None,
            duration: None,
            interval: None,
            crontab: None,
            crontab_timezone: None,
            calls: 0,
            max_calls: opts.max_calls,
            skip_if_offline: opts.skip_if_offline,
            name: opts.name,
            executing: false,
            inserted_at,
            updated_at,
        };

        match self.kind {
            ScheduleKind::After(duration) => {
                timer.duration = Some(millis(duration, "duration")?);
                timer.max_calls = Some(1);
            }
            ScheduleKind::At(instant) => {
                timer.expires_at = Some(instant);
                timer.max_calls = Some(1);
            }
            ScheduleKind::Interval { lead_in, every } => {
                let every = millis(every, "interval")?;
                if every == 0 {
                    return Err(ScheduleError::InvalidSpec(
                        "interval must be positive".into(),
                    ));
                }
                let lead_in = match lead_in {
                    Some(lead_in) => millis(lead_in, "lead-in")?,
                    None => every,
                };
                timer.duration = Some(lead_in);
                timer.interval = Some(every);
            }
            ScheduleKind::Crontab {
                expression,
                timezone,
            } => {
                parse_crontab(&expression)?;
                resolve_timezone(Some(&timezone))?;
                timer.crontab = Some(expression);
                timer.crontab_timezone = Some(timezone);
            }
        }

        Ok(timer)
    }
}

fn millis(duration: Duration, field: &str) -> Result<i64, ScheduleError> {
    i64::try_from(duration.as_millis())
        .map_err(|_| ScheduleError::InvalidSpec(format!("{field} is out of range")))
}
