use crate::config::Config;
use crate::errors::ScheduleError;
use crate::expiry;
use crate::handler::TimerHandler;
use crate::notify::{self, Broadcast};
use crate::schema::Timer;
use crate::spec::{TimerOpts, TimerSpec};
use crate::storage;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tracing::instrument;

/// Client handle for creating, cancelling and querying timers.
///
/// Cheap to clone and usable from any node of the cluster; it does not run
/// a dispatcher itself. Every successful create broadcasts a wakeup hint so
/// all dispatchers can re-evaluate their sleep deadline, and every cancel
/// broadcasts a refresh.
#[derive(Debug, Clone)]
pub struct CandleClock {
    pool: PgPool,
    config: Config,
}

impl CandleClock {
    /// Creates a client with the default configuration.
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, Config::default())
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(pool: PgPool, config: Config) -> Self {
        Self { pool, config }
    }

    /// Schedules a single-shot timer firing `duration` from now.
    #[instrument(name = "candle_clock.call_after", skip(self, handler, opts), fields(handler = H::NAME))]
    pub async fn call_after<H: TimerHandler>(
        &self,
        handler: &H,
        duration: Duration,
        opts: TimerOpts,
    ) -> Result<Timer, ScheduleError> {
        self.create(TimerSpec::after(handler, duration, opts)?).await
    }

    /// Schedules a single-shot timer firing at the given absolute instant.
    #[instrument(name = "candle_clock.call_at", skip(self, handler, opts), fields(handler = H::NAME))]
    pub async fn call_at<H: TimerHandler>(
        &self,
        handler: &H,
        instant: DateTime<Utc>,
        opts: TimerOpts,
    ) -> Result<Timer, ScheduleError> {
        self.create(TimerSpec::at(handler, instant, opts)?).await
    }

    /// Schedules a recurring timer firing every `every`, the first time
    /// `lead_in` from now. `lead_in` defaults to `every` when omitted.
    #[instrument(name = "candle_clock.call_interval", skip(self, handler, opts), fields(handler = H::NAME))]
    pub async fn call_interval<H: TimerHandler>(
        &self,
        handler: &H,
        lead_in: Option<Duration>,
        every: Duration,
        opts: TimerOpts,
    ) -> Result<Timer, ScheduleError> {
        self.create(TimerSpec::interval(handler, lead_in, every, opts)?)
            .await
    }

    /// Schedules a recurring timer following a cron expression, evaluated
    /// in the given IANA time zone.
    #[instrument(name = "candle_clock.call_crontab", skip(self, handler, opts), fields(handler = H::NAME))]
    pub async fn call_crontab<H: TimerHandler>(
        &self,
        handler: &H,
        expression: &str,
        timezone: &str,
        opts: TimerOpts,
    ) -> Result<Timer, ScheduleError> {
        self.create(TimerSpec::crontab(handler, expression, timezone, opts)?)
            .await
    }

    /// Creates a batch of timers in a single round-trip, replacing existing
    /// timers by name. Dispatchers are notified of the earliest inserted
    /// instant.
    #[instrument(name = "candle_clock.create_many", skip_all, fields(count = specs.len()))]
    pub async fn create_many(&self, specs: Vec<TimerSpec>) -> Result<Vec<Timer>, ScheduleError> {
        let now = Utc::now();

        let mut drafts = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut draft = spec.into_draft(now)?;
            draft.expires_at = Some(expiry::next_expiry(&draft, now)?);
            drafts.push(draft);
        }

        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let timers = storage::insert_timers(&self.pool, &self.config, &drafts).await?;

        if let Some(earliest) = timers.iter().filter_map(|timer| timer.expires_at).min() {
            self.hint(earliest).await;
        }

        Ok(timers)
    }

    /// Cancels the timer with the given id. Returns whether a row was
    /// deleted. An already-dispatched firing is not aborted; cancellation
    /// only prevents further occurrences.
    #[instrument(name = "candle_clock.cancel_by_id", skip(self))]
    pub async fn cancel_by_id(&self, id: i64) -> Result<bool, ScheduleError> {
        let deleted = storage::delete_timer(&self.pool, &self.config, id).await?;
        if deleted {
            notify::broadcast(&self.pool, &self.config, Broadcast::Refresh).await;
        }
        Ok(deleted)
    }

    /// Cancels the timer with the given name. Returns whether a row was
    /// deleted.
    #[instrument(name = "candle_clock.cancel_by_name", skip(self))]
    pub async fn cancel_by_name(&self, name: &str) -> Result<bool, ScheduleError> {
        let deleted = storage::delete_by_name(&self.pool, &self.config, name).await?;
        if deleted {
            notify::broadcast(&self.pool, &self.config, Broadcast::Refresh).await;
        }
        Ok(deleted)
    }

    /// Cancels every timer registered for the given handler identity.
    /// Returns the number of deleted rows.
    #[instrument(name = "candle_clock.cancel_all", skip(self))]
    pub async fn cancel_all(&self, module: &str, function: &str) -> Result<u64, ScheduleError> {
        let deleted = storage::delete_by_callable(&self.pool, &self.config, module, function).await?;
        if deleted > 0 {
            notify::broadcast(&self.pool, &self.config, Broadcast::Refresh).await;
        }
        Ok(deleted)
    }

    /// Whether a timer with the given name exists.
    pub async fn name_exists(&self, name: &str) -> Result<bool, ScheduleError> {
        Ok(storage::name_exists(&self.pool, &self.config, name).await?)
    }

    /// Whether a timer with the given id exists.
    pub async fn id_exists(&self, id: i64) -> Result<bool, ScheduleError> {
        Ok(storage::id_exists(&self.pool, &self.config, id).await?)
    }

    async fn create(&self, spec: TimerSpec) -> Result<Timer, ScheduleError> {
        let now = Utc::now();

        let mut draft = spec.into_draft(now)?;
        draft.expires_at = Some(expiry::next_expiry(&draft, now)?);

        let timer = storage::insert_timer(&self.pool, &self.config, &draft).await?;

        if let Some(expires_at) = timer.expires_at {
            self.hint(expires_at).await;
        }

        Ok(timer)
    }

    async fn hint(&self, expires_at: DateTime<Utc>) {
        notify::broadcast(
            &self.pool,
            &self.config,
            Broadcast::SetNextExpiry { expires_at },
        )
        .await;
    }
}
