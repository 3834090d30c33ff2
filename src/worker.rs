use crate::config::Config;
use crate::expiry;
use crate::registry::HandlerRegistry;
use crate::schema::Timer;
use crate::storage;
use crate::util::{try_to_extract_panic_info, with_sentry_transaction};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use rand::Rng;
use sentry_core::{Hub, SentryFutureExt};
use sqlx::PgPool;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info_span, trace, warn};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const ERROR_JITTER: Duration = Duration::from_millis(250);

/// Messages accepted by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerMsg {
    /// Advisory hint that a timer was scheduled for the given instant.
    SetNextExpiry(DateTime<Utc>),
    /// Re-consult the store for the earliest due timer.
    Refresh,
    /// Stop the dispatch loop.
    Shutdown,
}

enum Wakeup {
    Inbox(Option<WorkerMsg>),
    Elapsed,
}

/// The dispatcher: a singleton per process node that sleeps until the
/// earliest due timer, claims it, hands the payload to the registered
/// handler and advances the row.
pub(crate) struct Worker<Context> {
    pub(crate) pool: PgPool,
    pub(crate) config: Arc<Config>,
    pub(crate) context: Context,
    pub(crate) registry: Arc<HandlerRegistry<Context>>,
    pub(crate) inbox: mpsc::Receiver<WorkerMsg>,
    pub(crate) armed_for: Option<DateTime<Utc>>,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Dispatch timers until a shutdown message arrives or all inbox
    /// senders are gone.
    pub(crate) async fn run(mut self) {
        // Rows already overdue at startup are picked up by the regular
        // claim loop, which is how missed timers fire after a restart.
        self.refresh().await;

        loop {
            match self.armed_for {
                Some(at) => {
                    let gap = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                    // Below the execution threshold no cancellable sleep
                    // is armed; no hint can matter this close to the
                    // deadline, so claim right away.
                    if gap <= self.config.threshold() {
                        if !gap.is_zero() {
                            sleep(gap).await;
                        }
                        self.fire().await;
                        continue;
                    }

                    let wakeup = tokio::select! {
                        message = self.inbox.recv() => Wakeup::Inbox(message),
                        () = sleep(gap) => Wakeup::Elapsed,
                    };
                    match wakeup {
                        Wakeup::Inbox(message) => {
                            if !self.handle(message).await {
                                break;
                            }
                        }
                        Wakeup::Elapsed => self.fire().await,
                    }
                }
                None => {
                    let message = self.inbox.recv().await;
                    if !self.handle(message).await {
                        break;
                    }
                }
            }
        }

        debug!("Timer dispatcher shut down");
    }

    /// Returns `false` when the dispatcher should stop.
    async fn handle(&mut self, message: Option<WorkerMsg>) -> bool {
        match message {
            None | Some(WorkerMsg::Shutdown) => false,
            Some(WorkerMsg::Refresh) => {
                self.refresh().await;
                true
            }
            Some(WorkerMsg::SetNextExpiry(at)) => {
                self.set_next_expiry(at);
                true
            }
        }
    }

    /// Re-arms for `at` if it is earlier than the current deadline. Later
    /// hints are ignored; peers may legitimately announce instants after
    /// the one this node is already armed for.
    fn set_next_expiry(&mut self, at: DateTime<Utc>) {
        match self.armed_for {
            Some(armed) if armed <= at => {}
            _ => {
                trace!(expires_at = %at, "Arming for earlier timer");
                self.armed_for = Some(at);
            }
        }
    }

    /// Re-consults the store for the earliest claimable timer.
    async fn refresh(&mut self) {
        match storage::earliest_expiry(&self.pool, &self.config).await {
            Ok(at) => {
                trace!(expires_at = ?at, "Refreshed earliest timer");
                self.armed_for = at;
            }
            Err(error) => {
                error!(%error, "Failed to query earliest timer, retrying");
                self.armed_for = Some(Utc::now() + chrono::Duration::seconds(5));
            }
        }
    }

    /// One round of the claim-and-dispatch loop: claim the earliest due
    /// timer, dispatch its handler without waiting for it, advance or
    /// delete the row, then re-consult the store.
    async fn fire(&mut self) {
        match storage::claim_next(&self.pool, &self.config).await {
            Ok(Some(timer)) => {
                self.dispatch(&timer);
                if let Err(error) = self.reschedule(&timer).await {
                    error!(timer.id = timer.id, %error, "Failed to reschedule timer");
                }
                self.refresh().await;
            }
            Ok(None) => self.refresh().await,
            Err(error) => {
                error!(%error, "Failed to claim timer");
                sleep(self.backoff_with_jitter()).await;
                self.refresh().await;
            }
        }
    }

    /// Hands the timer to its registered handler on a detached task.
    ///
    /// The dispatcher never waits for completion; handler faults and
    /// panics are caught and reported without touching the loop.
    fn dispatch(&self, timer: &Timer) {
        let Some(run_fn) = self
            .registry
            .get(&timer.callable_module, &timer.callable_function)
        else {
            error!(
                timer.id = timer.id,
                timer.module = %timer.callable_module,
                timer.function = %timer.callable_function,
                "No handler registered for timer"
            );
            return;
        };

        let run_fn = Arc::clone(run_fn);
        let context = self.context.clone();
        let arguments = timer.arguments.clone();
        let timer_id = timer.id;

        let span = info_span!(
            "timer",
            timer.id = %timer.id,
            timer.module = %timer.callable_module,
            timer.function = %timer.callable_function,
        );
        let transaction = format!("{}/{}", timer.callable_module, timer.callable_function);

        tokio::spawn(
            async move {
                debug!("Running timer handler…");

                let result = with_sentry_transaction(&transaction, async || {
                    AssertUnwindSafe(run_fn(context, arguments))
                        .catch_unwind()
                        .await
                        .map_err(|e| try_to_extract_panic_info(&*e))
                        // TODO: Replace with flatten() once that stabilizes
                        .and_then(std::convert::identity)
                })
                .await;

                if let Err(error) = result {
                    error!(timer.id = timer_id, "Timer handler failed: {error}");
                }
            }
            .instrument(span)
            .bind_hub(Hub::current()),
        );
    }

    /// Advances the claimed row to its next occurrence, or deletes it when
    /// the call cap is reached.
    async fn reschedule(&self, timer: &Timer) -> anyhow::Result<()> {
        let calls = timer.calls + 1;

        if timer.max_calls.is_some_and(|max| calls >= max) {
            debug!(timer.id = timer.id, "Timer reached its call cap, deleting");
            storage::delete_timer(&self.pool, &self.config, timer.id).await?;
            return Ok(());
        }

        let mut advanced = timer.clone();
        advanced.calls = calls;
        let next = expiry::next_expiry(&advanced, Utc::now())?;

        // A schedule that fails to advance would be claimed again
        // immediately; drop the row instead of spinning on it.
        if timer.expires_at.is_some_and(|previous| next <= previous) {
            warn!(timer.id = timer.id, "Timer schedule did not advance, deleting");
            storage::delete_timer(&self.pool, &self.config, timer.id).await?;
            return Ok(());
        }

        storage::finish_timer(&self.pool, &self.config, timer.id, next, calls).await?;
        Ok(())
    }

    fn backoff_with_jitter(&self) -> Duration {
        let jitter_millis = u64::try_from(ERROR_JITTER.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        ERROR_BACKOFF + Duration::from_millis(random_jitter)
    }
}
