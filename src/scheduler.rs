use crate::config::Config;
use crate::handler::TimerHandler;
use crate::notify;
use crate::registry::HandlerRegistry;
use crate::worker::{Worker, WorkerMsg};
use sqlx::PgPool;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

const INBOX_CAPACITY: usize = 64;

/// Marker type for a configured scheduler
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker type for an unconfigured scheduler
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

/// Builds and starts the per-node timer dispatcher.
///
/// At least one handler must be registered before the scheduler can be
/// started; the typestate parameter enforces this at compile time.
pub struct Scheduler<Context: Clone + Send + Sync + 'static, State = Unconfigured> {
    pool: PgPool,
    config: Config,
    registry: HandlerRegistry<Context>,
    context: Context,
    _state: PhantomData<State>,
}

impl<Context: std::fmt::Debug + Clone + Sync + Send + 'static, State: std::fmt::Debug>
    std::fmt::Debug for Scheduler<Context, State>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("context", &self.context)
            .finish()
    }
}

impl<Context: Clone + Send + Sync + 'static> Scheduler<Context> {
    /// Creates a new scheduler with the given connection pool and context.
    pub fn new(pool: PgPool, context: Context) -> Self {
        Self::with_config(pool, context, Config::default())
    }

    /// Creates a new scheduler with a custom configuration.
    pub fn with_config(pool: PgPool, context: Context, config: Config) -> Self {
        Self {
            pool,
            config,
            registry: HandlerRegistry::default(),
            context,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static, State> Scheduler<Context, State> {
    /// Registers a handler so timers referring to it can be dispatched on
    /// this node.
    pub fn register<H: TimerHandler<Context = Context>>(mut self) -> Scheduler<Context, Configured> {
        self.registry.register::<H>();

        Scheduler {
            pool: self.pool,
            config: self.config,
            registry: self.registry,
            context: self.context,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static> Scheduler<Context, Configured> {
    /// Starts the dispatcher and the cluster notification listener.
    ///
    /// The returned handle can be used to stop the dispatcher or to wait on
    /// it indefinitely.
    pub fn start(&self) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let config = Arc::new(self.config.clone());

        info!("Starting timer dispatcher…");

        let listener_span = info_span!("candle_clock.listener");
        let listener = tokio::spawn(
            notify::forward_notifications(self.pool.clone(), Arc::clone(&config), tx.clone())
                .instrument(listener_span),
        );

        let worker = Worker {
            pool: self.pool.clone(),
            config,
            context: self.context.clone(),
            registry: Arc::new(self.registry.clone()),
            inbox: rx,
            armed_for: None,
        };

        let worker_span = info_span!("candle_clock.dispatcher");
        let worker = tokio::spawn(worker.run().instrument(worker_span));

        SchedulerHandle {
            inbox: tx,
            worker,
            listener,
        }
    }
}

/// Handle to a running dispatcher.
#[derive(Debug)]
pub struct SchedulerHandle {
    inbox: mpsc::Sender<WorkerMsg>,
    worker: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Asks the dispatcher to re-consult the store for the earliest due
    /// timer.
    pub async fn refresh(&self) {
        let _ = self.inbox.send(WorkerMsg::Refresh).await;
    }

    /// Stops the dispatcher gracefully: the armed sleep is cancelled and
    /// the notification listener is shut down. Handler executions already
    /// dispatched are not interrupted.
    pub async fn shutdown(self) {
        self.listener.abort();

        if self.inbox.send(WorkerMsg::Shutdown).await.is_ok() {
            if let Err(error) = self.worker.await {
                warn!(%error, "Timer dispatcher task panicked");
            }
        } else {
            self.worker.abort();
        }
    }

    /// Waits on the dispatcher indefinitely; it only stops when a shutdown
    /// message arrives from elsewhere or its task fails.
    pub async fn wait_for_shutdown(self) {
        if let Err(error) = self.worker.await {
            warn!(%error, "Timer dispatcher task panicked");
        }
        self.listener.abort();
    }
}
