#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod clock;
mod config;
mod errors;
mod expiry;
mod handler;
mod notify;
mod registry;
mod scheduler;
/// Database row types.
pub mod schema;
mod spec;
mod storage;
mod util;
mod worker;

/// Client facade for creating, cancelling and querying timers.
pub use self::clock::CandleClock;
/// Library configuration.
pub use self::config::{Config, DEFAULT_NOTIFY_CHANNEL, DEFAULT_TABLE_NAME};
/// Error type for timer operations.
pub use self::errors::ScheduleError;
/// Pure calculation of a timer's next firing instant.
pub use self::expiry::next_expiry;
/// The main trait for defining timer handlers.
pub use self::handler::{DEFAULT_MODULE, TimerHandler};
/// The per-node dispatcher and its handle.
pub use self::scheduler::{Configured, Scheduler, SchedulerHandle, Unconfigured};
/// The persisted timer row.
pub use self::schema::Timer;
/// Specifications and options for timer creation.
pub use self::spec::{TimerOpts, TimerSpec};
/// Database bootstrap and introspection helpers.
pub use self::storage::{pending_timer_count, setup_database};
