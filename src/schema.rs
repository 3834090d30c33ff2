//! Database row types for the timer table.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A persisted timer: one future action and its schedule.
///
/// Exactly one of a plain duration, a recurring interval (optionally with a
/// duration as lead-in), a cron expression, or a caller-supplied absolute
/// expiry classifies a timer.
#[derive(Debug, Clone, FromRow)]
pub struct Timer {
    /// Unique identifier for the timer.
    pub id: i64,
    /// Registry module the handler was registered under.
    pub callable_module: String,
    /// Name of the registered handler.
    pub callable_function: String,
    /// Opaque argument payload, passed verbatim to the handler.
    pub arguments: Vec<u8>,
    /// The next scheduled firing instant (UTC).
    ///
    /// Always set on persisted rows; `None` only on draft values that have
    /// not been through the expiry calculation yet.
    pub expires_at: Option<DateTime<Utc>>,
    /// Milliseconds from `inserted_at` to the first firing.
    pub duration: Option<i64>,
    /// Milliseconds between recurring firings.
    pub interval: Option<i64>,
    /// Cron expression, evaluated in `crontab_timezone`.
    pub crontab: Option<String>,
    /// IANA name of the zone the cron expression is evaluated in.
    pub crontab_timezone: Option<String>,
    /// Number of completed firings.
    pub calls: i32,
    /// Firing cap; the row is deleted once `calls` reaches it.
    pub max_calls: Option<i32>,
    /// Whether occurrences missed while no worker was running are skipped
    /// (`true`) or fired one after another until caught up (`false`).
    pub skip_if_offline: bool,
    /// Optional unique name, used to replace timers idempotently.
    pub name: Option<String>,
    /// Set while a worker holds the in-flight lease on this row.
    pub executing: bool,
    /// Creation instant.
    pub inserted_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
}
