use thiserror::Error;

/// Error type for timer creation, cancellation and query operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The cron expression could not be parsed.
    #[error("invalid cron expression")]
    InvalidCron(#[from] cron::error::Error),

    /// The time zone name is not a known IANA zone.
    #[error("unknown time zone: {0}")]
    InvalidTimezone(String),

    /// The timer specification has missing or conflicting fields.
    #[error("invalid timer specification: {0}")]
    InvalidSpec(String),

    /// The argument payload could not be serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// The underlying store reported an error.
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}
