use std::time::Duration;

/// Default name of the timer table.
pub const DEFAULT_TABLE_NAME: &str = "candle_clock_timers";

/// Default Postgres notification channel for cluster wakeup hints.
pub const DEFAULT_NOTIFY_CHANNEL: &str = "candle_clock_wakeup";

const DEFAULT_ORPHAN_RECLAIM_WINDOW: Duration = Duration::from_secs(3600);
const DEFAULT_EXECUTION_THRESHOLD: Duration = Duration::from_millis(150);

/// Configuration shared by [`crate::CandleClock`] clients and
/// [`crate::Scheduler`] dispatchers.
///
/// All nodes of a cluster must use the same table name and notify channel.
#[derive(Debug, Clone)]
pub struct Config {
    table_name: String,
    notify_channel: String,
    orphan_reclaim_window: Duration,
    execution_threshold: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.into(),
            notify_channel: DEFAULT_NOTIFY_CHANNEL.into(),
            orphan_reclaim_window: DEFAULT_ORPHAN_RECLAIM_WINDOW,
            execution_threshold: DEFAULT_EXECUTION_THRESHOLD,
        }
    }
}

impl Config {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different timer table.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a plain SQL identifier.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(
            is_identifier(&name),
            "table name must be a plain SQL identifier"
        );
        self.table_name = name;
        self
    }

    /// Use a different notification channel for wakeup hints.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a plain SQL identifier.
    pub fn notify_channel(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(
            is_identifier(&name),
            "notify channel must be a plain SQL identifier"
        );
        self.notify_channel = name;
        self
    }

    /// Set how long a row may stay marked as executing past its expiry
    /// before its lease is considered abandoned and the row becomes
    /// claimable again.
    pub fn orphan_reclaim_window(mut self, window: Duration) -> Self {
        self.orphan_reclaim_window = window;
        self
    }

    /// Set the gap below which the dispatcher fires immediately instead of
    /// arming an in-memory sleep. Overdue timers always fire immediately.
    pub fn execution_threshold(mut self, threshold: Duration) -> Self {
        self.execution_threshold = threshold;
        self
    }

    pub(crate) fn table(&self) -> &str {
        &self.table_name
    }

    pub(crate) fn channel(&self) -> &str {
        &self.notify_channel
    }

    pub(crate) fn orphan_window(&self) -> Duration {
        self.orphan_reclaim_window
    }

    pub(crate) fn threshold(&self) -> Duration {
        self.execution_threshold
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
