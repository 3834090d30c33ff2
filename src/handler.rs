use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;

/// The default module namespace used when a handler does not specify one.
pub const DEFAULT_MODULE: &str = "default";

/// Trait for defining timer handlers that can be scheduled and invoked when
/// a timer fires.
///
/// The handler value itself carries the timer's arguments: it is serialized
/// into the row when the timer is created and deserialized again at fire
/// time. Handler identities are stable strings, so timers created before a
/// restart still resolve to their handler afterwards.
pub trait TimerHandler: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Module namespace of the handler.
    const MODULE: &'static str = DEFAULT_MODULE;

    /// Name of the handler.
    ///
    /// The `(MODULE, NAME)` pair MUST be unique for the whole application.
    const NAME: &'static str;

    /// The application data provided to this handler at runtime.
    type Context: Clone + Send + 'static;

    /// Invoked when a timer scheduled for this handler fires.
    ///
    /// Runs on its own task; the dispatcher does not wait for completion.
    /// Errors and panics are reported via the configured error sink and
    /// never affect the dispatch loop or the timer's schedule.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = anyhow::Result<()>> + Send;
}
