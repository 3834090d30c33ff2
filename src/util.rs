use anyhow::anyhow;
use sentry_core::protocol::SpanStatus;
use sentry_core::{TransactionContext, start_transaction};
use std::any::Any;

/// Turns a caught panic payload into a reportable error.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<String>() {
        anyhow!("timer handler panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<&str>() {
        anyhow!("timer handler panicked: {message}")
    } else {
        anyhow!("timer handler panicked")
    }
}

/// Runs `callback` inside a Sentry transaction, recording its outcome.
pub(crate) async fn with_sentry_transaction<F, R, E>(
    transaction_name: &str,
    callback: F,
) -> Result<R, E>
where
    F: AsyncFnOnce() -> Result<R, E>,
{
    let ctx = TransactionContext::new(transaction_name, "candle_clock.fire");
    let transaction = start_transaction(ctx);

    let result = callback().await;

    transaction.set_status(match &result {
        Ok(_) => SpanStatus::Ok,
        Err(_) => SpanStatus::UnknownError,
    });
    transaction.finish();

    result
}
