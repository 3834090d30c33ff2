use crate::handler::TimerHandler;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased handler invocation: context plus raw argument payload.
pub(crate) type RunHandlerFn<Context> =
    dyn Fn(Context, Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Maps `(module, function)` pairs to their registered handlers.
pub(crate) struct HandlerRegistry<Context> {
    entries: HashMap<(String, String), Arc<RunHandlerFn<Context>>>,
}

impl<Context> Default for HandlerRegistry<Context> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<Context> Clone for HandlerRegistry<Context> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<Context: Clone + Send + 'static> HandlerRegistry<Context> {
    pub(crate) fn register<H: TimerHandler<Context = Context>>(&mut self) {
        let run: Arc<RunHandlerFn<Context>> = Arc::new(run_handler::<H>);
        self.entries
            .insert((H::MODULE.to_owned(), H::NAME.to_owned()), run);
    }

    pub(crate) fn get(
        &self,
        module: &str,
        function: &str,
    ) -> Option<&Arc<RunHandlerFn<Context>>> {
        self.entries
            .get(&(module.to_owned(), function.to_owned()))
    }
}

fn run_handler<H: TimerHandler>(
    ctx: H::Context,
    payload: Vec<u8>,
) -> BoxFuture<'static, anyhow::Result<()>> {
    async move {
        let handler = serde_json::from_slice::<H>(&payload)?;
        handler.run(ctx).await
    }
    .boxed()
}
