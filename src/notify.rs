//! Cluster fan-out over Postgres `NOTIFY`.
//!
//! Creation and cancellation broadcast advisory wakeup hints to the
//! dispatcher of every node, including the local one. Delivery is
//! fire-and-forget: the claim transaction remains the authoritative safety
//! net, so a missed hint only means a node keeps its current sleep until
//! the next hint or refresh.

use crate::config::Config;
use crate::worker::WorkerMsg;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{trace, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The two wakeup hints peers exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Broadcast {
    /// Re-consult the store for the earliest due timer.
    Refresh,
    /// A timer was scheduled for the given instant.
    SetNextExpiry { expires_at: DateTime<Utc> },
}

impl From<Broadcast> for WorkerMsg {
    fn from(message: Broadcast) -> Self {
        match message {
            Broadcast::Refresh => WorkerMsg::Refresh,
            Broadcast::SetNextExpiry { expires_at } => WorkerMsg::SetNextExpiry(expires_at),
        }
    }
}

/// Broadcasts a hint to all listening dispatchers.
pub(crate) async fn broadcast(pool: &PgPool, config: &Config, message: Broadcast) {
    let payload = match serde_json::to_string(&message) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "Failed to encode wakeup hint");
            return;
        }
    };

    let result = sqlx::query("SELECT pg_notify($1, $2)")
        .bind(config.channel())
        .bind(&payload)
        .execute(pool)
        .await;

    if let Err(error) = result {
        warn!(%error, "Failed to broadcast wakeup hint");
    }
}

/// Listens on the notify channel and forwards decoded hints to the
/// dispatcher inbox. Runs until the inbox is closed.
pub(crate) async fn forward_notifications(
    pool: PgPool,
    config: Arc<Config>,
    inbox: mpsc::Sender<WorkerMsg>,
) {
    loop {
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(error) => {
                warn!(%error, "Failed to connect notification listener");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if let Err(error) = listener.listen(config.channel()).await {
            warn!(%error, "Failed to subscribe to wakeup channel");
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        // Hints may have been missed while we were not subscribed.
        if inbox.send(WorkerMsg::Refresh).await.is_err() {
            return;
        }

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    match serde_json::from_str::<Broadcast>(notification.payload()) {
                        Ok(message) => {
                            trace!(?message, "Received wakeup hint");
                            if inbox.send(message.into()).await.is_err() {
                                return;
                            }
                        }
                        Err(error) => warn!(%error, "Ignoring malformed wakeup hint"),
                    }
                }
                Err(error) => {
                    warn!(%error, "Lost notification connection, reconnecting");
                    break;
                }
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
