//! Consumer loop shared by both pipeline stages
//!
//! Transport stays here; business logic lives behind `MessageHandler`. The
//! handler sees a typed, already-deserialized message and answers with an
//! `Outcome`; the loop maps that to ack/nack and never lets a handler error
//! crash the process. Malformed JSON is discarded without redelivery since
//! it will never parse on a second attempt.

use super::{Delivery, QueueClient};
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the consumer loop should do with a settled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Work persisted; remove the message
    Ack,
    /// Transient failure; redeliver to another attempt
    Requeue,
    /// Permanent failure; drop without redelivery
    Discard,
}

/// Consumption mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeMode {
    /// Block waiting for new messages until cancelled (long-running service)
    Continuous,
    /// Pull until the queue reports empty, then return (batch/cron invocation)
    DrainOnce,
}

/// Typed per-message handler implemented by each stage
#[async_trait]
pub trait MessageHandler: Send + Sync {
    type Message: DeserializeOwned + Send + 'static;

    /// Acting component name, recorded in logs and history entries
    fn name(&self) -> &'static str;

    async fn handle(&self, message: Self::Message, delivery: &Delivery) -> Outcome;
}

/// Run a consumer over `queue` until cancelled (or drained).
///
/// One message is in flight at a time. Cancellation is honored between
/// messages only: the in-flight handler always finishes and its message is
/// settled before the loop exits. Storage errors back off for the configured
/// fixed interval and consumption resumes.
pub async fn run_consumer<H: MessageHandler>(
    client: &QueueClient,
    queue: &str,
    handler: &H,
    mode: ConsumeMode,
    cancel: &CancellationToken,
) -> Result<()> {
    client.ensure_queue(queue).await?;
    let poll_interval = Duration::from_millis(client.settings().poll_interval_ms);
    let reconnect_backoff = Duration::from_secs(client.settings().reconnect_backoff_s);

    tracing::info!(queue, consumer = handler.name(), mode = ?mode, "Consumer started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match client.claim(queue).await {
            Ok(Some(delivery)) => {
                process_delivery(client, queue, handler, delivery).await;
            }
            Ok(None) => match mode {
                ConsumeMode::DrainOnce => break,
                ConsumeMode::Continuous => {
                    if wait_or_cancel(poll_interval, cancel).await {
                        break;
                    }
                }
            },
            Err(e) => {
                tracing::error!(
                    queue,
                    consumer = handler.name(),
                    error = %e,
                    backoff_s = reconnect_backoff.as_secs(),
                    "Queue storage unreachable, backing off"
                );
                if wait_or_cancel(reconnect_backoff, cancel).await {
                    break;
                }
            }
        }
    }

    tracing::info!(queue, consumer = handler.name(), "Consumer stopped");
    Ok(())
}

async fn process_delivery<H: MessageHandler>(
    client: &QueueClient,
    queue: &str,
    handler: &H,
    delivery: Delivery,
) {
    let outcome = match serde_json::from_str::<H::Message>(&delivery.body) {
        Ok(message) => handler.handle(message, &delivery).await,
        Err(e) => {
            tracing::warn!(
                queue,
                message_id = delivery.id,
                error = %e,
                "Malformed message body, discarding"
            );
            Outcome::Discard
        }
    };

    let settled = match outcome {
        Outcome::Ack => client.ack(&delivery).await,
        Outcome::Requeue => client.nack(&delivery, true).await,
        Outcome::Discard => client.nack(&delivery, false).await,
    };

    // A failed settle is not fatal: the message stays in flight and the
    // visibility timeout redelivers it (at-least-once).
    if let Err(e) = settled {
        tracing::error!(
            queue,
            message_id = delivery.id,
            outcome = ?outcome,
            error = %e,
            "Failed to settle message; visibility timeout will redeliver"
        );
    }
}

/// Sleep, returning true if cancelled first.
async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}
