use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StreamSettings;
use crate::envelope::Envelope;
use crate::proxy::{ConsumerHandle, MessageRecord, ProxyGateway, RecordBatch};

/// Application hook invoked once per decoded record.
///
/// A failed record never aborts the rest of its batch and is still covered
/// by the batch commit, so implementations should be idempotent or escalate
/// failures through their own channel.
#[async_trait]
pub trait RecordDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        envelope: &Envelope,
        correlation_id: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Dispatcher that just logs each record. Useful as smoke-test wiring.
pub struct LoggingDispatcher;

#[async_trait]
impl RecordDispatcher for LoggingDispatcher {
    async fn dispatch(
        &self,
        envelope: &Envelope,
        correlation_id: Option<&str>,
    ) -> anyhow::Result<()> {
        info!(
            correlation_id = correlation_id.unwrap_or("-"),
            body_bytes = envelope.body().len(),
            "record received"
        );
        Ok(())
    }
}

/// Drives one consumer instance through the poll/dispatch/commit cycle.
///
/// The instance handle is threaded through `advance` rather than stored
/// here: each call takes the current handle and returns the one to use for
/// the next cycle, `None` after a reset.
pub struct StreamConsumer {
    gateway: Arc<dyn ProxyGateway>,
    dispatcher: Arc<dyn RecordDispatcher>,
    backoff: Duration,
    auto_commit: bool,
}

impl StreamConsumer {
    pub fn new(
        gateway: Arc<dyn ProxyGateway>,
        dispatcher: Arc<dyn RecordDispatcher>,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            backoff: settings.backoff,
            auto_commit: settings.auto_commit,
        }
    }

    /// Runs one cycle: ensure an instance exists, fetch, dispatch, commit.
    ///
    /// Any gateway failure destroys the instance (best effort) and backs
    /// off; per-record decode and dispatch failures are logged and skipped.
    /// The shutdown token is observed before polling and again after
    /// dispatch, so a pending shutdown never starts a new fetch and never
    /// commits a batch it interrupted.
    pub async fn advance(
        &self,
        handle: Option<ConsumerHandle>,
        shutdown: &CancellationToken,
    ) -> Option<ConsumerHandle> {
        if shutdown.is_cancelled() {
            return self.reset(handle, "shutdown requested", shutdown).await;
        }

        let handle = match handle {
            Some(handle) => handle,
            None => match self.gateway.create_instance().await {
                Ok(handle) => handle,
                Err(e) => return self.reset(None, &e.to_string(), shutdown).await,
            },
        };

        let batch = match self.gateway.fetch(&handle).await {
            Ok(batch) => batch,
            Err(e) => return self.reset(Some(handle), &e.to_string(), shutdown).await,
        };

        if batch.is_empty() {
            self.back_off(shutdown).await;
        } else {
            self.dispatch_batch(&batch).await;

            if shutdown.is_cancelled() {
                // No commit once shutdown has been observed; the batch is
                // redelivered to the next instance.
                return self
                    .reset(Some(handle), "shutdown requested during dispatch", shutdown)
                    .await;
            }

            if !self.auto_commit {
                if let Err(e) = self.gateway.commit(&handle).await {
                    return self.reset(Some(handle), &e.to_string(), shutdown).await;
                }
                metrics::counter!("queue_consumer_commits_total").increment(1);
            }
        }

        if shutdown.is_cancelled() {
            return self.reset(Some(handle), "shutdown requested", shutdown).await;
        }
        Some(handle)
    }

    async fn dispatch_batch(&self, batch: &RecordBatch) {
        for record in batch {
            self.dispatch_record(record).await;
        }
        metrics::counter!("queue_consumer_batches_total").increment(1);
        metrics::counter!("queue_consumer_messages_total").increment(batch.len() as u64);
    }

    async fn dispatch_record(&self, record: &MessageRecord) {
        let envelope = match Envelope::parse(&record.value) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "skipping record that could not be decoded"
                );
                metrics::counter!("queue_consumer_decode_errors_total").increment(1);
                return;
            }
        };

        if let Err(e) = self
            .dispatcher
            .dispatch(&envelope, envelope.correlation_id())
            .await
        {
            error!(
                partition = record.partition,
                offset = record.offset,
                correlation_id = envelope.correlation_id().unwrap_or("-"),
                error = %e,
                "record dispatch failed"
            );
            metrics::counter!("queue_consumer_dispatch_errors_total").increment(1);
        }
    }

    /// Discards the current instance (destroy is best effort and never
    /// retried) and backs off before the caller tries again.
    async fn reset(
        &self,
        handle: Option<ConsumerHandle>,
        reason: &str,
        shutdown: &CancellationToken,
    ) -> Option<ConsumerHandle> {
        if let Some(handle) = &handle {
            if let Err(e) = self.gateway.destroy_instance(handle).await {
                warn!(instance = %handle, error = %e, "failed to destroy consumer instance");
            }
        }
        warn!(reason, "consumer instance reset, backing off");
        metrics::counter!("queue_consumer_resets_total").increment(1);
        self.back_off(shutdown).await;
        None
    }

    /// Sleeps for the configured backoff, or less if shutdown fires first.
    async fn back_off(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.backoff) => {}
            _ = shutdown.cancelled() => {}
        }
    }
}
