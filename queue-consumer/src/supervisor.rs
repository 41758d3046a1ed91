use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use health::HealthRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::StreamSettings;
use crate::consumer::{RecordDispatcher, StreamConsumer};
use crate::error::SupervisorError;
use crate::proxy::ProxyGateway;

/// How long `stop` waits for streams to observe cancellation before
/// giving up on them.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Runs the configured number of independent poll loops against one shared
/// gateway, until told to stop.
///
/// Streams only observe cancellation at the checkpoints inside
/// [`StreamConsumer::advance`], so `stop` bounds its wait instead of
/// aborting tasks that are still inside a gateway call.
pub struct StreamSupervisor {
    gateway: Arc<dyn ProxyGateway>,
    dispatcher: Arc<dyn RecordDispatcher>,
    settings: StreamSettings,
    liveness: HealthRegistry,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSupervisor {
    pub fn new(
        gateway: Arc<dyn ProxyGateway>,
        dispatcher: Arc<dyn RecordDispatcher>,
        settings: StreamSettings,
        liveness: HealthRegistry,
    ) -> Self {
        Self {
            gateway,
            dispatcher,
            settings,
            liveness,
            shutdown: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Override the shutdown grace period; mostly useful in tests.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Spawns one poll task per configured stream. Polling begins
    /// asynchronously; calling `start` again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = self.tasks.lock().expect("poisoned stream task list");
        for stream in 0..self.settings.stream_count {
            let consumer = StreamConsumer::new(
                self.gateway.clone(),
                self.dispatcher.clone(),
                &self.settings,
            );
            let shutdown = self.shutdown.clone();
            let registry = self.liveness.clone();
            let deadline = liveness_deadline(&self.settings);

            tasks.push(tokio::spawn(async move {
                let liveness = registry.register(format!("stream-{stream}"), deadline).await;
                let mut handle = None;
                while !shutdown.is_cancelled() {
                    liveness.report_healthy().await;
                    handle = consumer.advance(handle, &shutdown).await;
                }
                info!(stream, "poll loop exited");
            }));
        }

        info!(
            streams = self.settings.stream_count,
            "stream supervisor started"
        );
    }

    /// Signals cancellation and waits up to the grace period for every
    /// stream to finish its current cycle. Streams still running after the
    /// grace period are left behind and reported in the error.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("poisoned stream task list");
            tasks.drain(..).collect()
        };

        let total = tasks.len();
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        let mut stalled = 0;
        for task in tasks {
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                // A crashed stream never takes its siblings down; it just
                // gets reported here.
                Ok(Err(e)) => warn!(error = %e, "stream task failed"),
                Err(_) => stalled += 1,
            }
        }

        if stalled > 0 {
            warn!(stalled, total, "streams still running after the shutdown grace period");
            return Err(SupervisorError::ShutdownTimeout { stalled, total });
        }

        info!("stream supervisor stopped");
        Ok(())
    }
}

/// A loop iteration can legitimately spend a full fetch timeout plus a
/// backoff without reporting; anything much longer than that is a stall.
fn liveness_deadline(settings: &StreamSettings) -> Duration {
    settings.backoff * 2 + Duration::from_secs(60)
}
