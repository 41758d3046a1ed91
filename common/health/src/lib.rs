use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::warn;

/// Liveness reporting for the long-running loops of a service.
///
/// A process made of several independent loops is only trustworthy while
/// every loop keeps making progress. Each loop registers itself with a
/// [`HealthRegistry`] and receives a [`HealthHandle`] it must ping before a
/// per-component deadline. The registry folds the component states into a
/// single signal:
///   - any component reporting unhealthy makes the process unhealthy,
///   - a component that missed its deadline counts as stalled and makes the
///     process unhealthy,
///   - the process is healthy only when every component reported recently.
///
/// Readiness and liveness are different questions; give each probe its own
/// registry instead of trying to answer both from one.

/// Reported state of a single registered component.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered but has not reported yet.
    Starting,
    /// Healthy as long as the contained deadline is in the future.
    HealthyUntil(OffsetDateTime),
    /// Explicitly reported unhealthy.
    Unhealthy,
    /// Deadline passed without a new report.
    Stalled,
}

struct StatusUpdate {
    component: String,
    status: ComponentStatus,
}

/// Aggregated process status, rendered with per-component detail.
#[derive(Default, Debug)]
pub struct RegistryStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for RegistryStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

/// Held by a component to report its own state. Cheap to clone.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<StatusUpdate>,
}

impl HealthHandle {
    /// Report healthy for one more deadline interval. Must be called more
    /// often than the deadline configured at registration.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
        .await;
    }

    /// Report an arbitrary status; returns once the update is queued.
    pub async fn report_status(&self, status: ComponentStatus) {
        let update = StatusUpdate {
            component: self.component.clone(),
            status,
        };
        if self.sender.send(update).await.is_err() {
            warn!(component = %self.component, "health registry is gone, dropping status update");
        }
    }
}

/// Collects component reports and answers the aggregated status.
#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<StatusUpdate>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<StatusUpdate>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let sink = components.clone();
        tokio::spawn(async move {
            while let Some(update) = receiver.recv().await {
                match sink.write() {
                    Ok(mut map) => {
                        _ = map.insert(update.component, update.status);
                    }
                    // Poisoned lock: the probes will fail and the process restart
                    Err(_) => warn!("poisoned health registry lock"),
                }
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    /// Register a component. The returned handle must be passed to the
    /// component so it can report before each deadline expiry.
    pub async fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Fold all component states into the process status. Usable directly
    /// as an axum handler.
    pub fn get_status(&self) -> RegistryStatus {
        let now = OffsetDateTime::now_utc();
        let components = match self.components.read() {
            Ok(map) => map.clone(),
            Err(_) => {
                warn!(registry = %self.name, "poisoned health registry lock");
                return RegistryStatus::default();
            }
        };

        let mut status = RegistryStatus {
            // An empty registry is unhealthy: nothing has registered yet.
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component) in components {
            let component = match component {
                ComponentStatus::HealthyUntil(until) if until > now => {
                    ComponentStatus::HealthyUntil(until)
                }
                ComponentStatus::HealthyUntil(_) => {
                    status.healthy = false;
                    ComponentStatus::Stalled
                }
                other => {
                    status.healthy = false;
                    other
                }
            };
            _ = status.components.insert(name, component);
        }

        if !status.healthy {
            warn!(registry = %self.name, components = ?status.components, "health check failed");
        }
        status
    }
}
