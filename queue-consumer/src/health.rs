use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::proxy::ProxyGateway;

/// Matches the status line the gateway writes after every successful
/// fetch; anything else means the last interaction went wrong.
static CONSUMED_OK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+ message\(s\) consumed$").expect("status pattern should compile")
});

/// Outcome of a health evaluation, rendered as an HTTP response with the
/// diagnostic detail in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthOutcome {
    pub healthy: bool,
    pub detail: String,
}

impl IntoResponse for HealthOutcome {
    fn into_response(self) -> Response {
        match self.healthy {
            true => (StatusCode::OK, self.detail),
            false => (StatusCode::INTERNAL_SERVER_ERROR, self.detail),
        }
        .into_response()
    }
}

/// Health signal derived from the outcome of the last real fetch.
///
/// When the consumer polls frequently, checking the most recent fetch
/// outcome is almost as accurate as probing the proxy, without adding any
/// load to an already-polled dependency. The trade-off is a detection
/// latency of up to one polling interval.
#[derive(Clone)]
pub struct PassiveConsumerCheck {
    gateway: Arc<dyn ProxyGateway>,
}

impl PassiveConsumerCheck {
    pub fn new(gateway: Arc<dyn ProxyGateway>) -> Self {
        Self { gateway }
    }

    pub fn check(&self) -> HealthOutcome {
        let status = self.gateway.status();
        HealthOutcome {
            healthy: CONSUMED_OK.is_match(&status),
            detail: status,
        }
    }
}

/// Active probe: create a throwaway consumer instance, fetch once, tear it
/// down again.
///
/// This issues real proxy traffic on every check, so it belongs on its own
/// gateway (typically under a dedicated probe group); run through the
/// polling loop's gateway it would overwrite the passive status signal.
pub struct ConnectivityProbe {
    gateway: Arc<dyn ProxyGateway>,
}

impl ConnectivityProbe {
    pub fn new(gateway: Arc<dyn ProxyGateway>) -> Self {
        Self { gateway }
    }

    pub async fn check(&self) -> HealthOutcome {
        let handle = match self.gateway.create_instance().await {
            Ok(handle) => handle,
            Err(e) => {
                return HealthOutcome {
                    healthy: false,
                    detail: e.to_string(),
                }
            }
        };

        let fetched = self.gateway.fetch(&handle).await;

        if let Err(e) = self.gateway.destroy_instance(&handle).await {
            warn!(instance = %handle, error = %e, "failed to destroy probe instance");
        }

        match fetched {
            Ok(_) => HealthOutcome {
                healthy: true,
                detail: "OK".to_owned(),
            },
            Err(e) => HealthOutcome {
                healthy: false,
                detail: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::error::ProxyAction;
    use crate::test_support::{gateway_error, FakeGateway};

    #[tokio::test]
    async fn fresh_gateway_reports_healthy() {
        let check = PassiveConsumerCheck::new(Arc::new(FakeGateway::default()));

        let outcome = check.check();
        assert!(outcome.healthy);
        assert_eq!(outcome.detail, "0 message(s) consumed");
    }

    #[tokio::test]
    async fn consumed_messages_report_healthy() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_status("17 message(s) consumed");
        let check = PassiveConsumerCheck::new(gateway);

        let outcome = check.check();
        assert!(outcome.healthy);
        assert_eq!(outcome.detail, "17 message(s) consumed");
    }

    #[tokio::test]
    async fn anything_else_reports_unhealthy_with_the_status_as_detail() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_status("unable to fetch records: proxy returned 503 Service Unavailable");
        let check = PassiveConsumerCheck::new(gateway.clone());

        let outcome = check.check();
        assert!(!outcome.healthy);
        assert!(outcome.detail.contains("proxy returned 503"));

        gateway.set_status("consumer instance has been destroyed");
        assert!(!check.check().healthy);
    }

    #[tokio::test]
    async fn outcome_renders_as_a_response() {
        let healthy = HealthOutcome {
            healthy: true,
            detail: "3 message(s) consumed".to_owned(),
        };
        assert_eq!(healthy.into_response().status(), StatusCode::OK);

        let unhealthy = HealthOutcome {
            healthy: false,
            detail: "nope".to_owned(),
        };
        assert_eq!(
            unhealthy.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn probe_creates_fetches_and_destroys() {
        let gateway = Arc::new(FakeGateway::default());
        let probe = ConnectivityProbe::new(gateway.clone());

        let outcome = probe.check().await;

        assert!(outcome.healthy);
        assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.destroy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn probe_reports_unhealthy_when_the_fetch_fails() {
        let gateway = Arc::new(FakeGateway::with_fetches(vec![Err(gateway_error(
            ProxyAction::FetchRecords,
        ))]));
        let probe = ConnectivityProbe::new(gateway.clone());

        let outcome = probe.check().await;

        assert!(!outcome.healthy);
        assert!(outcome.detail.contains("unable to fetch records"));
        // The throwaway instance is torn down even when the fetch fails.
        assert_eq!(gateway.destroy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn probe_reports_unhealthy_when_create_fails() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_create.store(true, Ordering::SeqCst);
        let probe = ConnectivityProbe::new(gateway.clone());

        let outcome = probe.check().await;

        assert!(!outcome.healthy);
        assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.destroy_calls.load(Ordering::SeqCst), 0);
    }
}
