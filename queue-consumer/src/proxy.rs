use std::sync::RwLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HOST};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{GatewayError, ProxyAction};

const KAFKA_V2_JSON: &str = "application/vnd.kafka.v2+json";

/// Names one live consumer instance at the proxy. Exclusively owned by a
/// single stream, and never reused after a destroy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerHandle {
    base_uri: Url,
}

impl ConsumerHandle {
    pub fn new(base_uri: Url) -> Self {
        Self { base_uri }
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }
}

impl std::fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.base_uri.fmt(f)
    }
}

/// One record returned by a fetch; `value` is the opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub partition: i32,
    pub offset: i64,
    pub value: Vec<u8>,
}

/// Records of one fetch call, in the order the proxy returned them.
/// Empty means "no data currently available", not an error.
pub type RecordBatch = Vec<MessageRecord>;

/// Boundary to the queue proxy. Implementations must be safe to share
/// between streams; each stream brings its own `ConsumerHandle`.
#[async_trait]
pub trait ProxyGateway: Send + Sync {
    async fn create_instance(&self) -> Result<ConsumerHandle, GatewayError>;

    /// Best-effort teardown. Callers log a failure and discard the handle
    /// either way.
    async fn destroy_instance(&self, handle: &ConsumerHandle) -> Result<(), GatewayError>;

    async fn fetch(&self, handle: &ConsumerHandle) -> Result<RecordBatch, GatewayError>;

    async fn commit(&self, handle: &ConsumerHandle) -> Result<(), GatewayError>;

    /// Human-readable outcome of the most recent proxy interaction. Never
    /// fails; readers must tolerate a stale value.
    fn status(&self) -> String;
}

pub(crate) fn consumed_status(count: usize) -> String {
    format!("{count} message(s) consumed")
}

#[derive(Deserialize)]
struct CreateInstanceResponse {
    base_uri: String,
}

#[derive(Deserialize)]
struct WireRecord {
    partition: i32,
    offset: i64,
    /// Base64-encoded payload; tombstones come through without a value.
    value: Option<String>,
}

/// Gateway speaking the Kafka REST v2 wire protocol over HTTP.
pub struct HttpProxyGateway {
    client: reqwest::Client,
    proxy_url: Url,
    create_url: Url,
    topic: String,
    queue_host: Option<String>,
    auto_commit: bool,
    offset_reset: String,
    status: RwLock<String>,
}

impl HttpProxyGateway {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("queue-consumer")
            .timeout(config.request_timeout.0)
            .build()?;

        let proxy_url = Url::parse(&config.queue_proxy_url)?;
        let mut create_url = proxy_url.clone();
        create_url
            .path_segments_mut()
            .map_err(|()| anyhow::anyhow!("queue proxy URL cannot be a base: {proxy_url}"))?
            .pop_if_empty()
            .push("consumers")
            .push(&config.group_name);

        Ok(Self {
            client,
            proxy_url,
            create_url,
            topic: config.topic.clone(),
            queue_host: config.queue_host.clone(),
            auto_commit: config.auto_commit,
            offset_reset: config.offset_reset.clone(),
            status: RwLock::new(consumed_status(0)),
        })
    }

    fn set_status(&self, status: String) {
        if let Ok(mut current) = self.status.write() {
            *current = status;
        }
    }

    /// Record the failure in the status string and hand the error back.
    fn fail(&self, error: GatewayError) -> GatewayError {
        self.set_status(error.to_string());
        error
    }

    /// Instance URIs handed out by the proxy can point at its internal
    /// address; when a Host override is configured, requests go to the
    /// configured proxy host/port instead.
    fn instance_url(&self, handle: &ConsumerHandle, segment: Option<&str>) -> Url {
        let mut url = handle.base_uri().clone();
        if self.queue_host.is_some() {
            _ = url.set_host(self.proxy_url.host_str());
            _ = url.set_port(self.proxy_url.port());
        }
        if let Some(segment) = segment {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().push(segment);
            }
        }
        url
    }

    fn with_host_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.queue_host {
            Some(host) => request.header(HOST, host),
            None => request,
        }
    }

    fn check_status(
        &self,
        response: &reqwest::Response,
        expected: StatusCode,
        action: ProxyAction,
    ) -> Result<(), GatewayError> {
        if response.status() != expected {
            return Err(self.fail(GatewayError::UnexpectedStatus {
                action,
                status: response.status(),
            }));
        }
        Ok(())
    }

    async fn subscribe(&self, handle: &ConsumerHandle) -> Result<(), GatewayError> {
        let action = ProxyAction::CreateInstance;
        let request = self
            .client
            .post(self.instance_url(handle, Some("subscription")))
            .header(CONTENT_TYPE, KAFKA_V2_JSON)
            .json(&serde_json::json!({ "topics": [self.topic] }));

        let response = self
            .with_host_header(request)
            .send()
            .await
            .map_err(|source| self.fail(GatewayError::Transport { action, source }))?;
        self.check_status(&response, StatusCode::NO_CONTENT, action)
    }
}

#[async_trait]
impl ProxyGateway for HttpProxyGateway {
    async fn create_instance(&self) -> Result<ConsumerHandle, GatewayError> {
        let action = ProxyAction::CreateInstance;
        let request = self
            .client
            .post(self.create_url.clone())
            .header(CONTENT_TYPE, KAFKA_V2_JSON)
            .json(&serde_json::json!({
                "auto.offset.reset": self.offset_reset,
                "auto.commit.enable": self.auto_commit.to_string(),
            }));

        let response = self
            .with_host_header(request)
            .send()
            .await
            .map_err(|source| self.fail(GatewayError::Transport { action, source }))?;
        self.check_status(&response, StatusCode::OK, action)?;

        let body: CreateInstanceResponse = response
            .json()
            .await
            .map_err(|e| self.fail(GatewayError::MalformedResponse { action, source: e.into() }))?;
        let base_uri = Url::parse(&body.base_uri)
            .map_err(|e| self.fail(GatewayError::MalformedResponse { action, source: e.into() }))?;

        let handle = ConsumerHandle::new(base_uri);
        self.subscribe(&handle).await?;
        debug!(instance = %handle, "consumer instance created");
        Ok(handle)
    }

    async fn destroy_instance(&self, handle: &ConsumerHandle) -> Result<(), GatewayError> {
        let action = ProxyAction::DestroyInstance;
        let request = self
            .client
            .delete(self.instance_url(handle, None))
            .header(ACCEPT, KAFKA_V2_JSON);

        let response = self
            .with_host_header(request)
            .send()
            .await
            .map_err(|source| self.fail(GatewayError::Transport { action, source }))?;
        self.check_status(&response, StatusCode::NO_CONTENT, action)?;

        self.set_status("consumer instance has been destroyed".to_owned());
        debug!(instance = %handle, "consumer instance destroyed");
        Ok(())
    }

    async fn fetch(&self, handle: &ConsumerHandle) -> Result<RecordBatch, GatewayError> {
        let action = ProxyAction::FetchRecords;
        let request = self
            .client
            .get(self.instance_url(handle, Some("records")))
            .header(ACCEPT, KAFKA_V2_JSON);

        let response = self
            .with_host_header(request)
            .send()
            .await
            .map_err(|source| self.fail(GatewayError::Transport { action, source }))?;
        self.check_status(&response, StatusCode::OK, action)?;

        let wire: Vec<WireRecord> = response
            .json()
            .await
            .map_err(|e| self.fail(GatewayError::MalformedResponse { action, source: e.into() }))?;

        let mut records = Vec::with_capacity(wire.len());
        for record in wire {
            let value = match record.value {
                Some(encoded) => BASE64.decode(encoded).map_err(|e| {
                    self.fail(GatewayError::MalformedResponse { action, source: e.into() })
                })?,
                None => Vec::new(),
            };
            records.push(MessageRecord {
                partition: record.partition,
                offset: record.offset,
                value,
            });
        }

        self.set_status(consumed_status(records.len()));
        Ok(records)
    }

    async fn commit(&self, handle: &ConsumerHandle) -> Result<(), GatewayError> {
        let action = ProxyAction::CommitOffsets;
        let request = self.client.post(self.instance_url(handle, Some("offsets")));

        let response = self
            .with_host_header(request)
            .send()
            .await
            .map_err(|source| self.fail(GatewayError::Transport { action, source }))?;
        self.check_status(&response, StatusCode::OK, action)
    }

    fn status(&self) -> String {
        self.status
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|_| "status unavailable".to_owned())
    }
}
