//! Scripted gateway and dispatcher fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use http::StatusCode;
use url::Url;

use crate::consumer::RecordDispatcher;
use crate::envelope::Envelope;
use crate::error::{GatewayError, ProxyAction};
use crate::proxy::{consumed_status, ConsumerHandle, MessageRecord, ProxyGateway, RecordBatch};

pub(crate) fn test_handle() -> ConsumerHandle {
    let base_uri = Url::parse("http://localhost:8082/consumers/ingester/instances/rest-consumer-1")
        .expect("static URL should parse");
    ConsumerHandle::new(base_uri)
}

pub(crate) fn gateway_error(action: ProxyAction) -> GatewayError {
    GatewayError::UnexpectedStatus {
        action,
        status: StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn record(payload: &str) -> MessageRecord {
    MessageRecord {
        partition: 0,
        offset: 0,
        value: payload.as_bytes().to_vec(),
    }
}

pub(crate) fn envelope_payload(correlation_id: &str) -> String {
    format!(
        "Message-Id: 0e98cb23-3d10-4e43-a05e-001e6dd75d61\r\n\
         X-Request-Id: {correlation_id}\r\n\
         \r\n\
         {{\"event\":\"published\"}}"
    )
}

/// Gateway whose fetches replay a script; every other operation counts its
/// calls and succeeds or fails according to the flags. Once the script is
/// exhausted, fetches return empty batches.
#[derive(Default)]
pub(crate) struct FakeGateway {
    fetch_script: Mutex<VecDeque<Result<RecordBatch, GatewayError>>>,
    pub fail_create: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_destroy: AtomicBool,
    pub create_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    status: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn with_fetches(script: Vec<Result<RecordBatch, GatewayError>>) -> Self {
        let gateway = Self::default();
        *gateway.fetch_script.lock().expect("fetch script lock") = script.into();
        gateway
    }

    pub fn set_status(&self, status: &str) {
        *self.status.lock().expect("status lock") = Some(status.to_owned());
    }
}

#[async_trait]
impl ProxyGateway for FakeGateway {
    async fn create_instance(&self) -> Result<ConsumerHandle, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(gateway_error(ProxyAction::CreateInstance));
        }
        Ok(test_handle())
    }

    async fn destroy_instance(&self, _handle: &ConsumerHandle) -> Result<(), GatewayError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(gateway_error(ProxyAction::DestroyInstance));
        }
        Ok(())
    }

    async fn fetch(&self, _handle: &ConsumerHandle) -> Result<RecordBatch, GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetch_script.lock().expect("fetch script lock").pop_front() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    async fn commit(&self, _handle: &ConsumerHandle) -> Result<(), GatewayError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(gateway_error(ProxyAction::CommitOffsets));
        }
        Ok(())
    }

    fn status(&self) -> String {
        self.status
            .lock()
            .expect("status lock")
            .clone()
            .unwrap_or_else(|| consumed_status(0))
    }
}

/// Dispatcher that records what it was given and optionally fails.
#[derive(Default)]
pub(crate) struct CountingDispatcher {
    pub fail: AtomicBool,
    records: Mutex<Vec<(Option<String>, String)>>,
}

impl CountingDispatcher {
    pub fn calls(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }

    pub fn correlation_ids(&self) -> Vec<Option<String>> {
        self.records
            .lock()
            .expect("records lock")
            .iter()
            .map(|(correlation_id, _)| correlation_id.clone())
            .collect()
    }
}

#[async_trait]
impl RecordDispatcher for CountingDispatcher {
    async fn dispatch(
        &self,
        envelope: &Envelope,
        correlation_id: Option<&str>,
    ) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("records lock")
            .push((correlation_id.map(str::to_owned), envelope.body().to_owned()));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("listener rejected the record");
        }
        Ok(())
    }
}
