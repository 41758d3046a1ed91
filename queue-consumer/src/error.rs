use thiserror::Error;

/// The proxy operation that was in flight when a gateway error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAction {
    CreateInstance,
    DestroyInstance,
    FetchRecords,
    CommitOffsets,
}

impl std::fmt::Display for ProxyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self {
            ProxyAction::CreateInstance => "create consumer instance",
            ProxyAction::DestroyInstance => "destroy consumer instance",
            ProxyAction::FetchRecords => "fetch records",
            ProxyAction::CommitOffsets => "commit offsets",
        };
        f.write_str(action)
    }
}

/// Errors surfaced by the queue proxy gateway. All of them force the
/// consumer to discard its instance and start over after a backoff.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("unable to {action}: proxy request failed: {source}")]
    Transport {
        action: ProxyAction,
        #[source]
        source: reqwest::Error,
    },

    #[error("unable to {action}: proxy returned {status}")]
    UnexpectedStatus {
        action: ProxyAction,
        status: http::StatusCode,
    },

    #[error("unable to {action}: malformed proxy response: {source}")]
    MalformedResponse {
        action: ProxyAction,
        #[source]
        source: anyhow::Error,
    },
}

impl GatewayError {
    pub fn action(&self) -> ProxyAction {
        match self {
            GatewayError::Transport { action, .. } => *action,
            GatewayError::UnexpectedStatus { action, .. } => *action,
            GatewayError::MalformedResponse { action, .. } => *action,
        }
    }
}

/// Errors from splitting a record payload into an envelope. Record-level:
/// the offending record is logged and skipped, the batch goes on.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("no blank line between headers and body")]
    MissingHeaderTerminator,
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
}

/// Errors surfaced by the stream supervisor lifecycle.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("shutdown grace period elapsed with {stalled} of {total} streams still running")]
    ShutdownTimeout { stalled: usize, total: usize },
}
