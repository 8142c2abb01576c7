// src/core/remote.rs

//! Client handles for the function-as-a-service backend and its log store.
//!
//! Both are traits so the dispatch engine and the reconciler can be driven
//! by in-memory fakes. The HTTP implementations speak the Lambda `Invoke`
//! REST shape and the CloudWatch Logs `FilterLogEvents` JSON 1.1 shape
//! against a configurable endpoint, which is expected to handle request
//! signing (a signing proxy or a local emulator).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::error::{SweepError, SweepResult};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("timed out waiting for the remote backend: {0}")]
    Timeout(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    Throttled(String),

    #[error("remote service error: {message}")]
    Service { message: String, request_id: Option<String> },

    #[error("transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn service(message: impl Into<String>) -> Self {
        RemoteError::Service { message: message.into(), request_id: None }
    }

    /// The backend's id for the failed request, when it sent one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            RemoteError::Service { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// What came back from one synchronous invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub request_id: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: i64,
    pub ingestion_time: i64,
    pub message: String,
}

#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function: &str, payload: &Value) -> Result<Invocation, RemoteError>;
}

#[async_trait]
pub trait LogQuery: Send + Sync {
    async fn filter_events(&self, group: &str, stream: &str, pattern: &str) -> Result<Vec<LogEvent>, RemoteError>;
}

fn http_client() -> SweepResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(SweepError::from)
}

fn trimmed(endpoint: &str) -> SweepResult<String> {
    let parsed = url::Url::parse(endpoint).map_err(|e| SweepError::RemoteSetup(format!("{endpoint}: {e}")))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

pub struct HttpFunctionInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFunctionInvoker {
    pub fn new(endpoint: &str) -> SweepResult<Self> {
        Ok(Self { client: http_client()?, endpoint: trimmed(endpoint)? })
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctionInvoker {
    async fn invoke(&self, function: &str, payload: &Value) -> Result<Invocation, RemoteError> {
        let url = format!("{}/2015-03-31/functions/{}/invocations", self.endpoint, function);
        debug!(function, "Invoking remote function.");

        let response = self
            .client
            .post(&url)
            .header("X-Amz-Invocation-Type", "RequestResponse")
            .json(payload)
            .send()
            .await?;

        let request_id = response
            .headers()
            .get("x-amz-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(rejected_invocation(service_error(&body, status.as_u16()), request_id));
        }

        match serde_json::from_str(&body) {
            Ok(payload) => Ok(Invocation { request_id, payload }),
            Err(e) => Err(RemoteError::Service { message: format!("unparseable payload: {e}"), request_id }),
        }
    }
}

pub struct HttpLogQuery {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLogQuery {
    pub fn new(endpoint: &str) -> SweepResult<Self> {
        Ok(Self { client: http_client()?, endpoint: trimmed(endpoint)? })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterLogEventsResponse {
    #[serde(default)]
    events: Vec<LogEvent>,
    next_token: Option<String>,
}

#[async_trait]
impl LogQuery for HttpLogQuery {
    async fn filter_events(&self, group: &str, stream: &str, pattern: &str) -> Result<Vec<LogEvent>, RemoteError> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({
                "logGroupName": group,
                "logStreamNames": [stream],
                "filterPattern": pattern,
            });
            if let Some(token) = &next_token {
                body["nextToken"] = json!(token);
            }

            let response = self
                .client
                .post(format!("{}/", self.endpoint))
                .header("Content-Type", "application/x-amz-json-1.1")
                .header("X-Amz-Target", "Logs_20140328.FilterLogEvents")
                .body(body.to_string())
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;
            if !status.is_success() {
                return Err(service_error(&text, status.as_u16()));
            }

            let page: FilterLogEventsResponse =
                serde_json::from_str(&text).map_err(|e| RemoteError::service(format!("unparseable log page: {e}")))?;
            events.extend(page.events);

            match page.next_token {
                Some(token) if next_token.as_ref() != Some(&token) => next_token = Some(token),
                _ => break,
            }
        }

        Ok(events)
    }
}

/// Maps an AWS-style JSON error body onto a typed error.
fn service_error(body: &str, status: u16) -> RemoteError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let kind = parsed
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t))
        .unwrap_or_default();
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();

    warn!(status, kind, "Remote backend returned an error.");
    match kind {
        "AccessDeniedException" => RemoteError::AccessDenied(message),
        "ThrottlingException" | "TooManyRequestsException" => RemoteError::Throttled(message),
        _ => RemoteError::service(format!("{status} {kind} {message}").trim()),
    }
}

/// A failed invocation keeps the request id the backend assigned to it.
fn rejected_invocation(error: RemoteError, request_id: Option<String>) -> RemoteError {
    let message = match error {
        RemoteError::Service { message, .. } => message,
        other => other.to_string(),
    };
    RemoteError::Service { message, request_id }
}
