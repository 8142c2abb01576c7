// src/core/unit.rs

//! The outcome of one (domain, scanner) unit, plus the clock and formatting
//! helpers shared by the writer, the reconciler, and the run recorder.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One output row as produced by a scanner's `to_rows`.
pub type Row = Vec<Value>;

/// Execution details reported by the remote backend for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteMeta {
    pub request_id: Option<String>,
    pub log_group_name: Option<String>,
    pub log_stream_name: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub memory_limit: Option<Value>,
    pub measured_duration: Option<f64>,
}

impl RemoteMeta {
    /// Fill in whatever the function reported about itself. The request id
    /// from the invocation envelope takes precedence when both exist.
    pub fn merge_reported(&mut self, reported: RemoteMeta) {
        if self.request_id.is_none() {
            self.request_id = reported.request_id;
        }
        self.log_group_name = reported.log_group_name.or(self.log_group_name.take());
        self.log_stream_name = reported.log_stream_name.or(self.log_stream_name.take());
        self.start_time = reported.start_time.or(self.start_time);
        self.end_time = reported.end_time.or(self.end_time);
        self.memory_limit = reported.memory_limit.or(self.memory_limit.take());
        self.measured_duration = reported.measured_duration.or(self.measured_duration);
    }
}

/// Timing for a unit. `duration` is always exactly `end_time - start_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitMeta {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub remote: Option<RemoteMeta>,
}

impl UnitMeta {
    pub fn new(start_time: f64, end_time: f64, remote: Option<RemoteMeta>) -> Self {
        Self { start_time, end_time, duration: end_time - start_time, remote }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub domain: String,
    pub rows: Vec<Row>,
    pub errors: Vec<String>,
    /// Present only when metadata collection was requested.
    pub meta: Option<UnitMeta>,
}

impl UnitOutcome {
    pub fn failed(domain: &str, error: String) -> Self {
        Self { domain: domain.to_string(), rows: Vec::new(), errors: vec![error], meta: None }
    }
}

/// Seconds since the epoch, with microsecond precision.
pub fn now_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}

/// RFC 3339 timestamp in UTC for an epoch-seconds value.
pub fn utc_timestamp(seconds: f64) -> Option<String> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, false))
}

/// Inverse of [`utc_timestamp`].
pub fn parse_utc_timestamp(value: &str) -> Option<f64> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.timestamp_micros() as f64 / 1_000_000.0)
}

/// Durations are always written down to the microsecond.
pub fn just_microseconds(duration: f64) -> String {
    format!("{duration:.6}")
}

/// Render a row cell for CSV output.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Scan data that counts as "nothing came back".
pub fn is_empty_data(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
