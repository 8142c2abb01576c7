// src/core/run_meta.rs

//! The run-wide record written to `<output>/results/meta.json` once every
//! scanner (and any reconciliation) is done.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::dispatch::ScannerRun;
use crate::core::error::{SweepError, SweepResult};
use crate::core::options::RunOptions;
use crate::core::unit::{now_seconds, utc_timestamp};

pub const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub start_time: String,
    pub end_time: String,
    pub duration: f64,
}

impl Timing {
    fn between(start: f64, end: f64) -> Self {
        Self {
            start_time: utc_timestamp(start).unwrap_or_default(),
            end_time: utc_timestamp(end).unwrap_or_default(),
            duration: round_micros(end - start),
        }
    }
}

fn round_micros(seconds: f64) -> f64 {
    (seconds * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub scan_uuid: String,
    pub command: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: f64,
    pub scanners: BTreeMap<String, Timing>,
}

/// Collects timings while the run is in progress.
#[derive(Debug)]
pub struct RunRecorder {
    scan_uuid: String,
    command: String,
    start_time: f64,
    scanners: BTreeMap<String, Timing>,
}

impl RunRecorder {
    pub fn start(scan_uuid: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            scan_uuid: scan_uuid.into(),
            command: command.into(),
            start_time: now_seconds(),
            scanners: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, run: &ScannerRun) {
        self.scanners.insert(run.name.clone(), Timing::between(run.start_time, run.end_time));
    }

    pub fn finish(self) -> RunMetadata {
        let overall = Timing::between(self.start_time, now_seconds());
        RunMetadata {
            scan_uuid: self.scan_uuid,
            command: self.command,
            start_time: overall.start_time,
            end_time: overall.end_time,
            duration: overall.duration,
            scanners: self.scanners,
        }
    }
}

pub fn meta_path(options: &RunOptions) -> PathBuf {
    options.results_dir().join(META_FILE)
}

/// Pretty-printed with keys in sorted order.
pub fn write_metadata(path: &Path, metadata: &RunMetadata) -> SweepResult<()> {
    // `Value` objects keep their keys ordered.
    let value = serde_json::to_value(metadata)?;
    let text = serde_json::to_string_pretty(&value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| SweepError::io(path, e))?;
    info!(path = %path.display(), "Run metadata written.");
    Ok(())
}
