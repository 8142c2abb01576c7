// src/core/options.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum::{Display, EnumString};

/// Default pool size when neither the run nor the scanner asks for one.
pub const DEFAULT_WORKERS: usize = 10;

/// Hard ceiling applied to every resolved worker count.
pub const MAX_WORKERS: usize = 1000;

/// Function names on the remote backend are `<prefix><scanner name>`.
pub const DEFAULT_FUNCTION_PREFIX: &str = "task_";

/// Where a unit's scan logic runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Local,
    Remote,
}

/// Run-wide options. Every component and every scanner sees the same value,
/// and remote units receive it serialized in their payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    pub output: PathBuf,
    pub mode: ExecutionMode,
    pub workers: usize,
    pub serial: bool,
    /// Read existing cache entries instead of rescanning.
    pub cache: bool,
    /// Persist unit results into the cache directory.
    pub write_cache: bool,
    pub meta: bool,
    pub lambda_details: bool,
    pub sort: bool,
    pub suffix: Option<String>,
    pub function_prefix: String,
    pub lambda_endpoint: Option<String>,
    pub logs_endpoint: Option<String>,
    pub bridge_program: String,
    pub bridge_script: PathBuf,
    pub suffix_list: Option<PathBuf>,
    /// Scanner-specific knobs passed as `--set key=value`.
    pub extra: BTreeMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from("./"),
            mode: ExecutionMode::Local,
            workers: DEFAULT_WORKERS,
            serial: false,
            cache: false,
            write_cache: true,
            meta: false,
            lambda_details: false,
            sort: false,
            suffix: None,
            function_prefix: DEFAULT_FUNCTION_PREFIX.to_string(),
            lambda_endpoint: None,
            logs_endpoint: None,
            bridge_program: "node".to_string(),
            bridge_script: PathBuf::from("scripts/headless_bridge.js"),
            suffix_list: None,
            extra: BTreeMap::new(),
        }
    }
}

impl RunOptions {
    pub fn cache_dir(&self) -> PathBuf {
        self.output.join("cache")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output.join("results")
    }

    pub fn is_remote(&self) -> bool {
        self.mode == ExecutionMode::Remote
    }

    /// Reads a `--set` value, parsed into whatever the caller needs.
    pub fn extra<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.extra.get(key).and_then(|v| v.parse().ok())
    }
}
