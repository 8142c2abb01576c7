// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

use crate::core::options::{DEFAULT_FUNCTION_PREFIX, DEFAULT_WORKERS, ExecutionMode, RunOptions};

/// Command-line arguments for a sweep.
#[derive(Parser, Debug, Clone)]
#[command(name = "vanguard-sweep")]
#[command(about = "Run domains through pluggable scanners, locally or on a remote function backend")]
#[command(version)]
pub struct Args {
    /// A domain, a URL, a path to a CSV of domains, or an http(s) URL to one
    #[arg(value_name = "DOMAINS")]
    pub domains: String,

    /// Comma-separated scanner names, e.g. "headers,ssl"
    #[arg(long, value_name = "LIST")]
    pub scan: String,

    /// Worker pool size, unless the scanner asks for its own
    #[arg(long, value_name = "N", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// One unit at a time
    #[arg(long)]
    pub serial: bool,

    /// Reuse cached results instead of rescanning
    #[arg(long)]
    pub cache: bool,

    /// Do not write scan results into the cache
    #[arg(long = "no-write-cache")]
    pub no_write_cache: bool,

    /// Run remote-eligible scanners on the function backend
    #[arg(long, visible_alias = "remote")]
    pub lambda: bool,

    /// Add per-unit errors and timing columns
    #[arg(long)]
    pub meta: bool,

    /// After the run, backfill reported duration and memory from the log store
    #[arg(long = "lambda-details", requires_all = ["meta", "lambda"])]
    pub lambda_details: bool,

    /// Sort each results CSV once it is complete
    #[arg(long)]
    pub sort: bool,

    /// Suffix appended to every domain read from a CSV, e.g. "gov"
    #[arg(long, value_name = "SUFFIX")]
    pub suffix: Option<String>,

    /// Root directory for cache/ and results/
    #[arg(long, value_name = "DIR", default_value = "./")]
    pub output: PathBuf,

    /// Function backend endpoint (Lambda Invoke API shape)
    #[arg(long = "lambda-endpoint", value_name = "URL", env = "VANGUARD_SWEEP_LAMBDA_ENDPOINT")]
    pub lambda_endpoint: Option<String>,

    /// Log store endpoint (CloudWatch Logs API shape)
    #[arg(long = "logs-endpoint", value_name = "URL", env = "VANGUARD_SWEEP_LOGS_ENDPOINT")]
    pub logs_endpoint: Option<String>,

    /// Remote function names are <PREFIX><scanner>
    #[arg(long = "function-prefix", value_name = "PREFIX", default_value = DEFAULT_FUNCTION_PREFIX)]
    pub function_prefix: String,

    /// Script driving the headless browser for bridged scanners
    #[arg(long = "headless-bridge", value_name = "SCRIPT", default_value = "scripts/headless_bridge.js")]
    pub headless_bridge: PathBuf,

    /// Program used to run the headless bridge script
    #[arg(long = "bridge-program", value_name = "PROGRAM", default_value = "node")]
    pub bridge_program: String,

    /// Local Public Suffix List file (otherwise cached or downloaded)
    #[arg(long = "suffix-list", value_name = "FILE")]
    pub suffix_list: Option<PathBuf>,

    /// Scanner-specific option, repeatable: --set noop-delay=2
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Shorthand for --log debug
    #[arg(long)]
    pub debug: bool,

    /// Log level for the terminal and the log file
    #[arg(long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log: Option<String>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

impl Args {
    /// `--debug`, then `--log`; `None` leaves the choice to the environment.
    pub fn log_level(&self) -> Option<String> {
        if self.debug {
            Some("debug".to_string())
        } else {
            self.log.clone()
        }
    }

    pub fn into_options(self) -> RunOptions {
        RunOptions {
            output: self.output,
            mode: if self.lambda { ExecutionMode::Remote } else { ExecutionMode::Local },
            workers: self.workers,
            serial: self.serial,
            cache: self.cache,
            write_cache: !self.no_write_cache,
            meta: self.meta,
            lambda_details: self.lambda_details,
            sort: self.sort,
            suffix: self.suffix,
            function_prefix: self.function_prefix,
            lambda_endpoint: self.lambda_endpoint,
            logs_endpoint: self.logs_endpoint,
            bridge_program: self.bridge_program,
            bridge_script: self.headless_bridge,
            suffix_list: self.suffix_list,
            extra: self.set.into_iter().collect(),
        }
    }
}
