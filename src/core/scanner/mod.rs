// src/core/scanner/mod.rs

//! The scanner contract and the static registry of built-in scanners.
//!
//! A scanner declares its result columns and a handful of capability flags
//! the engine inspects, then turns a domain into a JSON payload (`scan`) and
//! that payload into rows (`to_rows`).

pub mod dns_scanner;
pub mod fingerprint_scanner;
pub mod headers_scanner;
pub mod noop_scanner;
pub mod pageload_scanner;
pub mod ssl_scanner;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::environment::{Environment, Overrides};
use crate::core::error::{SweepError, SweepResult};
use crate::core::options::RunOptions;
use crate::core::unit::Row;

/// Failures raised by scan logic. The engine records these per unit.
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Could not parse scan output: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ScannerError {
    fn from(e: serde_json::Error) -> Self {
        ScannerError::Parse(e.to_string())
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ordered result columns; every row from `to_rows` matches this length.
    fn headers(&self) -> &'static [&'static str];

    /// External command that must be on `PATH` for this scanner to run.
    fn command(&self) -> Option<&'static str> {
        None
    }

    /// Pool size override for this scanner.
    fn workers(&self) -> Option<usize> {
        None
    }

    fn remote_eligible(&self) -> bool {
        false
    }

    /// Run through the headless browser shim instead of calling `scan`.
    fn browser_bridged(&self) -> bool {
        false
    }

    /// Scanner-wide setup. `None` vetoes the whole run.
    async fn init(&self, _env: &Environment, _options: &RunOptions) -> Option<Overrides> {
        Some(Overrides::new())
    }

    /// Per-domain setup. `None` skips the domain for this scanner.
    async fn init_domain(
        &self,
        _domain: &str,
        _env: &Environment,
        _options: &RunOptions,
    ) -> Option<Overrides> {
        Some(Overrides::new())
    }

    async fn scan(
        &self,
        domain: &str,
        env: &Environment,
        options: &RunOptions,
    ) -> Result<Option<Value>, ScannerError>;

    fn to_rows(&self, data: &Value) -> Vec<Row>;
}

type Constructor = fn() -> Arc<dyn Scanner>;

fn noop() -> Arc<dyn Scanner> {
    Arc::new(noop_scanner::NoopScanner)
}

fn headers() -> Arc<dyn Scanner> {
    Arc::new(headers_scanner::HeadersScanner)
}

fn ssl() -> Arc<dyn Scanner> {
    Arc::new(ssl_scanner::SslScanner)
}

fn dns() -> Arc<dyn Scanner> {
    Arc::new(dns_scanner::DnsScanner)
}

fn fingerprint() -> Arc<dyn Scanner> {
    Arc::new(fingerprint_scanner::FingerprintScanner)
}

fn pageload() -> Arc<dyn Scanner> {
    Arc::new(pageload_scanner::PageloadScanner)
}

/// Every scanner this binary knows about, by name.
static REGISTRY: &[(&str, Constructor)] = &[
    ("noop", noop),
    ("headers", headers),
    ("ssl", ssl),
    ("dns", dns),
    ("fingerprint", fingerprint),
    ("pageload", pageload),
];

pub fn available() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

pub fn lookup(name: &str) -> Option<Arc<dyn Scanner>> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, construct)| construct())
}

/// Resolve a comma-separated list of scanner names, failing on the first
/// unknown name or missing canonical command.
pub fn resolve(names: &str) -> SweepResult<Vec<Arc<dyn Scanner>>> {
    let mut scanners = Vec::new();
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let scanner = lookup(name).ok_or_else(|| SweepError::UnknownScanner(name.to_string()))?;
        check_command(scanner.as_ref())?;
        debug!(scanner = name, "Resolved scanner.");
        scanners.push(scanner);
    }

    if scanners.is_empty() {
        return Err(SweepError::MissingInput("--scan must name at least one scanner".into()));
    }
    Ok(scanners)
}

/// Verify the scanner's canonical command exists on `PATH`.
pub fn check_command(scanner: &dyn Scanner) -> SweepResult<()> {
    if let Some(command) = scanner.command() {
        if which::which(command).is_err() {
            warn!(scanner = scanner.name(), command, "No command found.");
            return Err(SweepError::MissingCommand {
                scanner: scanner.name().to_string(),
                command: command.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_name_resolves_to_itself() {
        for name in available() {
            let scanner = lookup(name).unwrap();
            assert_eq!(scanner.name(), name);
            assert!(!scanner.headers().is_empty());
        }
    }

    #[test]
    fn test_unknown_scanner_fails_resolution() {
        match resolve("noop,nope") {
            Err(SweepError::UnknownScanner(name)) => assert_eq!(name, "nope"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("resolution should fail"),
        }
    }

    #[test]
    fn test_resolve_keeps_order_and_trims() {
        let scanners = resolve(" headers , noop").unwrap();
        let names: Vec<_> = scanners.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["headers", "noop"]);
    }

    #[test]
    fn test_empty_list_is_missing_input() {
        assert!(matches!(resolve(" , "), Err(SweepError::MissingInput(_))));
    }

    struct NeedsCommand;

    #[async_trait]
    impl Scanner for NeedsCommand {
        fn name(&self) -> &'static str {
            "needs-command"
        }
        fn headers(&self) -> &'static [&'static str] {
            &["X"]
        }
        fn command(&self) -> Option<&'static str> {
            Some("definitely-not-an-installed-command-4b1d")
        }
        async fn scan(
            &self,
            _domain: &str,
            _env: &Environment,
            _options: &RunOptions,
        ) -> Result<Option<Value>, ScannerError> {
            Ok(None)
        }
        fn to_rows(&self, _data: &Value) -> Vec<Row> {
            Vec::new()
        }
    }

    #[test]
    fn test_missing_command_is_fatal() {
        assert!(matches!(check_command(&NeedsCommand), Err(SweepError::MissingCommand { .. })));
    }
}
