// src/core/scanner/pageload_scanner.rs

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::core::environment::{Environment, Overrides};
use crate::core::models::PageloadResults;
use crate::core::options::RunOptions;
use crate::core::scanner::{Scanner, ScannerError};
use crate::core::unit::Row;

/// Page load timing measured in a headless browser. The measurement itself
/// lives in the browser shim script; this side only shapes the result.
pub struct PageloadScanner;

#[async_trait]
impl Scanner for PageloadScanner {
    fn name(&self) -> &'static str {
        "pageload"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["URL", "Load Time (ms)", "DOMContentLoaded (ms)", "Requests", "Transfer Bytes", "Error"]
    }

    fn command(&self) -> Option<&'static str> {
        Some("node")
    }

    // Each unit drives a whole browser.
    fn workers(&self) -> Option<usize> {
        Some(5)
    }

    fn browser_bridged(&self) -> bool {
        true
    }

    /// Without the shim script every unit would fail, so refuse to start.
    async fn init(&self, _env: &Environment, options: &RunOptions) -> Option<Overrides> {
        if !options.bridge_script.exists() {
            error!(script = %options.bridge_script.display(), "Headless bridge script not found.");
            return None;
        }
        let mut overrides = Overrides::new();
        overrides.insert("pageload_url_scheme".into(), json!("https"));
        Some(overrides)
    }

    async fn scan(&self, domain: &str, _env: &Environment, _options: &RunOptions) -> Result<Option<Value>, ScannerError> {
        warn!(domain, "pageload was called directly instead of through the browser bridge.");
        Err(ScannerError::Other("pageload only runs through the headless browser bridge".into()))
    }

    fn to_rows(&self, data: &Value) -> Vec<Row> {
        let results: PageloadResults = match serde_json::from_value(data.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Bridge output does not match the pageload schema.");
                return Vec::new();
            }
        };
        vec![vec![
            json!(results.url),
            json!(results.load_time_ms),
            json!(results.dom_content_loaded_ms),
            json!(results.requests),
            json!(results.transfer_bytes),
            json!(results.error),
        ]]
    }
}
