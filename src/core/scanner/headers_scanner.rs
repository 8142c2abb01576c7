// src/core/scanner/headers_scanner.rs

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::core::environment::Environment;
use crate::core::models::{AnalysisFinding, HeaderData, HeadersResults, ScanResult, Severity, finding_codes};
use crate::core::options::RunOptions;
use crate::core::scanner::{Scanner, ScannerError};
use crate::core::unit::Row;

pub const USER_AGENT: &str = "VanguardSweep/0.1";

/// Checks HSTS, CSP, X-Frame-Options and X-Content-Type-Options on the
/// domain's HTTPS landing response.
pub struct HeadersScanner;

#[async_trait]
impl Scanner for HeadersScanner {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn headers(&self) -> &'static [&'static str] {
        &[
            "Strict-Transport-Security",
            "Content-Security-Policy",
            "X-Frame-Options",
            "X-Content-Type-Options",
            "Request Error",
            "Findings",
        ]
    }

    fn remote_eligible(&self) -> bool {
        true
    }

    async fn scan(
        &self,
        domain: &str,
        _env: &Environment,
        _options: &RunOptions,
    ) -> Result<Option<Value>, ScannerError> {
        let results = run_headers_scan(domain).await;
        Ok(Some(serde_json::to_value(results)?))
    }

    fn to_rows(&self, data: &Value) -> Vec<Row> {
        let results: HeadersResults = match serde_json::from_value(data.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Cached headers data does not match the current schema.");
                return Vec::new();
            }
        };

        vec![vec![
            json!(HeadersResults::cell(&results.hsts)),
            json!(HeadersResults::cell(&results.csp)),
            json!(HeadersResults::cell(&results.x_frame_options)),
            json!(HeadersResults::cell(&results.x_content_type_options)),
            json!(results.error),
            json!(finding_codes(&results.analysis)),
        ]]
    }
}

/// Checks for the presence of a specific HTTP header in a `HeaderMap`.
///
/// Non-UTF-8 values are reported as present with a placeholder value.
fn check_header(headers: &HeaderMap, name: &str) -> ScanResult<HeaderData> {
    debug!(header_name = name, "Checking for header.");
    if let Some(value) = headers.get(name) {
        match value.to_str() {
            Ok(s) => {
                debug!(header_name = name, value = s, "Header found.");
                Ok(Some(HeaderData { value: s.to_string() }))
            },
            Err(_) => {
                warn!(header_name = name, "Header found but contained invalid UTF-8.");
                Ok(Some(HeaderData { value: "[Invalid UTF-8]".to_string() }))
            },
        }
    } else {
        debug!(header_name = name, "Header not found.");
        Ok(None)
    }
}

/// Sends a GET to `https://<target>` and collects the security headers.
///
/// Request failures are reported inside the results rather than as an error,
/// so that a dead domain still yields a row explaining why.
pub async fn run_headers_scan(target: &str) -> HeadersResults {
    info!(target, "Starting headers scan.");

    let client = match reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client for headers scan.");
            let mut results = HeadersResults::default();
            results.error = Some(format!("Failed to build HTTP client: {}", e));
            results.analysis = analyze_headers_results(&results);
            return results;
        }
    };

    let url = format!("https://{}", target);

    match client.get(&url).send().await {
        Ok(response) => {
            info!(status = %response.status(), "Received HTTP response for headers scan.");
            let mut results = headers_results_from(response.headers());
            results.analysis = analyze_headers_results(&results);
            info!(findings = %results.analysis.len(), "Headers scan finished.");
            results
        }
        Err(e) => {
            error!(url = %url, error = %e, "HTTP request failed for headers scan.");
            let mut results = HeadersResults::default();
            results.error = Some(format!("HTTP request failed: {}", e));
            results.analysis = analyze_headers_results(&results);
            results
        }
    }
}

fn headers_results_from(headers: &HeaderMap) -> HeadersResults {
    HeadersResults {
        error: None,
        hsts: check_header(headers, "strict-transport-security"),
        csp: check_header(headers, "content-security-policy"),
        x_frame_options: check_header(headers, "x-frame-options"),
        x_content_type_options: check_header(headers, "x-content-type-options"),
        analysis: Vec::new(),
    }
}

/// Flags every missing security header; a failed request is a single
/// critical finding.
fn analyze_headers_results(results: &HeadersResults) -> Vec<AnalysisFinding> {
    debug!("Analyzing collected header data.");
    let mut analyses = Vec::new();

    if results.error.is_some() {
        analyses.push(AnalysisFinding::new(Severity::Critical, "HEADERS_REQUEST_FAILED"));
        return analyses;
    }

    if let Ok(None) = &results.hsts {
        analyses.push(AnalysisFinding::new(Severity::Warning, "HEADERS_HSTS_MISSING"));
    }
    if let Ok(None) = &results.csp {
        analyses.push(AnalysisFinding::new(Severity::Warning, "HEADERS_CSP_MISSING"));
    }
    if let Ok(None) = &results.x_frame_options {
        analyses.push(AnalysisFinding::new(Severity::Warning, "HEADERS_X_FRAME_OPTIONS_MISSING"));
    }
    if let Ok(None) = &results.x_content_type_options {
        analyses.push(AnalysisFinding::new(Severity::Info, "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"));
    }

    analyses
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_missing_headers_are_flagged() {
        let mut headers = HeaderMap::new();
        headers.insert("strict-transport-security", HeaderValue::from_static("max-age=63072000"));

        let mut results = headers_results_from(&headers);
        results.analysis = analyze_headers_results(&results);

        let codes: Vec<_> = results.analysis.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(
            codes,
            vec![
                "HEADERS_CSP_MISSING",
                "HEADERS_X_FRAME_OPTIONS_MISSING",
                "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"
            ]
        );
    }

    #[test]
    fn test_request_failure_is_single_critical_finding() {
        let results = HeadersResults { error: Some("refused".into()), ..Default::default() };
        let analysis = analyze_headers_results(&results);
        assert_eq!(analysis.len(), 1);
        assert_eq!(analysis[0].severity, Severity::Critical);
    }

    #[test]
    fn test_to_rows_matches_header_width() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        let mut results = headers_results_from(&headers);
        results.analysis = analyze_headers_results(&results);

        let scanner = HeadersScanner;
        let rows = scanner.to_rows(&serde_json::to_value(&results).unwrap());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), scanner.headers().len());
        assert_eq!(rows[0][2], json!("DENY"));
        assert_eq!(rows[0][0], Value::Null);
    }
}
