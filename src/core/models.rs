// src/core/models.rs

use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

// --- Reusable Result Types ---

// A lookup that can succeed with a value, succeed with nothing found, or fail.
pub type ScanResult<T> = Result<Option<T>, String>;

// --- Findings ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

// A single analysis finding, identified by a stable machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisFinding {
    pub severity: Severity,
    pub code: String,
}

impl AnalysisFinding {
    pub fn new(severity: Severity, code: &str) -> Self {
        Self { severity, code: code.to_string() }
    }
}

/// Joins finding codes into a single CSV cell, `None` when there are none.
pub fn finding_codes(findings: &[AnalysisFinding]) -> Option<String> {
    if findings.is_empty() {
        None
    } else {
        Some(findings.iter().map(|f| f.code.as_str()).collect::<Vec<_>>().join(" "))
    }
}

// --- DNS Scanner Models ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpfData {
    pub record: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmarcData {
    pub record: String,
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkimRecord {
    pub selector: String,
    pub record: String,
}

// SPF, DMARC, DKIM and CAA lookups for one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsResults {
    pub spf: ScanResult<SpfData>,
    pub dmarc: ScanResult<DmarcData>,
    pub dkim: ScanResult<Vec<DkimRecord>>,
    pub caa: ScanResult<Vec<String>>,
    pub analysis: Vec<AnalysisFinding>,
}

impl Default for DnsResults {
    fn default() -> Self {
        Self {
            spf: Ok(None),
            dmarc: Ok(None),
            dkim: Ok(None),
            caa: Ok(None),
            analysis: Vec::new(),
        }
    }
}

// --- SSL/TLS Scanner Models ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslData {
    pub is_valid: bool,
    pub certificate_info: CertificateInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslResults {
    pub scan: ScanResult<SslData>,
    pub analysis: Vec<AnalysisFinding>,
}

impl Default for SslResults {
    fn default() -> Self {
        Self {
            scan: Ok(None),
            analysis: Vec::new(),
        }
    }
}

// --- HTTP Header Scanner Models ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderData {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadersResults {
    pub hsts: ScanResult<HeaderData>,
    pub csp: ScanResult<HeaderData>,
    pub x_frame_options: ScanResult<HeaderData>,
    pub x_content_type_options: ScanResult<HeaderData>,
    pub error: Option<String>,
    pub analysis: Vec<AnalysisFinding>,
}

impl Default for HeadersResults {
    fn default() -> Self {
        Self {
            hsts: Ok(None),
            csp: Ok(None),
            x_frame_options: Ok(None),
            x_content_type_options: Ok(None),
            error: None,
            analysis: Vec::new(),
        }
    }
}

impl HeadersResults {
    /// Value of a header lookup for a CSV cell.
    pub fn cell(result: &ScanResult<HeaderData>) -> Option<String> {
        match result {
            Ok(Some(header)) => Some(header.value.clone()),
            _ => None,
        }
    }
}

// --- Fingerprint Scanner Models ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintResults {
    pub technologies: Result<Vec<Technology>, String>,
}

impl Default for FingerprintResults {
    fn default() -> Self {
        Self {
            technologies: Ok(Vec::new()),
        }
    }
}

// --- Page Load Models ---

// What the headless browser shim reports for one page load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PageloadResults {
    pub url: Option<String>,
    pub load_time_ms: Option<f64>,
    pub dom_content_loaded_ms: Option<f64>,
    pub requests: Option<u64>,
    pub transfer_bytes: Option<u64>,
    pub error: Option<String>,
}
