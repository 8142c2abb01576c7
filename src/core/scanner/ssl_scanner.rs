// src/core/scanner/ssl_scanner.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use serde_json::{Value, json};
use std::net::TcpStream;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};
use x509_parser::prelude::*;

use crate::core::environment::Environment;
use crate::core::models::{AnalysisFinding, CertificateInfo, ScanResult, Severity, SslData, SslResults, finding_codes};
use crate::core::options::RunOptions;
use crate::core::scanner::{Scanner, ScannerError};
use crate::core::unit::Row;

/// Handshakes on port 443 and inspects the leaf certificate's validity window.
pub struct SslScanner;

#[async_trait]
impl Scanner for SslScanner {
    fn name(&self) -> &'static str {
        "ssl"
    }

    fn headers(&self) -> &'static [&'static str] {
        &[
            "Certificate Found",
            "Valid",
            "Subject",
            "Issuer",
            "Not Before",
            "Not After",
            "Days Until Expiry",
            "Handshake Error",
            "Findings",
        ]
    }

    // Each unit parks a blocking thread for the handshake.
    fn workers(&self) -> Option<usize> {
        Some(50)
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
        Ok(Some(serde_json::to_value(run_ssl_scan(domain).await)?))
    }

    fn to_rows(&self, data: &Value) -> Vec<Row> {
        let results: SslResults = match serde_json::from_value(data.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Cached ssl data does not match the current schema.");
                return Vec::new();
            }
        };
        let findings = json!(finding_codes(&results.analysis));

        let row = match &results.scan {
            Ok(Some(ssl)) => {
                let info = &ssl.certificate_info;
                vec![
                    json!(true),
                    json!(ssl.is_valid),
                    json!(info.subject_name),
                    json!(info.issuer_name),
                    json!(info.not_before.to_rfc3339()),
                    json!(info.not_after.to_rfc3339()),
                    json!(info.days_until_expiry),
                    Value::Null,
                    findings,
                ]
            }
            Ok(None) => {
                let mut row = vec![json!(false)];
                row.extend(std::iter::repeat_n(Value::Null, 7));
                row.push(findings);
                row
            }
            Err(e) => {
                let mut row = vec![json!(false)];
                row.extend(std::iter::repeat_n(Value::Null, 6));
                row.push(json!(e));
                row.push(findings);
                row
            }
        };
        vec![row]
    }
}

pub async fn run_ssl_scan(target: &str) -> SslResults {
    info!(target, "Starting SSL/TLS scan.");
    let target_owned = target.to_string();

    debug!("Spawning blocking task for TLS connection.");
    let scan_result = spawn_blocking(move || perform_tls_scan(&target_owned))
        .await
        .unwrap_or_else(|e| {
            error!(panic = %e, "Blocking SSL scan task panicked!");
            Err(format!("Task panicked: {e}"))
        });

    let mut results = SslResults {
        scan: scan_result,
        analysis: Vec::new(),
    };

    results.analysis = analyze_ssl_results(&results);

    info!(findings = %results.analysis.len(), "SSL/TLS scan finished.");
    results
}

fn perform_tls_scan(target: &str) -> ScanResult<SslData> {
    debug!(target, "Performing TLS connection and handshake.");

    let connector = TlsConnector::new().map_err(|e| {
        error!(error = %e, "Failed to create TlsConnector");
        format!("TlsConnector Error: {}", e)
    })?;

    let stream = TcpStream::connect((target, 443)).map_err(|e| {
        warn!(error = %e, "TCP connection failed");
        format!("TCP Connection Error: {}", e)
    })?;

    let stream = connector.connect(target, stream).map_err(|e| {
        warn!(error = %e, "TLS handshake failed");
        format!("TLS Handshake Error: {}", e)
    })?;

    let cert = match stream.peer_certificate() {
        Ok(Some(c)) => c,
        Ok(None) => {
            debug!("TLS connection successful, but no peer certificate provided.");
            return Ok(None)
        },
        Err(e) => {
            error!(error = %e, "Failed to retrieve peer certificate from stream");
            return Err(format!("Could not get peer certificate: {}", e))
        },
    };

    let cert_der = cert.to_der().map_err(|e| {
        format!("Could not convert certificate to DER: {}", e)
    })?;

    let (_, x509) = parse_x509_certificate(&cert_der).map_err(|e| {
        error!(error = %e, "Failed to parse X.509 certificate");
        format!("X.509 Parse Error: {}", e)
    })?;

    debug!(subject = %x509.subject(), issuer = %x509.issuer(), "Parsed certificate.");

    let validity = x509.validity();
    Ok(Some(ssl_data_from(
        x509.subject().to_string(),
        x509.issuer().to_string(),
        asn1_time_to_chrono_utc(&validity.not_before),
        asn1_time_to_chrono_utc(&validity.not_after),
        Utc::now(),
    )))
}

fn ssl_data_from(
    subject_name: String,
    issuer_name: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SslData {
    SslData {
        is_valid: now > not_before && now < not_after,
        certificate_info: CertificateInfo {
            subject_name,
            issuer_name,
            not_before,
            not_after,
            days_until_expiry: not_after.signed_duration_since(now).num_days(),
        },
    }
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn analyze_ssl_results(results: &SslResults) -> Vec<AnalysisFinding> {
    let mut analyses = Vec::new();

    match &results.scan {
        Err(_) => {
            analyses.push(AnalysisFinding::new(Severity::Critical, "SSL_HANDSHAKE_FAILED"));
        },
        Ok(None) => {
            analyses.push(AnalysisFinding::new(Severity::Warning, "SSL_NO_CERTIFICATE_FOUND"));
        },
        Ok(Some(ssl_data)) => {
            if !ssl_data.is_valid {
                debug!(expiry_date = %ssl_data.certificate_info.not_after, "Certificate is expired.");
                analyses.push(AnalysisFinding::new(Severity::Critical, "SSL_EXPIRED"));
            }

            let days_left = ssl_data.certificate_info.days_until_expiry;
            if (0..=30).contains(&days_left) {
                analyses.push(AnalysisFinding::new(Severity::Warning, "SSL_EXPIRING_SOON"));
            }
        }
    }

    analyses
}
