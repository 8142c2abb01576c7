// src/core/scanner/dns_scanner.rs

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveError;
use hickory_resolver::proto::rr::RecordType;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::environment::{Environment, Overrides};
use crate::core::models::{
    AnalysisFinding, DkimRecord, DmarcData, DnsResults, ScanResult, Severity, SpfData, finding_codes,
};
use crate::core::options::RunOptions;
use crate::core::scanner::{Scanner, ScannerError};
use crate::core::unit::Row;

/// Selectors probed when the domain's DKIM selector is not known.
const COMMON_DKIM_SELECTORS: &[&str] = &["google", "selector1", "selector2", "default", "dkim"];

/// Email-authentication and CAA records for the domain's zone apex.
pub struct DnsScanner;

#[async_trait]
impl Scanner for DnsScanner {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["SPF Record", "DMARC Record", "DMARC Policy", "DKIM Selectors", "CAA Records", "Lookup Errors", "Findings"]
    }

    /// Mail records live at the apex, so `www.` hosts are queried there.
    async fn init_domain(&self, domain: &str, _env: &Environment, _options: &RunOptions) -> Option<Overrides> {
        let apex = domain.strip_prefix("www.").unwrap_or(domain);
        let mut overrides = Overrides::new();
        overrides.insert("dns_target".into(), json!(apex));
        Some(overrides)
    }

    async fn scan(&self, domain: &str, env: &Environment, _options: &RunOptions) -> Result<Option<Value>, ScannerError> {
        let target = env.get_str("dns_target").unwrap_or(domain);
        Ok(Some(serde_json::to_value(run_dns_scan(target).await)?))
    }

    fn to_rows(&self, data: &Value) -> Vec<Row> {
        let results: DnsResults = match serde_json::from_value(data.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Cached dns data does not match the current schema.");
                return Vec::new();
            }
        };

        let errors: Vec<&str> = [
            results.spf.as_ref().err(),
            results.dmarc.as_ref().err(),
            results.dkim.as_ref().err(),
            results.caa.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();

        let dmarc = results.dmarc.as_ref().ok().and_then(Option::as_ref);
        let selectors = results.dkim.as_ref().ok().and_then(Option::as_ref).map(|records| {
            records.iter().map(|r| r.selector.as_str()).collect::<Vec<_>>().join(" ")
        });
        let caa = results.caa.as_ref().ok().and_then(Option::as_ref).map(|records| records.join(" "));

        vec![vec![
            json!(results.spf.as_ref().ok().and_then(Option::as_ref).map(|s| &s.record)),
            json!(dmarc.map(|d| &d.record)),
            json!(dmarc.and_then(|d| d.policy.as_ref())),
            json!(selectors),
            json!(caa),
            json!(if errors.is_empty() { None } else { Some(errors.join("; ")) }),
            json!(finding_codes(&results.analysis)),
        ]]
    }
}

/// Runs the SPF, DMARC, DKIM and CAA lookups concurrently, then analyzes them.
pub async fn run_dns_scan(target: &str) -> DnsResults {
    info!(target, "Starting DNS scan.");

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    let (spf, dmarc, dkim, caa) = tokio::join!(
        lookup_spf(&resolver, target),
        lookup_dmarc(&resolver, target),
        lookup_dkim(&resolver, target),
        lookup_caa(&resolver, target)
    );

    let mut results = DnsResults { spf, dmarc, dkim, caa, analysis: Vec::new() };
    results.analysis = analyze_dns_results(&results);
    info!(findings = %results.analysis.len(), "DNS scan finished.");
    results
}

fn analyze_dns_results(results: &DnsResults) -> Vec<AnalysisFinding> {
    let mut analyses = Vec::new();

    match &results.dmarc {
        Ok(Some(dmarc)) if dmarc.policy.as_deref() == Some("none") => {
            analyses.push(AnalysisFinding::new(Severity::Warning, "DNS_DMARC_POLICY_NONE"));
        }
        Ok(None) => analyses.push(AnalysisFinding::new(Severity::Critical, "DNS_DMARC_MISSING")),
        _ => {}
    }

    match &results.spf {
        Ok(Some(spf)) if spf.record.ends_with("~all") => {
            analyses.push(AnalysisFinding::new(Severity::Info, "DNS_SPF_POLICY_SOFTFAIL"));
        }
        Ok(Some(spf)) if spf.record.ends_with("?all") => {
            analyses.push(AnalysisFinding::new(Severity::Info, "DNS_SPF_POLICY_NEUTRAL"));
        }
        Ok(None) => analyses.push(AnalysisFinding::new(Severity::Warning, "DNS_SPF_MISSING")),
        _ => {}
    }

    if let Ok(None) = &results.dkim {
        analyses.push(AnalysisFinding::new(Severity::Info, "DNS_DKIM_MISSING"));
    }
    if let Ok(None) = &results.caa {
        analyses.push(AnalysisFinding::new(Severity::Info, "DNS_CAA_MISSING"));
    }

    analyses
}

async fn txt_records(resolver: &TokioAsyncResolver, name: &str) -> Result<Vec<String>, ResolveError> {
    let lookup = resolver.txt_lookup(name).await?;
    Ok(lookup.iter().map(|r| r.to_string()).collect())
}

/// SPF lives in a TXT record starting with `v=spf1`.
async fn lookup_spf(resolver: &TokioAsyncResolver, target: &str) -> ScanResult<SpfData> {
    match txt_records(resolver, target).await {
        Ok(records) => Ok(records
            .into_iter()
            .find(|r| r.starts_with("v=spf1"))
            .map(|record| SpfData { record })),
        Err(e) => {
            warn!(target, error = %e, "SPF lookup failed.");
            Err(format!("DNS Error: {}", e))
        }
    }
}

/// DMARC lives in a TXT record at `_dmarc.<domain>`.
async fn lookup_dmarc(resolver: &TokioAsyncResolver, target: &str) -> ScanResult<DmarcData> {
    let dmarc_target = format!("_dmarc.{}", target);
    match txt_records(resolver, &dmarc_target).await {
        Ok(records) => Ok(records.into_iter().next().map(|record| DmarcData {
            policy: dmarc_policy(&record),
            record,
        })),
        Err(e) => {
            warn!(target = %dmarc_target, error = %e, "DMARC lookup failed.");
            Err(format!("DNS Error: {}", e))
        }
    }
}

fn dmarc_policy(record: &str) -> Option<String> {
    record
        .split(';')
        .find(|s| s.trim().starts_with("p="))
        .and_then(|s| s.trim().split('=').nth(1))
        .map(|s| s.to_string())
}

/// Probes the common selectors at `<selector>._domainkey.<domain>`.
async fn lookup_dkim(resolver: &TokioAsyncResolver, target: &str) -> ScanResult<Vec<DkimRecord>> {
    let mut found = Vec::new();
    for selector in COMMON_DKIM_SELECTORS {
        let dkim_target = format!("{selector}._domainkey.{target}");
        match txt_records(resolver, &dkim_target).await {
            Ok(records) => found.extend(
                records
                    .into_iter()
                    .filter(|r| r.starts_with("v=DKIM1"))
                    .map(|record| DkimRecord { selector: selector.to_string(), record }),
            ),
            // Most selectors will not exist.
            Err(e) => debug!(selector, error = %e, "No DKIM record for selector."),
        }
    }

    Ok(if found.is_empty() { None } else { Some(found) })
}

async fn lookup_caa(resolver: &TokioAsyncResolver, target: &str) -> ScanResult<Vec<String>> {
    match resolver.lookup(target, RecordType::CAA).await {
        Ok(caa_lookup) => {
            let records: Vec<String> = caa_lookup.iter().map(|r| r.to_string()).collect();
            Ok(if records.is_empty() { None } else { Some(records) })
        }
        Err(e) => {
            warn!(target, error = %e, "CAA lookup failed.");
            Err(format!("DNS Error: {}", e))
        }
    }
}
