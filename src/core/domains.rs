// src/core/domains.rs

//! Turning the positional input into the list of domains to scan.
//!
//! The input is a single domain (or a URL, reduced to its host), a path to
//! a CSV whose first column lists domains, or an `http(s)` URL to such a CSV.

use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::cache::CacheStore;
use crate::core::csv::parse_records;
use crate::core::error::{SweepError, SweepResult};

/// Where a downloaded domain list is kept.
pub const DOWNLOADED_DOMAINS_FILE: &str = "domains.csv";

/// Resolve the input to a finite, ordered list of domains.
pub async fn domains_from(input: &str, suffix: Option<&str>, cache: &CacheStore) -> SweepResult<Vec<String>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SweepError::MissingInput("a domain or a CSV of domains".into()));
    }

    let is_url = input.starts_with("http://") || input.starts_with("https://");

    if is_url && input.ends_with(".csv") {
        let destination = cache.single(DOWNLOADED_DOMAINS_FILE);
        download(input, &destination).await?;
        return load_domains(&destination, suffix);
    }

    if input.ends_with(".csv") {
        let path = Path::new(input);
        if !path.exists() {
            return Err(SweepError::MissingInput(format!("domain CSV not found: {input}")));
        }
        return load_domains(path, suffix);
    }

    let domain = single_domain(input);
    if !is_safe_domain(&domain) {
        return Err(SweepError::MissingInput(format!("not a usable domain: {input}")));
    }
    Ok(vec![domain])
}

/// Domains name cache files, so anything that could climb out of the
/// scanner's cache directory is refused.
fn is_safe_domain(domain: &str) -> bool {
    !domain.contains(['/', '\\', '\0']) && !domain.contains("..") && !domain.starts_with('.')
}

/// A bare domain, or the host of a URL-looking input.
fn single_domain(input: &str) -> String {
    let host = if input.contains("://") {
        Url::parse(input).ok().and_then(|url| url.host_str().map(String::from))
    } else {
        None
    };
    host.unwrap_or_else(|| input.to_string()).to_lowercase()
}

/// First column of a CSV, lower-cased. Empty rows and a leading header row
/// whose first cell starts with "domain" are skipped.
pub fn load_domains(path: &Path, suffix: Option<&str>) -> SweepResult<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
    let suffix = suffix.map(|s| s.trim().trim_start_matches('.')).filter(|s| !s.is_empty());

    let mut domains = Vec::new();
    for record in parse_records(&text) {
        let Some(first) = record.first().map(|c| c.trim().to_lowercase()) else { continue };
        if first.is_empty() {
            continue;
        }
        if domains.is_empty() && first.starts_with("domain") {
            debug!("Skipping header row.");
            continue;
        }
        let domain = match suffix {
            Some(suffix) => format!("{first}.{suffix}"),
            None => first,
        };
        if !is_safe_domain(&domain) {
            warn!(domain, "Skipping entry that is not a usable domain.");
            continue;
        }
        domains.push(domain);
    }

    info!(count = domains.len(), path = %path.display(), "Loaded domains.");
    Ok(domains)
}

async fn download(url: &str, destination: &Path) -> SweepResult<()> {
    info!(url, "Downloading domain list.");
    let body = reqwest::get(url).await?.error_for_status()?.bytes().await?;
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
    }
    std::fs::write(destination, &body).map_err(|e| SweepError::io(destination, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_single_domain_and_url_input() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        assert_eq!(domains_from("Example.com", None, &cache).await.unwrap(), vec!["example.com"]);
        assert_eq!(domains_from("https://www.a.gov/path", None, &cache).await.unwrap(), vec!["www.a.gov"]);
    }

    #[tokio::test]
    async fn test_empty_input_is_missing() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        assert!(matches!(domains_from("  ", None, &cache).await, Err(SweepError::MissingInput(_))));
        assert!(matches!(
            domains_from("/no/such/list.csv", None, &cache).await,
            Err(SweepError::MissingInput(_))
        ));
    }

    #[test]
    fn test_csv_skips_header_and_blank_rows_and_applies_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("domains.csv");
        std::fs::write(&path, "Domain Name,Agency\nFOO,GSA\n,\n\nbar,\"Dept, of Things\"\n").unwrap();

        assert_eq!(load_domains(&path, None).unwrap(), vec!["foo", "bar"]);
        assert_eq!(load_domains(&path, Some(".gov")).unwrap(), vec!["foo.gov", "bar.gov"]);
    }

    #[tokio::test]
    async fn test_path_like_entries_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("domains.csv");
        std::fs::write(&path, "domain\na.gov\n../../etc/passwd\nsub/dir.gov\n..gov\nb.gov\n").unwrap();

        assert_eq!(load_domains(&path, None).unwrap(), vec!["a.gov", "b.gov"]);

        let cache = CacheStore::new(dir.path());
        assert!(matches!(domains_from("../escape", None, &cache).await, Err(SweepError::MissingInput(_))));
    }

    #[test]
    fn test_domain_prefixed_rows_after_the_first_are_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("domains.csv");
        std::fs::write(&path, "a.gov\ndomainx.gov\n").unwrap();

        assert_eq!(load_domains(&path, None).unwrap(), vec!["a.gov", "domainx.gov"]);
    }
}
