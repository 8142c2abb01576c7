// src/core/suffix_list.rs

//! Public Suffix List handling for the "Base Domain" column.

use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::cache::CacheStore;
use crate::core::error::{SweepError, SweepResult};

pub const PSL_URL: &str = "https://publicsuffix.org/list/public_suffix_list.dat";
pub const PSL_CACHE_FILE: &str = "public-suffix-list.txt";

#[derive(Debug, Default, Clone)]
pub struct SuffixList {
    rules: HashSet<String>,
    wildcards: HashSet<String>,
    exceptions: HashSet<String>,
}

impl SuffixList {
    pub fn parse(text: &str) -> Self {
        let mut list = SuffixList::default();
        for line in text.lines() {
            let Some(rule) = line.split_whitespace().next() else { continue };
            if rule.starts_with("//") {
                continue;
            }
            let rule = rule.to_lowercase();
            if let Some(exception) = rule.strip_prefix('!') {
                list.exceptions.insert(exception.to_string());
            } else if let Some(parent) = rule.strip_prefix("*.") {
                list.wildcards.insert(parent.to_string());
            } else {
                list.rules.insert(rule);
            }
        }
        list
    }

    /// Number of labels in the public suffix of `labels`, never less than one.
    fn suffix_len(&self, labels: &[&str]) -> usize {
        let mut longest = 1;
        for start in 0..labels.len() {
            let candidate = labels[start..].join(".");
            let len = labels.len() - start;

            if self.exceptions.contains(&candidate) {
                return len - 1;
            }
            if self.rules.contains(&candidate) {
                longest = longest.max(len);
            }
            if start > 0 && self.wildcards.contains(&candidate) {
                longest = longest.max(len + 1);
            }
        }
        longest
    }

    /// Registrable domain, e.g. `x.y.agency.gov` → `agency.gov`. A name that
    /// is itself a public suffix comes back unchanged.
    pub fn base_domain_for(&self, domain: &str) -> String {
        let domain = domain.trim_end_matches('.').to_lowercase();
        let labels: Vec<&str> = domain.split('.').collect();
        let suffix_len = self.suffix_len(&labels);
        if labels.len() <= suffix_len {
            return domain;
        }
        labels[labels.len() - suffix_len - 1..].join(".")
    }

    /// Explicit file, else the cached copy, else download and cache.
    pub async fn load(explicit: Option<&Path>, cache: &CacheStore) -> SweepResult<Self> {
        if let Some(path) = explicit {
            let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
            return Ok(Self::parse(&text));
        }

        let cached = cache.single(PSL_CACHE_FILE);
        if cached.exists() {
            debug!("Using cached Public Suffix List.");
            let text = std::fs::read_to_string(&cached).map_err(|e| SweepError::io(&cached, e))?;
            return Ok(Self::parse(&text));
        }

        info!("Downloading the Public Suffix List.");
        let text = match download(PSL_URL).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Unable to download the Public Suffix List.");
                return Err(SweepError::SuffixList(e.to_string()));
            }
        };

        if let Some(parent) = cached.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }
        std::fs::write(&cached, &text).map_err(|e| SweepError::io(&cached, e))?;
        Ok(Self::parse(&text))
    }
}

async fn download(url: &str) -> Result<String, reqwest::Error> {
    reqwest::get(url).await?.error_for_status()?.text().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "// comment\ncom\ngov\nuk\nco.uk\n*.ck\n!www.ck\n\n";

    #[test]
    fn test_base_domains() {
        let list = SuffixList::parse(SAMPLE);
        assert_eq!(list.base_domain_for("example.com"), "example.com");
        assert_eq!(list.base_domain_for("www.x.y.agency.gov"), "agency.gov");
        assert_eq!(list.base_domain_for("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(list.base_domain_for("a.b.foo.ck"), "b.foo.ck");
        assert_eq!(list.base_domain_for("www.ck"), "www.ck");
        assert_eq!(list.base_domain_for("Example.COM."), "example.com");
    }

    #[test]
    fn test_unlisted_tld_uses_default_rule() {
        let list = SuffixList::parse(SAMPLE);
        assert_eq!(list.base_domain_for("a.b.example.zz"), "example.zz");
    }

    #[test]
    fn test_bare_suffix_is_returned_unchanged() {
        let list = SuffixList::parse(SAMPLE);
        assert_eq!(list.base_domain_for("co.uk"), "co.uk");
    }

    #[tokio::test]
    async fn test_load_prefers_explicit_then_cached_file() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path().join("cache"));
        std::fs::create_dir_all(cache.root()).unwrap();
        std::fs::write(cache.single(PSL_CACHE_FILE), "gov\n").unwrap();

        let cached = SuffixList::load(None, &cache).await.unwrap();
        assert_eq!(cached.base_domain_for("a.b.gov"), "b.gov");

        let explicit_path = dir.path().join("psl.dat");
        std::fs::write(&explicit_path, "b.gov\n").unwrap();
        let explicit = SuffixList::load(Some(&explicit_path), &cache).await.unwrap();
        assert_eq!(explicit.base_domain_for("x.a.b.gov"), "a.b.gov");
    }
}
