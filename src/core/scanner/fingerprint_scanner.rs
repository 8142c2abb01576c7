// src/core/scanner/fingerprint_scanner.rs

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::cache::{CacheEntry, CacheStore};
use crate::core::environment::{Environment, Overrides};
use crate::core::models::{FingerprintResults, HeadersResults, Technology};
use crate::core::options::RunOptions;
use crate::core::scanner::headers_scanner::USER_AGENT;
use crate::core::scanner::{Scanner, ScannerError};
use crate::core::unit::Row;

/// Where in the response a rule looks.
#[derive(Clone, Copy)]
enum Source {
    Header(&'static str),
    MetaTag(&'static str),
    Body,
    ScriptSrc,
    LinkHref,
    Cookie,
}

/// (technology, category, source, pattern). A first capture group, when
/// present, is the version.
const RULES: &[(&str, &str, Source, &str)] = &[
    ("Nginx", "Web Server", Source::Header("server"), r"nginx/([\d\.]+)"),
    ("Nginx", "Web Server", Source::Body, r"<hr><center>nginx</center>"),
    ("Apache", "Web Server", Source::Header("server"), r"Apache/([\d\.]+)"),
    ("Cloudflare", "CDN / WAF", Source::Header("server"), r"cloudflare"),
    ("LiteSpeed", "Web Server", Source::Header("server"), r"LiteSpeed"),
    ("WordPress", "CMS", Source::MetaTag("generator"), r"WordPress ([\d\.]+)"),
    ("WordPress", "CMS", Source::Body, r"/wp-content/|/wp-includes/"),
    ("Drupal", "CMS", Source::MetaTag("generator"), r"Drupal ([\d\.]+)"),
    ("Drupal", "CMS", Source::Header("x-generator"), r"Drupal ([\d\.]+)"),
    ("Joomla", "CMS", Source::MetaTag("generator"), r"Joomla!"),
    ("PHP", "Language", Source::Header("x-powered-by"), r"PHP/([\d\.]+)"),
    ("PHP", "Language", Source::Cookie, r"PHPSESSID"),
    ("ASP.NET", "Framework", Source::Header("x-aspnet-version"), r"([\d\.]+)"),
    ("Java", "Language", Source::Cookie, r"JSESSIONID"),
    ("Python/Django", "Framework", Source::Cookie, r"csrftoken"),
    ("Next.js", "JS Framework", Source::ScriptSrc, r"/_next/static/"),
    ("Angular", "JS Framework", Source::Body, r#"ng-version="([\d\.]+)""#),
    ("React", "JS Library", Source::Body, r"react-dom|data-reactroot"),
    ("jQuery", "JS Library", Source::ScriptSrc, r"jquery[-.]?([\d\.]+)?(\.min)?\.js"),
    ("Bootstrap", "UI Framework", Source::LinkHref, r"bootstrap(\.min)?\.css"),
    ("U.S. Web Design System", "UI Framework", Source::LinkHref, r"uswds(\.min)?\.css"),
    ("Google Analytics", "Analytics", Source::ScriptSrc, r"google-analytics\.com/|googletagmanager\.com/"),
    ("Digital Analytics Program", "Analytics", Source::ScriptSrc, r"Universal-Federated-Analytics"),
];

struct Rule {
    tech: &'static str,
    category: &'static str,
    source: Source,
    pattern: Regex,
}

static COMPILED: Lazy<Vec<Rule>> = Lazy::new(|| {
    RULES
        .iter()
        .filter_map(|&(tech, category, source, pattern)| match Regex::new(pattern) {
            Ok(pattern) => Some(Rule { tech, category, source, pattern }),
            Err(e) => {
                warn!(tech, error = %e, "Skipping fingerprint rule with a bad pattern.");
                None
            }
        })
        .collect()
});

/// Identifies server software, frameworks and analytics on the landing page.
pub struct FingerprintScanner;

#[async_trait]
impl Scanner for FingerprintScanner {
    fn name(&self) -> &'static str {
        "fingerprint"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["Technologies", "Categories", "Error"]
    }

    fn remote_eligible(&self) -> bool {
        true
    }

    /// Skips domains the `headers` scanner already found unreachable.
    async fn init_domain(&self, domain: &str, _env: &Environment, options: &RunOptions) -> Option<Overrides> {
        if headers_say_unreachable(&CacheStore::new(options.cache_dir()), domain) {
            debug!(domain, "Skipping fingerprint scan: cached headers scan failed.");
            return None;
        }
        Some(Overrides::new())
    }

    async fn scan(&self, domain: &str, _env: &Environment, _options: &RunOptions) -> Result<Option<Value>, ScannerError> {
        Ok(Some(serde_json::to_value(run_fingerprint_scan(domain).await)?))
    }

    fn to_rows(&self, data: &Value) -> Vec<Row> {
        let results: FingerprintResults = match serde_json::from_value(data.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Cached fingerprint data does not match the current schema.");
                return Vec::new();
            }
        };

        match results.technologies {
            Ok(mut techs) => {
                techs.sort_by(|a, b| a.name.cmp(&b.name));
                let names: Vec<String> = techs
                    .iter()
                    .map(|t| match &t.version {
                        Some(v) => format!("{} {}", t.name, v),
                        None => t.name.clone(),
                    })
                    .collect();
                let mut categories: Vec<&str> = techs.iter().map(|t| t.category.as_str()).collect();
                categories.sort_unstable();
                categories.dedup();
                vec![vec![json!(names.join(", ")), json!(categories.join(", ")), Value::Null]]
            }
            Err(e) => vec![vec![Value::Null, Value::Null, json!(e)]],
        }
    }
}

fn headers_say_unreachable(cache: &CacheStore, domain: &str) -> bool {
    match cache.read(domain, "headers") {
        Ok(CacheEntry::Valid(data)) => serde_json::from_value::<HeadersResults>(data)
            .map(|r| r.error.is_some())
            .unwrap_or(false),
        _ => false,
    }
}

/// Fetches `https://<target>` and applies every rule to headers, cookies and body.
pub async fn run_fingerprint_scan(target: &str) -> FingerprintResults {
    info!(target, "Starting fingerprint scan.");

    let client = match reqwest::Client::builder().user_agent(USER_AGENT).build() {
        Ok(c) => c,
        Err(e) => return FingerprintResults { technologies: Err(format!("HTTP client error: {}", e)) },
    };

    let url = format!("https://{}", target);
    let response = match client.get(&url).send().await {
        Ok(res) => res,
        Err(e) => {
            warn!(url = %url, error = %e, "HTTP request failed");
            return FingerprintResults { technologies: Err(format!("HTTP request failed: {}", e)) };
        }
    };

    let headers = response.headers().clone();
    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => return FingerprintResults { technologies: Err(format!("Failed to read response body: {}", e)) },
    };

    let technologies = fingerprint(&headers, &body);
    info!(count = %technologies.len(), "Fingerprint scan finished.");
    FingerprintResults { technologies: Ok(technologies) }
}

fn fingerprint(headers: &HeaderMap, body: &str) -> Vec<Technology> {
    let document = Html::parse_document(body);
    let cookies = headers
        .get_all("set-cookie")
        .into_iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");

    let mut found: BTreeMap<&str, Technology> = BTreeMap::new();
    for rule in COMPILED.iter() {
        let matched = match rule.source {
            Source::Header(name) => match_text(headers.get(name).and_then(|v| v.to_str().ok()), &rule.pattern),
            Source::MetaTag(name) => {
                let selector = format!("meta[name='{}']", name);
                first_attr_match(&document, &selector, "content", &rule.pattern)
            }
            Source::Body => match_text(Some(body), &rule.pattern),
            Source::ScriptSrc => first_attr_match(&document, "script[src]", "src", &rule.pattern),
            Source::LinkHref => first_attr_match(&document, "link[href]", "href", &rule.pattern),
            Source::Cookie => match_text(Some(cookies.as_str()), &rule.pattern),
        };

        let Some(version) = matched else { continue };
        let entry = found.entry(rule.tech).or_insert_with(|| Technology {
            name: rule.tech.to_string(),
            category: rule.category.to_string(),
            version: None,
        });
        if entry.version.is_none() {
            entry.version = version;
        }
    }

    found.into_values().collect()
}

/// `Some(version)` on a match, where the version is the first capture group.
fn match_text(text: Option<&str>, re: &Regex) -> Option<Option<String>> {
    let caps = re.captures(text?)?;
    Some(caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()))
}

fn first_attr_match(doc: &Html, selector: &str, attr: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .find_map(|value| match_text(Some(value), re))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tempfile::TempDir;

    #[test]
    fn test_detects_server_version_and_page_assets() {
        let mut headers = HeaderMap::new();
        headers.insert("server", HeaderValue::from_static("nginx/1.25.3"));
        headers.insert("set-cookie", HeaderValue::from_static("PHPSESSID=abc; path=/"));
        let body = r#"<html><head>
            <meta name="generator" content="WordPress 6.4.2">
            <link rel="stylesheet" href="/assets/uswds.min.css">
            <script src="/js/jquery-3.7.1.min.js"></script>
        </head><body></body></html>"#;

        let techs = fingerprint(&headers, body);
        let by_name: BTreeMap<_, _> = techs.iter().map(|t| (t.name.as_str(), t.version.as_deref())).collect();

        assert_eq!(by_name.get("Nginx"), Some(&Some("1.25.3")));
        assert_eq!(by_name.get("WordPress"), Some(&Some("6.4.2")));
        assert_eq!(by_name.get("jQuery"), Some(&Some("3.7.1")));
        assert_eq!(by_name.get("PHP"), Some(&None));
        assert!(by_name.contains_key("U.S. Web Design System"));
    }

    #[test]
    fn test_rows_list_technologies_sorted() {
        let results = FingerprintResults {
            technologies: Ok(vec![
                Technology { name: "React".into(), category: "JS Library".into(), version: None },
                Technology { name: "Nginx".into(), category: "Web Server".into(), version: Some("1.2".into()) },
            ]),
        };
        let rows = FingerprintScanner.to_rows(&serde_json::to_value(&results).unwrap());
        assert_eq!(rows[0][0], json!("Nginx 1.2, React"));
        assert_eq!(rows[0][1], json!("JS Library, Web Server"));
    }

    #[tokio::test]
    async fn test_skips_domains_with_failed_cached_headers_scan() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions { output: dir.path().to_path_buf(), ..Default::default() };
        let cache = CacheStore::new(options.cache_dir());
        let failed = HeadersResults { error: Some("HTTP request failed".into()), ..Default::default() };
        cache.write_valid("down.gov", "headers", &serde_json::to_value(&failed).unwrap()).unwrap();

        let env = Environment::default();
        assert!(FingerprintScanner.init_domain("down.gov", &env, &options).await.is_none());
        assert!(FingerprintScanner.init_domain("up.gov", &env, &options).await.is_some());
    }
}
