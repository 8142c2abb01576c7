// src/core/cache.rs

//! Per-(domain, scanner) JSON cache on local disk.
//!
//! Layout: `<cache dir>/<scanner>/<domain>.json`. A file holds either the raw
//! scan payload or the invalid marker `{"invalid": true}`.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::error::{SweepError, SweepResult};

/// What the cache knows about one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Missing,
    /// Scanned before, with no usable result.
    Invalid,
    Valid(Value),
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, domain: &str, scanner: &str) -> PathBuf {
        self.root.join(scanner).join(format!("{domain}.json"))
    }

    /// Path for a file not tied to a unit (downloaded lists and the like).
    pub fn single(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn read(&self, domain: &str, scanner: &str) -> SweepResult<CacheEntry> {
        let path = self.path_for(domain, scanner);
        if !path.exists() {
            return Ok(CacheEntry::Missing);
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| SweepError::io(&path, e))?;
        let data: Value = serde_json::from_str(&raw)?;
        debug!(domain, scanner, "Cache hit.");

        if is_invalid_marker(&data) {
            Ok(CacheEntry::Invalid)
        } else {
            Ok(CacheEntry::Valid(data))
        }
    }

    pub fn write_valid(&self, domain: &str, scanner: &str, data: &Value) -> SweepResult<()> {
        self.write(domain, scanner, data)
    }

    pub fn write_invalid(&self, domain: &str, scanner: &str) -> SweepResult<()> {
        self.write(domain, scanner, &json!({ "invalid": true }))
    }

    fn write(&self, domain: &str, scanner: &str, data: &Value) -> SweepResult<()> {
        let path = self.path_for(domain, scanner);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(data)?;
        std::fs::write(&path, body).map_err(|e| SweepError::io(&path, e))
    }
}

fn is_invalid_marker(data: &Value) -> bool {
    data.get("invalid").and_then(Value::as_bool).unwrap_or(false)
}
