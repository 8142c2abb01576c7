// src/core/environment.rs

//! Layered scanner environment.
//!
//! A run-wide base layer, a scanner layer produced by `init`, and a domain
//! layer produced by `init_domain`. Each merge returns a new value, so a
//! domain's overrides never leak into the scanner layer or into a sibling
//! unit running concurrently.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::options::ExecutionMode;

/// Key/value overrides returned by a scanner's `init` and `init_domain`.
pub type Overrides = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(Map<String, Value>);

impl Environment {
    /// The run-wide layer every scanner starts from.
    pub fn base(mode: ExecutionMode, scan_uuid: &str, workers: usize) -> Self {
        let mut fields = Map::new();
        fields.insert("scan_method".into(), Value::String(mode.to_string()));
        fields.insert("scan_uuid".into(), Value::String(scan_uuid.to_string()));
        fields.insert("workers".into(), Value::from(workers));
        Self(fields)
    }

    /// Returns a new environment with `overrides` laid over this one.
    pub fn layered(&self, overrides: &Overrides) -> Self {
        let mut fields = self.0.clone();
        for (key, value) in overrides {
            fields.insert(key.clone(), value.clone());
        }
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}
