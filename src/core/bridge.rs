// src/core/bridge.rs

//! The headless browser shim.
//!
//! Browser-bridged scanners are executed by an external script that owns a
//! headless browser. The request goes in as JSON on stdin and the result
//! comes back as JSON on stdout.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::core::environment::Environment;
use crate::core::options::RunOptions;
use crate::core::scanner::ScannerError;

#[async_trait]
pub trait BrowserBridge: Send + Sync {
    async fn headless_scan(
        &self,
        scanner: &str,
        domain: &str,
        env: &Environment,
        options: &RunOptions,
    ) -> Result<Option<Value>, ScannerError>;
}

/// Runs `<program> <script> <scanner>`, e.g. `node scripts/headless_bridge.js pageload`.
pub struct NodeBridge {
    program: String,
    script: PathBuf,
}

impl NodeBridge {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), script: script.into() }
    }

    pub fn from_options(options: &RunOptions) -> Self {
        Self::new(options.bridge_program.clone(), options.bridge_script.clone())
    }
}

#[async_trait]
impl BrowserBridge for NodeBridge {
    async fn headless_scan(
        &self,
        scanner: &str,
        domain: &str,
        env: &Environment,
        options: &RunOptions,
    ) -> Result<Option<Value>, ScannerError> {
        let request = json!({
            "scanner": scanner,
            "domain": domain,
            "environment": env,
            "options": options,
        });
        debug!(scanner, domain, program = %self.program, "Dispatching to headless bridge.");

        let mut child = Command::new(&self.program)
            .arg(&self.script)
            .arg(scanner)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScannerError::Command(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.to_string().as_bytes())
                .await
                .map_err(|e| ScannerError::Command(format!("writing bridge request: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ScannerError::Command(format!("waiting for bridge: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScannerError::Command(format!("bridge exited with {}: {}", output.status, stderr.trim())));
        }

        parse_bridge_output(&output.stdout)
    }
}

/// Empty output or a JSON `null` mean the shim had nothing to report.
fn parse_bridge_output(stdout: &[u8]) -> Result<Option<Value>, ScannerError> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(text)?;
    Ok(if value.is_null() { None } else { Some(value) })
}
