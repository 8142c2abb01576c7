// src/core/scanner/noop_scanner.rs

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::core::environment::{Environment, Overrides};
use crate::core::options::RunOptions;
use crate::core::scanner::{Scanner, ScannerError};
use crate::core::unit::Row;

/// Does no network work. It threads one value through `init` and one
/// through `init_domain` and echoes both back, which makes it handy for
/// exercising the engine and a remote deployment end to end.
///
/// `--set noop-delay=<seconds>` sleeps inside each scan.
pub struct NoopScanner;

#[async_trait]
impl Scanner for NoopScanner {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn headers(&self) -> &'static [&'static str] {
        &["Completed", "Constant", "Variable"]
    }

    fn remote_eligible(&self) -> bool {
        true
    }

    async fn init(&self, _env: &Environment, _options: &RunOptions) -> Option<Overrides> {
        let mut overrides = Overrides::new();
        overrides.insert("constant".into(), json!(12345));
        Some(overrides)
    }

    async fn init_domain(&self, domain: &str, _env: &Environment, _options: &RunOptions) -> Option<Overrides> {
        let mut overrides = Overrides::new();
        overrides.insert("variable".into(), json!(domain));
        Some(overrides)
    }

    async fn scan(&self, domain: &str, env: &Environment, options: &RunOptions) -> Result<Option<Value>, ScannerError> {
        if let Some(delay) = options.extra::<u64>("noop-delay") {
            debug!(domain, delay, "Noop scan sleeping.");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        Ok(Some(json!({
            "complete": true,
            "constant": env.get("constant").cloned().unwrap_or(Value::Null),
            "variable": env.get("variable").cloned().unwrap_or(Value::Null),
        })))
    }

    fn to_rows(&self, data: &Value) -> Vec<Row> {
        vec![vec![
            data.get("complete").cloned().unwrap_or(Value::Null),
            data.get("constant").cloned().unwrap_or(Value::Null),
            data.get("variable").cloned().unwrap_or(Value::Null),
        ]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::ExecutionMode;

    #[tokio::test]
    async fn test_echoes_both_environment_layers() {
        let options = RunOptions::default();
        let base = Environment::base(ExecutionMode::Local, "run", 1);
        let scanner_env = base.layered(&NoopScanner.init(&base, &options).await.unwrap());
        let domain_env = scanner_env.layered(&NoopScanner.init_domain("a.gov", &scanner_env, &options).await.unwrap());

        let data = NoopScanner.scan("a.gov", &domain_env, &options).await.unwrap().unwrap();

        assert_eq!(NoopScanner.to_rows(&data), vec![vec![json!(true), json!(12345), json!("a.gov")]]);
    }
}
