// src/core/dispatch.rs

//! The dispatch engine.
//!
//! For one scanner, every domain becomes a unit of work. Units run on a
//! bounded pool, each one either locally, through the headless bridge, or
//! as a remote function invocation. Whatever a unit does, it ends as rows
//! in the scanner's CSV; a failing unit never takes the run down with it.

use futures::FutureExt;
use serde_json::{Value, json};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::core::bridge::{BrowserBridge, NodeBridge};
use crate::core::cache::{CacheEntry, CacheStore};
use crate::core::environment::Environment;
use crate::core::error::{SweepError, SweepResult};
use crate::core::options::{MAX_WORKERS, RunOptions};
use crate::core::remote::{FunctionInvoker, RemoteError};
use crate::core::scanner::Scanner;
use crate::core::suffix_list::SuffixList;
use crate::core::unit::{RemoteMeta, UnitMeta, UnitOutcome, is_empty_data, now_seconds, render_cell};
use crate::core::writer::{ResultWriter, results_path};

/// Pool size for one scanner: 1 when serial, else the scanner's own
/// preference, else the run's setting. Capped at [`MAX_WORKERS`].
pub fn resolve_workers(scanner: &dyn Scanner, options: &RunOptions) -> usize {
    let wanted = if options.serial {
        1
    } else {
        scanner.workers().unwrap_or(options.workers)
    };
    wanted.clamp(1, MAX_WORKERS)
}

/// Timing and counters for one scanner's pass over the domain list.
#[derive(Debug, Clone)]
pub struct ScannerRun {
    pub name: String,
    pub path: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub used_remote: bool,
    pub units: usize,
    pub skipped: usize,
    pub rows: usize,
}

pub struct Dispatcher {
    options: Arc<RunOptions>,
    cache: CacheStore,
    suffixes: Arc<SuffixList>,
    invoker: Option<Arc<dyn FunctionInvoker>>,
    bridge: Arc<dyn BrowserBridge>,
}

impl Dispatcher {
    pub fn new(options: Arc<RunOptions>, suffixes: Arc<SuffixList>) -> Self {
        let bridge: Arc<dyn BrowserBridge> = Arc::new(NodeBridge::from_options(&options));
        Self {
            cache: CacheStore::new(options.cache_dir()),
            options,
            suffixes,
            invoker: None,
            bridge,
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn BrowserBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    /// Runs every domain through `scanner` and writes the scanner's CSV.
    ///
    /// Only scanner-wide problems are returned as errors: a veto from
    /// `init`, a missing remote client, or the results file not opening.
    pub async fn run_scanner(
        &self,
        scanner: Arc<dyn Scanner>,
        domains: &[String],
        scan_uuid: &str,
    ) -> SweepResult<ScannerRun> {
        let name = scanner.name();
        let start_time = now_seconds();
        let workers = resolve_workers(scanner.as_ref(), &self.options);

        let remote = self.options.is_remote() && scanner.remote_eligible();
        let invoker = match (remote, &self.invoker) {
            (true, Some(invoker)) => Some(Arc::clone(invoker)),
            (true, None) => {
                return Err(SweepError::RemoteSetup(format!("no remote client available for '{name}'")));
            }
            (false, _) => None,
        };
        if self.options.is_remote() && !remote {
            info!(scanner = name, "Scanner is not remote-eligible; running it locally.");
        }

        let base = Environment::base(self.options.mode, scan_uuid, workers);
        let Some(overrides) = scanner.init(&base, &self.options).await else {
            error!(scanner = name, "Scanner init vetoed the run.");
            return Err(SweepError::InitVeto(name.to_string()));
        };
        let env = base.layered(&overrides);

        let path = results_path(&self.options, name);
        let writer = ResultWriter::create(&path, scanner.as_ref(), &self.options, Arc::clone(&self.suffixes))?;
        let writer = Arc::new(Mutex::new(writer));

        info!(scanner = name, domains = domains.len(), workers, remote, "Starting scanner.");

        let context = Arc::new(UnitContext {
            scanner: Arc::clone(&scanner),
            env,
            options: Arc::clone(&self.options),
            cache: self.cache.clone(),
            invoker,
            bridge: Arc::clone(&self.bridge),
            remote,
        });

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for domain in domains {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                error!(scanner = name, "Worker pool closed early.");
                break;
            };
            let context = Arc::clone(&context);
            let writer = Arc::clone(&writer);
            let domain = domain.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = run_unit(&context, &domain).await;
                match outcome {
                    Some(outcome) => Some(write_unit(&writer, &outcome).await),
                    None => None,
                }
            });
        }

        let mut run = ScannerRun {
            name: name.to_string(),
            path: path.clone(),
            start_time,
            end_time: start_time,
            duration: 0.0,
            used_remote: remote,
            units: 0,
            skipped: 0,
            rows: 0,
        };

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(rows)) => {
                    run.units += 1;
                    run.rows += rows;
                }
                Ok(None) => run.skipped += 1,
                Err(e) => error!(scanner = name, error = %e, "Unit task failed to complete."),
            }
        }

        writer.lock().await.flush()?;

        run.end_time = now_seconds();
        run.duration = run.end_time - run.start_time;
        info!(
            scanner = name,
            units = run.units,
            skipped = run.skipped,
            rows = run.rows,
            duration = run.duration,
            "Scanner finished."
        );
        Ok(run)
    }
}

/// Everything a unit needs, shared across the pool.
struct UnitContext {
    scanner: Arc<dyn Scanner>,
    env: Environment,
    options: Arc<RunOptions>,
    cache: CacheStore,
    invoker: Option<Arc<dyn FunctionInvoker>>,
    bridge: Arc<dyn BrowserBridge>,
    remote: bool,
}

/// What a unit got back before turning it into rows.
enum Obtained {
    Data { value: Value, executed: bool },
    Nothing { executed: bool },
    /// Errors were already recorded; nothing else to add.
    Failed,
}

/// Runs one unit to completion. `None` means `init_domain` skipped it.
/// Panics anywhere in the unit are caught and recorded as the unit's error.
async fn run_unit(context: &UnitContext, domain: &str) -> Option<UnitOutcome> {
    let start_time = now_seconds();
    match AssertUnwindSafe(process_unit(context, domain, start_time)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(scanner = context.scanner.name(), domain, error = %message, "Unit panicked.");
            let mut outcome = UnitOutcome::failed(domain, format!("Unknown exception: {message}"));
            if context.options.meta {
                outcome.meta = Some(UnitMeta::new(start_time, now_seconds(), None));
            }
            Some(outcome)
        }
    }
}

async fn process_unit(context: &UnitContext, domain: &str, start_time: f64) -> Option<UnitOutcome> {
    let scanner = context.scanner.as_ref();
    let name = scanner.name();

    let Some(overrides) = scanner.init_domain(domain, &context.env, &context.options).await else {
        debug!(scanner = name, domain, "Skipping domain.");
        return None;
    };
    let env = context.env.layered(&overrides);

    let mut errors = Vec::new();
    let mut remote_meta = None;

    let obtained = obtain(context, domain, &env, &mut errors, &mut remote_meta).await;

    let rows = match obtained {
        Obtained::Data { value, executed } => {
            if executed && context.options.write_cache {
                if let Err(e) = context.cache.write_valid(domain, name, &value) {
                    errors.push(format!("Cache write error: {e}"));
                }
            }
            scanner.to_rows(&value)
        }
        Obtained::Nothing { executed } => {
            if executed && context.options.write_cache {
                if let Err(e) = context.cache.write_invalid(domain, name) {
                    errors.push(format!("Cache write error: {e}"));
                }
            }
            errors.push("Scan returned nothing.".to_string());
            Vec::new()
        }
        Obtained::Failed => Vec::new(),
    };

    if !errors.is_empty() {
        debug!(scanner = name, domain, errors = ?errors, "Unit recorded errors.");
    }

    let meta = context
        .options
        .meta
        .then(|| UnitMeta::new(start_time, now_seconds(), remote_meta));

    Some(UnitOutcome { domain: domain.to_string(), rows, errors, meta })
}

/// Cache first when allowed, otherwise execute the scan.
async fn obtain(
    context: &UnitContext,
    domain: &str,
    env: &Environment,
    errors: &mut Vec<String>,
    remote_meta: &mut Option<RemoteMeta>,
) -> Obtained {
    let name = context.scanner.name();

    if context.options.cache {
        match context.cache.read(domain, name) {
            Ok(CacheEntry::Valid(value)) => {
                debug!(scanner = name, domain, "Using cached result.");
                return Obtained::Data { value, executed: false };
            }
            Ok(CacheEntry::Invalid) => {
                debug!(scanner = name, domain, "Cached result is marked invalid.");
                return Obtained::Nothing { executed: false };
            }
            Ok(CacheEntry::Missing) => {}
            Err(e) => errors.push(format!("Cache read error: {e}")),
        }
    }

    let data = if context.remote {
        match invoke_remote(context, domain, env, errors, remote_meta).await {
            Some(data) => data,
            None => return Obtained::Failed,
        }
    } else {
        match scan_local(context, domain, env).await {
            Ok(data) => data,
            Err(message) => {
                errors.push(format!("Unknown exception: {message}"));
                return Obtained::Failed;
            }
        }
    };

    match data {
        Some(value) if !is_empty_data(&value) => Obtained::Data { value, executed: true },
        _ => Obtained::Nothing { executed: true },
    }
}

/// Local execution, either in-process or through the headless bridge. The
/// result is passed through a JSON round trip so cached and fresh data
/// look exactly alike to `to_rows`.
async fn scan_local(context: &UnitContext, domain: &str, env: &Environment) -> Result<Option<Value>, String> {
    let scanner = context.scanner.as_ref();
    let result = if scanner.browser_bridged() {
        context.bridge.headless_scan(scanner.name(), domain, env, &context.options).await
    } else {
        scanner.scan(domain, env, &context.options).await
    };

    match result {
        Ok(Some(value)) => normalize(&value).map(Some).map_err(|e| e.to_string()),
        Ok(None) => Ok(None),
        Err(e) => {
            warn!(scanner = scanner.name(), domain, error = %e, "Scan failed.");
            Err(e.to_string())
        }
    }
}

fn normalize(value: &Value) -> Result<Value, serde_json::Error> {
    let text = serde_json::to_string(value)?;
    serde_json::from_str(&text)
}

/// Remote execution. `None` means the unit failed and its errors are
/// already recorded; `Some(None)` is a completed call with no data.
async fn invoke_remote(
    context: &UnitContext,
    domain: &str,
    env: &Environment,
    errors: &mut Vec<String>,
    remote_meta: &mut Option<RemoteMeta>,
) -> Option<Option<Value>> {
    let name = context.scanner.name();
    let Some(invoker) = context.invoker.as_ref() else {
        errors.push("Unknown exception: no remote client".to_string());
        return None;
    };

    let function = format!("{}{}", context.options.function_prefix, name);
    let payload = json!({
        "domain": domain,
        "options": context.options.as_ref(),
        "name": name,
        "environment": env,
    });

    let invocation = match invoker.invoke(&function, &payload).await {
        Ok(invocation) => invocation,
        Err(RemoteError::Timeout(message)) => {
            warn!(scanner = name, domain, "Remote invocation timed out.");
            errors.push(format!("Lambda timeout: {message}"));
            return None;
        }
        Err(e) => {
            warn!(scanner = name, domain, error = %e, "Remote invocation failed.");
            if let Some(request_id) = e.request_id() {
                *remote_meta = Some(RemoteMeta { request_id: Some(request_id.to_string()), ..Default::default() });
            }
            errors.push(format!("Unknown exception: {e}"));
            return None;
        }
    };

    let mut meta = RemoteMeta { request_id: invocation.request_id, ..Default::default() };
    let response = invocation.payload;

    if let Some(message) = response.get("errorMessage") {
        errors.push(format!("Lambda error: {}", render_cell(message)));
        *remote_meta = Some(meta);
        return None;
    }

    if let Some(reported) = response.get("lambda") {
        match serde_json::from_value::<RemoteMeta>(reported.clone()) {
            Ok(reported) => meta.merge_reported(reported),
            Err(e) => warn!(scanner = name, domain, error = %e, "Unreadable remote execution details."),
        }
    }
    *remote_meta = Some(meta);

    if let Some(scan_error) = response.get("error").filter(|e| !e.is_null()) {
        errors.push(format!("Lambda scan error: {}", render_cell(scan_error)));
    }

    let data = response.get("data").filter(|d| !d.is_null()).cloned();
    if data.is_none() {
        errors.push("Lambda returned no data.".to_string());
    }
    Some(data)
}

/// Writes under the shared lock. A failure here is logged and the unit
/// counts as zero rows; it never reaches the pool.
async fn write_unit(writer: &Mutex<ResultWriter>, outcome: &UnitOutcome) -> usize {
    let mut guard = writer.lock().await;
    let written = std::panic::catch_unwind(AssertUnwindSafe(|| guard.write_outcome(outcome)));
    match written {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            error!(domain = %outcome.domain, error = %e, "Failed to write unit rows.");
            0
        }
        Err(panic) => {
            error!(domain = %outcome.domain, error = %panic_message(panic.as_ref()), "Writing unit rows panicked.");
            0
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
