// src/core/sweep.rs

//! One full run: resolve scanners, load domains, dispatch each scanner in
//! turn, optionally sort and reconcile, then record the run.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::bridge::BrowserBridge;
use crate::core::cache::CacheStore;
use crate::core::dispatch::Dispatcher;
use crate::core::domains::domains_from;
use crate::core::error::{SweepError, SweepResult};
use crate::core::options::RunOptions;
use crate::core::reconcile::{Reconciler, SETTLE_DELAY};
use crate::core::remote::{FunctionInvoker, HttpFunctionInvoker, HttpLogQuery, LogQuery};
use crate::core::run_meta::{RunMetadata, RunRecorder, meta_path, write_metadata};
use crate::core::scanner::{self, Scanner};
use crate::core::suffix_list::SuffixList;
use crate::core::writer::sort_csv;

/// External handles a run talks to. Anything left `None` falls back to the
/// default (the Node bridge) or is an error if the run needs it.
pub struct Clients {
    pub invoker: Option<Arc<dyn FunctionInvoker>>,
    pub logs: Option<Arc<dyn LogQuery>>,
    pub bridge: Option<Arc<dyn BrowserBridge>>,
    pub settle_delay: Duration,
}

impl Default for Clients {
    fn default() -> Self {
        Self { invoker: None, logs: None, bridge: None, settle_delay: SETTLE_DELAY }
    }
}

impl Clients {
    /// HTTP clients for whatever the options ask for.
    pub fn from_options(options: &RunOptions) -> SweepResult<Self> {
        let mut clients = Clients::default();
        if !options.is_remote() {
            return Ok(clients);
        }

        let endpoint = options
            .lambda_endpoint
            .as_deref()
            .ok_or_else(|| SweepError::RemoteSetup("remote mode needs --lambda-endpoint".into()))?;
        clients.invoker = Some(Arc::new(HttpFunctionInvoker::new(endpoint)?));

        if options.meta && options.lambda_details {
            let endpoint = options
                .logs_endpoint
                .as_deref()
                .ok_or_else(|| SweepError::RemoteSetup("--lambda-details needs --logs-endpoint".into()))?;
            clients.logs = Some(Arc::new(HttpLogQuery::new(endpoint)?));
        }
        Ok(clients)
    }
}

/// Resolves `scan` against the registry and runs it over `input`.
pub async fn run(scan: &str, input: &str, options: RunOptions, command: String) -> SweepResult<RunMetadata> {
    let scanners = scanner::resolve(scan)?;
    let clients = Clients::from_options(&options)?;
    run_with(scanners, input, options, clients, command).await
}

pub async fn run_with(
    scanners: Vec<Arc<dyn Scanner>>,
    input: &str,
    options: RunOptions,
    clients: Clients,
    command: String,
) -> SweepResult<RunMetadata> {
    let options = Arc::new(options);
    let cache = CacheStore::new(options.cache_dir());

    let domains = domains_from(input, options.suffix.as_deref(), &cache).await?;
    if domains.is_empty() {
        warn!(input, "No domains to scan.");
    }
    let suffixes = Arc::new(SuffixList::load(options.suffix_list.as_deref(), &cache).await?);

    let scan_uuid = Uuid::new_v4().to_string();
    let mut recorder = RunRecorder::start(scan_uuid.clone(), command);
    info!(scan_uuid = %scan_uuid, scanners = scanners.len(), domains = domains.len(), mode = %options.mode, "Starting run.");

    let mut dispatcher = Dispatcher::new(Arc::clone(&options), suffixes);
    if let Some(invoker) = clients.invoker {
        dispatcher = dispatcher.with_invoker(invoker);
    }
    if let Some(bridge) = clients.bridge {
        dispatcher = dispatcher.with_bridge(bridge);
    }

    let mut remote_results = Vec::new();
    for scanner in scanners {
        let run = dispatcher.run_scanner(scanner, &domains, &scan_uuid).await?;
        if options.sort {
            sort_csv(&run.path)?;
        }
        if run.used_remote {
            remote_results.push(run.path.clone());
        }
        recorder.record(&run);
    }

    if options.meta && options.lambda_details && !remote_results.is_empty() {
        let logs = clients
            .logs
            .ok_or_else(|| SweepError::RemoteSetup("no log query client for --lambda-details".into()))?;
        Reconciler::new(logs)
            .with_delay(clients.settle_delay)
            .reconcile(&remote_results)
            .await?;
    }

    let metadata = recorder.finish();
    write_metadata(&meta_path(&options), &metadata)?;
    info!(scan_uuid = %metadata.scan_uuid, duration = metadata.duration, "Run finished.");
    Ok(metadata)
}
