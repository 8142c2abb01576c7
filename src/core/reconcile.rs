// src/core/reconcile.rs

//! Backfills remote execution details that the log store only has after the
//! run: reported duration, peak memory, and how long the log line took to be
//! ingested. Each finished CSV is rewritten with four extra columns.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::csv::{parse_records, write_record};
use crate::core::error::{SweepError, SweepResult};
use crate::core::remote::{LogEvent, LogQuery, RemoteError};
use crate::core::unit::{just_microseconds, parse_utc_timestamp};

pub const DETAIL_HEADERS: [&str; 4] = [
    "Lambda Reported Duration",
    "Lambda Reported Memory",
    "Lambda Ingestion Delay",
    "Lambda Detail Errors",
];

/// Log lines are not queryable the instant a function returns.
pub const SETTLE_DELAY: Duration = Duration::from_secs(20);

pub struct Reconciler {
    logs: Arc<dyn LogQuery>,
    delay: Duration,
}

/// Positions of the remote columns in a results header.
#[derive(Debug, Default)]
struct Columns {
    request_id: Option<usize>,
    log_group: Option<usize>,
    log_stream: Option<usize>,
    end_time: Option<usize>,
}

impl Columns {
    fn from_header(header: &[String]) -> Self {
        let find = |name: &str| header.iter().position(|h| h == name);
        Self {
            request_id: find("Lambda Request ID"),
            log_group: find("Lambda Log Group Name"),
            log_stream: find("Lambda Log Stream Name"),
            end_time: find("Lambda End Time"),
        }
    }
}

fn cell(record: &[String], index: Option<usize>) -> &str {
    index.and_then(|i| record.get(i)).map(|s| s.trim()).unwrap_or("")
}

fn is_header(record: &[String]) -> bool {
    record.first().is_some_and(|c| c.to_lowercase().starts_with("domain"))
}

impl Reconciler {
    pub fn new(logs: Arc<dyn LogQuery>) -> Self {
        Self { logs, delay: SETTLE_DELAY }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Waits for the logs to settle, then reconciles each file in turn.
    pub async fn reconcile(&self, paths: &[PathBuf]) -> SweepResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        info!(delay = ?self.delay, files = paths.len(), "Waiting before querying remote logs.");
        tokio::time::sleep(self.delay).await;

        for path in paths {
            self.reconcile_file(path).await?;
        }
        Ok(())
    }

    /// Rewrites one results file with the detail columns appended. Returns
    /// the number of data rows processed.
    pub async fn reconcile_file(&self, path: &Path) -> SweepResult<usize> {
        info!(path = %path.display(), "Reconciling remote details.");
        let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
        let records = parse_records(&text);

        let mut tmp = OsString::from(path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut columns = Columns::default();
        let mut processed = 0;
        let mut first = true;
        {
            let file = File::create(&tmp).map_err(|e| SweepError::io(&tmp, e))?;
            let mut out = BufWriter::new(file);

            for mut record in records {
                // Only the leading record can be the header; data rows may
                // well start with "domain" too.
                if std::mem::take(&mut first) && is_header(&record) {
                    columns = Columns::from_header(&record);
                    record.extend(DETAIL_HEADERS.iter().map(|h| h.to_string()));
                } else {
                    record.extend(self.details_for(&record, &columns).await);
                    processed += 1;
                }
                write_record(&mut out, &record).map_err(|e| SweepError::io(&tmp, e))?;
            }
            out.flush().map_err(|e| SweepError::io(&tmp, e))?;
        }

        std::fs::rename(&tmp, path).map_err(|e| SweepError::io(path, e))?;
        debug!(path = %path.display(), rows = processed, "Remote details written.");
        Ok(processed)
    }

    async fn details_for(&self, record: &[String], columns: &Columns) -> [String; 4] {
        let request_id = cell(record, columns.request_id);
        if request_id.is_empty() {
            return detail_error("Missing request id.".to_string());
        }

        let group = cell(record, columns.log_group);
        let stream = cell(record, columns.log_stream);
        let pattern = format!("\"REPORT RequestId: {request_id}\"");

        let events = match self.logs.filter_events(group, stream, &pattern).await {
            Ok(events) => events,
            Err(RemoteError::AccessDenied(message) | RemoteError::Throttled(message)) => {
                warn!(request_id, "Log query denied or throttled.");
                return detail_error(format!("Access denied or throttled: {message}"));
            }
            Err(e) => {
                warn!(request_id, error = %e, "Log query failed.");
                return detail_error(format!("Unknown exception: {e}"));
            }
        };

        let Some(event) = events.last() else {
            return detail_error("No logs found for this task.".to_string());
        };

        let end_time = parse_utc_timestamp(cell(record, columns.end_time));
        report_details(event, end_time)
    }
}

fn detail_error(message: String) -> [String; 4] {
    [String::new(), String::new(), String::new(), message]
}

/// Reads a `REPORT` line: tab-separated, with `Duration: <n> ms` in the
/// second field and `Max Memory Used: <n> MB` in the fifth.
fn report_details(event: &LogEvent, end_time: Option<f64>) -> [String; 4] {
    let fields: Vec<&str> = event.message.split('\t').collect();

    let duration = fields
        .get(1)
        .and_then(|f| f.trim().strip_prefix("Duration:"))
        .map(|f| f.trim().trim_end_matches("ms").trim().to_string())
        .unwrap_or_default();
    let memory = fields
        .get(4)
        .and_then(|f| f.trim().strip_prefix("Max Memory Used:"))
        .map(|f| f.trim().trim_end_matches("MB").trim().to_string())
        .unwrap_or_default();
    let delay = end_time
        .map(|end| just_microseconds(event.ingestion_time as f64 / 1000.0 - end))
        .unwrap_or_default();

    [duration, memory, delay, String::new()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Canned answers keyed by filter pattern; every query is recorded.
    #[derive(Default)]
    struct FakeLogs {
        answers: HashMap<String, Vec<LogEvent>>,
        deny: bool,
        queries: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl LogQuery for FakeLogs {
        async fn filter_events(&self, group: &str, stream: &str, pattern: &str) -> Result<Vec<LogEvent>, RemoteError> {
            self.queries.lock().unwrap().push((group.into(), stream.into(), pattern.into()));
            if self.deny {
                return Err(RemoteError::AccessDenied("not allowed".into()));
            }
            Ok(self.answers.get(pattern).cloned().unwrap_or_default())
        }
    }

    const CSV: &str = "Domain,Base Domain,Lambda Request ID,Lambda Log Group Name,Lambda Log Stream Name,Lambda End Time\n\
        a.gov,a.gov,req-1,/aws/lambda/task_noop,stream-1,2017-07-14T02:40:00.000000+00:00\n\
        b.gov,b.gov,,,,\n";

    fn write_csv(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("noop.csv");
        std::fs::write(&path, CSV).unwrap();
        path
    }

    fn report_event() -> LogEvent {
        LogEvent {
            timestamp: 1_500_000_000_000,
            ingestion_time: 1_500_000_002_500,
            message: "REPORT RequestId: req-1\tDuration: 12.34 ms\tBilled Duration: 100 ms\tMemory Size: 128 MB\tMax Memory Used: 31 MB\t\n".into(),
        }
    }

    #[tokio::test]
    async fn test_details_are_appended() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let mut logs = FakeLogs::default();
        logs.answers.insert("\"REPORT RequestId: req-1\"".into(), vec![report_event()]);
        let logs = Arc::new(logs);

        let reconciler = Reconciler::new(logs.clone()).with_delay(Duration::ZERO);
        let processed = reconciler.reconcile_file(&path).await.unwrap();
        assert_eq!(processed, 2);

        let records = parse_records(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(&records[0][6..], &DETAIL_HEADERS.map(String::from));
        assert_eq!(&records[1][6..], &["12.34", "31", "2.500000", ""]);
        assert_eq!(records[2][9], "Missing request id.");

        let queries = logs.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "/aws/lambda/task_noop");
        assert_eq!(queries[0].1, "stream-1");
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[tokio::test]
    async fn test_no_events_adds_exactly_four_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let reconciler = Reconciler::new(Arc::new(FakeLogs::default())).with_delay(Duration::ZERO);

        reconciler.reconcile(&[path.clone()]).await.unwrap();

        let before = parse_records(CSV);
        let after = parse_records(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(new.len(), old.len() + 4);
        }
        assert_eq!(after[1][9], "No logs found for this task.");
    }

    #[tokio::test]
    async fn test_access_denied_is_recorded_per_row() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir);
        let logs = FakeLogs { deny: true, ..Default::default() };
        let reconciler = Reconciler::new(Arc::new(logs)).with_delay(Duration::ZERO);

        reconciler.reconcile_file(&path).await.unwrap();

        let after = parse_records(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(after[1][9], "Access denied or throttled: not allowed");
    }

    #[tokio::test]
    async fn test_domain_prefixed_rows_are_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noop.csv");
        std::fs::write(
            &path,
            "DOMAIN,Base Domain,Lambda Request ID,Lambda Log Group Name,Lambda Log Stream Name,Lambda End Time\n\
             domaintools.com,domaintools.com,req-1,/aws/lambda/task_noop,stream-1,2017-07-14T02:40:00.000000+00:00\n\
             b.gov,b.gov,req-2,/aws/lambda/task_noop,stream-2,\n",
        )
        .unwrap();
        let mut logs = FakeLogs::default();
        logs.answers.insert("\"REPORT RequestId: req-1\"".into(), vec![report_event()]);
        let reconciler = Reconciler::new(Arc::new(logs)).with_delay(Duration::ZERO);

        let processed = reconciler.reconcile_file(&path).await.unwrap();
        assert_eq!(processed, 2);

        let after = parse_records(&std::fs::read_to_string(&path).unwrap());
        assert_eq!(&after[0][6..], &DETAIL_HEADERS.map(String::from));
        assert_eq!(&after[1][6..], &["12.34", "31", "2.500000", ""]);
        assert_eq!(after[2][9], "No logs found for this task.");
    }

    #[test]
    fn test_report_without_end_time_has_no_delay() {
        let details = report_details(&report_event(), None);
        assert_eq!(details[0], "12.34");
        assert_eq!(details[2], "");
    }
}
