// src/core/writer.rs

//! One CSV per scanner under `<output>/results/`.
//!
//! Columns: `Domain`, `Base Domain`, the scanner's own headers, then the
//! local metadata columns when `--meta` is on, then the remote metadata
//! columns when the scanner is running remotely as well.

use serde_json::Value;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::csv::{parse_records, write_record};
use crate::core::error::{SweepError, SweepResult};
use crate::core::options::RunOptions;
use crate::core::scanner::Scanner;
use crate::core::suffix_list::SuffixList;
use crate::core::unit::{RemoteMeta, UnitMeta, UnitOutcome, just_microseconds, render_cell, utc_timestamp};

pub const PREFIX_HEADERS: [&str; 2] = ["Domain", "Base Domain"];

pub const LOCAL_META_HEADERS: [&str; 4] = ["Errors", "Start Time", "End Time", "Duration"];

pub const REMOTE_META_HEADERS: [&str; 7] = [
    "Lambda Request ID",
    "Lambda Log Group Name",
    "Lambda Log Stream Name",
    "Lambda Start Time",
    "Lambda End Time",
    "Lambda Memory Limit",
    "Lambda Measured Duration",
];

/// Remote columns appear only for remote-eligible scanners in a remote run
/// with metadata requested.
pub fn has_remote_columns(scanner: &dyn Scanner, options: &RunOptions) -> bool {
    options.meta && options.is_remote() && scanner.remote_eligible()
}

pub fn header_for(scanner: &dyn Scanner, options: &RunOptions) -> Vec<String> {
    let mut header: Vec<String> = PREFIX_HEADERS.iter().map(|h| h.to_string()).collect();
    header.extend(scanner.headers().iter().map(|h| h.to_string()));
    if options.meta {
        header.extend(LOCAL_META_HEADERS.iter().map(|h| h.to_string()));
    }
    if has_remote_columns(scanner, options) {
        header.extend(REMOTE_META_HEADERS.iter().map(|h| h.to_string()));
    }
    header
}

pub fn results_path(options: &RunOptions, scanner: &str) -> PathBuf {
    options.results_dir().join(format!("{scanner}.csv"))
}

pub struct ResultWriter {
    path: PathBuf,
    out: BufWriter<File>,
    scanner_width: usize,
    meta: bool,
    remote_columns: bool,
    suffixes: Arc<SuffixList>,
}

impl ResultWriter {
    /// Creates (truncating) the scanner's CSV and writes the header row.
    pub fn create(
        path: &Path,
        scanner: &dyn Scanner,
        options: &RunOptions,
        suffixes: Arc<SuffixList>,
    ) -> SweepResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SweepError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| SweepError::io(path, e))?;
        let mut writer = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            scanner_width: scanner.headers().len(),
            meta: options.meta,
            remote_columns: has_remote_columns(scanner, options),
            suffixes,
        };
        write_record(&mut writer.out, &header_for(scanner, options)).map_err(|e| SweepError::io(path, e))?;
        debug!(path = %path.display(), "Opened results file.");
        Ok(writer)
    }

    /// Writes every row of the outcome and returns how many were written.
    /// An outcome without rows still gets one row with null scanner columns.
    pub fn write_outcome(&mut self, outcome: &UnitOutcome) -> io::Result<usize> {
        let base_domain = self.suffixes.base_domain_for(&outcome.domain);
        let placeholder = vec![vec![Value::Null; self.scanner_width]];
        let rows = if outcome.rows.is_empty() { &placeholder } else { &outcome.rows };

        for row in rows {
            let mut record = Vec::with_capacity(2 + self.scanner_width + 11);
            record.push(outcome.domain.clone());
            record.push(base_domain.clone());
            record.extend((0..self.scanner_width).map(|i| row.get(i).map(render_cell).unwrap_or_default()));

            if self.meta {
                record.push(outcome.errors.join(" "));
                record.extend(local_meta_cells(outcome.meta.as_ref()));
            }
            if self.remote_columns {
                let remote = outcome.meta.as_ref().and_then(|m| m.remote.as_ref());
                record.extend(remote_meta_cells(remote));
            }

            write_record(&mut self.out, &record)?;
        }
        Ok(rows.len())
    }

    pub fn flush(&mut self) -> SweepResult<()> {
        self.out.flush().map_err(|e| SweepError::io(&self.path, e))
    }
}

fn local_meta_cells(meta: Option<&UnitMeta>) -> [String; 3] {
    match meta {
        Some(m) => [
            utc_timestamp(m.start_time).unwrap_or_default(),
            utc_timestamp(m.end_time).unwrap_or_default(),
            just_microseconds(m.duration),
        ],
        None => Default::default(),
    }
}

fn remote_meta_cells(remote: Option<&RemoteMeta>) -> [String; 7] {
    let Some(r) = remote else { return Default::default() };
    [
        r.request_id.clone().unwrap_or_default(),
        r.log_group_name.clone().unwrap_or_default(),
        r.log_stream_name.clone().unwrap_or_default(),
        r.start_time.and_then(utc_timestamp).unwrap_or_default(),
        r.end_time.and_then(utc_timestamp).unwrap_or_default(),
        r.memory_limit.as_ref().map(render_cell).unwrap_or_default(),
        r.measured_duration.map(just_microseconds).unwrap_or_default(),
    ]
}

/// Sorts the data rows of a finished CSV by every column, keeping the
/// header first. Rewrites through a temporary file.
pub fn sort_csv(path: &Path) -> SweepResult<()> {
    info!(path = %path.display(), "Sorting results.");
    let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
    let mut records = parse_records(&text);
    if records.is_empty() {
        return Ok(());
    }

    let header = records.remove(0);
    records.sort();

    let tmp = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp).map_err(|e| SweepError::io(&tmp, e))?;
        let mut out = BufWriter::new(file);
        write_record(&mut out, &header).map_err(|e| SweepError::io(&tmp, e))?;
        for record in &records {
            write_record(&mut out, record).map_err(|e| SweepError::io(&tmp, e))?;
        }
        out.flush().map_err(|e| SweepError::io(&tmp, e))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| SweepError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::ExecutionMode;
    use crate::core::scanner::dns_scanner::DnsScanner;
    use crate::core::scanner::noop_scanner::NoopScanner;
    use serde_json::json;
    use tempfile::TempDir;

    fn suffixes() -> Arc<SuffixList> {
        Arc::new(SuffixList::parse("com\ngov\n"))
    }

    fn read(path: &Path) -> Vec<Vec<String>> {
        parse_records(&std::fs::read_to_string(path).unwrap())
    }

    #[test]
    fn test_header_layout() {
        let local = RunOptions { meta: true, ..Default::default() };
        let remote = RunOptions { meta: true, mode: ExecutionMode::Remote, ..Default::default() };

        assert_eq!(header_for(&NoopScanner, &RunOptions::default()), vec!["Domain", "Base Domain", "Completed", "Constant", "Variable"]);
        assert_eq!(header_for(&NoopScanner, &local).len(), 5 + 4);
        assert_eq!(header_for(&NoopScanner, &remote).len(), 5 + 4 + 7);
    }

    #[test]
    fn test_ineligible_scanner_never_gets_remote_columns() {
        let remote = RunOptions { meta: true, mode: ExecutionMode::Remote, ..Default::default() };
        let header = header_for(&DnsScanner, &remote);
        assert!(!header.iter().any(|h| h.starts_with("Lambda")));
    }

    #[test]
    fn test_no_rows_becomes_one_null_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noop.csv");
        let mut writer = ResultWriter::create(&path, &NoopScanner, &RunOptions::default(), suffixes()).unwrap();

        let written = writer.write_outcome(&UnitOutcome::failed("www.a.gov", "boom".into())).unwrap();
        writer.flush().unwrap();

        assert_eq!(written, 1);
        let records = read(&path);
        assert_eq!(records[1], vec!["www.a.gov", "a.gov", "", "", ""]);
    }

    #[test]
    fn test_meta_columns_and_multiple_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noop.csv");
        let options = RunOptions { meta: true, ..Default::default() };
        let mut writer = ResultWriter::create(&path, &NoopScanner, &options, suffixes()).unwrap();

        let outcome = UnitOutcome {
            domain: "a.gov".into(),
            rows: vec![vec![json!(true), json!(1), json!("x")], vec![json!(false), json!(2), json!("y, z")]],
            errors: vec!["first.".into(), "second.".into()],
            meta: Some(UnitMeta::new(1_500_000_000.0, 1_500_000_001.5, None)),
        };
        writer.write_outcome(&outcome).unwrap();
        writer.flush().unwrap();

        let records = read(&path);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2][4], "y, z");
        assert_eq!(records[1][5], "first. second.");
        assert_eq!(records[1][6], "2017-07-14T02:40:00.000000+00:00");
        assert_eq!(records[1][8], "1.500000");
    }

    #[test]
    fn test_remote_columns_are_padded_for_non_remote_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noop.csv");
        let options = RunOptions { meta: true, mode: ExecutionMode::Remote, ..Default::default() };
        let mut writer = ResultWriter::create(&path, &NoopScanner, &options, suffixes()).unwrap();

        let remote = RemoteMeta { request_id: Some("req-1".into()), memory_limit: Some(json!("128")), ..Default::default() };
        let with_remote = UnitOutcome {
            domain: "a.gov".into(),
            rows: Vec::new(),
            errors: Vec::new(),
            meta: Some(UnitMeta::new(1.0, 2.0, Some(remote))),
        };
        let without = UnitOutcome { domain: "b.gov".into(), rows: Vec::new(), errors: Vec::new(), meta: Some(UnitMeta::new(1.0, 2.0, None)) };
        writer.write_outcome(&with_remote).unwrap();
        writer.write_outcome(&without).unwrap();
        writer.flush().unwrap();

        let records = read(&path);
        assert!(records.iter().all(|r| r.len() == 16));
        assert_eq!(records[1][9], "req-1");
        assert_eq!(records[1][14], "128");
        assert_eq!(records[2][9], "");
    }

    #[test]
    fn test_sort_keeps_header_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(&path, "Domain,Score\nc.gov,1\na.gov,2\nb.gov,\"3,4\"\n").unwrap();

        sort_csv(&path).unwrap();

        let records = read(&path);
        let domains: Vec<_> = records.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(domains, vec!["Domain", "a.gov", "b.gov", "c.gov"]);
        assert_eq!(records[2][1], "3,4");
        assert!(!path.with_extension("csv.tmp").exists());
    }
}
