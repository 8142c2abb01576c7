// src/core/csv.rs

//! Minimal CSV record codec (comma delimited, double-quote escaping).
//!
//! Fields are quoted only when they contain the delimiter, a quote, or a
//! line break. The reader understands quoted fields spanning lines.

use std::io::{self, Write};

const DELIMITER: char = ',';

/// Escape a single field if needed.
pub fn escape_field(value: &str) -> String {
    if value.contains(DELIMITER) || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Format one record, without the trailing line break.
pub fn format_record<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}

pub fn write_record<W: Write, S: AsRef<str>>(writer: &mut W, fields: &[S]) -> io::Result<()> {
    writer.write_all(format_record(fields).as_bytes())?;
    writer.write_all(b"\n")
}

/// Parse a whole document into records. Blank lines are skipped.
pub fn parse_records(input: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                field_started = true;
            }
            DELIMITER => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\r' => {}
            '\n' => {
                if field_started || !field.is_empty() || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if field_started || !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_only_when_needed() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field(""), "");
    }

    #[test]
    fn test_format_record_keeps_empty_cells() {
        assert_eq!(format_record(&["example.com", "example.com", ""]), "example.com,example.com,");
    }

    #[test]
    fn test_parse_handles_quotes_and_embedded_newlines() {
        let input = "Domain,Note\na.gov,\"line one\nline two\"\nb.gov,\"x, \"\"y\"\"\"\n";
        let records = parse_records(input);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["a.gov", "line one\nline two"]);
        assert_eq!(records[2], vec!["b.gov", "x, \"y\""]);
    }

    #[test]
    fn test_parse_trailing_empty_field_and_crlf() {
        let records = parse_records("a,b,\r\nc,,d");
        assert_eq!(records, vec![vec!["a", "b", ""], vec!["c", "", "d"]]);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let records = parse_records("a\n\nb\n");
        assert_eq!(records, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_written_record_parses_back() {
        let fields = vec!["a,b".to_string(), "q\"".to_string(), String::new()];
        let mut out = Vec::new();
        write_record(&mut out, &fields).unwrap();
        let parsed = parse_records(std::str::from_utf8(&out).unwrap());
        assert_eq!(parsed, vec![fields]);
    }
}
