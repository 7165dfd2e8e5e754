//! Verification report CSV
//!
//! Fixed twelve-column header, one row per result. Timestamps are
//! RFC 3339 with the local timezone offset, byte counts are decimal
//! integers, and any field containing a comma, quote or newline is
//! quoted. The header is written even for an empty run.

use super::VerifyRow;
use crate::error::{Result, TreeSyncError};
use chrono::{DateTime, Local, Utc};
use std::io::Write;
use std::path::Path;

/// The fixed report header
pub const REPORT_HEADER: &str = "path,sourceExists,destExists,sizeMatch,hashMatch,\
sourceHash,destHash,sourceSize,destSize,sourceTime,destTime,error";

/// Write the report for the given rows
pub fn write_report(path: &Path, rows: &[VerifyRow]) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| TreeSyncError::Report(format!("cannot create '{}': {}", path.display(), e)))?;
    let mut writer = std::io::BufWriter::new(file);
    write_rows(&mut writer, rows)
        .map_err(|e| TreeSyncError::Report(format!("cannot write '{}': {}", path.display(), e)))
}

fn write_rows<W: Write>(writer: &mut W, rows: &[VerifyRow]) -> std::io::Result<()> {
    writeln!(writer, "{}", REPORT_HEADER)?;
    for row in rows {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            escape(&row.path),
            row.source_exists,
            row.dest_exists,
            row.size_match,
            row.hash_match,
            row.source_hash,
            row.dest_hash,
            row.source_size,
            row.dest_size,
            format_time(row.source_time_ns),
            format_time(row.dest_time_ns),
            escape(&row.error),
        )?;
    }
    writer.flush()
}

/// RFC 3339 with local offset; empty for an absent timestamp
fn format_time(time_ns: Option<i64>) -> String {
    match time_ns {
        Some(ns) => {
            let secs = ns.div_euclid(1_000_000_000);
            let nanos = ns.rem_euclid(1_000_000_000) as u32;
            DateTime::<Utc>::from_timestamp(secs, nanos)
                .map(|t| t.with_timezone(&Local).to_rfc3339())
                .unwrap_or_default()
        }
        None => String::new(),
    }
}

/// Minimal CSV quoting: only fields that need it are wrapped
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::VerifyOutcome;
    use tempfile::TempDir;

    fn sample_row() -> VerifyRow {
        VerifyRow {
            path: "sub/file.txt".to_string(),
            source_exists: true,
            dest_exists: true,
            size_match: true,
            hash_match: false,
            source_hash: "aa".to_string(),
            dest_hash: "bb".to_string(),
            source_size: 100,
            dest_size: 100,
            source_time_ns: Some(1_700_000_000_000_000_000),
            dest_time_ns: None,
            error: String::new(),
            outcome: VerifyOutcome::Mismatch,
        }
    }

    #[test]
    fn test_header_written_for_empty_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        write_report(&path, &[]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), REPORT_HEADER);
    }

    #[test]
    fn test_row_formatting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        write_report(&path, &[sample_row()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<_> = lines[1].split(',').collect();
        assert_eq!(fields[0], "sub/file.txt");
        assert_eq!(fields[3], "true");
        assert_eq!(fields[4], "false");
        assert_eq!(fields[7], "100");
        // RFC 3339 with offset, e.g. 2023-11-14T22:13:20+00:00
        assert!(fields[9].contains('T'));
        assert!(fields[9].contains('+') || fields[9].contains('-'));
        // Absent destination time is an empty field
        assert_eq!(fields[10], "");
    }

    #[test]
    fn test_error_field_is_quoted_when_needed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        let mut row = sample_row();
        row.error = "read failed, partial 42 bytes".to_string();
        write_report(&path, &[row]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"read failed, partial 42 bytes\""));
    }

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(escape(r#"say "hi""#), r#""say ""hi""""#);
        assert_eq!(escape("plain"), "plain");
    }
}
