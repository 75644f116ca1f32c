//! Message log loading and report output.

use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{DataError, IngestError};
use crate::pipeline::types::RawRow;

/// Columns every export must carry. Others are ignored.
pub const REQUIRED_COLUMNS: [&str; 3] = ["message_body", "message_timestamp", "message_members"];

/// Rows read from an export, plus how many structurally invalid rows were
/// skipped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedRows {
    pub rows: Vec<RawRow>,
    pub skipped: usize,
}

/// Load rows from a CSV file.
///
/// With `strict`, the first malformed row aborts the load.
pub fn load_rows(path: &Path, strict: bool) -> Result<LoadedRows, IngestError> {
    let file = fs::File::open(path)?;
    let loaded = read_rows(file, strict)?;
    info!(
        path = %path.display(),
        rows = loaded.rows.len(),
        skipped = loaded.skipped,
        "Loaded message log"
    );
    Ok(loaded)
}

/// Read rows from any CSV source with a header line.
///
/// A row with the wrong number of fields or a non-UTF-8 field is skipped
/// with a warning, or returned as `DataError::InvalidRow` when `strict`.
/// Read failures of the source itself are always fatal.
pub fn read_rows<R: Read>(reader: R, strict: bool) -> Result<LoadedRows, IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(IngestError::MissingColumn(column.to_string()));
        }
    }
    let byte_headers = rdr.byte_headers()?.clone();

    let mut loaded = LoadedRows::default();
    for (idx, record) in rdr.byte_records().enumerate() {
        let row = idx + 1;
        let record = record?;

        let parsed = if record.len() != byte_headers.len() {
            Err(format!(
                "expected {} fields, found {}",
                byte_headers.len(),
                record.len()
            ))
        } else {
            record
                .deserialize::<RawRow>(Some(&byte_headers))
                .map_err(|e| e.to_string())
        };

        match parsed {
            Ok(mut raw) => {
                raw.source_row = Some(row);
                loaded.rows.push(raw);
            }
            Err(reason) if strict => {
                return Err(DataError::InvalidRow { row, reason }.into());
            }
            Err(reason) => {
                warn!(row, reason = %reason, "Skipping malformed row");
                loaded.skipped += 1;
            }
        }
    }
    Ok(loaded)
}

/// Write the rendered report, creating parent directories as needed.
pub fn write_report(path: &Path, report: &str) -> Result<(), IngestError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, report)?;
    info!(path = %path.display(), bytes = report.len(), "Report saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn reads_rows_and_ignores_extra_columns() {
        let csv = "\
id,message_body,message_timestamp,message_members,direction
1,\"Hi, how can I help?\",2024-10-28 10:00:00,+15551234567,out
2,Where is my order?,2024-10-28 10:01:00,\"+14159436084,+15551234567\",in
";
        let rows = read_rows(csv.as_bytes(), false).unwrap().rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message_body.as_deref(), Some("Hi, how can I help?"));
        assert_eq!(rows[1].message_members.as_deref(), Some("+14159436084,+15551234567"));
        assert_eq!(rows[1].message_timestamp, "2024-10-28 10:01:00");
    }

    #[test]
    fn empty_fields_become_none() {
        let csv = "message_body,message_timestamp,message_members\n,2024-10-28 10:00:00,\n";
        let rows = read_rows(csv.as_bytes(), false).unwrap().rows;
        assert!(rows[0].message_body.is_none());
        assert!(rows[0].message_members.is_none());
    }

    const SHORT_HEADER: &str = "message_body,message_timestamp,message_members\n";

    #[test]
    fn wrong_field_count_row_is_skipped() {
        let csv = format!(
            "{SHORT_HEADER}\
first,2024-10-28 10:00:00,+1555000
second,2024-10-28 10:01:00,+1555000,extra
third,2024-10-28 10:02:00,+1555000
"
        );
        let loaded = read_rows(csv.as_bytes(), false).unwrap();
        assert_eq!(loaded.skipped, 1);
        let bodies: Vec<_> = loaded.rows.iter().map(|r| r.message_body.as_deref()).collect();
        assert_eq!(bodies, [Some("first"), Some("third")]);
        assert_eq!(loaded.rows[1].source_row, Some(3));
    }

    #[test]
    fn invalid_utf8_row_is_skipped() {
        let mut csv = SHORT_HEADER.as_bytes().to_vec();
        csv.extend_from_slice(b"ok,2024-10-28 10:00:00,+1555000\n");
        csv.extend_from_slice(b"ab\xff\xfe,2024-10-28 10:01:00,+1555000\n");
        csv.extend_from_slice(b"also ok,2024-10-28 10:02:00,+1555000\n");

        let loaded = read_rows(csv.as_slice(), false).unwrap();
        assert_eq!(loaded.skipped, 1);
        assert_eq!(loaded.rows.len(), 2);
        assert_eq!(loaded.rows[1].message_body.as_deref(), Some("also ok"));
    }

    #[test]
    fn malformed_row_is_fatal_in_strict_mode() {
        let csv = format!("{SHORT_HEADER}ok,2024-10-28 10:00:00,+1\nshort,2024-10-28 10:01:00\n");
        match read_rows(csv.as_bytes(), true) {
            Err(IngestError::Data(DataError::InvalidRow { row, reason })) => {
                assert_eq!(row, 2);
                assert!(reason.contains("found 2"), "{reason}");
            }
            other => panic!("Expected InvalidRow, got {:?}", other),
        }

        let mut bytes = SHORT_HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(b"\xff,2024-10-28 10:01:00,+1\n");
        assert!(matches!(
            read_rows(bytes.as_slice(), true),
            Err(IngestError::Data(DataError::InvalidRow { row: 1, .. }))
        ));
    }

    #[test]
    fn missing_column_is_reported() {
        let csv = "message_body,message_timestamp\nhello,2024-10-28 10:00:00\n";
        match read_rows(csv.as_bytes(), false) {
            Err(IngestError::MissingColumn(col)) => assert_eq!(col, "message_members"),
            other => panic!("Expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn load_rows_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_rows(&tmp.path().join("nope.csv"), false);
        assert!(matches!(result, Err(IngestError::Io(_))));
    }

    #[test]
    fn write_report_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out/nested/report.md");
        write_report(&path, "# Conversation Analysis Report\n").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# Conversation Analysis Report\n"
        );
    }

    #[test]
    fn load_rows_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("support.csv");
        fs::write(
            &path,
            "message_body,message_timestamp,message_members\nhey,2024-10-28 10:00:00,+1\n",
        )
        .unwrap();
        let loaded = load_rows(&path, false).unwrap();
        let mut expected = RawRow::new("hey", "2024-10-28 10:00:00", "+1");
        expected.source_row = Some(1);
        assert_eq!(loaded.rows, vec![expected]);
        assert_eq!(loaded.skipped, 0);
    }
}
