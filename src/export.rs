//! Spreadsheet export of aggregated rows.
//!
//! Produces a single-sheet workbook (or CSV) with a `timestamp` column
//! followed by one column per field. Missing cells are left blank.

use crate::core::aggregate::AggregatedRow;
use crate::core::reading::Field;
use crate::core::time::format_local;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sheet name used in exported workbooks.
pub const SHEET_NAME: &str = "Data";

/// Prefix of exported file names.
pub const FILE_PREFIX: &str = "water_quality_data";

/// Layout of the timestamp column.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Excel number format of the timestamp column.
const EXCEL_TIMESTAMP_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    /// Parse a format name. Unknown names fall back to xlsx.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "csv" => ExportFormat::Csv,
            _ => ExportFormat::Xlsx,
        }
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    /// MIME type of the document.
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Export errors.
#[derive(Debug)]
pub enum ExportError {
    Xlsx(String),
    Io(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Xlsx(e) => write!(f, "Spreadsheet error: {e}"),
            ExportError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<XlsxError> for ExportError {
    fn from(e: XlsxError) -> Self {
        ExportError::Xlsx(e.to_string())
    }
}

/// A rendered export, ready to download or write to disk.
#[derive(Debug, Clone)]
pub struct ExportDocument {
    pub file_name: String,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

impl ExportDocument {
    /// MIME type of the document.
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// Write the document into `dir`, returning the full path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(dir).map_err(|e| ExportError::Io(e.to_string()))?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes).map_err(|e| ExportError::Io(e.to_string()))?;
        Ok(path)
    }
}

/// File name with a current-time suffix, e.g. `water_quality_data_20240301_0915.xlsx`.
pub fn export_file_name(format: ExportFormat, now: DateTime<Utc>, tz: Tz) -> String {
    format!(
        "{}_{}.{}",
        FILE_PREFIX,
        format_local(now, tz, "%Y%m%d_%H%M"),
        format.extension()
    )
}

fn header() -> Vec<&'static str> {
    std::iter::once("timestamp")
        .chain(Field::ALL.iter().map(|f| f.key()))
        .collect()
}

/// Local wall-clock time of an instant, as stored in a date cell.
///
/// Excel dates carry no offset, so cells hold the time shown on the dashboard.
pub fn excel_timestamp(instant: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
    instant.with_timezone(&tz).naive_local()
}

/// Render rows as an xlsx workbook with a single `Data` sheet.
pub fn to_xlsx(rows: &[AggregatedRow], tz: Tz) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let timestamp_format = Format::new().set_num_format(EXCEL_TIMESTAMP_FORMAT);

    {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;
        worksheet.set_column_width(0, 20)?;

        for (col, name) in header().into_iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, name, &bold)?;
        }

        for (i, row) in rows.iter().enumerate() {
            let excel_row = (i + 1) as u32;
            worksheet.write_datetime_with_format(
                excel_row,
                0,
                &excel_timestamp(row.bucket_start, tz),
                &timestamp_format,
            )?;
            for (j, field) in Field::ALL.iter().enumerate() {
                if let Some(value) = row.mean(*field) {
                    worksheet.write_number(excel_row, (j + 1) as u16, value)?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Render rows as CSV text.
pub fn to_csv(rows: &[AggregatedRow], tz: Tz) -> String {
    let mut output = String::new();
    output.push_str(&header().join(","));
    output.push('\n');

    for row in rows {
        let mut values = vec![format_local(row.bucket_start, tz, TIMESTAMP_FORMAT)];
        values.extend(
            Field::ALL
                .iter()
                .map(|f| row.mean(*f).map(|v| v.to_string()).unwrap_or_default()),
        );
        output.push_str(&values.join(","));
        output.push('\n');
    }

    output
}

/// Render rows in the requested format.
pub fn export(
    rows: &[AggregatedRow],
    format: ExportFormat,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<ExportDocument, ExportError> {
    let bytes = match format {
        ExportFormat::Xlsx => to_xlsx(rows, tz)?,
        ExportFormat::Csv => to_csv(rows, tz).into_bytes(),
    };

    Ok(ExportDocument {
        file_name: export_file_name(format, now, tz),
        format,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reading::Measurements;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn rows() -> Vec<AggregatedRow> {
        vec![
            AggregatedRow {
                bucket_start: at("2024-03-01T09:00:00Z"),
                reading_count: 2,
                values: Measurements::default()
                    .with(Field::Ph, 7.25)
                    .with(Field::Depth, 1.5),
            },
            AggregatedRow {
                bucket_start: at("2024-03-01T09:10:00Z"),
                reading_count: 1,
                values: Measurements::default().with(Field::FlowInd, 12.0),
            },
        ]
    }

    #[test]
    fn test_file_name() {
        let now = at("2024-03-01T09:15:42Z");
        assert_eq!(
            export_file_name(ExportFormat::Xlsx, now, Tz::UTC),
            "water_quality_data_20240301_0915.xlsx"
        );
        assert_eq!(
            export_file_name(ExportFormat::Csv, now, Tz::Asia__Kolkata),
            "water_quality_data_20240301_1445.csv"
        );
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::parse("CSV"), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("xlsx"), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::parse("pdf"), ExportFormat::Xlsx);
    }

    #[test]
    fn test_csv_leaves_missing_cells_blank() {
        let csv = to_csv(&rows(), Tz::UTC);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "timestamp,pH,TDS,Depth,FlowInd");
        assert_eq!(lines[1], "2024-03-01 09:00:00,7.25,,1.5,");
        assert_eq!(lines[2], "2024-03-01 09:10:00,,,,12");
    }

    #[test]
    fn test_xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&rows(), Tz::UTC).unwrap();
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_xlsx_timestamps_are_local_date_cells() {
        let instant = at("2024-03-01T09:10:00Z");
        let local = excel_timestamp(instant, Tz::Asia__Kolkata);
        assert_eq!(local.format(TIMESTAMP_FORMAT).to_string(), "2024-03-01 14:40:00");
        assert_eq!(
            excel_timestamp(instant, Tz::UTC).format(TIMESTAMP_FORMAT).to_string(),
            format_local(instant, Tz::UTC, TIMESTAMP_FORMAT)
        );

        // Rows across a DST change still produce a valid workbook
        let mut dst_rows = rows();
        dst_rows[1].bucket_start = at("2024-11-03T06:30:00Z");
        let bytes = to_xlsx(&dst_rows, Tz::America__New_York).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_export_document() {
        let doc = export(&rows(), ExportFormat::Csv, Tz::UTC, at("2024-03-01T10:00:00Z")).unwrap();
        assert_eq!(doc.file_name, "water_quality_data_20240301_1000.csv");
        assert_eq!(doc.content_type(), "text/csv; charset=utf-8");
        assert!(String::from_utf8(doc.bytes.clone()).unwrap().starts_with("timestamp,"));

        let dir = std::env::temp_dir().join(format!("wq-export-test-{}", uuid::Uuid::new_v4()));
        let path = doc.write_to(&dir).unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
