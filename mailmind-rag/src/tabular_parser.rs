//! Tabular file decoding for knowledge-base ingestion.
//!
//! Decodes CSV, TSV, XLS, and XLSX files into a header row plus data rows
//! whose cells are either a value or missing. Missing-cell detection follows
//! the dataframe convention: blank cells and the usual NA tokens are missing.

use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tokens that denote a missing cell (matched after trimming, case-sensitive).
const MISSING_VALUE_TOKENS: &[&str] = &[
    "NaN", "nan", "-NaN", "-nan", "NA", "N/A", "n/a", "#N/A", "#NA", "<NA>", "NULL", "null",
    "None",
];

/// A decoded table: named columns in source order, one entry per data row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularData {
    pub headers: Vec<String>,
    /// Each row has exactly `headers.len()` cells; `None` marks a missing value.
    pub rows: Vec<Vec<Option<String>>>,
}

/// File extensions decoded as tables
pub fn is_tabular_extension(extension: &str) -> bool {
    matches!(
        extension,
        "csv" | "tsv" | "xls" | "xlsx" | "xlsm" | "xlsb" | "ods"
    )
}

/// Parse a tabular file (CSV, TSV, XLS, XLSX) into headers and rows.
pub fn parse_tabular_file(path: &Path) -> Result<TabularData, String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" | "tsv" => {
            let bytes = std::fs::read(path).map_err(|e| format!("Failed to read file: {}", e))?;
            let content = String::from_utf8(bytes)
                .map_err(|e| format!("File is not valid UTF-8: {}", e))?;
            let delimiter = if extension == "tsv" { b'\t' } else { b',' };
            parse_delimited_text(&content, delimiter)
        }
        "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => parse_excel(path),
        other => Err(format!("Unsupported tabular format: '{}'", other)),
    }
}

/// Parse decoded delimited text. The first record is the header row.
pub fn parse_delimited_text(content: &str, delimiter: u8) -> Result<TabularData, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true) // Allow varying number of fields
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("Failed to read CSV headers: {}", e))?
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| format!("Failed to read CSV row: {}", e))?;
        rows.push(normalize_row(record.iter().map(decode_cell), headers.len()));
    }

    Ok(TabularData { headers, rows })
}

/// Parse the first worksheet of a spreadsheet. The first row is the header row.
fn parse_excel(path: &Path) -> Result<TabularData, String> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| format!("Failed to open spreadsheet: {}", e))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .ok_or_else(|| "Spreadsheet has no worksheets".to_string())?;

    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| format!("Failed to read worksheet: {}", e))?;

    let mut rows_iter = range.rows();

    let headers: Vec<String> = rows_iter
        .next()
        .map(|row| {
            row.iter()
                .map(|cell| excel_cell_to_string(cell).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();

    let rows = rows_iter
        .map(|row| normalize_row(row.iter().map(excel_cell_to_string), headers.len()))
        .collect();

    Ok(TabularData { headers, rows })
}

/// Pad short rows with missing cells and drop cells past the header width.
fn normalize_row(cells: impl Iterator<Item = Option<String>>, width: usize) -> Vec<Option<String>> {
    let mut row: Vec<Option<String>> = cells.take(width).collect();
    row.resize(width, None);
    row
}

/// Convert a spreadsheet cell to an optional string value.
fn excel_cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => decode_cell(s),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => {
            if f.is_nan() {
                None
            } else if f.fract() == 0.0 {
                Some(format!("{:.0}", f))
            } else {
                Some(f.to_string())
            }
        }
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(format!("{}", dt)),
        Data::DateTimeIso(s) => Some(s.clone()),
        Data::DurationIso(s) => Some(s.clone()),
        Data::Error(e) => Some(format!("#ERR:{:?}", e)),
    }
}

/// Decode a raw cell: missing tokens become `None`, everything else is kept verbatim.
fn decode_cell(raw: &str) -> Option<String> {
    if is_missing_value(raw) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Check if a value represents a missing/null value.
pub fn is_missing_value(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.is_empty() || MISSING_VALUE_TOKENS.contains(&trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_missing_value() {
        assert!(is_missing_value(""));
        assert!(is_missing_value("   "));
        assert!(is_missing_value("NaN"));
        assert!(is_missing_value(" N/A "));
        assert!(is_missing_value("null"));
        assert!(is_missing_value("NULL"));
        assert!(is_missing_value("None"));
        assert!(!is_missing_value("0"));
        assert!(!is_missing_value("-"));
        assert!(!is_missing_value("Nancy"));
    }

    #[test]
    fn test_parse_delimited_text() {
        let data = parse_delimited_text("name,age,city\nAlice,,Pune\nBob,41,Surat\n", b',').unwrap();
        assert_eq!(data.headers, vec!["name", "age", "city"]);
        assert_eq!(data.rows.len(), 2);
        assert_eq!(
            data.rows[0],
            vec![Some("Alice".to_string()), None, Some("Pune".to_string())]
        );
        assert_eq!(data.rows[1][1].as_deref(), Some("41"));
    }

    #[test]
    fn test_ragged_rows_are_normalized() {
        let data = parse_delimited_text("a,b,c\n1\n1,2,3,4\n", b',').unwrap();
        assert_eq!(data.rows[0], vec![Some("1".to_string()), None, None]);
        assert_eq!(data.rows[1].len(), 3);
    }

    #[test]
    fn test_quoted_fields_with_delimiters() {
        let data = parse_delimited_text("product,notes\nRing,\"gold, 18k\"\n", b',').unwrap();
        assert_eq!(data.rows[0][1].as_deref(), Some("gold, 18k"));
    }

    #[test]
    fn test_tab_delimiter() {
        let data = parse_delimited_text("sku\tprice\nR-1\t1200\n", b'\t').unwrap();
        assert_eq!(data.headers, vec!["sku", "price"]);
        assert_eq!(data.rows[0][1].as_deref(), Some("1200"));
    }

    #[test]
    fn test_header_only_table_has_no_rows() {
        let data = parse_delimited_text("a,b\n", b',').unwrap();
        assert_eq!(data.headers.len(), 2);
        assert!(data.rows.is_empty());
    }

    #[test]
    fn test_excel_cell_conversion() {
        assert_eq!(excel_cell_to_string(&Data::Empty), None);
        assert_eq!(excel_cell_to_string(&Data::Float(3.0)).as_deref(), Some("3"));
        assert_eq!(excel_cell_to_string(&Data::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(excel_cell_to_string(&Data::Float(f64::NAN)), None);
        assert_eq!(excel_cell_to_string(&Data::String("NaN".to_string())), None);
        assert_eq!(excel_cell_to_string(&Data::Bool(true)).as_deref(), Some("true"));
    }

    #[test]
    fn test_is_tabular_extension() {
        assert!(is_tabular_extension("csv"));
        assert!(is_tabular_extension("xlsx"));
        assert!(!is_tabular_extension("docx"));
        assert!(!is_tabular_extension("pdf"));
    }

    #[test]
    fn test_parse_tabular_file_rejects_unknown_extension() {
        assert!(parse_tabular_file(Path::new("notes.txt")).is_err());
    }
}
