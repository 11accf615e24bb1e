//! Raw export loaders producing [`RawTable`]s.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::Array;
use arrow_csv::reader::Format;
use arrow_csv::ReaderBuilder;
use arrow_schema::{DataType, Field, Schema};
use taskpulse_core::{RawRecord, RawTable, RawValue};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SCHEMA_SAMPLE_ROWS: usize = 100;

/// Loads a raw export, dispatching on the file extension.
pub fn load_raw_table(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let table = match extension.as_deref() {
        Some("csv") => {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            parse_csv_bytes(&bytes).with_context(|| format!("parsing {}", path.display()))?
        }
        Some("json") => {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            parse_json_records(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        _ => bail!(
            "unsupported raw export {}: expected a .csv or .json file (save spreadsheets as CSV first)",
            path.display()
        ),
    };
    debug!(path = %path.display(), rows = table.len(), columns = table.headers.len(), "loaded raw export");
    Ok(table)
}

fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let header = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = header.iter().filter(|b| **b == b';').count();
    let commas = header.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Parses a CSV export with a header row; every column is read as text.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<RawTable> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RawTable::default());
    }
    let delimiter = sniff_delimiter(bytes);
    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (inferred, _) = format
        .infer_schema(Cursor::new(bytes), Some(SCHEMA_SAMPLE_ROWS))
        .context("reading CSV header")?;
    let headers = inferred
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Ok(RawTable::default());
    }

    let schema = Arc::new(Schema::new(
        headers
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let reader = ReaderBuilder::new(schema)
        .with_header(true)
        .with_delimiter(delimiter)
        .build(Cursor::new(bytes))
        .context("opening CSV reader")?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context("reading CSV records")?;
        let columns = batch
            .columns()
            .iter()
            .map(|column| column.as_string_opt::<i32>().context("CSV column is not text"))
            .collect::<Result<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            let record = headers
                .iter()
                .zip(&columns)
                .map(|(name, column)| {
                    let value = if column.is_null(row) {
                        RawValue::Null
                    } else {
                        RawValue::Text(column.value(row).to_string())
                    };
                    (name.clone(), value)
                })
                .collect::<RawRecord>();
            rows.push(record);
        }
    }
    Ok(RawTable::new(headers, rows))
}

/// Parses a JSON array of flat objects, one object per raw record.
pub fn parse_json_records(text: &str) -> Result<RawTable> {
    let rows: Vec<RawRecord> = serde_json::from_str(text)
        .context("expected a JSON array of objects with scalar values")?;
    Ok(RawTable::from_records(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_cells_are_text_and_blanks_are_blank() {
        let table = parse_csv_bytes(b"Task ID,Completion Date\nT1,2024-01-15\nT2,\n").unwrap();
        assert_eq!(table.headers, vec!["Task ID".to_string(), "Completion Date".to_string()]);
        assert_eq!(table.len(), 2);
        assert_eq!(RawTable::cell(&table.rows[0], "Completion Date").as_text(), "2024-01-15");
        assert!(RawTable::cell(&table.rows[1], "Completion Date").is_blank());
    }

    #[test]
    fn numeric_looking_csv_columns_stay_text() {
        let table = parse_csv_bytes(b"Task ID,Name\n0042,x\n").unwrap();
        assert_eq!(RawTable::cell(&table.rows[0], "Task ID"), &RawValue::from("0042"));
    }

    #[test]
    fn semicolon_delimited_csv_is_detected() {
        let table = parse_csv_bytes("ProcessoID;Descricao\n7;Folha de pagamento\n".as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["ProcessoID".to_string(), "Descricao".to_string()]);
        assert_eq!(
            RawTable::cell(&table.rows[0], "Descricao").as_text(),
            "Folha de pagamento"
        );
    }

    #[test]
    fn bom_and_padded_headers_are_normalized() {
        let table = parse_csv_bytes(b"\xEF\xBB\xBF Task ID ,Assignee\nT1,Ana\n").unwrap();
        assert!(table.has_column("Task ID"));
        assert_eq!(RawTable::cell(&table.rows[0], "Task ID").as_text(), "T1");
    }

    #[test]
    fn all_blank_csv_rows_are_skipped() {
        let table = parse_csv_bytes(b"Task ID,Assignee\nT1,Ana\n,\n , \n").unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(RawTable::cell(&table.rows[0], "Assignee").as_text(), "Ana");
    }

    #[test]
    fn empty_csv_is_an_empty_table() {
        assert_eq!(parse_csv_bytes(b"").unwrap(), RawTable::default());
    }

    #[test]
    fn json_records_collect_headers() {
        let table = parse_json_records(r#"[{"ProcessoID": 1, "Descricao": "DAS"}]"#).unwrap();
        assert!(table.has_column("ProcessoID"));
        assert_eq!(RawTable::cell(&table.rows[0], "ProcessoID"), &RawValue::Integer(1));
    }

    #[test]
    fn json_that_is_not_an_array_is_rejected() {
        let err = parse_json_records(r#"{"ProcessoID": 1}"#).unwrap_err();
        assert!(format!("{err:#}").contains("JSON array"));
    }
}
