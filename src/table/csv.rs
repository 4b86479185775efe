//! Comma-separated text tables.
//!
//! Column types are inferred once when a file is read: a column whose every
//! non-empty cell parses as an integer is `Int`, else one that parses as a
//! float is `Float`, else `Text`. Floats are written in shortest round-trip
//! form so a table survives write-then-read unchanged.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use ::csv::{ReaderBuilder, Writer};

use super::{Column, ColumnData, Result, Table, TableError};

/// Cells treated as missing on input.
fn is_null_token(cell: &str) -> bool {
    cell.is_empty() || cell.eq_ignore_ascii_case("nan") || cell == "NA"
}

/// Header names left behind by writing a data frame with its row index.
fn is_index_residue(name: &str) -> bool {
    name.is_empty() || name.starts_with("Unnamed:")
}

pub fn read_csv(path: &Path) -> Result<Table> {
    read_csv_from(File::open(path)?)
}

pub fn read_csv_from(reader: impl Read) -> Result<Table> {
    let mut rdr = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for record in rdr.records() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(TableError::RaggedRow {
                line: record.position().map_or(0, |p| p.line()),
                expected: headers.len(),
                found: record.len(),
            });
        }
        for (col, cell) in cells.iter_mut().zip(record.iter()) {
            let cell = cell.trim();
            col.push((!is_null_token(cell)).then(|| cell.to_string()));
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .filter(|(name, _)| !is_index_residue(name))
        .map(|(name, raw)| Column::new(name, infer_column(raw)))
        .collect();
    Table::new(columns)
}

fn infer_column(raw: Vec<Option<String>>) -> ColumnData {
    let present = || raw.iter().flatten();

    if present().all(|s| s.parse::<i64>().is_ok()) {
        return ColumnData::Int(
            raw.iter().map(|s| s.as_deref().and_then(|s| s.parse().ok())).collect(),
        );
    }
    if present().all(|s| s.parse::<f64>().is_ok()) {
        return ColumnData::Float(
            raw.iter()
                .map(|s| s.as_deref().and_then(|s| s.parse::<f64>().ok()).filter(|v| !v.is_nan()))
                .collect(),
        );
    }
    ColumnData::Text(raw)
}

pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    write_csv_to(table, File::create(path)?)
}

pub fn write_csv_to(table: &Table, writer: impl Write) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(table.column_names())?;

    let mut record: Vec<String> = Vec::with_capacity(table.num_columns());
    for row in 0..table.num_rows() {
        record.clear();
        for col in table.columns() {
            record.push(format_cell(&col.data, row));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn format_cell(data: &ColumnData, row: usize) -> String {
    match data {
        ColumnData::Int(v) => v[row].map(|i| i.to_string()).unwrap_or_default(),
        // Debug keeps a decimal point or exponent, so the type survives re-reading
        ColumnData::Float(v) => v[row].map(|f| format!("{f:?}")).unwrap_or_default(),
        ColumnData::Text(v) => v[row].clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{DataType, Value};

    const SAMPLE: &str = "\
Unnamed: 0,ID,RA,DEC,Flux,Name
0,1,150.1,2.2,0.5,src_a
1,2,150.2,2.3,,src_b
2,3,150.3,2.4,nan,
";

    #[test]
    fn infers_types_and_drops_index_residue() {
        let t = read_csv_from(SAMPLE.as_bytes()).unwrap();
        assert_eq!(t.column_names(), vec!["ID", "RA", "DEC", "Flux", "Name"]);
        let schema = t.schema();
        let types: Vec<DataType> = schema.fields().iter().map(|f| f.dtype).collect();
        assert_eq!(
            types,
            vec![DataType::Int, DataType::Float, DataType::Float, DataType::Float, DataType::Text]
        );
        assert_eq!(t.num_rows(), 3);
        assert_eq!(t.column("Flux").unwrap().get(1), Value::Null);
        assert_eq!(t.column("Flux").unwrap().get(2), Value::Null);
        assert_eq!(t.column("Name").unwrap().get(2), Value::Null);
        assert_eq!(t.column("Name").unwrap().get(0), Value::Text("src_a"));
    }

    #[test]
    fn round_trip_preserves_values_and_types() {
        let t = Table::new(vec![
            Column::int("id", vec![Some(-4), None, Some(1 << 40)]),
            Column::float("ra", [0.1, 1.0, 149.999_999_999_7]),
            Column::float("sep", [1e-300, f64::NAN, 3.0e20]),
            Column::text("note", [Some("a, quoted \"x\""), None, Some("plain")]),
        ])
        .unwrap();

        let mut buf = Vec::new();
        write_csv_to(&t, &mut buf).unwrap();
        let back = read_csv_from(buf.as_slice()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = read_csv_from("a,b\n1,2\n3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TableError::RaggedRow { expected: 2, found: 1, .. }));
    }

    #[test]
    fn header_only_file_gives_empty_table() {
        let t = read_csv_from("ra,dec\n".as_bytes()).unwrap();
        assert_eq!(t.num_rows(), 0);
        assert_eq!(t.column_names(), vec!["ra", "dec"]);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.csv");
        let t = read_csv_from(SAMPLE.as_bytes()).unwrap();
        write_csv(&t, &path).unwrap();
        assert_eq!(read_csv(&path).unwrap(), t);
    }
}
