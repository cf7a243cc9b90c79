use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ReportError, Result};
use crate::types::{CellValue, RawTable};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub blank_rows: usize,
    pub ragged_rows: usize,
}

/// Reads an uploaded report. The first row is the header; `.csv` goes
/// through the CSV reader and spreadsheet extensions through calamine
/// (first worksheet only).
pub fn load_upload(path: &Path) -> Result<(RawTable, LoadReport)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let loaded = match ext.as_str() {
        "csv" => load_csv(path)?,
        "xlsx" | "xlsm" | "xls" | "ods" => load_workbook(path)?,
        other => return Err(ReportError::UnsupportedFormat(other.to_string())),
    };
    info!(
        path = %path.display(),
        rows = loaded.1.total_rows,
        columns = loaded.0.columns.len(),
        "loaded upload"
    );
    Ok(loaded)
}

pub fn load_csv(path: &Path) -> Result<(RawTable, LoadReport)> {
    let rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    read_csv(rdr)
}

pub fn read_csv<R: std::io::Read>(mut rdr: csv::Reader<R>) -> Result<(RawTable, LoadReport)> {
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let mut table = RawTable::new(headers);
    let mut report = LoadReport::default();

    for result in rdr.records() {
        let record = result?;
        report.total_rows += 1;
        if record.len() != table.columns.len() {
            report.ragged_rows += 1;
        }
        let cells: Vec<CellValue> = record.iter().map(CellValue::from).collect();
        if cells.iter().all(CellValue::is_empty) {
            report.blank_rows += 1;
            continue;
        }
        table.push_row(cells);
    }
    Ok((table, report))
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::from(s.as_str()),
        Data::Float(v) => CellValue::Number(*v),
        Data::Int(v) => CellValue::Number(*v as f64),
        Data::Bool(v) => CellValue::Text(v.to_string()),
        // A serial below one day is a time-of-day format such as `h:mm`.
        Data::DateTime(v) if v.is_duration() || (0.0..1.0).contains(&v.as_f64()) => {
            CellValue::Number(v.as_f64() * 24.0)
        }
        Data::DateTime(v) => match v.as_datetime() {
            Some(dt) => CellValue::Text(dt.date().format("%Y-%m-%d").to_string()),
            None => CellValue::Number(v.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn header_label(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

pub fn load_workbook(path: &Path) -> Result<(RawTable, LoadReport)> {
    let mut workbook = open_workbook_auto(path)?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        debug!(path = %path.display(), "workbook has no worksheets");
        return Ok((RawTable::default(), LoadReport::default()));
    };
    let range = range?;
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok((RawTable::default(), LoadReport::default()));
    };
    let mut table = RawTable::new(header.iter().map(header_label).collect());
    let mut report = LoadReport::default();
    for row in rows {
        report.total_rows += 1;
        let cells: Vec<CellValue> = row.iter().map(cell_value).collect();
        if cells.iter().all(CellValue::is_empty) {
            report.blank_rows += 1;
            continue;
        }
        table.push_row(cells);
    }
    Ok((table, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{ExcelDateTime, ExcelDateTimeType};
    use std::io::Write;

    #[test]
    fn csv_upload_keeps_raw_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relatorio.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Data,Subprefeitura,KM").unwrap();
        writeln!(f, "05/01/2024,Sé,12").unwrap();
        writeln!(f, ",,").unwrap();
        writeln!(f, "06/01/2024,Lapa").unwrap();
        drop(f);

        let (table, report) = load_upload(&path).unwrap();
        assert_eq!(table.columns, vec!["Data", "Subprefeitura", "KM"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][2], CellValue::Empty);
        assert_eq!(report, LoadReport { total_rows: 3, blank_rows: 1, ragged_rows: 1 });
    }

    #[test]
    fn header_only_upload_has_zero_rows() {
        let rdr = ReaderBuilder::new().from_reader("Data,KM\n".as_bytes());
        let (table, report) = read_csv(rdr).unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(table.is_empty());
        assert_eq!(report.total_rows, 0);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_upload(Path::new("relatorio.pdf")).unwrap_err();
        assert!(matches!(err, ReportError::UnsupportedFormat(ext) if ext == "pdf"));
    }

    #[test]
    fn workbook_cells_keep_their_type() {
        assert_eq!(cell_value(&Data::Float(4.5)), CellValue::Number(4.5));
        assert_eq!(cell_value(&Data::String("  ".into())), CellValue::Empty);
        assert_eq!(
            cell_value(&Data::DateTimeIso("2024-03-01T00:00:00".into())),
            CellValue::Text("2024-03-01T00:00:00".into())
        );
    }

    #[test]
    fn workbook_times_become_hours() {
        let clock = ExcelDateTime::new(0.5, ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_value(&Data::DateTime(clock)), CellValue::Number(12.0));
        let elapsed = ExcelDateTime::new(1.25, ExcelDateTimeType::TimeDelta, false);
        assert_eq!(cell_value(&Data::DateTime(elapsed)), CellValue::Number(30.0));
        // 45352 is 2024-03-01.
        let day = ExcelDateTime::new(45352.0, ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_value(&Data::DateTime(day)), CellValue::Text("2024-03-01".into()));
    }
}
