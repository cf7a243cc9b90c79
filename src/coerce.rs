// Read-time typing of raw cells.
//
// Nothing about column types is persisted; every read re-infers them from
// the raw values, which keeps the store tolerant of schema drift between
// uploads. Per-cell problems never fail the pipeline: they become
// `Coerced::Missing` or `Coerced::Unparsed`.
use chrono::Datelike;
use tracing::debug;

use crate::config::ColumnRoles;
use crate::types::{
    CellValue, Coerced, Column, ColumnKind, PeriodKey, RawTable, ReportRow, ReportTable,
    TypedValue, DATE_COLUMN,
};
use crate::util::{parse_date_dayfirst, parse_duration_hours, parse_f64_safe};

pub fn coerce_date(cell: &CellValue) -> Coerced<chrono::NaiveDate> {
    match cell {
        CellValue::Empty => Coerced::Missing,
        CellValue::Text(s) if s.trim().is_empty() => Coerced::Missing,
        CellValue::Text(s) => match parse_date_dayfirst(s) {
            Some(d) => Coerced::Value(d),
            None => Coerced::Unparsed(s.clone()),
        },
        // A bare number is never guessed into a date.
        CellValue::Number(n) => Coerced::Unparsed(n.to_string()),
    }
}

pub fn coerce_number(cell: &CellValue) -> Coerced<f64> {
    match cell {
        CellValue::Empty => Coerced::Missing,
        CellValue::Number(n) => Coerced::Value(*n),
        CellValue::Text(s) if s.trim().is_empty() => Coerced::Missing,
        CellValue::Text(s) => match parse_f64_safe(Some(s)) {
            Some(v) => Coerced::Value(v),
            None => Coerced::Unparsed(s.clone()),
        },
    }
}

pub fn coerce_duration(cell: &CellValue) -> Coerced<f64> {
    match cell {
        CellValue::Empty => Coerced::Missing,
        CellValue::Number(n) => Coerced::Value(*n),
        CellValue::Text(s) => parse_duration_hours(s),
    }
}

/// At least one cell of the column reads as a number.
pub fn has_numeric_cell(table: &RawTable, idx: usize) -> bool {
    table.rows.iter().any(|row| match &row[idx] {
        CellValue::Number(_) => true,
        CellValue::Text(s) => parse_f64_safe(Some(s)).is_some(),
        CellValue::Empty => false,
    })
}

/// A column is inferred numeric when it has at least one value and every
/// non-empty cell reads as a number.
fn looks_numeric(table: &RawTable, idx: usize) -> bool {
    let mut seen = false;
    for row in &table.rows {
        match &row[idx] {
            CellValue::Number(_) => seen = true,
            CellValue::Text(s) if s.trim().is_empty() => {}
            CellValue::Text(s) => {
                if parse_f64_safe(Some(s)).is_none() {
                    return false;
                }
                seen = true;
            }
            CellValue::Empty => {}
        }
    }
    seen
}

pub fn infer_kind(table: &RawTable, idx: usize, roles: &ColumnRoles) -> ColumnKind {
    let name = &table.columns[idx];
    if name == DATE_COLUMN {
        ColumnKind::Date
    } else if roles.is_duration(name) {
        ColumnKind::Duration
    } else if roles.is_metric(name) || looks_numeric(table, idx) {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

/// Types every cell of a canonical row-set and derives `year` / `mesano`
/// for rows whose date parsed.
pub fn coerce_table(table: &RawTable, roles: &ColumnRoles) -> ReportTable {
    let columns: Vec<Column> = (0..table.columns.len())
        .map(|idx| Column {
            name: table.columns[idx].clone(),
            kind: infer_kind(table, idx, roles),
        })
        .collect();
    let date_idx = table.column_index(DATE_COLUMN);

    let rows: Vec<ReportRow> = table
        .rows
        .iter()
        .map(|raw| {
            let cells: Vec<TypedValue> = raw
                .iter()
                .zip(&columns)
                .map(|(cell, col)| match col.kind {
                    ColumnKind::Date => TypedValue::Date(coerce_date(cell)),
                    ColumnKind::Numeric => TypedValue::Number(coerce_number(cell)),
                    ColumnKind::Duration => TypedValue::Hours(coerce_duration(cell)),
                    ColumnKind::Categorical => TypedValue::Text(cell.as_text()),
                })
                .collect();
            let date = date_idx.and_then(|i| match &cells[i] {
                TypedValue::Date(c) => c.value(),
                _ => None,
            });
            ReportRow {
                cells,
                date,
                year: date.map(|d| d.year()),
                period: date.map(PeriodKey::from_date),
            }
        })
        .collect();

    let undated = rows.iter().filter(|r| r.date.is_none()).count();
    if date_idx.is_some() && undated > 0 {
        debug!(undated, "rows without a valid date are kept out of period views");
    }
    ReportTable { columns, rows }
}

/// Rewrites the `date` column to ISO text before persisting. Unparsable
/// dates are stored as empty, never as a fabricated value.
pub fn prepare_for_storage(table: &mut RawTable) -> usize {
    let Some(idx) = table.column_index(DATE_COLUMN) else {
        return 0;
    };
    let mut dropped = 0;
    for row in &mut table.rows {
        row[idx] = match coerce_date(&row[idx]) {
            Coerced::Value(d) => CellValue::Text(d.format("%Y-%m-%d").to_string()),
            Coerced::Missing => CellValue::Empty,
            Coerced::Unparsed(_) => {
                dropped += 1;
                CellValue::Empty
            }
        };
    }
    dropped
}
