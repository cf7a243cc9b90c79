// Categorical and temporal row filtering.
//
// Every active dimension is an independent predicate and they are combined
// with AND, so the order in which selections are applied never matters.
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::types::{
    ColumnKind, FilterSelection, PeriodKey, ReportRow, ReportTable, TemporalFilter,
};

/// Live filter choices, derived from whatever is currently stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOptions {
    pub categorical: BTreeMap<String, Vec<String>>,
    pub periods: Vec<PeriodKey>,
    pub date_bounds: Option<(NaiveDate, NaiveDate)>,
    pub metrics: Vec<String>,
}

pub fn date_bounds(table: &ReportTable) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates = table.rows.iter().filter_map(|r| r.date);
    let first = dates.next()?;
    Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}

pub fn available_periods(table: &ReportTable) -> Vec<PeriodKey> {
    let set: BTreeSet<PeriodKey> = table.rows.iter().filter_map(|r| r.period).collect();
    set.into_iter().collect()
}

pub fn filter_options(table: &ReportTable) -> FilterOptions {
    let categorical = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind == ColumnKind::Categorical)
        .map(|(idx, c)| {
            let values: BTreeSet<String> =
                table.rows.iter().filter_map(|r| r.cells[idx].display()).collect();
            (c.name.clone(), values.into_iter().collect())
        })
        .collect();
    FilterOptions {
        categorical,
        periods: available_periods(table),
        date_bounds: date_bounds(table),
        metrics: table.metric_columns(),
    }
}

enum Predicate<'a> {
    Member { idx: usize, values: &'a BTreeSet<String> },
    InPeriods(&'a BTreeSet<PeriodKey>),
    Dated,
    InRange(NaiveDate, NaiveDate),
}

impl Predicate<'_> {
    fn matches(&self, row: &ReportRow) -> bool {
        match self {
            Predicate::Member { idx, values } => row.cells[*idx]
                .display()
                .is_some_and(|v| values.contains(&v)),
            Predicate::InPeriods(keys) => row.period.is_some_and(|p| keys.contains(&p)),
            Predicate::Dated => row.period.is_some(),
            Predicate::InRange(start, end) => {
                row.date.is_some_and(|d| *start <= d && d <= *end)
            }
        }
    }
}

fn predicates<'a>(table: &ReportTable, selection: &'a FilterSelection) -> Result<Vec<Predicate<'a>>> {
    let mut preds = Vec::new();
    for (column, values) in &selection.categorical {
        if values.is_empty() {
            continue;
        }
        let idx = table
            .column_index(column)
            .ok_or_else(|| ReportError::UnknownColumn(column.clone()))?;
        preds.push(Predicate::Member { idx, values });
    }

    match &selection.temporal {
        TemporalFilter::Unrestricted => {}
        TemporalFilter::Periods(keys) if keys.is_empty() => preds.push(Predicate::Dated),
        TemporalFilter::Periods(keys) => preds.push(Predicate::InPeriods(keys)),
        // An open side is unbounded and never depends on the table passed in.
        TemporalFilter::DateRange { start, end } => {
            if let (Some(s), Some(e)) = (start, end) {
                if s > e {
                    return Err(ReportError::InvalidSelection(format!(
                        "date range starts after it ends ({} > {})",
                        s, e
                    )));
                }
            }
            preds.push(Predicate::InRange(
                start.unwrap_or(NaiveDate::MIN),
                end.unwrap_or(NaiveDate::MAX),
            ));
        }
    }
    Ok(preds)
}

/// Keeps the rows matching every active dimension of `selection`.
pub fn apply(table: &ReportTable, selection: &FilterSelection) -> Result<ReportTable> {
    let preds = predicates(table, selection)?;
    let rows: Vec<ReportRow> = table
        .rows
        .iter()
        .filter(|row| preds.iter().all(|p| p.matches(row)))
        .cloned()
        .collect();
    debug!(kept = rows.len(), of = table.rows.len(), "applied filters");
    Ok(ReportTable { columns: table.columns.clone(), rows })
}
