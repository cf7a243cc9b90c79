use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Name of the single temporal column after normalization.
pub const DATE_COLUMN: &str = "date";
/// Derived PeriodKey column used as the grouping key.
pub const PERIOD_COLUMN: &str = "mesano";

/// One untyped spreadsheet cell, as uploaded and as persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) if s.trim().is_empty() => None,
            CellValue::Text(s) => Some(s.trim().to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }
}

/// A spreadsheet-shaped row-set: one header row plus positional cells.
///
/// Used for both the raw upload (arbitrary labels) and the persisted form
/// (canonical labels, raw values). Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Empty);
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Appends `other` under the union of both schemas. Columns missing on
    /// either side are padded with `Empty`. Returns the columns that were new.
    pub fn append(&mut self, other: &RawTable) -> Vec<String> {
        let mut added = Vec::new();
        for col in &other.columns {
            if self.column_index(col).is_none() {
                self.columns.push(col.clone());
                added.push(col.clone());
            }
        }
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, CellValue::Empty);
        }
        let positions: Vec<usize> = other
            .columns
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect();
        for src in &other.rows {
            let mut row = vec![CellValue::Empty; width];
            for (cell, &pos) in src.iter().zip(&positions) {
                row[pos] = cell.clone();
            }
            self.rows.push(row);
        }
        added
    }

    pub fn head(&self, n: usize) -> RawTable {
        RawTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

/// Outcome of coercing one cell. `Unparsed` keeps the original text so a
/// failed parse stays distinguishable from a real value or an empty cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced<T> {
    Value(T),
    Missing,
    Unparsed(String),
}

impl<T: Copy> Coerced<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Coerced::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self, Coerced::Unparsed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Date,
    Numeric,
    Duration,
    Categorical,
}

impl ColumnKind {
    pub fn is_metric(self) -> bool {
        matches!(self, ColumnKind::Numeric | ColumnKind::Duration)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Date(Coerced<NaiveDate>),
    Number(Coerced<f64>),
    /// Duration in hours. Unparsed text counts as zero hours when aggregated.
    Hours(Coerced<f64>),
    Text(Option<String>),
}

impl TypedValue {
    /// Numeric contribution of this cell to a metric, or `None` when it
    /// must not take part in sums and means.
    pub fn metric_value(&self) -> Option<f64> {
        match self {
            TypedValue::Number(c) => c.value(),
            TypedValue::Hours(Coerced::Value(h)) => Some(*h),
            TypedValue::Hours(Coerced::Unparsed(_)) => Some(0.0),
            _ => None,
        }
    }

    /// Text used for categorical membership tests and rendering.
    pub fn display(&self) -> Option<String> {
        match self {
            TypedValue::Date(Coerced::Value(d)) => Some(d.format("%Y-%m-%d").to_string()),
            TypedValue::Number(Coerced::Value(n)) | TypedValue::Hours(Coerced::Value(n)) => {
                Some(n.to_string())
            }
            TypedValue::Date(Coerced::Unparsed(raw))
            | TypedValue::Number(Coerced::Unparsed(raw))
            | TypedValue::Hours(Coerced::Unparsed(raw)) => Some(raw.clone()),
            TypedValue::Text(t) => t.clone(),
            _ => None,
        }
    }
}

/// Year-month aggregation bucket, rendered as `MM/YYYY`.
///
/// Ordering is chronological (year first, then month), never lexical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodKey {
    pub year: i32,
    pub month: u32,
}

impl PeriodKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    pub fn ordinal(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:04}", self.month, self.year)
    }
}

impl FromStr for PeriodKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (m, y) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("period `{}` is not MM/YYYY", s))?;
        let month: u32 = m.parse().map_err(|_| format!("bad month in `{}`", s))?;
        let year: i32 = y.parse().map_err(|_| format!("bad year in `{}`", s))?;
        if !(1..=12).contains(&month) || y.len() != 4 {
            return Err(format!("period `{}` is not MM/YYYY", s));
        }
        Ok(PeriodKey { year, month })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub cells: Vec<TypedValue>,
    pub date: Option<NaiveDate>,
    pub year: Option<i32>,
    pub period: Option<PeriodKey>,
}

/// Typed view of the store, rebuilt from raw cells on every read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTable {
    pub columns: Vec<Column>,
    pub rows: Vec<ReportRow>,
}

impl ReportTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_date_column(&self) -> bool {
        self.columns.iter().any(|c| c.kind == ColumnKind::Date)
    }

    pub fn metric_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind.is_metric())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn dated_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.date.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStrategy {
    Append,
    /// Drops the stored table and recreates it from the new batch only.
    Replace,
}

impl fmt::Display for IngestStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestStrategy::Append => f.write_str("APPEND"),
            IngestStrategy::Replace => f.write_str("REPLACE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemporalFilter {
    /// No temporal restriction; undated rows stay visible.
    #[default]
    Unrestricted,
    Periods(BTreeSet<PeriodKey>),
    /// Inclusive range; an absent bound leaves that side open.
    DateRange {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSelection {
    pub categorical: BTreeMap<String, BTreeSet<String>>,
    pub temporal: TemporalFilter,
}

impl FilterSelection {
    pub fn with_value(mut self, column: &str, value: &str) -> Self {
        self.categorical
            .entry(column.to_string())
            .or_default()
            .insert(value.to_string());
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalFilter) -> Self {
        self.temporal = temporal;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducer {
    #[default]
    Sum,
    Mean,
}

/// How a zero-valued predecessor period affects the percentage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroBaselinePolicy {
    #[default]
    Zero,
    Infinite,
}

/// Period-over-period change of the primary metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delta {
    Pct(f64),
    /// Growth from a zero baseline under `ZeroBaselinePolicy::Infinite`.
    Unbounded { rising: bool },
    /// The period has no value for the primary metric.
    NotAvailable,
}

impl Delta {
    pub fn as_f64(&self) -> f64 {
        match self {
            Delta::Pct(v) => *v,
            Delta::Unbounded { rising: true } => f64::INFINITY,
            Delta::Unbounded { rising: false } => f64::NEG_INFINITY,
            Delta::NotAvailable => f64::NAN,
        }
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delta::Pct(v) => write!(f, "{:.2}", v),
            Delta::Unbounded { rising: true } => f.write_str("inf"),
            Delta::Unbounded { rising: false } => f.write_str("-inf"),
            Delta::NotAvailable => Ok(()),
        }
    }
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Delta::Pct(v) => serializer.serialize_f64(*v),
            Delta::NotAvailable => serializer.serialize_none(),
            other => serializer.collect_str(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSummary {
    pub period: PeriodKey,
    /// `None` when a mean has no contributing cell in this period.
    pub values: Vec<Option<f64>>,
    pub delta: Delta,
}

/// Tidy period-indexed result: one row per period, one value per metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub metrics: Vec<String>,
    pub rows: Vec<PeriodSummary>,
}

impl Comparison {
    pub fn delta_column(&self) -> String {
        format!("delta_pct_{}", self.metrics.first().map(String::as_str).unwrap_or(""))
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec![PERIOD_COLUMN.to_string()];
        header.extend(self.metrics.iter().cloned());
        header.push(self.delta_column());
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_keys_sort_chronologically() {
        let mut keys: Vec<PeriodKey> = ["01/2025", "12/2024", "06/2024"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["06/2024", "12/2024", "01/2025"]);
        assert!(keys[2].ordinal() - keys[1].ordinal() == 1);
    }

    #[test]
    fn period_key_rejects_garbage() {
        assert!("2024-01".parse::<PeriodKey>().is_err());
        assert!("13/2024".parse::<PeriodKey>().is_err());
        assert!("1/24".parse::<PeriodKey>().is_err());
        assert_eq!("3/2024".parse::<PeriodKey>().unwrap().to_string(), "03/2024");
    }

    #[test]
    fn append_pads_union_schema() {
        let mut a = RawTable::new(vec!["km".into(), "sub".into()]);
        a.push_row(vec![CellValue::Number(1.0), "Sé".into()]);
        let mut b = RawTable::new(vec!["turno".into(), "km".into()]);
        b.push_row(vec!["Noite".into(), CellValue::Number(2.0)]);

        let added = a.append(&b);
        assert_eq!(added, vec!["turno".to_string()]);
        assert_eq!(a.columns, vec!["km", "sub", "turno"]);
        assert_eq!(a.rows[0], vec![CellValue::Number(1.0), "Sé".into(), CellValue::Empty]);
        assert_eq!(a.rows[1], vec![CellValue::Number(2.0), CellValue::Empty, "Noite".into()]);
    }

    #[test]
    fn unparsed_hours_count_as_zero_but_stay_tagged() {
        let unparsed = TypedValue::Hours(Coerced::Unparsed("abc".into()));
        let real_zero = TypedValue::Hours(Coerced::Value(0.0));
        assert_eq!(unparsed.metric_value(), Some(0.0));
        assert_eq!(real_zero.metric_value(), Some(0.0));
        assert_ne!(unparsed, real_zero);
        assert_eq!(TypedValue::Number(Coerced::Unparsed("x".into())).metric_value(), None);
    }
}
