// Request-per-interaction pipeline over an injected store.
//
// upload -> normalize -> store.ingest(strategy)
// store.read_all -> normalize -> coerce -> filter -> summarize
//
// Structural gaps (no table, no dates, no metrics) surface once as a
// `MissingData` state instead of an error.
use std::fmt;
use tracing::{info, warn};

use crate::aggregate::{summarize, SummaryRequest};
use crate::coerce::{coerce_table, has_numeric_cell, prepare_for_storage};
use crate::config::ColumnRoles;
use crate::error::Result;
use crate::filter::{apply, filter_options, FilterOptions};
use crate::normalize::{normalize_label, normalize_table, NormalizationReport};
use crate::store::{IngestReceipt, ReportStore};
use crate::types::{Comparison, FilterSelection, IngestStrategy, RawTable, ReportTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingData {
    NoTable,
    EmptyTable,
    NoDateColumn,
    NoNumericColumns,
    NoDatedRows,
    UnknownMetric(String),
}

impl fmt::Display for MissingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingData::NoTable => f.write_str("No report loaded yet."),
            MissingData::EmptyTable => f.write_str("The stored report has no rows."),
            MissingData::NoDateColumn => f.write_str("No `date` column found in the stored report."),
            MissingData::NoNumericColumns => f.write_str("There are no numeric columns to use as metrics."),
            MissingData::NoDatedRows => f.write_str("No row has a valid date, so nothing can be grouped by period."),
            MissingData::UnknownMetric(m) => write!(f, "Metric `{}` is not a numeric column of the stored report.", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Analysis<T> {
    Ready(T),
    NothingToShow(MissingData),
}

impl<T> Analysis<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Analysis::Ready(v) => Some(v),
            Analysis::NothingToShow(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub receipt: IngestReceipt,
    pub normalization: NormalizationReport,
    /// Date cells that could not be parsed and were stored as empty.
    pub undated_cells: usize,
    /// First rows of the batch as persisted.
    pub preview: RawTable,
}

pub struct Engine<S: ReportStore> {
    store: S,
    roles: ColumnRoles,
}

impl<S: ReportStore> Engine<S> {
    pub fn new(store: S, roles: ColumnRoles) -> Self {
        Self { store, roles }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ingest(&mut self, upload: RawTable, strategy: IngestStrategy) -> Result<IngestOutcome> {
        self.ingest_inner(upload, strategy, None)
    }

    /// Like `ingest`, but fails if the store moved past `expected_version`.
    pub fn ingest_guarded(
        &mut self,
        upload: RawTable,
        strategy: IngestStrategy,
        expected_version: u64,
    ) -> Result<IngestOutcome> {
        self.ingest_inner(upload, strategy, Some(expected_version))
    }

    fn ingest_inner(
        &mut self,
        upload: RawTable,
        strategy: IngestStrategy,
        expected_version: Option<u64>,
    ) -> Result<IngestOutcome> {
        let (mut batch, normalization) = normalize_table(upload, &self.roles.date_aliases);
        let undated_cells = prepare_for_storage(&mut batch);
        if undated_cells > 0 {
            warn!(undated_cells, "unparsable dates stored as empty");
        }
        let receipt = match expected_version {
            Some(v) => self.store.ingest_guarded(&batch, strategy, v)?,
            None => self.store.ingest(&batch, strategy)?,
        };
        Ok(IngestOutcome {
            receipt,
            normalization,
            undated_cells,
            preview: batch.head(5),
        })
    }

    /// Reads the whole store and types it. Column names are normalized
    /// again in case the table was written by something else.
    pub fn load(&self) -> Result<Analysis<ReportTable>> {
        self.load_with(&[])
    }

    /// `requested` metrics are typed as numbers when any of their cells is
    /// one, even if other cells hold text.
    fn load_with(&self, requested: &[String]) -> Result<Analysis<ReportTable>> {
        if !self.store.exists()? {
            return Ok(Analysis::NothingToShow(MissingData::NoTable));
        }
        let raw = self.store.read_all()?;
        if raw.is_empty() {
            return Ok(Analysis::NothingToShow(MissingData::EmptyTable));
        }
        let (raw, _) = normalize_table(raw, &self.roles.date_aliases);
        let mut roles = self.roles.clone();
        roles.metric_columns.extend(
            requested
                .iter()
                .filter(|m| raw.column_index(m).is_some_and(|idx| has_numeric_cell(&raw, idx)))
                .cloned(),
        );
        let table = coerce_table(&raw, &roles);
        info!(rows = table.rows.len(), dated = table.dated_rows(), "loaded report table");
        Ok(Analysis::Ready(table))
    }

    pub fn options(&self) -> Result<Analysis<FilterOptions>> {
        Ok(match self.load()? {
            Analysis::Ready(table) => Analysis::Ready(filter_options(&table)),
            Analysis::NothingToShow(m) => Analysis::NothingToShow(m),
        })
    }

    /// Filters the stored report by `selection` and summarizes `request`'s
    /// metrics by period. Metric and filter column names may be given in
    /// any spelling the normalizer accepts. A stray text cell in a
    /// requested metric reads as missing.
    pub fn compare(
        &self,
        selection: &FilterSelection,
        request: &SummaryRequest,
    ) -> Result<Analysis<Comparison>> {
        let mut request = request.clone();
        request.metrics = request.metrics.iter().map(|m| normalize_label(m)).collect();
        let table = match self.load_with(&request.metrics)? {
            Analysis::Ready(t) => t,
            Analysis::NothingToShow(m) => return Ok(Analysis::NothingToShow(m)),
        };
        if !table.has_date_column() {
            return Ok(Analysis::NothingToShow(MissingData::NoDateColumn));
        }
        if table.metric_columns().is_empty() {
            return Ok(Analysis::NothingToShow(MissingData::NoNumericColumns));
        }
        if table.dated_rows() == 0 {
            return Ok(Analysis::NothingToShow(MissingData::NoDatedRows));
        }

        if let Some(bad) = request
            .metrics
            .iter()
            .find(|m| !table.column(m).is_some_and(|c| c.kind.is_metric()))
        {
            return Ok(Analysis::NothingToShow(MissingData::UnknownMetric(bad.clone())));
        }

        let mut selection = selection.clone();
        selection.categorical = selection
            .categorical
            .into_iter()
            .map(|(col, values)| (normalize_label(&col), values))
            .collect();

        let filtered = apply(&table, &selection)?;
        let comparison = summarize(&filtered, &request)?;
        info!(
            rows = filtered.rows.len(),
            periods = comparison.rows.len(),
            "compared metrics by period"
        );
        Ok(Analysis::Ready(comparison))
    }
}
