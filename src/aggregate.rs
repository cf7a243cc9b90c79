use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{ReportError, Result};
use crate::types::{
    Comparison, Delta, PeriodKey, PeriodSummary, Reducer, ReportTable, ZeroBaselinePolicy,
};
use crate::util::average;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    /// Ordered metric columns; the first one is the primary metric.
    pub metrics: Vec<String>,
    pub reducer: Reducer,
    pub zero_baseline: ZeroBaselinePolicy,
}

impl SummaryRequest {
    pub fn sum<S: Into<String>>(metrics: impl IntoIterator<Item = S>) -> Self {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            reducer: Reducer::Sum,
            zero_baseline: ZeroBaselinePolicy::Zero,
        }
    }
}

/// Percentage change of `current` over `previous`.
pub fn pct_change(previous: f64, current: f64, policy: ZeroBaselinePolicy) -> Delta {
    if previous == 0.0 {
        return match policy {
            ZeroBaselinePolicy::Zero => Delta::Pct(0.0),
            ZeroBaselinePolicy::Infinite if current == 0.0 => Delta::Pct(0.0),
            ZeroBaselinePolicy::Infinite => Delta::Unbounded { rising: current > 0.0 },
        };
    }
    Delta::Pct((current - previous) / previous * 100.0)
}

fn reduce(vals: &[f64], reducer: Reducer) -> Option<f64> {
    match reducer {
        Reducer::Sum => Some(vals.iter().sum()),
        Reducer::Mean => average(vals),
    }
}

/// Groups dated rows by period, reduces each metric and appends the
/// period-over-period change of the primary metric.
///
/// Periods come out in chronological order. The first period has no
/// predecessor and reports a change of `0`. A period without a primary
/// value reports `Delta::NotAvailable` and is skipped as a baseline.
pub fn summarize(table: &ReportTable, request: &SummaryRequest) -> Result<Comparison> {
    if request.metrics.is_empty() {
        return Err(ReportError::InvalidSelection("at least one metric is required".into()));
    }
    let mut indices = Vec::with_capacity(request.metrics.len());
    for metric in &request.metrics {
        let idx = table
            .column_index(metric)
            .ok_or_else(|| ReportError::UnknownColumn(metric.clone()))?;
        if !table.columns[idx].kind.is_metric() {
            return Err(ReportError::InvalidSelection(format!("`{}` is not numeric", metric)));
        }
        indices.push(idx);
    }

    // Per period, per metric: the non-missing contributions in row order.
    let mut groups: BTreeMap<PeriodKey, Vec<Vec<f64>>> = BTreeMap::new();
    for row in &table.rows {
        let Some(period) = row.period else { continue };
        let acc = groups
            .entry(period)
            .or_insert_with(|| vec![Vec::new(); indices.len()]);
        for (slot, &idx) in acc.iter_mut().zip(&indices) {
            if let Some(v) = row.cells[idx].metric_value() {
                slot.push(v);
            }
        }
    }

    let mut rows: Vec<PeriodSummary> = Vec::with_capacity(groups.len());
    let mut previous: Option<f64> = None;
    for (period, acc) in groups {
        let values: Vec<Option<f64>> = acc.iter().map(|vals| reduce(vals, request.reducer)).collect();
        let delta = match (previous, values[0]) {
            (_, None) => Delta::NotAvailable,
            (None, Some(_)) => Delta::Pct(0.0),
            (Some(prev), Some(cur)) => pct_change(prev, cur, request.zero_baseline),
        };
        if values[0].is_some() {
            previous = values[0];
        }
        rows.push(PeriodSummary { period, values, delta });
    }

    debug!(periods = rows.len(), metrics = ?request.metrics, "summarized by period");
    Ok(Comparison { metrics: request.metrics.clone(), rows })
}
