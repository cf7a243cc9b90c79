use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tabled::{builder::Builder, settings::Style};

use crate::error::Result;
use crate::types::{Comparison, RawTable, PERIOD_COLUMN};
use crate::util::format_number;

/// Tidy rows as rendered text: period, one column per metric, delta last.
pub fn comparison_records(comparison: &Comparison) -> Vec<Vec<String>> {
    comparison
        .rows
        .iter()
        .map(|row| {
            let mut record = vec![row.period.to_string()];
            record.extend(row.values.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
            record.push(row.delta.to_string());
            record
        })
        .collect()
}

pub fn write_csv(path: &Path, comparison: &Comparison) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(comparison.header())?;
    for record in comparison_records(comparison) {
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn json_rows(comparison: &Comparison) -> Result<Value> {
    let delta_col = comparison.delta_column();
    let mut rows = Vec::with_capacity(comparison.rows.len());
    for row in &comparison.rows {
        let mut obj = Map::new();
        obj.insert(PERIOD_COLUMN.to_string(), Value::String(row.period.to_string()));
        for (metric, value) in comparison.metrics.iter().zip(&row.values) {
            obj.insert(metric.clone(), serde_json::to_value(value)?);
        }
        obj.insert(delta_col.clone(), serde_json::to_value(row.delta)?);
        rows.push(Value::Object(obj));
    }
    Ok(Value::Array(rows))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

/// Exports by file extension: `.json` or anything else as CSV.
pub fn export(path: &Path, comparison: &Comparison) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => write_json(path, &json_rows(comparison)?),
        _ => write_csv(path, comparison),
    }
}

fn markdown(header: Vec<String>, rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "(no rows)\n".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(header);
    for r in rows {
        builder.push_record(r);
    }
    let mut table = builder.build();
    table.with(Style::markdown());
    format!("{}\n", table)
}

pub fn render_comparison(comparison: &Comparison) -> String {
    let rows = comparison
        .rows
        .iter()
        .map(|row| {
            let mut record = vec![row.period.to_string()];
            record.extend(row.values.iter().map(|v| v.map(|v| format_number(v, 2)).unwrap_or_default()));
            record.push(row.delta.to_string());
            record
        })
        .collect();
    markdown(comparison.header(), rows)
}

pub fn render_preview(table: &RawTable) -> String {
    let rows = table
        .rows
        .iter()
        .map(|r| r.iter().map(|c| c.as_text().unwrap_or_default()).collect())
        .collect();
    markdown(table.columns.clone(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Delta, PeriodKey, PeriodSummary};

    fn comparison() -> Comparison {
        Comparison {
            metrics: vec!["km".into()],
            rows: vec![
                PeriodSummary {
                    period: PeriodKey { year: 2024, month: 1 },
                    values: vec![Some(100.0)],
                    delta: Delta::Pct(0.0),
                },
                PeriodSummary {
                    period: PeriodKey { year: 2024, month: 2 },
                    values: vec![Some(1500.0)],
                    delta: Delta::Unbounded { rising: true },
                },
            ],
        }
    }

    #[test]
    fn csv_export_is_tidy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resumo.csv");
        export(&path, &comparison()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "mesano,km,delta_pct_km\n01/2024,100,0.00\n02/2024,1500,inf\n");
    }

    #[test]
    fn json_export_keeps_numbers_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resumo.json");
        export(&path, &comparison()).unwrap();
        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["mesano"], "01/2024");
        assert_eq!(value[0]["km"], 100.0);
        assert_eq!(value[1]["delta_pct_km"], "inf");
    }

    #[test]
    fn missing_means_export_as_blanks() {
        let mut c = comparison();
        c.rows[1].values = vec![None];
        c.rows[1].delta = Delta::NotAvailable;
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("resumo.csv");
        export(&csv_path, &c).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(text, "mesano,km,delta_pct_km\n01/2024,100,0.00\n02/2024,,\n");

        let json_path = dir.path().join("resumo.json");
        export(&json_path, &c).unwrap();
        let value: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert!(value[1]["km"].is_null());
        assert!(value[1]["delta_pct_km"].is_null());
    }

    #[test]
    fn markdown_preview_lists_periods() {
        let out = render_comparison(&comparison());
        assert!(out.contains("| mesano"));
        assert!(out.contains("1,500.00"));
        assert_eq!(render_preview(&RawTable::default()), "(no rows)\n");
    }
}
