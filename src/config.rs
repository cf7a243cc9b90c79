// Runtime settings: command-line flags, each one overridable through the
// environment.
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::normalize::normalize_label;
use crate::types::ZeroBaselinePolicy;

pub const DEFAULT_DB_PATH: &str = "relatorios.db";
pub const DEFAULT_TABLE: &str = "relatorios";

/// Which canonical columns play which role during coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRoles {
    /// Canonical spellings folded into `date`.
    pub date_aliases: Vec<String>,
    /// Columns parsed as durations in addition to the name heuristics.
    pub duration_columns: Vec<String>,
    /// Columns always treated as numeric metrics.
    pub metric_columns: Vec<String>,
}

impl Default for ColumnRoles {
    fn default() -> Self {
        Self {
            date_aliases: ["data", "date", "dia", "data_operacao", "data_coleta"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            duration_columns: Vec::new(),
            metric_columns: Vec::new(),
        }
    }
}

impl ColumnRoles {
    pub fn is_duration(&self, column: &str) -> bool {
        self.duration_columns.iter().any(|c| c == column)
            || column == "horas"
            || column.starts_with("horas_")
            || column.ends_with("_horas")
            || column == "duracao"
            || column == "tempo_operacao"
    }

    pub fn is_metric(&self, column: &str) -> bool {
        self.metric_columns.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ZeroBaselineArg {
    Zero,
    Infinite,
}

impl From<ZeroBaselineArg> for ZeroBaselinePolicy {
    fn from(arg: ZeroBaselineArg) -> Self {
        match arg {
            ZeroBaselineArg::Zero => ZeroBaselinePolicy::Zero,
            ZeroBaselineArg::Infinite => ZeroBaselinePolicy::Infinite,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "fleet_report", about = "Ingest operational reports and compare metrics by period")]
pub struct Cli {
    /// SQLite database holding the report table.
    #[arg(long, global = true, env = "FLEET_REPORT_DB", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Name of the report table.
    #[arg(long, global = true, env = "FLEET_REPORT_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Extra column(s) to parse as durations.
    #[arg(long = "duration-col", global = true)]
    pub duration_cols: Vec<String>,

    /// Extra column(s) to force numeric.
    #[arg(long = "metric-col", global = true)]
    pub metric_cols: Vec<String>,

    /// Delta reported when the previous period sums to zero.
    #[arg(long, global = true, value_enum, default_value_t = ZeroBaselineArg::Zero)]
    pub zero_baseline: ZeroBaselineArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a CSV/XLSX report into the store.
    Ingest(IngestArgs),
    /// List the filter values and metrics currently available.
    Options,
    /// Aggregate metrics by period with period-over-period change.
    Compare(CompareArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    pub file: PathBuf,

    /// Drop the stored table and keep only this upload (irreversible).
    #[arg(long)]
    pub replace: bool,

    /// Refuse to write unless the store is still at this version.
    #[arg(long)]
    pub expect_version: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Metric column(s); the first one carries the delta.
    #[arg(long = "metric", required = true)]
    pub metrics: Vec<String>,

    /// Categorical filter as `column=value`; repeat to select several values.
    #[arg(long = "filter")]
    pub filters: Vec<String>,

    /// Restrict to these periods (`MM/YYYY`).
    #[arg(long = "period", conflicts_with_all = ["from", "to"])]
    pub periods: Vec<String>,

    /// Inclusive start date (day-first).
    #[arg(long)]
    pub from: Option<String>,

    /// Inclusive end date (day-first).
    #[arg(long)]
    pub to: Option<String>,

    /// Average instead of summing.
    #[arg(long)]
    pub mean: bool,

    /// Write the result to a `.csv` or `.json` file.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Resolved settings shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub table: String,
    pub roles: ColumnRoles,
    pub zero_baseline: ZeroBaselinePolicy,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> Self {
        let mut roles = ColumnRoles::default();
        roles.duration_columns = cli.duration_cols.iter().map(|c| normalize_label(c)).collect();
        roles.metric_columns = cli.metric_cols.iter().map(|c| normalize_label(c)).collect();
        Self {
            db_path: cli.db.clone(),
            table: cli.table.clone(),
            roles,
            zero_baseline: cli.zero_baseline.into(),
        }
    }
}
