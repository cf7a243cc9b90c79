// Entry point and high-level CLI flow.
//
// - `ingest` loads a CSV/XLSX report, normalizes it and writes it to the
//   store (append by default, `--replace` to overwrite).
// - `options` lists the filter values and metrics currently stored.
// - `compare` filters the stored report and prints or exports the
//   period-by-period comparison.
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use tracing_subscriber::EnvFilter;

use fleet_report::aggregate::SummaryRequest;
use fleet_report::config::{Cli, Command, CompareArgs, IngestArgs, Settings};
use fleet_report::engine::{Analysis, Engine};
use fleet_report::types::{FilterSelection, IngestStrategy, PeriodKey, Reducer, TemporalFilter};
use fleet_report::util::{format_int, parse_date_dayfirst};
use fleet_report::{loader, output, SqliteStore};

fn handle_ingest(engine: &mut Engine<SqliteStore>, args: &IngestArgs) -> Result<()> {
    let (upload, load_report) = loader::load_upload(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;
    println!(
        "Processing report... ({} rows read, {} blank rows skipped)",
        format_int(load_report.total_rows),
        format_int(load_report.blank_rows)
    );

    let strategy = if args.replace {
        IngestStrategy::Replace
    } else {
        IngestStrategy::Append
    };
    let outcome = match args.expect_version {
        Some(v) => engine.ingest_guarded(upload, strategy, v),
        None => engine.ingest(upload, strategy),
    }
    .context("failed to save report")?;

    for (key, labels) in &outcome.normalization.merged {
        println!("Note: columns {:?} merged into `{}`.", labels, key);
    }
    if !outcome.normalization.empty_labels.is_empty() {
        println!(
            "Warning: {} column(s) had no usable name and were renamed column_<n>.",
            outcome.normalization.empty_labels.len()
        );
    }
    if outcome.undated_cells > 0 {
        println!(
            "Note: {} date value(s) could not be parsed and were stored empty.",
            format_int(outcome.undated_cells)
        );
    }
    println!(
        "Report saved ({}): {} rows written, {} rows stored, version {}.\n",
        outcome.receipt.strategy,
        format_int(outcome.receipt.rows_written),
        format_int(outcome.receipt.total_rows),
        outcome.receipt.version
    );
    println!("Preview:\n");
    println!("{}", output::render_preview(&outcome.preview));
    Ok(())
}

fn handle_options(engine: &Engine<SqliteStore>) -> Result<()> {
    let options = match engine.options()? {
        Analysis::Ready(o) => o,
        Analysis::NothingToShow(reason) => {
            println!("{}", reason);
            return Ok(());
        }
    };
    println!("Metrics: {}", options.metrics.join(", "));
    let periods: Vec<String> = options.periods.iter().map(|p| p.to_string()).collect();
    println!("Periods: {}", periods.join(", "));
    if let Some((lo, hi)) = options.date_bounds {
        println!("Dates: {} .. {}", lo.format("%d/%m/%Y"), hi.format("%d/%m/%Y"));
    }
    for (column, values) in &options.categorical {
        println!("{}: {}", column, values.join(" | "));
    }
    Ok(())
}

fn selection_from_args(args: &CompareArgs) -> Result<FilterSelection> {
    let mut selection = FilterSelection::default();
    for f in &args.filters {
        let Some((col, val)) = f.split_once('=') else {
            bail!("filter `{}` must look like column=value", f);
        };
        selection = selection.with_value(col.trim(), val.trim());
    }

    if !args.periods.is_empty() {
        let keys = args
            .periods
            .iter()
            .map(|p| p.parse::<PeriodKey>().map_err(anyhow::Error::msg))
            .collect::<Result<BTreeSet<_>>>()?;
        selection.temporal = TemporalFilter::Periods(keys);
    } else if args.from.is_some() || args.to.is_some() {
        let parse = |s: &Option<String>| -> Result<_> {
            s.as_deref()
                .map(|d| parse_date_dayfirst(d).with_context(|| format!("invalid date `{}`", d)))
                .transpose()
        };
        selection.temporal = TemporalFilter::DateRange {
            start: parse(&args.from)?,
            end: parse(&args.to)?,
        };
    }
    Ok(selection)
}

fn handle_compare(engine: &Engine<SqliteStore>, settings: &Settings, args: &CompareArgs) -> Result<()> {
    let selection = selection_from_args(args)?;
    let request = SummaryRequest {
        metrics: args.metrics.clone(),
        reducer: if args.mean { Reducer::Mean } else { Reducer::Sum },
        zero_baseline: settings.zero_baseline,
    };
    let comparison = match engine.compare(&selection, &request)? {
        Analysis::Ready(c) => c,
        Analysis::NothingToShow(reason) => {
            println!("{}", reason);
            return Ok(());
        }
    };

    let scope: Vec<String> = args.filters.clone();
    println!(
        "Metric comparison for {}\n",
        if scope.is_empty() { "all rows".to_string() } else { scope.join(", ") }
    );
    match &args.out {
        Some(path) => {
            output::export(path, &comparison)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", output::render_comparison(&comparison));
            println!("(Full table exported to {})", path.display());
        }
        None => println!("{}", output::render_comparison(&comparison)),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_cli(&cli);
    let store = SqliteStore::open(&settings.db_path, &settings.table)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    let mut engine = Engine::new(store, settings.roles.clone());

    match &cli.command {
        Command::Ingest(args) => handle_ingest(&mut engine, args),
        Command::Options => handle_options(&engine),
        Command::Compare(args) => handle_compare(&engine, &settings, args),
    }
}
