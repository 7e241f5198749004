//! `import` subcommand: runs the import on a worker thread and reports
//! progress from the caller's side of the channel.

use std::{path::Path, sync::mpsc, thread, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};

use crate::{
    RunStatus, build_source,
    cli::ImportArgs,
    driver::{self, ImportOptions, ImportOutcome},
    names::safer_name,
    progress::{CancelToken, Controller, ProgressEvent},
    sqlite::SqliteStore,
    table::render_import_report,
};

pub fn execute(args: &ImportArgs) -> Result<RunStatus> {
    let (opener, value_rules) = build_source(&args.source)?;
    let table = match &args.table {
        Some(table) => table.clone(),
        None => default_table_name(&args.source.source)?,
    };
    let store =
        SqliteStore::open(&args.db).with_context(|| format!("Opening database {:?}", args.db))?;
    let options = ImportOptions {
        sample_size: args.source.sample_rows,
        batch_size: args.batch_size,
        mismatch_policy: args.on_mismatch.into(),
        value_rules,
    };

    let cancel = CancelToken::new();
    if let Some(seconds) = args.timeout_secs {
        cancel.cancel_after(Duration::from_secs(seconds));
    }
    let (sender, receiver) = mpsc::channel();
    let controller = Controller::new(cancel).with_progress(sender);

    info!(
        "Importing {} into table '{table}' of {:?}",
        opener.describe(),
        args.db
    );
    let worker = {
        let table = table.clone();
        thread::spawn(move || {
            let mut store = store;
            driver::import(opener.as_ref(), &mut store, &table, &options, &controller)
        })
    };
    let mut reporter = ProgressReporter::default();
    for event in receiver {
        reporter.observe(&event);
    }
    let outcome = worker
        .join()
        .map_err(|_| anyhow!("Import worker panicked"))?
        .with_context(|| format!("Import into '{table}' failed; the table was not modified"))?;

    match outcome {
        ImportOutcome::Succeeded(report) => {
            info!(
                "Imported {} row(s) into '{}' ({} restart(s))",
                report.rows_loaded, report.table, report.restarts
            );
            if args.report_json {
                let json = serde_json::to_string_pretty(&report)
                    .context("Serializing import report")?;
                println!("{json}");
            } else {
                print!("{}", render_import_report(&report));
            }
            Ok(RunStatus::Completed)
        }
        ImportOutcome::Cancelled { rows_processed } => {
            warn!(
                "Import cancelled after {rows_processed} row(s); table '{table}' was not modified"
            );
            Ok(RunStatus::Cancelled)
        }
    }
}

/// Table name derived from the source file name.
fn default_table_name(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("Unable to derive a table name from {path:?}; use --table"))?;
    let name = safer_name(stem);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        Ok(format!("tbl_{name}"))
    } else {
        Ok(name)
    }
}

/// Logs progress at every tenth of the estimated total; everything else goes
/// to debug.
#[derive(Debug, Default)]
struct ProgressReporter {
    next_decile: u32,
}

impl ProgressReporter {
    fn observe(&mut self, event: &ProgressEvent) {
        match event.fraction() {
            Some(fraction) => {
                let decile = (fraction * 10.0).floor() as u32;
                if decile >= self.next_decile {
                    info!(
                        "Processed {} of ~{} row(s) ({}%)",
                        event.rows_processed,
                        event.rows_total_estimate.unwrap_or_default(),
                        decile * 10
                    );
                    self.next_decile = decile + 1;
                } else {
                    debug!("Processed {} row(s)", event.rows_processed);
                }
            }
            None => debug!("Processed {} row(s)", event.rows_processed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_comes_from_file_stem() {
        assert_eq!(
            default_table_name(Path::new("data/sales report.csv")).unwrap(),
            "sales_report"
        );
        assert_eq!(
            default_table_name(Path::new("2024-orders.xlsx")).unwrap(),
            "tbl_2024_orders"
        );
    }

    #[test]
    fn reporter_logs_each_decile_once() {
        let mut reporter = ProgressReporter::default();
        let event = |rows| ProgressEvent {
            rows_processed: rows,
            rows_total_estimate: Some(100),
        };
        reporter.observe(&event(5));
        assert_eq!(reporter.next_decile, 1);
        reporter.observe(&event(7));
        assert_eq!(reporter.next_decile, 1);
        reporter.observe(&event(35));
        assert_eq!(reporter.next_decile, 4);
    }
}
