pub mod cli;
pub mod committer;
pub mod convert;
pub mod csv_source;
pub mod datetime;
pub mod driver;
pub mod error;
pub mod import_cmd;
pub mod io_utils;
pub mod names;
pub mod probe;
pub mod progress;
pub mod sampler;
pub mod source;
pub mod spreadsheet;
pub mod sqlite;
pub mod store;
pub mod table;
pub mod types;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, SourceArgs, SourceFormat},
    csv_source::CsvSourceConfig,
    io_utils::{resolve_encoding, resolve_format, resolve_input_delimiter},
    source::SourceOpener,
    spreadsheet::SpreadsheetConfig,
    sqlite::SqliteStore,
    types::ValueRules,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabular_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

/// How a successful command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

pub fn run() -> Result<RunStatus> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => import_cmd::execute(&args),
        Commands::Probe(args) => probe::execute(&args).map(|()| RunStatus::Completed),
        Commands::Cleanup(args) => handle_cleanup(&args).map(|()| RunStatus::Completed),
    }
}

fn handle_cleanup(args: &cli::CleanupArgs) -> Result<()> {
    let mut store =
        SqliteStore::open(&args.db).with_context(|| format!("Opening database {:?}", args.db))?;
    let dropped = store::cleanup_stale_staging(&mut store)
        .with_context(|| format!("Cleaning staging tables in {:?}", args.db))?;
    for name in &dropped {
        println!("{name}");
    }
    info!("Dropped {} stale staging table(s)", dropped.len());
    Ok(())
}

/// Builds the opener for a source plus the value rules its format implies.
pub(crate) fn build_source(args: &SourceArgs) -> Result<(Box<dyn SourceOpener>, ValueRules)> {
    let format = resolve_format(&args.source, args.format)?;
    debug!("Reading {:?} as {format:?}", args.source);
    match format {
        SourceFormat::Csv => {
            let delimiter = resolve_input_delimiter(&args.source, args.delimiter);
            let encoding = resolve_encoding(args.encoding.as_deref())?;
            info!(
                "Reading '{}' with delimiter '{}' and encoding {}",
                args.source.display(),
                printable_delimiter(delimiter),
                encoding.name()
            );
            let config = CsvSourceConfig::new(&args.source)
                .with_delimiter(delimiter)
                .with_encoding(encoding)
                .with_header(args.header_mode());
            let rules = config.value_rules();
            Ok((Box::new(config), rules))
        }
        SourceFormat::Xlsx | SourceFormat::Ods => {
            let config = SpreadsheetConfig::new(&args.source)
                .with_sheet(args.sheet.clone())
                .with_header(args.header_mode());
            Ok((Box::new(config), ValueRules::default()))
        }
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
