use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{csv_source::HeaderMode, driver::MismatchPolicy, sampler::DEFAULT_SAMPLE_ROWS};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import CSV and spreadsheet data into SQLite with automatic column typing",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a CSV, xlsx or ods file into a SQLite table, replacing it atomically
    Import(ImportArgs),
    /// Sample a source and report the inferred field types without importing
    Probe(ProbeArgs),
    /// Drop staging tables left behind by interrupted imports
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Source file to read
    #[arg(short = 'i', long = "source")]
    pub source: PathBuf,
    /// Source format (inferred from the file extension when omitted)
    #[arg(long)]
    pub format: Option<SourceFormat>,
    /// Treat the first row as field names
    #[arg(long = "has-header", conflicts_with = "no_header")]
    pub has_header: bool,
    /// Treat the first row as data
    #[arg(long = "no-header")]
    pub no_header: bool,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of a CSV source (defaults to utf-8)
    #[arg(long)]
    pub encoding: Option<String>,
    /// Worksheet name or 0-based index for spreadsheet sources
    #[arg(long)]
    pub sheet: Option<String>,
    /// Number of rows sampled to infer field types
    #[arg(long, default_value_t = DEFAULT_SAMPLE_ROWS)]
    pub sample_rows: usize,
}

impl SourceArgs {
    pub fn header_mode(&self) -> HeaderMode {
        match (self.has_header, self.no_header) {
            (true, _) => HeaderMode::Present,
            (_, true) => HeaderMode::Absent,
            _ => HeaderMode::Detect,
        }
    }
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// SQLite database file (created when missing)
    #[arg(long)]
    pub db: PathBuf,
    /// Target table name (defaults to the source file name)
    #[arg(short, long)]
    pub table: Option<String>,
    /// How to handle values that do not match the inferred field type
    #[arg(long = "on-mismatch", default_value = "text")]
    pub on_mismatch: OnMismatch,
    /// Rows per insert batch (derived from the estimated row count when omitted)
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Cancel the import when it runs longer than this many seconds
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    /// Print the import report as JSON on stdout
    #[arg(long = "report-json")]
    pub report_json: bool,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Write the inferred field types to this YAML file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// SQLite database file to clean
    #[arg(long)]
    pub db: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Ods,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "lowercase")]
pub enum OnMismatch {
    /// Retype the field as text and restart
    #[default]
    Text,
    /// Store non-matching values as NULL and restart
    Null,
    /// Stop with exit code 3
    Abort,
}

impl From<OnMismatch> for MismatchPolicy {
    fn from(value: OnMismatch) -> Self {
        match value {
            OnMismatch::Text => MismatchPolicy::Text,
            OnMismatch::Null => MismatchPolicy::Null,
            OnMismatch::Abort => MismatchPolicy::Abort,
        }
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
