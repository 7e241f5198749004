//! I/O helpers shared by the file-backed row sources.
//!
//! - **Format resolution**: explicit `--format`, else the file extension.
//! - **Delimiter resolution**: `.tsv`/`.tab` → tab, everything else comma,
//!   with manual override support.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.

use std::{io::Read, path::Path};

use anyhow::{Result, anyhow, bail};
use encoding_rs::{Encoding, UTF_8};

use crate::{cli::SourceFormat, error::ImportError};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn resolve_format(path: &Path, provided: Option<SourceFormat>) -> Result<SourceFormat> {
    if let Some(format) = provided {
        return Ok(format);
    }
    match extension(path).as_deref() {
        Some("csv" | "tsv" | "tab" | "txt") => Ok(SourceFormat::Csv),
        Some("xlsx") => Ok(SourceFormat::Xlsx),
        Some("ods") => Ok(SourceFormat::Ods),
        Some("xls") => bail!(
            "Legacy .xls workbooks are not supported; save {path:?} as .xlsx or .ods first"
        ),
        Some(other) => bail!("Unable to import '.{other}' files; use --format to choose csv, xlsx or ods"),
        None => bail!("Unable to tell the format of {path:?}; use --format to choose csv, xlsx or ods"),
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match extension(path).as_deref() {
        Some("tsv" | "tab") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Headerless, flexible reader: header handling and ragged rows are dealt
/// with by the source, not the parser.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String, ImportError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(ImportError::source_read(
            format!("Failed to decode text with encoding {}", encoding.name()),
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>, ImportError> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}
