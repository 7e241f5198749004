//! First (or named) worksheet of an xlsx/ods workbook as a row source.
//!
//! Workbooks are read eagerly; date cells arrive as native date/times rather
//! than text.

use std::{collections::VecDeque, path::PathBuf};

use calamine::{Data, DataType, Range, Reader, open_workbook_auto};
use log::debug;

use crate::{
    csv_source::HeaderMode,
    error::ImportError,
    sampler::looks_like_header,
    source::{MemorySource, MemoryTable, RawRow, RawValue, RowSource, SourceOpener},
    types::ValueRules,
};

#[derive(Debug, Clone)]
pub struct SpreadsheetConfig {
    pub path: PathBuf,
    /// Sheet name, or a 0-based index; the first sheet when unset.
    pub sheet: Option<String>,
    pub header: HeaderMode,
}

impl SpreadsheetConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sheet: None,
            header: HeaderMode::Detect,
        }
    }

    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    pub fn with_header(mut self, header: HeaderMode) -> Self {
        self.header = header;
        self
    }

    fn read_range(&self) -> Result<Range<Data>, ImportError> {
        let context = || format!("Reading workbook {:?}", self.path);
        let mut workbook = open_workbook_auto(&self.path)
            .map_err(|err| ImportError::source_read(context(), err.to_string()))?;
        let range = match self.sheet.as_deref() {
            Some(selector) => match selector.parse::<usize>() {
                Ok(idx) => workbook.worksheet_range_at(idx).ok_or_else(|| {
                    ImportError::UnsupportedSource(format!("no sheet at index {idx}"))
                })?,
                Err(_) => workbook.worksheet_range(selector),
            },
            None => workbook.worksheet_range_at(0).ok_or_else(|| {
                ImportError::UnsupportedSource("workbook has no worksheets".into())
            })?,
        };
        range.map_err(|err| ImportError::source_read(context(), err.to_string()))
    }

    /// Materializes the sheet; header handling happens here so the returned
    /// table behaves like any other source.
    pub fn load(&self) -> Result<MemoryTable, ImportError> {
        let range = self.read_range()?;
        let mut rows: VecDeque<RawRow> = range
            .rows()
            .map(|cells| RawRow::new(cells.iter().map(cell_value).collect()))
            .filter(|row| row.values().iter().any(|value| *value != RawValue::Missing))
            .collect();
        let has_header = match self.header {
            HeaderMode::Present => true,
            HeaderMode::Absent => false,
            HeaderMode::Detect => rows.front().is_some_and(|first| {
                looks_like_header(first, rows.iter().skip(1), &ValueRules::default())
            }),
        };
        debug!(
            "Loaded {} row(s) from {:?} (header: {has_header})",
            rows.len(),
            self.path
        );
        let header = if has_header {
            rows.pop_front().map(|row| row.display_values())
        } else {
            None
        };
        Ok(MemoryTable::new(header, rows.into()))
    }
}

impl SourceOpener for SpreadsheetConfig {
    fn open(&self) -> Result<Box<dyn RowSource>, ImportError> {
        let source: MemorySource = self.load()?.reader();
        Ok(Box::new(source))
    }

    fn describe(&self) -> String {
        match &self.sheet {
            Some(sheet) => format!("{:?} (sheet {sheet})", self.path),
            None => format!("{:?}", self.path),
        }
    }
}

fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Missing,
        Data::String(text) => RawValue::Text(text.clone()),
        Data::Int(value) => RawValue::Text(value.to_string()),
        Data::Float(value) => RawValue::Text(value.to_string()),
        Data::Bool(value) => RawValue::Text(value.to_string()),
        Data::DateTime(_) => match cell.as_datetime() {
            Some(dt) => RawValue::DateTime(dt),
            None => RawValue::Text(cell.as_f64().map(|v| v.to_string()).unwrap_or_default()),
        },
        Data::DateTimeIso(text) | Data::DurationIso(text) => RawValue::Text(text.clone()),
        Data::Error(err) => RawValue::Text(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_map_to_raw_values() {
        assert_eq!(cell_value(&Data::Empty), RawValue::Missing);
        assert_eq!(cell_value(&Data::Int(42)), RawValue::text("42"));
        assert_eq!(cell_value(&Data::Float(10.0)), RawValue::text("10"));
        assert_eq!(cell_value(&Data::Float(10.25)), RawValue::text("10.25"));
        assert_eq!(
            cell_value(&Data::String("abc".into())),
            RawValue::text("abc")
        );
        assert_eq!(
            cell_value(&Data::DateTimeIso("2024-01-02T03:04:05".into())),
            RawValue::text("2024-01-02T03:04:05")
        );
    }

    #[test]
    fn missing_workbook_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpreadsheetConfig::new(dir.path().join("nope.xlsx"))
            .load()
            .unwrap_err();
        assert!(matches!(err, ImportError::SourceRead { .. }));
    }
}
