//! Row sources: the ordered, forward-only input of an import.
//!
//! A [`RowSource`] yields [`RawRow`]s; when it declares a header, the first
//! row it yields is the header itself. Sources cannot rewind, so anything that
//! needs to read the data again goes back to its [`SourceOpener`].

use std::collections::VecDeque;

use chrono::NaiveDateTime;

use crate::error::ImportError;

/// One cell as produced by a source, before any typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// No value at all (short row, empty spreadsheet cell).
    Missing,
    Text(String),
    /// A date/time the source itself decoded (spreadsheet date cells).
    DateTime(NaiveDateTime),
}

impl RawValue {
    pub fn text(value: impl Into<String>) -> Self {
        RawValue::Text(value.into())
    }

    /// Text as the user would see it; used in error messages and headers.
    pub fn display(&self) -> String {
        match self {
            RawValue::Missing => String::new(),
            RawValue::Text(text) => text.clone(),
            RawValue::DateTime(dt) => crate::datetime::to_canonical(dt),
        }
    }
}

/// Cells of one row in source order; position `i` belongs to field `i`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    values: Vec<RawValue>,
}

impl RawRow {
    pub fn new(values: Vec<RawValue>) -> Self {
        Self { values }
    }

    pub fn from_strs(values: &[&str]) -> Self {
        Self::new(values.iter().map(|v| RawValue::text(*v)).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Positions past the end of a short row read as [`RawValue::Missing`].
    pub fn get(&self, idx: usize) -> &RawValue {
        const MISSING: &RawValue = &RawValue::Missing;
        self.values.get(idx).unwrap_or(MISSING)
    }

    pub fn values(&self) -> &[RawValue] {
        &self.values
    }

    pub fn display_values(&self) -> Vec<String> {
        self.values.iter().map(RawValue::display).collect()
    }
}

pub trait RowSource {
    fn has_header(&self) -> bool;

    fn next_row(&mut self) -> Result<Option<RawRow>, ImportError>;

    /// Best guess at the number of data rows, header excluded.
    fn rows_estimate(&self) -> Option<u64> {
        None
    }

    /// Discards up to `count` rows and reports how many were actually skipped.
    fn skip_rows(&mut self, count: usize) -> Result<usize, ImportError> {
        let mut skipped = 0;
        while skipped < count && self.next_row()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }
}

/// Re-opens a source from its beginning; each call yields an independent
/// reader.
pub trait SourceOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn RowSource>, ImportError>;

    fn describe(&self) -> String;
}

/// A fully materialized table, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    header: Option<Vec<String>>,
    rows: Vec<RawRow>,
}

impl MemoryTable {
    pub fn new(header: Option<Vec<String>>, rows: Vec<RawRow>) -> Self {
        Self { header, rows }
    }

    pub fn from_strs(header: Option<&[&str]>, rows: &[&[&str]]) -> Self {
        Self::new(
            header.map(|names| names.iter().map(|n| n.to_string()).collect()),
            rows.iter().map(|row| RawRow::from_strs(row)).collect(),
        )
    }

    pub fn reader(&self) -> MemorySource {
        let mut pending = VecDeque::with_capacity(self.rows.len() + 1);
        if let Some(header) = &self.header {
            pending.push_back(RawRow::new(
                header.iter().cloned().map(RawValue::Text).collect(),
            ));
        }
        pending.extend(self.rows.iter().cloned());
        MemorySource {
            has_header: self.header.is_some(),
            total: self.rows.len() as u64,
            pending,
        }
    }
}

impl SourceOpener for MemoryTable {
    fn open(&self) -> Result<Box<dyn RowSource>, ImportError> {
        Ok(Box::new(self.reader()))
    }

    fn describe(&self) -> String {
        format!("in-memory table ({} row(s))", self.rows.len())
    }
}

#[derive(Debug)]
pub struct MemorySource {
    has_header: bool,
    total: u64,
    pending: VecDeque<RawRow>,
}

impl RowSource for MemorySource {
    fn has_header(&self) -> bool {
        self.has_header
    }

    fn next_row(&mut self) -> Result<Option<RawRow>, ImportError> {
        Ok(self.pending.pop_front())
    }

    fn rows_estimate(&self) -> Option<u64> {
        Some(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_yields_header_first() {
        let table = MemoryTable::from_strs(Some(&["id", "name"]), &[&["1", "Ann"], &["2", "Bo"]]);
        let mut reader = table.reader();
        assert!(reader.has_header());
        let header = reader.next_row().unwrap().unwrap();
        assert_eq!(header.display_values(), vec!["id", "name"]);
        assert_eq!(reader.skip_rows(5).unwrap(), 2);
        assert!(reader.next_row().unwrap().is_none());
        assert_eq!(reader.rows_estimate(), Some(2));
    }

    #[test]
    fn short_rows_read_as_missing() {
        let row = RawRow::from_strs(&["1"]);
        assert_eq!(row.get(0), &RawValue::text("1"));
        assert_eq!(row.get(3), &RawValue::Missing);
    }

    #[test]
    fn reopening_starts_from_the_beginning() {
        let table = MemoryTable::from_strs(None, &[&["a"], &["b"]]);
        let mut first = table.open().unwrap();
        first.next_row().unwrap();
        let mut second = table.open().unwrap();
        assert_eq!(
            second.next_row().unwrap(),
            Some(RawRow::from_strs(&["a"]))
        );
    }
}
