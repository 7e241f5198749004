//! Delimited text files as a row source.

use std::{
    collections::VecDeque,
    fs::File,
    io::BufReader,
    path::PathBuf,
};

use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    error::ImportError,
    io_utils::{decode_record, open_csv_reader, resolve_input_delimiter},
    sampler::{HEADER_WINDOW, looks_like_header},
    source::{RawRow, RawValue, RowSource, SourceOpener},
    types::ValueRules,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMode {
    Present,
    Absent,
    /// Decide from the first row and the rows just after it.
    #[default]
    Detect,
}

#[derive(Debug, Clone)]
pub struct CsvSourceConfig {
    pub path: PathBuf,
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    pub header: HeaderMode,
}

impl CsvSourceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            delimiter: resolve_input_delimiter(&path, None),
            path,
            encoding: UTF_8,
            header: HeaderMode::Detect,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_header(mut self, header: HeaderMode) -> Self {
        self.header = header;
        self
    }

    /// Value rules implied by the delimiter.
    pub fn value_rules(&self) -> ValueRules {
        ValueRules::for_delimiter(self.delimiter)
    }

    pub fn reader(&self) -> Result<CsvSource, ImportError> {
        let file = File::open(&self.path)
            .map_err(|err| ImportError::source_read(format!("Opening {:?}", self.path), err))?;
        let total_bytes = file.metadata().map(|meta| meta.len()).ok();
        let mut source = CsvSource {
            path: self.path.clone(),
            reader: open_csv_reader(BufReader::new(file), self.delimiter),
            encoding: self.encoding,
            record: csv::ByteRecord::new(),
            pending: VecDeque::new(),
            has_header: false,
            records_read: 0,
            total_bytes,
        };
        source.has_header = match self.header {
            HeaderMode::Present => true,
            HeaderMode::Absent => false,
            HeaderMode::Detect => source.detect_header(&self.value_rules())?,
        };
        Ok(source)
    }
}

impl SourceOpener for CsvSourceConfig {
    fn open(&self) -> Result<Box<dyn RowSource>, ImportError> {
        Ok(Box::new(self.reader()?))
    }

    fn describe(&self) -> String {
        format!("{:?}", self.path)
    }
}

pub struct CsvSource {
    path: PathBuf,
    reader: csv::Reader<BufReader<File>>,
    encoding: &'static Encoding,
    record: csv::ByteRecord,
    /// Rows read ahead for header detection, not yet handed out.
    pending: VecDeque<RawRow>,
    has_header: bool,
    records_read: u64,
    total_bytes: Option<u64>,
}

impl CsvSource {
    fn read_record(&mut self) -> Result<Option<RawRow>, ImportError> {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                self.records_read += 1;
                let values = decode_record(&self.record, self.encoding)?;
                Ok(Some(RawRow::new(
                    values.into_iter().map(RawValue::Text).collect(),
                )))
            }
            Ok(false) => Ok(None),
            Err(err) => Err(ImportError::source_read(
                format!("Reading {:?}", self.path),
                err,
            )),
        }
    }

    fn detect_header(&mut self, rules: &ValueRules) -> Result<bool, ImportError> {
        while self.pending.len() <= HEADER_WINDOW {
            match self.read_record()? {
                Some(row) => self.pending.push_back(row),
                None => break,
            }
        }
        let detected = self
            .pending
            .front()
            .is_some_and(|first| looks_like_header(first, self.pending.iter().skip(1), rules));
        debug!(
            "Header {} in {:?}",
            if detected { "detected" } else { "not detected" },
            self.path
        );
        Ok(detected)
    }
}

impl RowSource for CsvSource {
    fn has_header(&self) -> bool {
        self.has_header
    }

    fn next_row(&mut self) -> Result<Option<RawRow>, ImportError> {
        match self.pending.pop_front() {
            Some(row) => Ok(Some(row)),
            None => self.read_record(),
        }
    }

    /// File size divided by the average width of the records read so far.
    fn rows_estimate(&self) -> Option<u64> {
        let total = self.total_bytes?;
        let consumed = self.reader.position().byte();
        if self.records_read == 0 || consumed == 0 {
            return None;
        }
        let average = (consumed / self.records_read).max(1);
        let rows = total / average;
        Some(rows.saturating_sub(u64::from(self.has_header)))
    }
}
