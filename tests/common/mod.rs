#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, types::Value};
use tabular_import::{
    error::ImportError,
    source::{MemoryTable, RawRow, RowSource, SourceOpener},
    sqlite::{SqliteStore, quote_identifier},
    store::{Store, StoreError},
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("import.db")
    }
}

/// Renders a SQLite value the way the assertions compare it.
pub fn cell(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Text(v) => Some(v),
        Value::Blob(v) => Some(format!("{v:?}")),
    }
}

/// All rows of `table` (without the surrogate id) in insertion order.
pub fn table_rows(conn: &Connection, table: &str) -> Vec<Vec<Option<String>>> {
    let sql = format!(
        "SELECT * FROM {} ORDER BY import_row_id",
        quote_identifier(table)
    );
    let mut statement = conn.prepare(&sql).expect("prepare select");
    let width = statement.column_count();
    statement
        .query_map([], |row| {
            (1..width)
                .map(|idx| row.get::<_, Value>(idx).map(cell))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .expect("query rows")
        .collect::<rusqlite::Result<Vec<_>>>()
        .expect("collect rows")
}

/// Declared column types of `table`, surrogate id included.
pub fn declared_types(conn: &Connection, table: &str) -> Vec<(String, String)> {
    let sql = format!("PRAGMA table_info({})", quote_identifier(table));
    let mut statement = conn.prepare(&sql).expect("prepare pragma");
    statement
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        .expect("query pragma")
        .collect::<rusqlite::Result<Vec<_>>>()
        .expect("collect pragma")
}

pub fn memory_table(header: &[&str], rows: &[Vec<String>]) -> MemoryTable {
    MemoryTable::new(
        Some(header.iter().map(|h| h.to_string()).collect()),
        rows.iter()
            .map(|row| RawRow::from_strs(&row.iter().map(String::as_str).collect::<Vec<_>>()))
            .collect(),
    )
}

/// Store wrapper that fails selected operations.
pub struct FailingStore {
    pub inner: SqliteStore,
    /// Fail the n-th (1-based) bulk insert.
    pub fail_insert_at: Option<usize>,
    pub fail_rename: bool,
    inserts: usize,
}

impl FailingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_insert_at: None,
            fail_rename: false,
            inserts: 0,
        }
    }
}

impl Store for FailingStore {
    fn namespace(&self) -> String {
        self.inner.namespace()
    }

    fn acquire_lease(&mut self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.inner.acquire_lease(key, owner)
    }

    fn renew_lease(&mut self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.inner.renew_lease(key, owner)
    }

    fn release_lease(&mut self, key: &str, owner: &str) -> Result<(), StoreError> {
        self.inner.release_lease(key, owner)
    }

    fn create_table(
        &mut self,
        name: &str,
        columns: &[tabular_import::store::ColumnDef],
    ) -> Result<(), StoreError> {
        self.inner.create_table(name, columns)
    }

    fn drop_table_if_exists(&mut self, name: &str) -> Result<(), StoreError> {
        self.inner.drop_table_if_exists(name)
    }

    fn bulk_insert(
        &mut self,
        name: &str,
        columns: &[String],
        rows: &[Vec<tabular_import::convert::CellValue>],
        first_row_number: usize,
    ) -> Result<(), StoreError> {
        self.inserts += 1;
        if self.fail_insert_at == Some(self.inserts) {
            return Err(StoreError::Insert {
                row: first_row_number,
                reason: "disk full".to_string(),
            });
        }
        self.inner.bulk_insert(name, columns, rows, first_row_number)
    }

    fn rename_table(&mut self, from: &str, to: &str) -> Result<(), StoreError> {
        if self.fail_rename {
            return Err(StoreError::MissingTable(from.to_string()));
        }
        self.inner.rename_table(from, to)
    }

    fn table_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        self.inner.table_exists(name)
    }

    fn list_tables(&mut self) -> Result<Vec<String>, StoreError> {
        self.inner.list_tables()
    }
}

/// Wraps a source and runs `hook` after every `every` rows it yields.
pub struct HookedOpener<F> {
    pub inner: MemoryTable,
    pub every: usize,
    pub hook: F,
}

impl<F> SourceOpener for HookedOpener<F>
where
    F: Fn(usize) + Clone + Send + Sync + 'static,
{
    fn open(&self) -> Result<Box<dyn RowSource>, ImportError> {
        Ok(Box::new(HookedSource {
            inner: Box::new(self.inner.reader()),
            every: self.every.max(1),
            yielded: 0,
            hook: self.hook.clone(),
        }))
    }

    fn describe(&self) -> String {
        "hooked table".to_string()
    }
}

struct HookedSource<F> {
    inner: Box<dyn RowSource>,
    every: usize,
    yielded: usize,
    hook: F,
}

impl<F: Fn(usize)> RowSource for HookedSource<F> {
    fn has_header(&self) -> bool {
        self.inner.has_header()
    }

    fn next_row(&mut self) -> Result<Option<RawRow>, ImportError> {
        let row = self.inner.next_row()?;
        if row.is_some() {
            self.yielded += 1;
            if self.yielded % self.every == 0 {
                (self.hook)(self.yielded);
            }
        }
        Ok(row)
    }

    fn rows_estimate(&self) -> Option<u64> {
        self.inner.rows_estimate()
    }
}
