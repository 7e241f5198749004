//! The minimal table store the import engine writes through.
//!
//! Dialect concerns (quoting, type names, transactions) live in the adapters;
//! see [`crate::sqlite::SqliteStore`].

use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::{convert::CellValue, names::ROW_ID_COLUMN, types::FieldType};

/// Every staging table name starts with this prefix, so leftovers from a
/// crashed job can be recognized and dropped.
pub const STAGING_PREFIX: &str = "import_staging__";

/// Deterministic staging name for a target. Two jobs for the same target
/// always collide on this name.
pub fn staging_name(target: &str) -> String {
    format!("{STAGING_PREFIX}{target}")
}

pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// Bookkeeping table holding the claims of running imports. Hidden from
/// [`Store::list_tables`] and never a valid import target.
pub const LEASE_TABLE: &str = "import_leases";

/// A claim whose heartbeat is older than this is considered abandoned and may
/// be taken over.
pub const LEASE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Surrogate, monotonically increasing row identifier.
    RowId,
    Field(FieldType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn field(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Field(field_type),
        }
    }

    pub fn row_id() -> Self {
        Self {
            name: ROW_ID_COLUMN.to_string(),
            kind: ColumnKind::RowId,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context}")]
    Sql {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Unable to insert data row {row}: {reason}")]
    Insert { row: usize, reason: String },
    #[error("Table '{0}' does not exist")]
    MissingTable(String),
}

impl StoreError {
    pub fn sql(context: impl Into<String>, source: rusqlite::Error) -> Self {
        StoreError::Sql {
            context: context.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the engine needs from a SQL-backed store.
pub trait Store: Send {
    /// Identifies the database this store writes to.
    fn namespace(&self) -> String;

    /// Claims `key` for `owner`, visible to every connection to the same
    /// database. Returns false while another owner holds a live claim; a
    /// claim not renewed within [`LEASE_TTL_SECS`] is taken over.
    fn acquire_lease(&mut self, key: &str, owner: &str) -> StoreResult<bool>;

    /// Refreshes the heartbeat of a held claim. Returns false when `owner` no
    /// longer holds `key`.
    fn renew_lease(&mut self, key: &str, owner: &str) -> StoreResult<bool>;

    fn release_lease(&mut self, key: &str, owner: &str) -> StoreResult<()>;

    fn create_table(&mut self, name: &str, columns: &[ColumnDef]) -> StoreResult<()>;

    fn drop_table_if_exists(&mut self, name: &str) -> StoreResult<()>;

    /// Inserts `rows` in order. `first_row_number` is the 1-based data row
    /// number of `rows[0]`, used when reporting a failing row.
    fn bulk_insert(
        &mut self,
        name: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
        first_row_number: usize,
    ) -> StoreResult<()>;

    /// Replaces `to` with `from` atomically: any existing `to` is dropped and
    /// `from` renamed, both or neither.
    fn rename_table(&mut self, from: &str, to: &str) -> StoreResult<()>;

    fn table_exists(&mut self, name: &str) -> StoreResult<bool>;

    fn list_tables(&mut self) -> StoreResult<Vec<String>>;
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn namespace(&self) -> String {
        (**self).namespace()
    }

    fn acquire_lease(&mut self, key: &str, owner: &str) -> StoreResult<bool> {
        (**self).acquire_lease(key, owner)
    }

    fn renew_lease(&mut self, key: &str, owner: &str) -> StoreResult<bool> {
        (**self).renew_lease(key, owner)
    }

    fn release_lease(&mut self, key: &str, owner: &str) -> StoreResult<()> {
        (**self).release_lease(key, owner)
    }

    fn create_table(&mut self, name: &str, columns: &[ColumnDef]) -> StoreResult<()> {
        (**self).create_table(name, columns)
    }

    fn drop_table_if_exists(&mut self, name: &str) -> StoreResult<()> {
        (**self).drop_table_if_exists(name)
    }

    fn bulk_insert(
        &mut self,
        name: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
        first_row_number: usize,
    ) -> StoreResult<()> {
        (**self).bulk_insert(name, columns, rows, first_row_number)
    }

    fn rename_table(&mut self, from: &str, to: &str) -> StoreResult<()> {
        (**self).rename_table(from, to)
    }

    fn table_exists(&mut self, name: &str) -> StoreResult<bool> {
        (**self).table_exists(name)
    }

    fn list_tables(&mut self) -> StoreResult<Vec<String>> {
        (**self).list_tables()
    }
}

/// Drops every staging table left behind by an interrupted job. Tables still
/// claimed by a running import are kept. Returns the names that were dropped.
pub fn cleanup_stale_staging(store: &mut dyn Store) -> StoreResult<Vec<String>> {
    let owner = format!("cleanup-{}", Uuid::new_v4());
    let staging: Vec<String> = store
        .list_tables()?
        .into_iter()
        .filter(|name| is_staging_name(name))
        .collect();
    let mut dropped = Vec::new();
    for name in staging {
        let key = name.to_lowercase();
        if !store.acquire_lease(&key, &owner)? {
            info!("Keeping staging table '{name}': an import is still loading it");
            continue;
        }
        warn!("Dropping stale staging table '{name}'");
        let result = store.drop_table_if_exists(&name);
        store.release_lease(&key, &owner)?;
        result?;
        dropped.push(name);
    }
    if dropped.is_empty() {
        info!("No stale staging tables found in {}", store.namespace());
    }
    Ok(dropped)
}
