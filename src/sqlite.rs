//! SQLite implementation of [`Store`].

use std::path::Path;

use log::{debug, warn};
use rusqlite::{
    Connection, OptionalExtension, TransactionBehavior, params, params_from_iter,
    types::{ToSql, ToSqlOutput, Value, ValueRef},
};
use uuid::Uuid;

use crate::{
    convert::CellValue,
    store::{
        ColumnDef, ColumnKind, LEASE_TABLE, LEASE_TTL_SECS, Store, StoreError, StoreResult,
    },
    types::FieldType,
};

/// Database clock, so that every process agrees on lease ages.
const NOW: &str = "CAST(strftime('%s', 'now') AS INTEGER)";

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.as_str() {
            Some(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            None => ToSqlOutput::Owned(Value::Null),
        })
    }
}

pub struct SqliteStore {
    conn: Connection,
    namespace: String,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|err| StoreError::sql(format!("Opening SQLite database {path:?}"), err))?;
        let namespace = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();
        Ok(Self { conn, namespace })
    }

    /// Private database; every call yields a distinct namespace.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|err| StoreError::sql("Opening in-memory SQLite database", err))?;
        Ok(Self {
            conn,
            namespace: format!("memory:{}", Uuid::new_v4()),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count_rows(&self, table: &str) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        self.conn
            .query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map(|count| count.max(0) as u64)
            .map_err(|err| StoreError::sql(format!("Counting rows in '{table}'"), err))
    }

    fn claim(&mut self, key: &str, owner: &str) -> rusqlite::Result<(usize, bool)> {
        // IMMEDIATE takes the write lock up front, so two processes can't both
        // see the key as free.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {LEASE_TABLE} (\
             lease_key TEXT PRIMARY KEY COLLATE NOCASE, \
             owner TEXT NOT NULL, \
             heartbeat INTEGER NOT NULL)"
        ))?;
        let expired = tx.execute(
            &format!("DELETE FROM {LEASE_TABLE} WHERE lease_key = ?1 AND heartbeat < {NOW} - ?2"),
            params![key, LEASE_TTL_SECS],
        )?;
        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {LEASE_TABLE} (lease_key, owner, heartbeat) \
                 VALUES (?1, ?2, {NOW})"
            ),
            params![key, owner],
        )?;
        tx.commit()?;
        Ok((expired, inserted == 1))
    }

    fn insert_batch(&mut self, sql: &str, rows: &[Vec<CellValue>]) -> rusqlite::Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut statement = tx.prepare_cached(sql)?;
            for row in rows {
                statement.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()
    }

    fn insert_one_by_one(
        &mut self,
        sql: &str,
        rows: &[Vec<CellValue>],
        first_row_number: usize,
    ) -> StoreResult<()> {
        let mut statement = self
            .conn
            .prepare_cached(sql)
            .map_err(|err| StoreError::sql("Preparing insert statement", err))?;
        for (offset, row) in rows.iter().enumerate() {
            statement
                .execute(params_from_iter(row.iter()))
                .map_err(|err| StoreError::Insert {
                    row: first_row_number + offset,
                    reason: err.to_string(),
                })?;
        }
        Ok(())
    }
}

/// Double-quoted SQL identifier with embedded quotes doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_sql(column: &ColumnDef) -> String {
    let declared = match column.kind {
        ColumnKind::RowId => "INTEGER PRIMARY KEY AUTOINCREMENT",
        ColumnKind::Field(FieldType::Numeric) => "NUMERIC",
        ColumnKind::Field(FieldType::Datetime) => "DATETIME",
        ColumnKind::Field(FieldType::Text) => "TEXT",
    };
    format!("{} {declared}", quote_identifier(&column.name))
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({names}) VALUES ({placeholders})",
        quote_identifier(table)
    )
}

impl Store for SqliteStore {
    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    fn acquire_lease(&mut self, key: &str, owner: &str) -> StoreResult<bool> {
        let (expired, claimed) = self
            .claim(key, owner)
            .map_err(|err| StoreError::sql(format!("Claiming '{key}'"), err))?;
        if expired > 0 {
            warn!("Took over abandoned claim on '{key}'");
        }
        Ok(claimed)
    }

    fn renew_lease(&mut self, key: &str, owner: &str) -> StoreResult<bool> {
        self.conn
            .execute(
                &format!(
                    "UPDATE {LEASE_TABLE} SET heartbeat = {NOW} \
                     WHERE lease_key = ?1 AND owner = ?2"
                ),
                params![key, owner],
            )
            .map(|changed| changed == 1)
            .map_err(|err| StoreError::sql(format!("Renewing claim on '{key}'"), err))
    }

    fn release_lease(&mut self, key: &str, owner: &str) -> StoreResult<()> {
        self.conn
            .execute(
                &format!("DELETE FROM {LEASE_TABLE} WHERE lease_key = ?1 AND owner = ?2"),
                params![key, owner],
            )
            .map(|_| ())
            .map_err(|err| StoreError::sql(format!("Releasing claim on '{key}'"), err))
    }

    fn create_table(&mut self, name: &str, columns: &[ColumnDef]) -> StoreResult<()> {
        let body = columns.iter().map(column_sql).collect::<Vec<_>>().join(", ");
        let sql = format!("CREATE TABLE {} ({body})", quote_identifier(name));
        debug!("{sql}");
        self.conn
            .execute(&sql, [])
            .map(|_| ())
            .map_err(|err| StoreError::sql(format!("Creating table '{name}'"), err))
    }

    fn drop_table_if_exists(&mut self, name: &str) -> StoreResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_identifier(name));
        self.conn
            .execute(&sql, [])
            .map(|_| ())
            .map_err(|err| StoreError::sql(format!("Dropping table '{name}'"), err))
    }

    fn bulk_insert(
        &mut self,
        name: &str,
        columns: &[String],
        rows: &[Vec<CellValue>],
        first_row_number: usize,
    ) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = insert_sql(name, columns);
        if let Err(err) = self.insert_batch(&sql, rows) {
            debug!(
                "Batch of {} row(s) into '{name}' failed ({err}); retrying row by row",
                rows.len()
            );
            self.insert_one_by_one(&sql, rows, first_row_number)?;
        }
        Ok(())
    }

    fn rename_table(&mut self, from: &str, to: &str) -> StoreResult<()> {
        if !self.table_exists(from)? {
            return Err(StoreError::MissingTable(from.to_string()));
        }
        let context = || format!("Replacing table '{to}' with '{from}'");
        let tx = self
            .conn
            .transaction()
            .map_err(|err| StoreError::sql(context(), err))?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(to)), [])
            .map_err(|err| StoreError::sql(context(), err))?;
        tx.execute(
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_identifier(from),
                quote_identifier(to)
            ),
            [],
        )
        .map_err(|err| StoreError::sql(context(), err))?;
        tx.commit().map_err(|err| StoreError::sql(context(), err))
    }

    fn table_exists(&mut self, name: &str) -> StoreResult<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|err| StoreError::sql(format!("Looking up table '{name}'"), err))
    }

    fn list_tables(&mut self) -> StoreResult<Vec<String>> {
        let mut statement = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' AND name <> ?1 ORDER BY name",
            )
            .map_err(|err| StoreError::sql("Listing tables", err))?;
        let names = statement
            .query_map([LEASE_TABLE], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|err| StoreError::sql("Listing tables", err))?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::row_id(),
            ColumnDef::field("id", FieldType::Numeric),
            ColumnDef::field("note", FieldType::Text),
        ]
    }

    fn names() -> Vec<String> {
        vec!["id".to_string(), "note".to_string()]
    }

    #[test]
    fn quoting_doubles_embedded_quotes() {
        assert_eq!(quote_identifier("plain"), "\"plain\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn insert_assigns_increasing_row_ids() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_table("t", &columns()).unwrap();
        let rows = vec![
            vec![CellValue::Number("1".into()), CellValue::Text("a".into())],
            vec![CellValue::Null, CellValue::Text("b".into())],
        ];
        store.bulk_insert("t", &names(), &rows, 1).unwrap();
        assert_eq!(store.count_rows("t").unwrap(), 2);

        let ids: Vec<i64> = store
            .connection()
            .prepare("SELECT import_row_id FROM t ORDER BY import_row_id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        let id: Option<i64> = store
            .connection()
            .query_row("SELECT id FROM t WHERE note = 'b'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(id, None);
    }

    #[test]
    fn failed_batch_reports_the_failing_row() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE checked (note TEXT CHECK (note <> 'bad'))")
            .unwrap();
        let rows = vec![
            vec![CellValue::Text("ok".into())],
            vec![CellValue::Text("bad".into())],
        ];
        let err = store
            .bulk_insert("checked", &["note".to_string()], &rows, 10)
            .unwrap_err();
        assert!(matches!(err, StoreError::Insert { row: 11, .. }), "{err:?}");
    }

    #[test]
    fn rename_replaces_existing_target() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_table("target", &columns()).unwrap();
        store
            .bulk_insert(
                "target",
                &names(),
                &[vec![CellValue::Number("9".into()), CellValue::Null]],
                1,
            )
            .unwrap();
        store.create_table("staged", &columns()).unwrap();

        store.rename_table("staged", "target").unwrap();
        assert!(!store.table_exists("staged").unwrap());
        assert!(store.table_exists("target").unwrap());
        assert_eq!(store.count_rows("target").unwrap(), 0);
    }

    #[test]
    fn rename_of_missing_table_leaves_target_alone() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_table("target", &columns()).unwrap();
        let err = store.rename_table("nope", "target").unwrap_err();
        assert!(matches!(err, StoreError::MissingTable(_)));
        assert!(store.table_exists("target").unwrap());
    }

    #[test]
    fn claims_are_shared_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.db");
        let mut first = SqliteStore::open(&path).unwrap();
        let mut second = SqliteStore::open(&path).unwrap();

        assert!(first.acquire_lease("import_staging__orders", "a").unwrap());
        assert!(!second.acquire_lease("IMPORT_STAGING__ORDERS", "b").unwrap());
        assert!(!second.renew_lease("import_staging__orders", "b").unwrap());
        assert!(first.renew_lease("import_staging__orders", "a").unwrap());

        first.release_lease("import_staging__orders", "a").unwrap();
        assert!(second.acquire_lease("import_staging__orders", "b").unwrap());
        assert!(second.list_tables().unwrap().is_empty());
    }

    #[test]
    fn abandoned_claim_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.db");
        let mut crashed = SqliteStore::open(&path).unwrap();
        let mut next = SqliteStore::open(&path).unwrap();
        assert!(crashed.acquire_lease("import_staging__orders", "old").unwrap());
        crashed
            .connection()
            .execute("UPDATE import_leases SET heartbeat = heartbeat - 3600", [])
            .unwrap();

        assert!(next.acquire_lease("import_staging__orders", "new").unwrap());
        assert!(!crashed.renew_lease("import_staging__orders", "old").unwrap());
    }

    #[test]
    fn in_memory_namespaces_are_distinct() {
        let a = SqliteStore::open_in_memory().unwrap();
        let b = SqliteStore::open_in_memory().unwrap();
        assert_ne!(a.namespace(), b.namespace());
    }
}
