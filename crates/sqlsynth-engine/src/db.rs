//! SQLite-backed synthetic database.

use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use sqlsynth_schema::{CanonicalType, ColumnSpec, ReferenceCatalog, SchemaSet, TableSchema, TypeOrigin};
use tracing::{debug, warn};

use crate::error::{Result, SynthError};
use crate::value::SqlValue;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One SQLite connection holding the synthesized tables.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Drop and recreate every table in `schemas`.
    pub fn create_tables(&self, schemas: &SchemaSet) -> Result<()> {
        let mut ddl = String::new();
        for table in schemas.iter() {
            ddl.push_str(&create_table_sql(table));
        }
        self.execute_batch(&ddl)
    }

    /// Insert `rows` (values in `columns` order) in one transaction.
    pub fn insert_rows(&self, table: &str, columns: &[String], rows: &[Vec<SqlValue>]) -> Result<usize> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let placeholders = vec!["?"; columns.len()].join(", ");
            let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
            let sql = format!(
                "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
                quote_ident(table)
            );
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        debug!(table, rows = rows.len(), "inserted rows");
        Ok(rows.len())
    }

    pub fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.lock().query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    pub fn query_values(&self, sql: &str) -> Result<Vec<Vec<SqlValue>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql.trim())?;
        let col_count = stmt.column_count();
        let rows = stmt.query_map([], |row| {
            let mut vals = Vec::with_capacity(col_count);
            for i in 0..col_count {
                let v: Value = row.get(i)?;
                vals.push(SqlValue::from(v));
            }
            Ok(vals)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// First column of `sql`, one value per row.
    pub fn column_values(&self, sql: &str) -> Result<Vec<SqlValue>> {
        Ok(self
            .query_values(sql)?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// Rows `sql` yields, counted up to `limit`, or `ExecutionTimeout` when it
    /// runs past `timeout`.
    pub fn probe(&self, sql: &str, limit: u64, timeout: Duration) -> Result<u64> {
        let body = sql.trim().trim_end_matches(';');
        let counted = format!("SELECT COUNT(*) FROM (SELECT * FROM ({body}) LIMIT {limit})");

        let conn = self.conn.lock();
        let handle = conn.get_interrupt_handle();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let watchdog = thread::Builder::new()
            .name("sqlsynth_probe_watchdog".to_string())
            .spawn(move || match done_rx.recv_timeout(timeout) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    handle.interrupt();
                    true
                }
                _ => false,
            })?;

        let result: rusqlite::Result<i64> = conn.query_row(&counted, [], |row| row.get(0));
        let _ = done_tx.send(());
        let timed_out = watchdog.join().unwrap_or(false);

        match result {
            Ok(count) => Ok(count.max(0) as u64),
            Err(_) if timed_out => {
                warn!(timeout_ms = timeout.as_millis() as u64, "probe interrupted");
                Err(SynthError::ExecutionTimeout(timeout))
            }
            Err(e) => Err(SynthError::Execution(e.to_string())),
        }
    }

    fn declared_columns(&self, table: &str) -> Result<Vec<ColumnSpec>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            let pk: i64 = row.get(5)?;
            Ok(ColumnSpec {
                name: name.to_ascii_lowercase(),
                data_type: CanonicalType::from_declared(&declared),
                nullable: not_null == 0 && pk == 0,
                origin: TypeOrigin::Reference,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

/// An existing SQLite file consulted for table shapes only; its data is
/// never read.
pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            db: Database {
                conn: Mutex::new(conn),
            },
        })
    }
}

impl ReferenceCatalog for SqliteCatalog {
    fn table_columns(&self, table: &str) -> Option<Vec<ColumnSpec>> {
        match self.db.declared_columns(table) {
            Ok(columns) if columns.is_empty() => None,
            Ok(columns) => Some(columns),
            Err(e) => {
                warn!(table, error = %e, "reference catalog lookup failed");
                None
            }
        }
    }
}

pub fn create_table_sql(table: &TableSchema) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{null}", quote_ident(&c.name), c.data_type)
        })
        .collect();
    format!(
        "DROP TABLE IF EXISTS {name};\nCREATE TABLE {name} ({});\n",
        columns.join(", "),
        name = quote_ident(&table.name)
    )
}
