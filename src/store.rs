// Durable report table behind a small storage interface.
//
// The store only ever appends a batch or replaces the whole table; there
// are no row-level updates. Values are kept in their raw persisted form
// and typed again on read.
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{ReportError, Result};
use crate::types::{CellValue, IngestStrategy, RawTable};

const META_TABLE: &str = "fleet_report_meta";

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    pub strategy: IngestStrategy,
    pub rows_written: usize,
    pub total_rows: usize,
    /// Columns the stored schema did not have before this batch.
    pub added_columns: Vec<String>,
    pub version: u64,
}

pub trait ReportStore {
    fn ingest(&mut self, batch: &RawTable, strategy: IngestStrategy) -> Result<IngestReceipt>;

    /// `true` once a table has been created and not dropped since.
    fn exists(&self) -> Result<bool>;

    /// Full table; empty when nothing has been ingested yet.
    fn read_all(&self) -> Result<RawTable>;

    /// Monotonic counter bumped by every successful ingest.
    fn version(&self) -> Result<u64>;

    /// Ingest only if nobody else wrote since `expected` was observed.
    fn ingest_guarded(
        &mut self,
        batch: &RawTable,
        strategy: IngestStrategy,
        expected: u64,
    ) -> Result<IngestReceipt> {
        let found = self.version()?;
        if found != expected {
            return Err(ReportError::VersionConflict { expected, found });
        }
        self.ingest(batch, strategy)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl From<&CellValue> for Value {
    fn from(cell: &CellValue) -> Self {
        match cell {
            CellValue::Empty => Value::Null,
            CellValue::Number(n) => Value::Real(*n),
            CellValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

fn cell_from_sql(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Empty,
        ValueRef::Integer(i) => CellValue::Number(i as f64),
        ValueRef::Real(f) => CellValue::Number(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// SQLite-backed store. Every ingest runs in one transaction, so a failed
/// write leaves the previously persisted table untouched.
pub struct SqliteStore {
    conn: Connection,
    table: String,
}

impl SqliteStore {
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        Self::with_connection(Connection::open(path)?, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (table_name TEXT PRIMARY KEY, version INTEGER NOT NULL)",
                META_TABLE
            ),
            [],
        )?;
        Ok(Self { conn, table: table.to_string() })
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn stored_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cols)
    }

    fn read_version(conn: &Connection, table: &str) -> Result<u64> {
        let v: Option<i64> = conn
            .query_row(
                &format!("SELECT version FROM {} WHERE table_name = ?1", META_TABLE),
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v.unwrap_or(0) as u64)
    }

    fn row_count(conn: &Connection, table: &str) -> Result<usize> {
        if !Self::table_exists(conn, table)? {
            return Ok(0);
        }
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl ReportStore for SqliteStore {
    fn ingest(&mut self, batch: &RawTable, strategy: IngestStrategy) -> Result<IngestReceipt> {
        let table = self.table.clone();
        let ident = quote_ident(&table);
        let tx = self.conn.transaction()?;

        if strategy == IngestStrategy::Replace && Self::table_exists(&tx, &table)? {
            warn!(table = %table, "REPLACE: dropping stored report table");
            tx.execute(&format!("DROP TABLE {}", ident), [])?;
        }

        let mut added_columns = Vec::new();
        if Self::table_exists(&tx, &table)? {
            let existing = Self::stored_columns(&tx, &table)?;
            for col in batch.columns.iter().filter(|c| !existing.contains(c)) {
                tx.execute(&format!("ALTER TABLE {} ADD COLUMN {}", ident, quote_ident(col)), [])?;
                added_columns.push(col.clone());
            }
        } else if !batch.columns.is_empty() {
            let cols: Vec<String> = batch.columns.iter().map(|c| quote_ident(c)).collect();
            tx.execute(&format!("CREATE TABLE {} ({})", ident, cols.join(", ")), [])?;
            added_columns = batch.columns.clone();
        }

        if !batch.columns.is_empty() {
            let cols: Vec<String> = batch.columns.iter().map(|c| quote_ident(c)).collect();
            let marks: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                ident,
                cols.join(", "),
                marks.join(", ")
            );
            let mut stmt = tx.prepare(&sql)?;
            for row in &batch.rows {
                stmt.execute(params_from_iter(row.iter().map(Value::from)))?;
            }
        }

        let version = Self::read_version(&tx, &table)? + 1;
        tx.execute(
            &format!(
                "INSERT INTO {} (table_name, version) VALUES (?1, ?2)
                 ON CONFLICT(table_name) DO UPDATE SET version = excluded.version",
                META_TABLE
            ),
            params![table, version as i64],
        )?;
        let total_rows = Self::row_count(&tx, &table)?;
        tx.commit()?;

        info!(
            table = %table,
            strategy = %strategy,
            rows = batch.rows.len(),
            total_rows,
            version,
            "ingested batch"
        );
        Ok(IngestReceipt {
            strategy,
            rows_written: batch.rows.len(),
            total_rows,
            added_columns,
            version,
        })
    }

    fn exists(&self) -> Result<bool> {
        Self::table_exists(&self.conn, &self.table)
    }

    fn read_all(&self) -> Result<RawTable> {
        if !self.exists()? {
            return Ok(RawTable::default());
        }
        let columns = Self::stored_columns(&self.conn, &self.table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(&self.table)))?;
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(cell_from_sql))
                    .collect::<rusqlite::Result<Vec<CellValue>>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(RawTable { columns, rows })
    }

    fn version(&self) -> Result<u64> {
        Self::read_version(&self.conn, &self.table)
    }
}

/// In-process store with the same append/replace semantics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Option<RawTable>,
    version: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for MemoryStore {
    fn ingest(&mut self, batch: &RawTable, strategy: IngestStrategy) -> Result<IngestReceipt> {
        if strategy == IngestStrategy::Replace {
            self.table = None;
        }
        let added_columns = match self.table.as_mut() {
            Some(stored) => stored.append(batch),
            None if batch.columns.is_empty() => Vec::new(),
            None => {
                self.table = Some(batch.clone());
                batch.columns.clone()
            }
        };
        self.version += 1;
        Ok(IngestReceipt {
            strategy,
            rows_written: batch.rows.len(),
            total_rows: self.table.as_ref().map_or(0, |t| t.rows.len()),
            added_columns,
            version: self.version,
        })
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.table.is_some())
    }

    fn read_all(&self) -> Result<RawTable> {
        Ok(self.table.clone().unwrap_or_default())
    }

    fn version(&self) -> Result<u64> {
        Ok(self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        let mut t = RawTable::new(columns.iter().map(|c| c.to_string()).collect());
        for r in rows {
            t.push_row(r.iter().map(|v| CellValue::from(*v)).collect());
        }
        t
    }

    fn stores() -> Vec<Box<dyn ReportStore>> {
        vec![
            Box::new(SqliteStore::open_in_memory("relatorios").unwrap()),
            Box::new(MemoryStore::new()),
        ]
    }

    fn texts(table: &RawTable, col: &str) -> Vec<Option<String>> {
        let idx = table.column_index(col).unwrap();
        table.rows.iter().map(|r| r[idx].as_text()).collect()
    }

    #[test]
    fn absent_table_reads_empty() {
        for store in stores() {
            assert!(!store.exists().unwrap());
            assert_eq!(store.read_all().unwrap(), RawTable::default());
            assert_eq!(store.version().unwrap(), 0);
        }
    }

    #[test]
    fn append_keeps_every_row_of_both_batches() {
        let a = batch(&["sub", "km"], &[&["Sé", "1"], &["Lapa", "2"]]);
        let b = batch(&["sub", "km"], &[&["Mooca", "3"]]);
        for mut store in stores() {
            store.ingest(&a, IngestStrategy::Append).unwrap();
            let receipt = store.ingest(&b, IngestStrategy::Append).unwrap();
            assert_eq!(receipt.total_rows, 3);
            let mut subs = texts(&store.read_all().unwrap(), "sub");
            subs.sort();
            assert_eq!(
                subs,
                vec![Some("Lapa".into()), Some("Mooca".into()), Some("Sé".into())]
            );
        }
    }

    #[test]
    fn replace_keeps_only_the_last_batch() {
        let a = batch(&["sub", "km"], &[&["Sé", "1"], &["Lapa", "2"]]);
        let b = batch(&["turno"], &[&["Noite"]]);
        for mut store in stores() {
            store.ingest(&a, IngestStrategy::Replace).unwrap();
            store.ingest(&b, IngestStrategy::Replace).unwrap();
            let table = store.read_all().unwrap();
            assert_eq!(table.columns, vec!["turno"]);
            assert_eq!(texts(&table, "turno"), vec![Some("Noite".into())]);
        }
    }

    #[test]
    fn append_widens_schema_with_padding() {
        let a = batch(&["sub", "km"], &[&["Sé", "1"]]);
        let b = batch(&["km", "turno"], &[&["5", "Dia"]]);
        for mut store in stores() {
            store.ingest(&a, IngestStrategy::Append).unwrap();
            let receipt = store.ingest(&b, IngestStrategy::Append).unwrap();
            assert_eq!(receipt.added_columns, vec!["turno".to_string()]);
            let table = store.read_all().unwrap();
            assert_eq!(table.columns, vec!["sub", "km", "turno"]);
            assert_eq!(texts(&table, "turno"), vec![None, Some("Dia".into())]);
            assert_eq!(texts(&table, "sub"), vec![Some("Sé".into()), None]);
        }
    }

    #[test]
    fn numbers_round_trip_as_numbers() {
        let mut t = RawTable::new(vec!["km".into()]);
        t.push_row(vec![CellValue::Number(12.5)]);
        for mut store in stores() {
            store.ingest(&t, IngestStrategy::Append).unwrap();
            assert_eq!(store.read_all().unwrap().rows[0][0], CellValue::Number(12.5));
        }
    }

    #[test]
    fn empty_replace_leaves_no_table() {
        let a = batch(&["sub"], &[&["Sé"]]);
        for mut store in stores() {
            store.ingest(&a, IngestStrategy::Append).unwrap();
            store.ingest(&RawTable::default(), IngestStrategy::Replace).unwrap();
            assert!(!store.exists().unwrap());
            assert!(store.read_all().unwrap().is_empty());
        }
    }

    #[test]
    fn failed_ingest_leaves_stored_rows_intact() {
        let mut store = SqliteStore::open_in_memory("relatorios").unwrap();
        let seed = batch(&["sub", "km"], &[&["Sé", "1"], &["Lapa", "2"]]);
        store.ingest(&seed, IngestStrategy::Append).unwrap();
        let before = store.read_all().unwrap();

        // The DROP runs, then CREATE TABLE rejects the repeated column.
        let broken = batch(&["km", "km"], &[&["9", "9"]]);
        assert!(matches!(
            store.ingest(&broken, IngestStrategy::Replace),
            Err(ReportError::Storage(_))
        ));
        assert_eq!(store.read_all().unwrap(), before);
        assert_eq!(store.version().unwrap(), 1);

        // The first ALTER succeeds, then the second one fails.
        let widening = batch(&["turno", "turno"], &[&["Dia", "Dia"]]);
        assert!(store.ingest(&widening, IngestStrategy::Append).is_err());
        assert_eq!(store.read_all().unwrap(), before);
        assert_eq!(store.version().unwrap(), 1);
    }

    #[test]
    fn stale_version_is_rejected() {
        let a = batch(&["sub"], &[&["Sé"]]);
        for mut store in stores() {
            let v0 = store.version().unwrap();
            store.ingest_guarded(&a, IngestStrategy::Append, v0).unwrap();
            let err = store
                .ingest_guarded(&a, IngestStrategy::Replace, v0)
                .unwrap_err();
            assert!(matches!(err, ReportError::VersionConflict { expected: 0, found: 1 }));
            assert_eq!(store.read_all().unwrap().rows.len(), 1);
        }
    }

    #[test]
    fn sqlite_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relatorios.db");
        {
            let mut store = SqliteStore::open(&path, "relatorios").unwrap();
            store
                .ingest(&batch(&["sub"], &[&["Sé"]]), IngestStrategy::Append)
                .unwrap();
        }
        let store = SqliteStore::open(&path, "relatorios").unwrap();
        assert_eq!(store.version().unwrap(), 1);
        assert_eq!(texts(&store.read_all().unwrap(), "sub"), vec![Some("Sé".into())]);
    }
}
