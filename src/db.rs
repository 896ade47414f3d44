// 🗄️ Storage - the one seam every component talks through
//
// Components never hold a connection of their own. They receive a
// `&mut dyn Database` per call, so the handle is opened once in `main`
// and closed when it is dropped.

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{KilluaError, Result};

/// Timestamp layout for every TEXT date column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Drop sub-second precision, matching what a TEXT column keeps.
pub fn truncate_to_seconds(at: NaiveDateTime) -> NaiveDateTime {
    at.with_nanosecond(0).unwrap_or(at)
}

// ============================================================================
// VALUES & ROWS
// ============================================================================

/// A single bound parameter or fetched column.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Text(v.format(TIMESTAMP_FORMAT).to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<Value> for SqlValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Blob(b),
        }
    }
}

/// Build a `&[SqlValue]` parameter slice, like `rusqlite::params!`.
#[macro_export]
macro_rules! sql_params {
    () => {
        &[] as &[$crate::db::SqlValue]
    };
    ($($param:expr),+ $(,)?) => {
        &[$($crate::db::SqlValue::from($param)),+] as &[$crate::db::SqlValue]
    };
}

/// One fetched row. Getters fail with `KilluaError::Decode` on type mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<SqlValue>);

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Row(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn value(&self, idx: usize) -> Result<&SqlValue> {
        self.0
            .get(idx)
            .ok_or_else(|| KilluaError::Decode(format!("column {} out of range", idx)))
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64> {
        match self.value(idx)? {
            SqlValue::Integer(i) => Ok(*i),
            other => Err(KilluaError::Decode(format!(
                "column {}: expected integer, got {:?}",
                idx, other
            ))),
        }
    }

    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            _ => self.get_i64(idx).map(Some),
        }
    }

    /// Reals are accepted as integers too (SUM over an INTEGER-typed column,
    /// or a whole-number REAL stored with integer affinity).
    pub fn get_f64(&self, idx: usize) -> Result<f64> {
        match self.value(idx)? {
            SqlValue::Real(f) => Ok(*f),
            SqlValue::Integer(i) => Ok(*i as f64),
            other => Err(KilluaError::Decode(format!(
                "column {}: expected number, got {:?}",
                idx, other
            ))),
        }
    }

    /// NULL reads as zero. Aggregates over zero rows come back NULL.
    pub fn get_f64_or_zero(&self, idx: usize) -> Result<f64> {
        match self.value(idx)? {
            SqlValue::Null => Ok(0.0),
            _ => self.get_f64(idx),
        }
    }

    pub fn get_string(&self, idx: usize) -> Result<String> {
        match self.value(idx)? {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(KilluaError::Decode(format!(
                "column {}: expected text, got {:?}",
                idx, other
            ))),
        }
    }

    pub fn get_timestamp(&self, idx: usize) -> Result<NaiveDateTime> {
        let raw = self.get_string(idx)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map_err(|e| KilluaError::Decode(format!("column {}: bad timestamp {:?}: {}", idx, raw, e)))
    }
}

// ============================================================================
// DATABASE TRAIT
// ============================================================================

/// Which concrete storage sits behind a `Database`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// File-backed SQLite database.
    #[default]
    Sqlite,
    /// Throwaway in-memory SQLite database.
    Memory,
    /// MySQL server (needs the `mysql` cargo feature).
    Mysql,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Memory => "memory",
            Backend::Mysql => "mysql",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = KilluaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" | ":memory:" => Ok(Backend::Memory),
            "mysql" => Ok(Backend::Mysql),
            other => Err(KilluaError::Config(format!("unknown database backend: {}", other))),
        }
    }
}

/// Storage collaborator contract.
///
/// Statements are written in SQLite syntax with numbered `?N` placeholders;
/// other backends translate them (see `mysql_db`). Writes are not visible to
/// other handles until `commit` when issued after `begin`; outside an explicit
/// transaction every statement commits on its own.
pub trait Database {
    /// Run a statement, returning the number of rows changed.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// First row of a query, if any.
    fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>>;

    /// All rows of a query.
    fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Generated id of the most recent successful INSERT on this handle.
    fn last_insert_id(&self) -> i64;

    fn backend(&self) -> Backend;
}

/// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
///
/// A failed commit is rolled back too. The error from `f` (or from commit)
/// is returned unchanged; a rollback failure is only logged.
pub fn in_transaction<T, F>(db: &mut dyn Database, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn Database) -> Result<T>,
{
    db.begin()?;

    let outcome = f(&mut *db).and_then(|value| db.commit().map(|()| value));

    if let Err(err) = &outcome {
        warn!(error = %err, "rolling back transaction");
        if let Err(rollback_err) = db.rollback() {
            warn!(error = %rollback_err, "rollback failed");
        }
    }

    outcome
}

// ============================================================================
// SQLITE
// ============================================================================

/// SQLite implementation of [`Database`].
pub struct SqliteDatabase {
    conn: Connection,
    backend: Backend,
    path: Option<PathBuf>,
}

impl SqliteDatabase {
    /// Open (or create) a database file. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!(path = %path.display(), "opened sqlite database");

        Ok(SqliteDatabase {
            conn,
            backend: Backend::Sqlite,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(SqliteDatabase {
            conn: Connection::open_in_memory()?,
            backend: Backend::Memory,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw connection, for maintenance and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Database for SqliteDatabase {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut values = Vec::with_capacity(column_count);
                for idx in 0..column_count {
                    let value: Value = row.get(idx)?;
                    values.push(SqlValue::from(value));
                }
                Ok(Row::new(values))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn backend(&self) -> Backend {
        self.backend
    }
}

/// Open the storage selected by configuration.
pub fn open_database(config: &DatabaseConfig) -> Result<Box<dyn Database>> {
    let db: Box<dyn Database> = match config.backend {
        Backend::Sqlite => Box::new(SqliteDatabase::open(&config.sqlite_path())?),
        Backend::Memory => Box::new(SqliteDatabase::open_in_memory()?),
        Backend::Mysql => open_mysql(config)?,
    };
    info!(backend = config.backend.as_str(), location = %config.location(), "database opened");
    Ok(db)
}

#[cfg(feature = "mysql")]
fn open_mysql(config: &DatabaseConfig) -> Result<Box<dyn Database>> {
    Ok(Box::new(crate::mysql_db::MysqlDatabase::connect(config)?))
}

#[cfg(not(feature = "mysql"))]
fn open_mysql(_config: &DatabaseConfig) -> Result<Box<dyn Database>> {
    Err(KilluaError::Config(
        "mysql backend selected, but this build was compiled without the `mysql` feature"
            .to_string(),
    ))
}

// ============================================================================
// SCHEMA
// ============================================================================

// Each statement is run on its own. MySQL has no `CREATE INDEX IF NOT
// EXISTS`, so its indexes are declared inline.
const SQLITE_SCHEMA: &[&str] = &[
    // Devices (user_id NULL = shared)
    "CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        watt_per_hour REAL NOT NULL,
        user_id INTEGER NULL
    )",
    // Records + items (items cascade manually, no FK)
    "CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        total_kwh REAL,
        total_cost REAL,
        user_id INTEGER NULL
    )",
    "CREATE TABLE IF NOT EXISTS record_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        record_id INTEGER,
        device_name TEXT,
        watt_per_hour REAL,
        duration_minutes REAL,
        kwh_used REAL,
        cost REAL
    )",
    // Rate history (append-only)
    "CREATE TABLE IF NOT EXISTS meralco_rates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rate REAL NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_records_user_date ON records(user_id, date)",
    "CREATE INDEX IF NOT EXISTS idx_record_items_record ON record_items(record_id)",
    "CREATE INDEX IF NOT EXISTS idx_rates_created ON meralco_rates(created_at)",
];

// Dates stay fixed-width text so ordering and month prefixes behave the
// same on both backends. Names compare case-sensitively (utf8mb4_bin).
const MYSQL_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        name VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL,
        watt_per_hour DOUBLE NOT NULL,
        user_id BIGINT NULL,
        INDEX idx_devices_user (user_id)
    )",
    "CREATE TABLE IF NOT EXISTS records (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        date VARCHAR(19) NOT NULL,
        total_kwh DOUBLE,
        total_cost DOUBLE,
        user_id BIGINT NULL,
        INDEX idx_records_user_date (user_id, date)
    )",
    "CREATE TABLE IF NOT EXISTS record_items (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        record_id BIGINT,
        device_name VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin,
        watt_per_hour DOUBLE,
        duration_minutes DOUBLE,
        kwh_used DOUBLE,
        cost DOUBLE,
        INDEX idx_record_items_record (record_id)
    )",
    "CREATE TABLE IF NOT EXISTS meralco_rates (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        rate DOUBLE NOT NULL,
        created_at VARCHAR(19) NOT NULL,
        INDEX idx_rates_created (created_at)
    )",
];

/// DDL for `backend`.
pub fn schema_statements(backend: Backend) -> &'static [&'static str] {
    match backend {
        Backend::Sqlite | Backend::Memory => SQLITE_SCHEMA,
        Backend::Mysql => MYSQL_SCHEMA,
    }
}

/// Create tables and indexes if missing, and seed the default rate.
///
/// Safe to call on every start. The default rate is only inserted when the
/// rate history is empty and `seed_default_rate` is set.
pub fn setup_database(db: &mut dyn Database, default_rate: f64, seed_default_rate: bool) -> Result<()> {
    for statement in schema_statements(db.backend()) {
        db.execute(statement, sql_params![])?;
    }

    if seed_default_rate {
        let existing = db.fetch_one("SELECT COUNT(*) FROM meralco_rates", sql_params![])?;
        let count = match existing {
            Some(row) => row.get_i64(0)?,
            None => 0,
        };
        if count == 0 {
            let now = chrono::Local::now().naive_local();
            db.execute(
                "INSERT INTO meralco_rates (rate, created_at) VALUES (?1, ?2)",
                sql_params![default_rate, now],
            )?;
            info!(rate = default_rate, "seeded default rate");
        }
    }

    Ok(())
}
