// Killua-T Electricity Tracker - Core Library
// Exposes all modules for use in the CLI and tests

#[macro_use]
pub mod db;             // Storage trait, SQLite backend, schema (declared first for sql_params!)
pub mod mysql_db;       // MySQL backend (driver behind the `mysql` feature)
pub mod error;
pub mod entities;       // Owner, devices, rates, records
pub mod calculator;     // kWh / cost arithmetic
pub mod validation;     // Input parsing for the CLI
pub mod aggregator;     // Pending usage session -> saved record
pub mod reporting;      // Totals, top devices, monthly cost
pub mod export;         // CSV export of saved records
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use db::{
    Backend, Database, Row, SqlValue, SqliteDatabase,
    open_database, setup_database, in_transaction,
};
pub use error::{ErrorKind, KilluaError, Result};
pub use entities::{
    Owner,
    Device, DeviceRegistry,
    RateEntry, RateProvider, DEFAULT_RATE,
    NewRecordItem, Record, RecordItem, RecordStore,
};
pub use calculator::{compute, duration_minutes, round_to_cents, UsageEstimate};
pub use aggregator::{SavedRecord, SessionState, UsageEntry, UsageSession};
pub use reporting::{DeviceUsage, UsageSummary};
pub use export::export_records_csv;
pub use config::{Config, DatabaseConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
