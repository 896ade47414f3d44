// ⚡ Rate Entity - price per kWh, append-only history
//
// The current rate is the newest history row. Old rows are never updated,
// which is what lets saved records keep the rate they were priced at.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{in_transaction, truncate_to_seconds, Database, Row};
use crate::error::{KilluaError, Result};

/// Rate used when no history exists (PHP per kWh).
pub const DEFAULT_RATE: f64 = 12.64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub id: i64,
    pub rate: f64,
    pub created_at: NaiveDateTime,
}

impl RateEntry {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(RateEntry {
            id: row.get_i64(0)?,
            rate: row.get_f64(1)?,
            created_at: row.get_timestamp(2)?,
        })
    }
}

/// Reads and appends to `meralco_rates`.
pub struct RateProvider<'a> {
    db: &'a mut dyn Database,
    default_rate: f64,
}

impl<'a> RateProvider<'a> {
    pub fn new(db: &'a mut dyn Database, default_rate: f64) -> Self {
        RateProvider { db, default_rate }
    }

    pub fn default_rate(&self) -> f64 {
        self.default_rate
    }

    /// Newest history row, if any.
    pub fn current_entry(&mut self) -> Result<Option<RateEntry>> {
        let row = self.db.fetch_one(
            "SELECT id, rate, created_at FROM meralco_rates
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            sql_params![],
        )?;
        row.as_ref().map(RateEntry::from_row).transpose()
    }

    /// Newest stored rate, or the configured default when history is empty.
    /// The default is not written back.
    pub fn current_rate(&mut self) -> Result<f64> {
        Ok(self
            .current_entry()?
            .map_or(self.default_rate, |entry| entry.rate))
    }

    /// Append a rate stamped with the local time.
    pub fn add_rate(&mut self, new_rate: f64) -> Result<RateEntry> {
        self.add_rate_at(new_rate, Local::now().naive_local())
    }

    /// Append a rate with an explicit timestamp.
    ///
    /// Validation failures write nothing. Storage failures are rolled back
    /// and returned.
    pub fn add_rate_at(&mut self, new_rate: f64, at: NaiveDateTime) -> Result<RateEntry> {
        if !new_rate.is_finite() || new_rate <= 0.0 {
            return Err(KilluaError::validation(format!(
                "rate must be a number greater than 0, got {}",
                new_rate
            )));
        }

        let id = in_transaction(&mut *self.db, |tx| {
            tx.execute(
                "INSERT INTO meralco_rates (rate, created_at) VALUES (?1, ?2)",
                sql_params![new_rate, at],
            )?;
            Ok(tx.last_insert_id())
        })?;

        info!(id, rate = new_rate, "rate added");

        Ok(RateEntry {
            id,
            rate: new_rate,
            created_at: truncate_to_seconds(at),
        })
    }

    /// Latest `limit` rates, oldest first (chart order).
    ///
    /// Fails soft: a storage error is logged and yields an empty history.
    pub fn rate_history(&mut self, limit: usize) -> Vec<RateEntry> {
        self.try_rate_history(limit).unwrap_or_else(|err| {
            warn!(error = %err, "could not read rate history");
            Vec::new()
        })
    }

    pub fn try_rate_history(&mut self, limit: usize) -> Result<Vec<RateEntry>> {
        let rows = self.db.fetch_all(
            "SELECT id, rate, created_at FROM (
                SELECT id, rate, created_at FROM meralco_rates
                ORDER BY created_at DESC, id DESC
                LIMIT ?1
             ) AS recent
             ORDER BY created_at ASC, id ASC",
            sql_params![limit],
        )?;

        rows.iter().map(RateEntry::from_row).collect()
    }
}
