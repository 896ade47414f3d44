// 📋 Daily Record Aggregator - batch usage entries, save them as one record
//
// State machine for one user session:
//
//   Empty ──add_entry──▶ Accumulating ──confirm (ok)──▶ Empty
//                            │  ▲
//                            └──┘ confirm (storage error): entries kept
//
// Entries live only in memory until `confirm`. Each one snapshots the
// device's wattage and the rate at the moment it was added.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calculator::{compute, UsageEstimate};
use crate::db::Database;
use crate::entities::{
    Device, DeviceRegistry, NewRecordItem, Owner, RateProvider, Record, RecordItem, RecordStore,
};
use crate::error::{KilluaError, Result};
use crate::validation::validate_duration;

// ============================================================================
// USAGE ENTRY
// ============================================================================

/// One pending line: a device run for some minutes, already priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub device_id: i64,
    pub device_name: String,
    pub watt_per_hour: f64,
    pub duration_minutes: f64,
    pub kwh: f64,
    pub cost: f64,
    /// Rate the cost was computed with
    pub rate: f64,
}

impl UsageEntry {
    /// Price a run of `device` at `rate`.
    pub fn new(device: &Device, duration_minutes: f64, rate: f64) -> Self {
        let UsageEstimate { kwh, cost } = compute(device.watt_per_hour, duration_minutes, rate);
        UsageEntry {
            device_id: device.id,
            device_name: device.name.clone(),
            watt_per_hour: device.watt_per_hour,
            duration_minutes,
            kwh,
            cost,
            rate,
        }
    }

    fn to_new_item(&self) -> NewRecordItem {
        NewRecordItem {
            device_name: self.device_name.clone(),
            watt_per_hour: self.watt_per_hour,
            duration_minutes: self.duration_minutes,
            kwh_used: self.kwh,
            cost: self.cost,
        }
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No pending entries
    Empty,
    /// One or more entries waiting for `confirm`
    Accumulating,
}

/// A saved record together with its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRecord {
    pub record: Record,
    pub items: Vec<RecordItem>,
}

/// Pending usage entries for one owner.
#[derive(Debug, Clone)]
pub struct UsageSession {
    owner: Owner,
    default_rate: f64,
    entries: Vec<UsageEntry>,
}

impl UsageSession {
    /// `default_rate` is used when the rate history is empty.
    pub fn new(owner: Owner, default_rate: f64) -> Self {
        UsageSession {
            owner,
            default_rate,
            entries: Vec::new(),
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn state(&self) -> SessionState {
        if self.entries.is_empty() {
            SessionState::Empty
        } else {
            SessionState::Accumulating
        }
    }

    pub fn entries(&self) -> &[UsageEntry] {
        &self.entries
    }

    /// Running (kwh, cost) over the pending entries.
    pub fn totals(&self) -> UsageEstimate {
        UsageEstimate {
            kwh: self.entries.iter().map(|e| e.kwh).sum(),
            cost: self.entries.iter().map(|e| e.cost).sum(),
        }
    }

    /// Look up the device and current rate, price the run and queue it.
    ///
    /// Nothing is written to storage.
    pub fn add_entry(
        &mut self,
        db: &mut dyn Database,
        device_id: i64,
        hours: f64,
        minutes: f64,
    ) -> Result<&UsageEntry> {
        let duration = validate_duration(hours, minutes)?;
        let device = DeviceRegistry::new(&mut *db).find_device(device_id, self.owner)?;
        let rate = RateProvider::new(&mut *db, self.default_rate).current_rate()?;

        Ok(self.push(UsageEntry::new(&device, duration, rate)))
    }

    /// Queue an entry for a device and rate the caller already resolved.
    pub fn add_device_entry(
        &mut self,
        device: &Device,
        rate: f64,
        hours: f64,
        minutes: f64,
    ) -> Result<&UsageEntry> {
        let duration = validate_duration(hours, minutes)?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(KilluaError::validation("rate must be greater than 0"));
        }
        if !device.owner.is_shared() && device.owner != self.owner {
            return Err(KilluaError::NotFound {
                entity: "device",
                id: device.id,
            });
        }

        Ok(self.push(UsageEntry::new(device, duration, rate)))
    }

    fn push(&mut self, entry: UsageEntry) -> &UsageEntry {
        debug!(
            device = %entry.device_name,
            minutes = entry.duration_minutes,
            kwh = entry.kwh,
            cost = entry.cost,
            "entry queued"
        );
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Discard every pending entry. Destructive, so it must be confirmed.
    ///
    /// Returns how many entries were dropped.
    pub fn clear(&mut self, confirmed: bool) -> Result<usize> {
        if !confirmed {
            return Err(KilluaError::validation(
                "clearing pending entries needs confirmation",
            ));
        }
        let dropped = self.entries.len();
        self.entries.clear();
        debug!(dropped, "pending entries cleared");
        Ok(dropped)
    }

    /// Save all pending entries as one record, stamped with local time.
    pub fn confirm(&mut self, db: &mut dyn Database) -> Result<SavedRecord> {
        self.confirm_at(db, Local::now().naive_local())
    }

    /// Save all pending entries as one record dated `at`.
    ///
    /// Empty session: validation error, no writes. Storage error: rolled
    /// back and the entries stay queued so the caller can retry.
    pub fn confirm_at(&mut self, db: &mut dyn Database, at: NaiveDateTime) -> Result<SavedRecord> {
        if self.entries.is_empty() {
            return Err(KilluaError::validation("nothing to save"));
        }

        let items: Vec<NewRecordItem> = self.entries.iter().map(UsageEntry::to_new_item).collect();

        match RecordStore::new(db).create_record(at, self.owner, &items) {
            Ok((record, items)) => {
                self.entries.clear();
                Ok(SavedRecord { record, items })
            }
            Err(err) => {
                warn!(error = %err, pending = self.entries.len(), "record not saved, entries kept");
                Err(err)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
