// 🔌 Device Entity - named appliance with a wattage rating
//
// Devices are looked up by the usage calculator for their wattage. Records
// never reference a device by id: items copy the name and wattage at save
// time, so editing or deleting a device leaves history untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Owner;
use crate::db::{Database, Row};
use crate::error::{KilluaError, Result};

// ============================================================================
// DEVICE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,

    /// Display name, trimmed, unique per owner
    pub name: String,

    /// Rated power draw in watts
    pub watt_per_hour: f64,

    pub owner: Owner,
}

impl Device {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Device {
            id: row.get_i64(0)?,
            name: row.get_string(1)?,
            watt_per_hour: row.get_f64(2)?,
            owner: Owner::from_user_id(row.get_opt_i64(3)?),
        })
    }
}

/// Trim and check a device name.
fn clean_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(KilluaError::validation("device name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn check_wattage(watt_per_hour: f64) -> Result<()> {
    if !watt_per_hour.is_finite() || watt_per_hour <= 0.0 {
        return Err(KilluaError::validation(format!(
            "watt per hour must be a number greater than 0, got {}",
            watt_per_hour
        )));
    }
    Ok(())
}

// ============================================================================
// DEVICE REGISTRY
// ============================================================================

const DEVICE_COLUMNS: &str = "id, name, watt_per_hour, user_id";

/// CRUD over the `devices` table, on an injected storage handle.
pub struct DeviceRegistry<'a> {
    db: &'a mut dyn Database,
}

impl<'a> DeviceRegistry<'a> {
    pub fn new(db: &'a mut dyn Database) -> Self {
        DeviceRegistry { db }
    }

    /// Register a new device.
    ///
    /// Rejects an empty name, a non-positive wattage, or a name the owner
    /// already uses.
    pub fn add_device(&mut self, name: &str, watt_per_hour: f64, owner: Owner) -> Result<Device> {
        let name = clean_name(name)?;
        check_wattage(watt_per_hour)?;
        self.ensure_name_free(&name, owner, None)?;

        self.db.execute(
            "INSERT INTO devices (name, watt_per_hour, user_id) VALUES (?1, ?2, ?3)",
            sql_params![name.as_str(), watt_per_hour, owner],
        )?;
        let id = self.db.last_insert_id();
        info!(id, name = %name, watt_per_hour, owner = %owner, "device added");

        Ok(Device {
            id,
            name,
            watt_per_hour,
            owner,
        })
    }

    /// Devices owned by `owner` plus shared ones, by name.
    pub fn list_devices(&mut self, owner: Owner) -> Result<Vec<Device>> {
        let rows = self.db.fetch_all(
            &format!(
                "SELECT {} FROM devices
                 WHERE user_id IS ?1 OR user_id IS NULL
                 ORDER BY name ASC, id ASC",
                DEVICE_COLUMNS
            ),
            sql_params![owner],
        )?;

        rows.iter().map(Device::from_row).collect()
    }

    /// Device by id, regardless of owner.
    pub fn get_device(&mut self, id: i64) -> Result<Option<Device>> {
        let row = self.db.fetch_one(
            &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
            sql_params![id],
        )?;
        row.as_ref().map(Device::from_row).transpose()
    }

    /// Device by id, if visible to `owner` (owned by them or shared).
    pub fn find_device(&mut self, id: i64, owner: Owner) -> Result<Device> {
        let device = self
            .get_device(id)?
            .ok_or(KilluaError::NotFound { entity: "device", id })?;

        if device.owner.is_shared() || device.owner == owner {
            Ok(device)
        } else {
            Err(KilluaError::NotFound { entity: "device", id })
        }
    }

    /// Device by name as seen by `owner`. The owner's own device wins over a
    /// shared one with the same name.
    pub fn find_device_by_name(&mut self, name: &str, owner: Owner) -> Result<Option<Device>> {
        let row = self.db.fetch_one(
            &format!(
                "SELECT {} FROM devices
                 WHERE name = ?1 AND (user_id IS ?2 OR user_id IS NULL)
                 ORDER BY user_id IS NULL ASC, id ASC
                 LIMIT 1",
                DEVICE_COLUMNS
            ),
            sql_params![name.trim(), owner],
        )?;
        row.as_ref().map(Device::from_row).transpose()
    }

    /// Rename / re-rate a device. Caller must own it or it must be shared.
    pub fn update_device(
        &mut self,
        id: i64,
        name: &str,
        watt_per_hour: f64,
        caller: Owner,
    ) -> Result<Device> {
        let name = clean_name(name)?;
        check_wattage(watt_per_hour)?;

        let existing = self.authorize(id, caller)?;
        self.ensure_name_free(&name, existing.owner, Some(id))?;

        self.db.execute(
            "UPDATE devices SET name = ?1, watt_per_hour = ?2 WHERE id = ?3",
            sql_params![name.as_str(), watt_per_hour, id],
        )?;
        info!(id, name = %name, watt_per_hour, "device updated");

        Ok(Device {
            name,
            watt_per_hour,
            ..existing
        })
    }

    /// Change only the given fields; the rest keep their current values.
    ///
    /// Same checks as `update_device`: a device the caller may not edit is
    /// `Unauthorized`, not hidden behind `NotFound`.
    pub fn patch_device(
        &mut self,
        id: i64,
        name: Option<&str>,
        watt_per_hour: Option<f64>,
        caller: Owner,
    ) -> Result<Device> {
        if name.is_none() && watt_per_hour.is_none() {
            return Err(KilluaError::validation("nothing to update"));
        }
        let current = self.authorize(id, caller)?;
        self.update_device(
            id,
            name.unwrap_or(current.name.as_str()),
            watt_per_hour.unwrap_or(current.watt_per_hour),
            caller,
        )
    }

    /// Remove a device. Saved records keep their copies of its name/wattage.
    pub fn delete_device(&mut self, id: i64, caller: Owner) -> Result<Device> {
        let existing = self.authorize(id, caller)?;

        self.db
            .execute("DELETE FROM devices WHERE id = ?1", sql_params![id])?;
        info!(id, name = %existing.name, "device deleted");

        Ok(existing)
    }

    fn authorize(&mut self, id: i64, caller: Owner) -> Result<Device> {
        let device = self
            .get_device(id)?
            .ok_or(KilluaError::NotFound { entity: "device", id })?;

        if !device.owner.permits(caller) {
            debug!(id, owner = %device.owner, caller = %caller, "device change refused");
            return Err(KilluaError::Unauthorized {
                device_id: id,
                device_owner: device.owner,
                caller,
            });
        }

        Ok(device)
    }

    fn ensure_name_free(&mut self, name: &str, owner: Owner, except_id: Option<i64>) -> Result<()> {
        let clash = self.db.fetch_one(
            "SELECT id FROM devices WHERE name = ?1 AND user_id IS ?2 AND id <> ?3",
            // ids start at 1, so 0 excludes nothing
            sql_params![name, owner, except_id.unwrap_or(0)],
        )?;

        if clash.is_some() {
            return Err(KilluaError::validation(format!(
                "a device named '{}' already exists for {}",
                name, owner
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
