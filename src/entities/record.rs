// 🧾 Record Entity - one saved usage session (parent) and its line items
//
// A record and its items are written and deleted together under one commit
// boundary. The schema has no foreign key, so the cascade lives here.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Owner;
use crate::db::{in_transaction, truncate_to_seconds, Database, Row};
use crate::error::{KilluaError, Result};

// ============================================================================
// RECORD + ITEMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,

    /// Local time the session was saved
    pub date: NaiveDateTime,

    /// Sum of `kwh_used` over the items
    pub total_kwh: f64,

    /// Sum of `cost` over the items
    pub total_cost: f64,

    pub owner: Owner,
}

impl Record {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Record {
            id: row.get_i64(0)?,
            date: row.get_timestamp(1)?,
            total_kwh: row.get_f64_or_zero(2)?,
            total_cost: row.get_f64_or_zero(3)?,
            owner: Owner::from_user_id(row.get_opt_i64(4)?),
        })
    }
}

/// A line item. Device name and wattage are copies taken at save time,
/// not references to the live device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordItem {
    pub id: i64,
    pub record_id: i64,
    pub device_name: String,
    pub watt_per_hour: f64,
    pub duration_minutes: f64,
    pub kwh_used: f64,
    pub cost: f64,
}

impl RecordItem {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(RecordItem {
            id: row.get_i64(0)?,
            record_id: row.get_i64(1)?,
            device_name: row.get_string(2)?,
            watt_per_hour: row.get_f64_or_zero(3)?,
            duration_minutes: row.get_f64_or_zero(4)?,
            kwh_used: row.get_f64_or_zero(5)?,
            cost: row.get_f64_or_zero(6)?,
        })
    }
}

/// Item values before they have ids.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecordItem {
    pub device_name: String,
    pub watt_per_hour: f64,
    pub duration_minutes: f64,
    pub kwh_used: f64,
    pub cost: f64,
}

// ============================================================================
// RECORD STORE
// ============================================================================

const RECORD_COLUMNS: &str = "id, date, total_kwh, total_cost, user_id";
const ITEM_COLUMNS: &str =
    "id, record_id, device_name, watt_per_hour, duration_minutes, kwh_used, cost";

pub struct RecordStore<'a> {
    db: &'a mut dyn Database,
}

impl<'a> RecordStore<'a> {
    pub fn new(db: &'a mut dyn Database) -> Self {
        RecordStore { db }
    }

    /// Insert one record and all its items in a single transaction.
    ///
    /// Totals are summed from `items`. On any failure nothing is left behind.
    pub fn create_record(
        &mut self,
        date: NaiveDateTime,
        owner: Owner,
        items: &[NewRecordItem],
    ) -> Result<(Record, Vec<RecordItem>)> {
        if items.is_empty() {
            return Err(KilluaError::validation("a record needs at least one item"));
        }

        let total_kwh: f64 = items.iter().map(|i| i.kwh_used).sum();
        let total_cost: f64 = items.iter().map(|i| i.cost).sum();

        let (record_id, item_ids) = in_transaction(&mut *self.db, |tx| {
            tx.execute(
                "INSERT INTO records (date, total_kwh, total_cost, user_id)
                 VALUES (?1, ?2, ?3, ?4)",
                sql_params![date, total_kwh, total_cost, owner],
            )?;
            let record_id = tx.last_insert_id();

            let mut item_ids = Vec::with_capacity(items.len());
            for item in items {
                tx.execute(
                    "INSERT INTO record_items
                        (record_id, device_name, watt_per_hour, duration_minutes, kwh_used, cost)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    sql_params![
                        record_id,
                        item.device_name.as_str(),
                        item.watt_per_hour,
                        item.duration_minutes,
                        item.kwh_used,
                        item.cost,
                    ],
                )?;
                item_ids.push(tx.last_insert_id());
            }

            Ok((record_id, item_ids))
        })?;

        info!(
            record_id,
            items = items.len(),
            total_kwh,
            total_cost,
            owner = %owner,
            "record saved"
        );

        let record = Record {
            id: record_id,
            date: truncate_to_seconds(date),
            total_kwh,
            total_cost,
            owner,
        };
        let saved_items = items
            .iter()
            .zip(item_ids)
            .map(|(item, id)| RecordItem {
                id,
                record_id,
                device_name: item.device_name.clone(),
                watt_per_hour: item.watt_per_hour,
                duration_minutes: item.duration_minutes,
                kwh_used: item.kwh_used,
                cost: item.cost,
            })
            .collect();

        Ok((record, saved_items))
    }

    /// Records for `owner`, newest first.
    pub fn list_records(&mut self, owner: Owner) -> Result<Vec<Record>> {
        let rows = self.db.fetch_all(
            &format!(
                "SELECT {} FROM records WHERE user_id IS ?1 ORDER BY date DESC, id DESC",
                RECORD_COLUMNS
            ),
            sql_params![owner],
        )?;
        rows.iter().map(Record::from_row).collect()
    }

    pub fn find_record(&mut self, id: i64) -> Result<Option<Record>> {
        let row = self.db.fetch_one(
            &format!("SELECT {} FROM records WHERE id = ?1", RECORD_COLUMNS),
            sql_params![id],
        )?;
        row.as_ref().map(Record::from_row).transpose()
    }

    /// Record by id, if it belongs to `owner`. Anyone else's reads as
    /// `NotFound`.
    pub fn find_owned_record(&mut self, id: i64, owner: Owner) -> Result<Record> {
        self.find_record(id)?
            .filter(|record| record.owner == owner)
            .ok_or(KilluaError::NotFound { entity: "record", id })
    }

    /// `delete_record`, refused with `NotFound` unless `owner` owns it.
    pub fn delete_owned_record(&mut self, id: i64, owner: Owner) -> Result<usize> {
        self.find_owned_record(id, owner)?;
        self.delete_record(id)
    }

    /// Items of one record in the order they were added.
    pub fn record_items(&mut self, record_id: i64) -> Result<Vec<RecordItem>> {
        let rows = self.db.fetch_all(
            &format!(
                "SELECT {} FROM record_items WHERE record_id = ?1 ORDER BY id ASC",
                ITEM_COLUMNS
            ),
            sql_params![record_id],
        )?;
        rows.iter().map(RecordItem::from_row).collect()
    }

    /// Delete a record's items and then the record, all-or-nothing.
    ///
    /// Returns the number of items removed. Unknown id is `NotFound` and
    /// rolls back.
    pub fn delete_record(&mut self, id: i64) -> Result<usize> {
        let removed_items = in_transaction(&mut *self.db, |tx| {
            let removed_items =
                tx.execute("DELETE FROM record_items WHERE record_id = ?1", sql_params![id])?;
            let removed = tx.execute("DELETE FROM records WHERE id = ?1", sql_params![id])?;
            if removed == 0 {
                return Err(KilluaError::NotFound { entity: "record", id });
            }
            Ok(removed_items)
        })?;

        info!(id, removed_items, "record deleted");
        Ok(removed_items)
    }

    /// Delete every record of `owner` (or of everyone when `None`) with
    /// their items. Returns the number of records removed.
    pub fn clear_records(&mut self, owner: Option<Owner>) -> Result<usize> {
        let removed = in_transaction(&mut *self.db, |tx| match owner {
            Some(owner) => {
                tx.execute(
                    "DELETE FROM record_items
                     WHERE record_id IN (SELECT id FROM records WHERE user_id IS ?1)",
                    sql_params![owner],
                )?;
                tx.execute("DELETE FROM records WHERE user_id IS ?1", sql_params![owner])
            }
            None => {
                tx.execute("DELETE FROM record_items", sql_params![])?;
                tx.execute("DELETE FROM records", sql_params![])
            }
        })?;

        debug!(?owner, removed, "records cleared");
        Ok(removed)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, SqliteDatabase, TIMESTAMP_FORMAT};
    use crate::error::ErrorKind;

    fn test_db() -> SqliteDatabase {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        setup_database(&mut db, 12.64, false).unwrap();
        db
    }

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).unwrap()
    }

    fn item(name: &str, kwh: f64, cost: f64) -> NewRecordItem {
        NewRecordItem {
            device_name: name.to_string(),
            watt_per_hour: 100.0,
            duration_minutes: 60.0,
            kwh_used: kwh,
            cost,
        }
    }

    fn count(db: &mut SqliteDatabase, table: &str) -> i64 {
        db.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_create_record_with_items() {
        let mut db = test_db();
        let mut store = RecordStore::new(&mut db);

        let (record, items) = store
            .create_record(
                ts("2025-05-01 20:00:00"),
                Owner::User(1),
                &[item("Fan", 0.25, 3.16), item("Aircon", 1.0, 12.64)],
            )
            .unwrap();

        assert!((record.total_kwh - 1.25).abs() < 1e-9);
        assert!((record.total_cost - 15.80).abs() < 1e-9);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.record_id == record.id));

        let stored = store.find_record(record.id).unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(store.record_items(record.id).unwrap(), items);
    }

    #[test]
    fn test_create_record_rejects_empty() {
        let mut db = test_db();
        let err = RecordStore::new(&mut db)
            .create_record(ts("2025-05-01 20:00:00"), Owner::Shared, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(count(&mut db, "records"), 0);
    }

    #[test]
    fn test_create_record_rolls_back_on_item_failure() {
        let mut db = test_db();
        db.connection().execute("DROP TABLE record_items", []).unwrap();

        let result = RecordStore::new(&mut db).create_record(
            ts("2025-05-01 20:00:00"),
            Owner::User(1),
            &[item("Fan", 0.25, 3.16)],
        );

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Storage);
        // Parent row was rolled back with the failed item insert
        assert_eq!(count(&mut db, "records"), 0);
    }

    #[test]
    fn test_list_records_newest_first_per_owner() {
        let mut db = test_db();
        let mut store = RecordStore::new(&mut db);

        let (older, _) = store
            .create_record(ts("2025-05-01 08:00:00"), Owner::User(1), &[item("Fan", 0.1, 1.0)])
            .unwrap();
        let (newer, _) = store
            .create_record(ts("2025-05-02 08:00:00"), Owner::User(1), &[item("Fan", 0.2, 2.0)])
            .unwrap();
        store
            .create_record(ts("2025-05-03 08:00:00"), Owner::User(2), &[item("TV", 0.3, 3.0)])
            .unwrap();
        store
            .create_record(ts("2025-05-03 09:00:00"), Owner::Shared, &[item("TV", 0.3, 3.0)])
            .unwrap();

        let ids: Vec<i64> = store
            .list_records(Owner::User(1))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        assert_eq!(store.list_records(Owner::Shared).unwrap().len(), 1);
        assert!(store.list_records(Owner::User(3)).unwrap().is_empty());
    }

    #[test]
    fn test_delete_record_removes_items() {
        let mut db = test_db();

        let (keep, _) = RecordStore::new(&mut db)
            .create_record(ts("2025-05-01 08:00:00"), Owner::User(1), &[item("Fan", 0.1, 1.0)])
            .unwrap();
        let (gone, _) = RecordStore::new(&mut db)
            .create_record(
                ts("2025-05-02 08:00:00"),
                Owner::User(1),
                &[item("Fan", 0.1, 1.0), item("TV", 0.2, 2.0)],
            )
            .unwrap();

        let removed_items = RecordStore::new(&mut db).delete_record(gone.id).unwrap();
        assert_eq!(removed_items, 2);

        let mut store = RecordStore::new(&mut db);
        assert!(store.find_record(gone.id).unwrap().is_none());
        assert!(store.record_items(gone.id).unwrap().is_empty());
        assert_eq!(store.record_items(keep.id).unwrap().len(), 1);
        assert_eq!(count(&mut db, "record_items"), 1);
    }

    #[test]
    fn test_delete_record_failure_keeps_items() {
        let mut db = test_db();

        let (record, _) = RecordStore::new(&mut db)
            .create_record(ts("2025-05-01 08:00:00"), Owner::User(1), &[item("Fan", 0.1, 1.0)])
            .unwrap();

        // Record delete will fail after item delete succeeded
        db.connection()
            .execute_batch(
                "CREATE TRIGGER block_record_delete BEFORE DELETE ON records
                 BEGIN SELECT RAISE(ABORT, 'locked'); END;",
            )
            .unwrap();

        let err = RecordStore::new(&mut db).delete_record(record.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        // Both rows survive
        assert_eq!(count(&mut db, "records"), 1);
        assert_eq!(count(&mut db, "record_items"), 1);
    }

    #[test]
    fn test_delete_missing_record() {
        let mut db = test_db();
        let err = RecordStore::new(&mut db).delete_record(77).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_clear_records_by_owner() {
        let mut db = test_db();
        let mut store = RecordStore::new(&mut db);

        for owner in [Owner::User(1), Owner::User(1), Owner::User(2)] {
            store
                .create_record(ts("2025-05-01 08:00:00"), owner, &[item("Fan", 0.1, 1.0)])
                .unwrap();
        }

        assert_eq!(store.clear_records(Some(Owner::User(1))).unwrap(), 2);
        assert!(store.list_records(Owner::User(1)).unwrap().is_empty());
        assert_eq!(store.list_records(Owner::User(2)).unwrap().len(), 1);

        assert_eq!(store.clear_records(None).unwrap(), 1);
        assert_eq!(count(&mut db, "record_items"), 0);
    }

    #[test]
    fn test_owned_record_access() {
        let mut db = test_db();
        let mut store = RecordStore::new(&mut db);
        let (record, _) = store
            .create_record(ts("2025-05-01 20:00:00"), Owner::User(1), &[item("Fan", 0.25, 3.16)])
            .unwrap();

        assert_eq!(store.find_owned_record(record.id, Owner::User(1)).unwrap(), record);

        // Another user and the shared owner both see NotFound
        for stranger in [Owner::User(2), Owner::Shared] {
            let err = store.find_owned_record(record.id, stranger).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
            let err = store.delete_owned_record(record.id, stranger).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        assert_eq!(count(&mut db, "records"), 1);
        assert_eq!(count(&mut db, "record_items"), 1);

        let mut store = RecordStore::new(&mut db);
        assert_eq!(store.delete_owned_record(record.id, Owner::User(1)).unwrap(), 1);
        assert_eq!(count(&mut db, "records"), 0);
    }
}
