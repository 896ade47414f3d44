// 📊 Reporting - read-only aggregates over saved records
//
// Reporting is best effort. The plain functions never fail: a storage error
// is logged and reads as zero / empty. The `try_*` variants return the error
// for callers that want to tell "no data" from "could not read".

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::Database;
use crate::entities::Owner;
use crate::error::Result;

/// Usage of one device name across an owner's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub device_name: String,
    pub total_minutes: f64,
    pub total_kwh: f64,
    pub total_cost: f64,
}

/// Everything the profile/stats view shows, in one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub owner: Owner,
    pub record_count: i64,
    pub total_kwh: f64,
    pub total_cost: f64,
    pub month: String,
    pub month_cost: f64,
    pub top_devices: Vec<DeviceUsage>,
}

fn fail_soft<T>(what: &str, result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|err| {
        warn!(error = %err, report = what, "report query failed");
        fallback
    })
}

// ============================================================================
// FALLIBLE QUERIES
// ============================================================================

pub fn try_total_kwh(db: &mut dyn Database, owner: Owner) -> Result<f64> {
    match db.fetch_one(
        "SELECT SUM(total_kwh) FROM records WHERE user_id IS ?1",
        sql_params![owner],
    )? {
        Some(row) => row.get_f64_or_zero(0),
        None => Ok(0.0),
    }
}

pub fn try_total_cost(db: &mut dyn Database, owner: Owner) -> Result<f64> {
    match db.fetch_one(
        "SELECT SUM(total_cost) FROM records WHERE user_id IS ?1",
        sql_params![owner],
    )? {
        Some(row) => row.get_f64_or_zero(0),
        None => Ok(0.0),
    }
}

pub fn try_record_count(db: &mut dyn Database, owner: Owner) -> Result<i64> {
    match db.fetch_one(
        "SELECT COUNT(*) FROM records WHERE user_id IS ?1",
        sql_params![owner],
    )? {
        Some(row) => row.get_i64(0),
        None => Ok(0),
    }
}

/// Devices ranked by total run time over the owner's records.
pub fn try_top_devices(db: &mut dyn Database, owner: Owner, limit: usize) -> Result<Vec<DeviceUsage>> {
    let rows = db.fetch_all(
        "SELECT ri.device_name,
                SUM(ri.duration_minutes) AS total_minutes,
                SUM(ri.kwh_used) AS total_kwh,
                SUM(ri.cost) AS total_cost
         FROM record_items ri
         JOIN records r ON ri.record_id = r.id
         WHERE r.user_id IS ?1
         GROUP BY ri.device_name
         ORDER BY total_minutes DESC, ri.device_name ASC
         LIMIT ?2",
        sql_params![owner, limit],
    )?;

    rows.iter()
        .map(|row| {
            Ok(DeviceUsage {
                device_name: row.get_string(0)?,
                total_minutes: row.get_f64_or_zero(1)?,
                total_kwh: row.get_f64_or_zero(2)?,
                total_cost: row.get_f64_or_zero(3)?,
            })
        })
        .collect()
}

/// Cost of records whose date starts with `month` (`YYYY-MM`).
pub fn try_monthly_cost(db: &mut dyn Database, owner: Owner, month: &str) -> Result<f64> {
    match db.fetch_one(
        "SELECT SUM(total_cost) FROM records
         WHERE user_id IS ?1 AND substr(date, 1, length(?2)) = ?2",
        sql_params![owner, month],
    )? {
        Some(row) => row.get_f64_or_zero(0),
        None => Ok(0.0),
    }
}

pub fn try_summary(
    db: &mut dyn Database,
    owner: Owner,
    month: &str,
    top_n: usize,
) -> Result<UsageSummary> {
    Ok(UsageSummary {
        owner,
        record_count: try_record_count(db, owner)?,
        total_kwh: try_total_kwh(db, owner)?,
        total_cost: try_total_cost(db, owner)?,
        month: month.to_string(),
        month_cost: try_monthly_cost(db, owner, month)?,
        top_devices: try_top_devices(db, owner, top_n)?,
    })
}

// ============================================================================
// FAIL-SOFT QUERIES
// ============================================================================

pub fn total_kwh(db: &mut dyn Database, owner: Owner) -> f64 {
    fail_soft("total_kwh", try_total_kwh(db, owner), 0.0)
}

pub fn total_cost(db: &mut dyn Database, owner: Owner) -> f64 {
    fail_soft("total_cost", try_total_cost(db, owner), 0.0)
}

pub fn record_count(db: &mut dyn Database, owner: Owner) -> i64 {
    fail_soft("record_count", try_record_count(db, owner), 0)
}

pub fn top_devices(db: &mut dyn Database, owner: Owner, limit: usize) -> Vec<DeviceUsage> {
    fail_soft("top_devices", try_top_devices(db, owner, limit), Vec::new())
}

pub fn monthly_cost(db: &mut dyn Database, owner: Owner, month: &str) -> f64 {
    fail_soft("monthly_cost", try_monthly_cost(db, owner, month), 0.0)
}

/// Summary with each figure failing soft on its own.
pub fn summary(db: &mut dyn Database, owner: Owner, month: &str, top_n: usize) -> UsageSummary {
    UsageSummary {
        owner,
        record_count: record_count(db, owner),
        total_kwh: total_kwh(db, owner),
        total_cost: total_cost(db, owner),
        month: month.to_string(),
        month_cost: monthly_cost(db, owner, month),
        top_devices: top_devices(db, owner, top_n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, SqliteDatabase, TIMESTAMP_FORMAT};
    use crate::entities::{NewRecordItem, RecordStore};
    use chrono::NaiveDateTime;

    fn test_db() -> SqliteDatabase {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        setup_database(&mut db, 12.64, false).unwrap();
        db
    }

    fn item(name: &str, minutes: f64, kwh: f64, cost: f64) -> NewRecordItem {
        NewRecordItem {
            device_name: name.to_string(),
            watt_per_hour: kwh * 60_000.0 / minutes,
            duration_minutes: minutes,
            kwh_used: kwh,
            cost,
        }
    }

    fn save(db: &mut SqliteDatabase, date: &str, owner: Owner, items: &[NewRecordItem]) -> i64 {
        let at = NaiveDateTime::parse_from_str(date, TIMESTAMP_FORMAT).unwrap();
        RecordStore::new(db).create_record(at, owner, items).unwrap().0.id
    }

    fn seeded() -> SqliteDatabase {
        let mut db = test_db();
        let me = Owner::User(1);
        save(&mut db, "2025-04-28 20:00:00", me, &[item("Aircon", 120.0, 2.0, 25.0)]);
        save(
            &mut db,
            "2025-05-02 20:00:00",
            me,
            &[item("Fan", 300.0, 0.3, 3.5), item("Aircon", 60.0, 1.0, 12.5)],
        );
        save(&mut db, "2025-05-10 07:00:00", me, &[item("Fan", 60.0, 0.06, 0.75)]);
        save(&mut db, "2025-05-11 07:00:00", Owner::User(2), &[item("TV", 999.0, 5.0, 60.0)]);
        db
    }

    #[test]
    fn test_totals_per_owner() {
        let mut db = seeded();
        let me = Owner::User(1);

        assert!((total_kwh(&mut db, me) - 3.36).abs() < 1e-9);
        assert!((total_cost(&mut db, me) - 41.75).abs() < 1e-9);
        assert_eq!(record_count(&mut db, me), 3);
    }

    #[test]
    fn test_zero_rows_read_as_zero() {
        let mut db = test_db();
        let nobody = Owner::User(42);

        assert_eq!(total_kwh(&mut db, nobody), 0.0);
        assert_eq!(monthly_cost(&mut db, nobody, "2025-05"), 0.0);
        assert!(top_devices(&mut db, nobody, 3).is_empty());
        assert_eq!(try_total_kwh(&mut db, nobody).unwrap(), 0.0);
    }

    #[test]
    fn test_top_devices_by_duration() {
        let mut db = seeded();

        let top = top_devices(&mut db, Owner::User(1), 5);
        let names: Vec<&str> = top.iter().map(|d| d.device_name.as_str()).collect();
        assert_eq!(names, vec!["Fan", "Aircon"]);
        assert_eq!(top[0].total_minutes, 360.0);
        assert!((top[1].total_kwh - 3.0).abs() < 1e-9);

        // Another owner's TV never shows up, and limit applies
        let first = top_devices(&mut db, Owner::User(1), 1);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].device_name, "Fan");
    }

    #[test]
    fn test_top_devices_tie_broken_by_name() {
        let mut db = test_db();
        let me = Owner::User(5);
        // Equal run time, inserted in reverse name order
        save(&mut db, "2025-05-01 08:00:00", me, &[item("Washer", 90.0, 0.75, 9.48)]);
        save(&mut db, "2025-05-02 08:00:00", me, &[item("Kettle", 90.0, 3.0, 37.92)]);
        save(&mut db, "2025-05-03 08:00:00", me, &[item("Aircon", 30.0, 0.5, 6.32)]);

        let top = top_devices(&mut db, me, 3);
        let names: Vec<&str> = top.iter().map(|d| d.device_name.as_str()).collect();
        assert_eq!(names, vec!["Kettle", "Washer", "Aircon"]);

        // Limit cuts after the tie-break
        let first = top_devices(&mut db, me, 1);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].device_name, "Kettle");
    }

    #[test]
    fn test_monthly_cost_filters_by_prefix() {
        let mut db = seeded();
        let me = Owner::User(1);

        assert!((monthly_cost(&mut db, me, "2025-05") - 16.75).abs() < 1e-9);
        assert!((monthly_cost(&mut db, me, "2025-04") - 25.0).abs() < 1e-9);
        assert_eq!(monthly_cost(&mut db, me, "2025-06"), 0.0);
    }

    #[test]
    fn test_delete_lowers_totals() {
        let mut db = seeded();
        let me = Owner::User(1);
        let before = total_kwh(&mut db, me);

        let newest = RecordStore::new(&mut db).list_records(me).unwrap()[0].clone();
        RecordStore::new(&mut db).delete_record(newest.id).unwrap();

        let after = total_kwh(&mut db, me);
        assert!((before - after - newest.total_kwh).abs() < 1e-9);
        assert!(RecordStore::new(&mut db)
            .list_records(me)
            .unwrap()
            .iter()
            .all(|r| r.id != newest.id));
    }

    #[test]
    fn test_read_errors_fail_soft() {
        let mut db = test_db();
        db.connection().execute_batch("DROP TABLE records").unwrap();

        let me = Owner::User(1);
        assert!(try_total_kwh(&mut db, me).is_err());
        assert_eq!(total_kwh(&mut db, me), 0.0);
        assert!(top_devices(&mut db, me, 3).is_empty());

        let s = summary(&mut db, me, "2025-05", 3);
        assert_eq!(s.record_count, 0);
        assert!(s.top_devices.is_empty());
        assert!(try_summary(&mut db, me, "2025-05", 3).is_err());
    }

    #[test]
    fn test_summary() {
        let mut db = seeded();
        let s = try_summary(&mut db, Owner::User(1), "2025-05", 1).unwrap();

        assert_eq!(s.record_count, 3);
        assert_eq!(s.month, "2025-05");
        assert!((s.month_cost - 16.75).abs() < 1e-9);
        assert_eq!(s.top_devices.len(), 1);
    }
}
