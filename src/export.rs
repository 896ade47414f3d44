// 📤 CSV Export - saved records flattened to one row per item
//
// Each row repeats its parent record's id, date and totals so the file can
// be opened in a spreadsheet without joins.

use std::io::Write;

use serde::Serialize;
use tracing::info;

use crate::db::{Database, TIMESTAMP_FORMAT};
use crate::entities::{Owner, RecordStore};
use crate::error::Result;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Record_ID")]
    record_id: i64,

    #[serde(rename = "Date")]
    date: String,

    #[serde(rename = "Device")]
    device_name: &'a str,

    #[serde(rename = "Watt_Per_Hour")]
    watt_per_hour: f64,

    #[serde(rename = "Duration_Minutes")]
    duration_minutes: f64,

    #[serde(rename = "kWh")]
    kwh_used: f64,

    #[serde(rename = "Cost")]
    cost: f64,

    #[serde(rename = "Record_Total_kWh")]
    record_total_kwh: f64,

    #[serde(rename = "Record_Total_Cost")]
    record_total_cost: f64,
}

/// Write every item of `owner`'s records as CSV, newest record first.
///
/// Returns the number of data rows written (header excluded).
pub fn export_records_csv<W: Write>(db: &mut dyn Database, owner: Owner, writer: W) -> Result<usize> {
    let mut store = RecordStore::new(db);
    let records = store.list_records(owner)?;

    let mut wtr = csv::Writer::from_writer(writer);
    let mut rows = 0;

    for record in &records {
        let date = record.date.format(TIMESTAMP_FORMAT).to_string();
        for item in store.record_items(record.id)? {
            wtr.serialize(ExportRow {
                record_id: record.id,
                date: date.clone(),
                device_name: &item.device_name,
                watt_per_hour: item.watt_per_hour,
                duration_minutes: item.duration_minutes,
                kwh_used: item.kwh_used,
                cost: item.cost,
                record_total_kwh: record.total_kwh,
                record_total_cost: record.total_cost,
            })?;
            rows += 1;
        }
    }

    wtr.flush()?;
    info!(records = records.len(), rows, "records exported");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{setup_database, SqliteDatabase};
    use crate::entities::NewRecordItem;
    use chrono::NaiveDateTime;

    #[test]
    fn test_export_csv() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        setup_database(&mut db, 12.64, false).unwrap();

        let at = NaiveDateTime::parse_from_str("2025-05-02 20:00:00", TIMESTAMP_FORMAT).unwrap();
        RecordStore::new(&mut db)
            .create_record(
                at,
                Owner::User(1),
                &[
                    NewRecordItem {
                        device_name: "Fan".into(),
                        watt_per_hour: 60.0,
                        duration_minutes: 30.0,
                        kwh_used: 0.03,
                        cost: 0.3792,
                    },
                    NewRecordItem {
                        device_name: "Aircon".into(),
                        watt_per_hour: 1000.0,
                        duration_minutes: 60.0,
                        kwh_used: 1.0,
                        cost: 12.64,
                    },
                ],
            )
            .unwrap();

        let mut out = Vec::new();
        let rows = export_records_csv(&mut db, Owner::User(1), &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Record_ID,Date,Device,"));
        assert!(lines[1].contains("2025-05-02 20:00:00,Fan,60.0,30.0"));
        assert!(lines[2].contains(",Aircon,"));

        // Other owners export nothing
        let mut empty = Vec::new();
        assert_eq!(export_records_csv(&mut db, Owner::User(2), &mut empty).unwrap(), 0);
    }
}
