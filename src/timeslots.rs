//! Pickup timeslot listing for the order form.

use rusqlite::params;
use serde::Serialize;

use crate::db::DbState;

/// One bookable pickup slot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeslot {
    pub date: String,
    pub slot: String,
}

/// All slots ordered by date then time, plus the distinct available dates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeslotListing {
    pub available_dates: Vec<String>,
    pub timeslots: Vec<Timeslot>,
}

/// List every pickup slot.
pub fn list(db: &DbState) -> Result<TimeslotListing, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare("SELECT date, slot FROM timeslots ORDER BY date, slot")
        .map_err(|e| e.to_string())?;
    let timeslots: Vec<Timeslot> = stmt
        .query_map([], |row| {
            Ok(Timeslot {
                date: row.get(0)?,
                slot: row.get(1)?,
            })
        })
        .map_err(|e| e.to_string())?
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;

    let mut available_dates: Vec<String> = Vec::new();
    for ts in &timeslots {
        if available_dates.last() != Some(&ts.date) {
            available_dates.push(ts.date.clone());
        }
    }

    Ok(TimeslotListing {
        available_dates,
        timeslots,
    })
}

/// Add a bookable slot (idempotent).
pub fn add_slot(db: &DbState, date: &str, slot: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR IGNORE INTO timeslots (date, slot) VALUES (?1, ?2)",
        params![date, slot],
    )
    .map_err(|e| format!("insert timeslot: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn test_list_orders_by_date_then_time() {
        let db = test_db();
        add_slot(&db, "2026-12-25", "10:00").unwrap();
        add_slot(&db, "2026-12-24", "14:00").unwrap();
        add_slot(&db, "2026-12-24", "10:00").unwrap();
        // Duplicate is ignored
        add_slot(&db, "2026-12-24", "10:00").unwrap();

        let listing = list(&db).unwrap();
        assert_eq!(listing.timeslots.len(), 3);
        assert_eq!(listing.timeslots[0].date, "2026-12-24");
        assert_eq!(listing.timeslots[0].slot, "10:00");
        assert_eq!(listing.available_dates, vec!["2026-12-24", "2026-12-25"]);
    }

    #[test]
    fn test_empty_listing() {
        let db = test_db();
        let listing = list(&db).unwrap();
        assert!(listing.timeslots.is_empty());
        assert!(listing.available_dates.is_empty());
    }
}
