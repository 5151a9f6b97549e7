//! Stock ledger: signed adjustments to per-variant stock counts.
//!
//! Both operations are single-row updates scoped to one variant and must run
//! on the caller's connection, inside the caller's transaction. Reserving
//! more than the available stock clamps at zero rather than failing, and a
//! release always adds the full amount back — the intake flow is deliberately
//! lenient with walk-in demand. Each call appends a `stock_movements` row so
//! stock history stays auditable even if a caller mispairs reserve/release.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use crate::model::VariantKey;

/// Subtract `qty` from the variant's stock, floor-clamped at zero.
pub fn reserve(
    conn: &Connection,
    key: &VariantKey,
    qty: i64,
    reason: &str,
    order_id: Option<i64>,
) -> Result<(), String> {
    if qty <= 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE product_variants SET stock = MAX(stock - ?1, 0)
         WHERE product_id = ?2 AND size = ?3",
        params![qty, key.product_id, key.size],
    )
    .map_err(|e| format!("reserve stock: {e}"))?;

    record_movement(conn, key, -qty, reason, order_id)?;
    debug!(product_id = key.product_id, size = %key.size, qty, reason, "stock reserved");
    Ok(())
}

/// Add `qty` back to the variant's stock, unconditionally.
pub fn release(
    conn: &Connection,
    key: &VariantKey,
    qty: i64,
    reason: &str,
    order_id: Option<i64>,
) -> Result<(), String> {
    if qty <= 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE product_variants SET stock = stock + ?1
         WHERE product_id = ?2 AND size = ?3",
        params![qty, key.product_id, key.size],
    )
    .map_err(|e| format!("release stock: {e}"))?;

    record_movement(conn, key, qty, reason, order_id)?;
    debug!(product_id = key.product_id, size = %key.size, qty, reason, "stock released");
    Ok(())
}

/// Append one audit row. `delta` is signed: negative for reservations,
/// positive for releases.
pub(crate) fn record_movement(
    conn: &Connection,
    key: &VariantKey,
    delta: i64,
    reason: &str,
    order_id: Option<i64>,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO stock_movements (id, product_id, size, delta, reason, order_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Uuid::new_v4().to_string(),
            key.product_id,
            key.size,
            delta,
            reason,
            order_id,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| format!("record stock movement: {e}"))?;
    Ok(())
}

/// Current stock for a variant, if it exists.
pub fn stock_of(conn: &Connection, key: &VariantKey) -> Option<i64> {
    conn.query_row(
        "SELECT stock FROM product_variants WHERE product_id = ?1 AND size = ?2",
        params![key.product_id, key.size],
        |row| row.get(0),
    )
    .ok()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        conn.execute("INSERT INTO products (id, name) VALUES (1, 'Gateau')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO product_variants (product_id, size, price, stock) VALUES (1, 'M', 3200, 5)",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_reserve_subtracts() {
        let conn = test_conn();
        let key = VariantKey::new(1, "M");
        reserve(&conn, &key, 3, "create", Some(1)).unwrap();
        assert_eq!(stock_of(&conn, &key), Some(2));
    }

    #[test]
    fn test_reserve_clamps_at_zero() {
        let conn = test_conn();
        let key = VariantKey::new(1, "M");
        reserve(&conn, &key, 9, "create", Some(1)).unwrap();
        assert_eq!(stock_of(&conn, &key), Some(0));
    }

    #[test]
    fn test_release_after_over_reserve_adds_full_amount() {
        // Documented leniency: the clamp means an over-reserve/release pair
        // can leave stock above the true physical count.
        let conn = test_conn();
        let key = VariantKey::new(1, "M");
        reserve(&conn, &key, 9, "create", Some(1)).unwrap();
        release(&conn, &key, 9, "cancel", Some(1)).unwrap();
        assert_eq!(stock_of(&conn, &key), Some(9));
    }

    #[test]
    fn test_zero_and_negative_quantities_are_noops() {
        let conn = test_conn();
        let key = VariantKey::new(1, "M");
        reserve(&conn, &key, 0, "create", None).unwrap();
        release(&conn, &key, -4, "cancel", None).unwrap();
        assert_eq!(stock_of(&conn, &key), Some(5));

        let movements: i64 = conn
            .query_row("SELECT COUNT(*) FROM stock_movements", [], |row| row.get(0))
            .unwrap();
        assert_eq!(movements, 0);
    }

    #[test]
    fn test_movements_record_signed_deltas() {
        let conn = test_conn();
        let key = VariantKey::new(1, "M");
        reserve(&conn, &key, 2, "create", Some(7)).unwrap();
        release(&conn, &key, 2, "cancel", Some(7)).unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT delta, reason, order_id FROM stock_movements ORDER BY created_at, delta",
            )
            .unwrap();
        let rows: Vec<(i64, String, Option<i64>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&(-2, "create".to_string(), Some(7))));
        assert!(rows.contains(&(2, "cancel".to_string(), Some(7))));
    }

    #[test]
    fn test_reserve_unknown_variant_touches_nothing() {
        let conn = test_conn();
        let key = VariantKey::new(99, "XL");
        // UPDATE matches no row; the movement row is still appended so the
        // audit trail shows the attempt.
        reserve(&conn, &key, 1, "create", None).unwrap();
        assert_eq!(stock_of(&conn, &key), None);
    }
}
