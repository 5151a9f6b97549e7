//! Order aggregate and transaction coordinator.
//!
//! Every mutating operation here is a single atomic unit: header, line set,
//! and the resulting stock adjustments commit together or not at all. Input
//! validation happens before the transaction opens, the not-found check
//! after a read and before any write. Mutating operations hold the
//! connection lock for the whole read-decide-write cycle and re-read the
//! order inside the transaction bracket, so a transition is always evaluated
//! against committed state. `BEGIN IMMEDIATE` takes SQLite's write lock up
//! front so a competing writer waits at the busy timeout instead of failing
//! mid-way.
//!
//! When an edit changes both the line set and the status, cancellation and
//! reactivation take priority over line reconciliation: entering `cancelled`
//! releases the old (reserved) lines and skips the diff; leaving `cancelled`
//! reserves the new lines in full, because the old ones were never reserved.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{OrderError, Result};
use crate::model::{Order, OrderDraft, OrderLine, OrderSnapshot, VariantKey};
use crate::notify::{dispatch_after_commit, NotificationKind, Notifier};
use crate::reconcile;
use crate::status::{transition_effect, OrderStatus, StockEffect};
use crate::stock;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a draft and resolve its status field.
///
/// Runs entirely on reads; no transaction is open yet.
fn validate_draft(db: &DbState, draft: &OrderDraft) -> Result<Option<OrderStatus>> {
    if draft.lines.is_empty() {
        return Err(OrderError::Validation(
            "order must have at least one line item".into(),
        ));
    }
    for line in &draft.lines {
        if line.quantity < 1 {
            return Err(OrderError::Validation(format!(
                "quantity must be at least 1 for product {} size {}",
                line.product_id, line.size
            )));
        }
        let key = line.variant_key();
        let known = crate::catalog::find_variant(db, &key)
            .map_err(OrderError::Transaction)?
            .is_some();
        if !known {
            return Err(OrderError::Validation(format!(
                "unknown product variant: product {} size {}",
                line.product_id, line.size
            )));
        }
    }
    match &draft.status {
        Some(code) => Ok(Some(OrderStatus::parse(code)?)),
        None => Ok(None),
    }
}

fn draft_pairs(draft: &OrderDraft) -> Vec<(VariantKey, i64)> {
    draft
        .lines
        .iter()
        .map(|l| (l.variant_key(), l.quantity))
        .collect()
}

fn line_pairs(lines: &[OrderLine]) -> Vec<(VariantKey, i64)> {
    lines
        .iter()
        .map(|l| (l.variant_key(), l.quantity))
        .collect()
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Create an order and reserve every line quantity, atomically.
///
/// Returns the generated order id. A confirmation notification is
/// dispatched after the commit; its failure never affects the order.
pub fn create_order(
    db: &DbState,
    notifier: Option<&dyn Notifier>,
    draft: &OrderDraft,
) -> Result<i64> {
    let status = validate_draft(db, draft)?.unwrap_or(OrderStatus::Pending);
    if status.is_cancelled() {
        return Err(OrderError::Validation(
            "an order cannot be created as cancelled".into(),
        ));
    }

    let order_id = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| OrderError::Transaction(e.to_string()))?;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| OrderError::Transaction(format!("begin transaction: {e}")))?;

        let result = (|| -> std::result::Result<i64, String> {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO orders (first_name, last_name, phone, email, pickup_date,
                                     pickup_slot, note, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    draft.first_name,
                    draft.last_name,
                    draft.phone,
                    draft.email,
                    draft.pickup_date,
                    draft.pickup_slot,
                    draft.note,
                    status.as_code(),
                    now,
                ],
            )
            .map_err(|e| format!("insert order: {e}"))?;
            let order_id = conn.last_insert_rowid();

            for line in &draft.lines {
                conn.execute(
                    "INSERT INTO order_lines (order_id, product_id, size, quantity, note)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![order_id, line.product_id, line.size, line.quantity, line.note],
                )
                .map_err(|e| format!("insert order line: {e}"))?;
                stock::reserve(&conn, &line.variant_key(), line.quantity, "create", Some(order_id))?;
            }

            Ok(order_id)
        })();

        match result {
            Ok(id) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| OrderError::Transaction(format!("commit: {e}")))?;
                id
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(OrderError::Transaction(e));
            }
        }
    };

    info!(
        order_id,
        status = %status,
        lines = draft.lines.len(),
        "Order created"
    );

    if let Some(snapshot) = snapshot_for(db, order_id) {
        dispatch_after_commit(notifier, NotificationKind::Confirmation, &snapshot);
    }

    Ok(order_id)
}

// ---------------------------------------------------------------------------
// Edit
// ---------------------------------------------------------------------------

/// Replace an order's line set and header fields, reconciling stock.
///
/// If the draft also changes the status, cancellation/reactivation stock
/// effects take priority over line-delta reconciliation (see module docs).
pub fn edit_order(
    db: &DbState,
    notifier: Option<&dyn Notifier>,
    order_id: i64,
    draft: &OrderDraft,
) -> Result<()> {
    let draft_status = validate_draft(db, draft)?;

    let (prev_status, next_status) = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| OrderError::Transaction(e.to_string()))?;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| OrderError::Transaction(format!("begin transaction: {e}")))?;

        let result = (|| -> Result<(OrderStatus, OrderStatus)> {
            // Re-read under the held lock: the transition below must be
            // driven by the committed status and lines, not by a read taken
            // before another writer got in.
            let existing = load_order(&conn, order_id)?;
            let prev_status = existing.status;
            let next_status = draft_status.unwrap_or(prev_status);

            match transition_effect(prev_status, next_status) {
                StockEffect::ReleaseAll => {
                    // Entering cancelled: restore what the old lines reserved.
                    // The new lines are stored but not reserved.
                    for line in &existing.lines {
                        stock::release(
                            &conn,
                            &line.variant_key(),
                            line.quantity,
                            "cancel",
                            Some(order_id),
                        )
                        .map_err(OrderError::Transaction)?;
                    }
                }
                StockEffect::ReserveAll => {
                    // Leaving cancelled: the old lines were never reserved,
                    // so a diff against them is meaningless. Reserve the new
                    // set in full.
                    for line in &draft.lines {
                        stock::reserve(
                            &conn,
                            &line.variant_key(),
                            line.quantity,
                            "reactivate",
                            Some(order_id),
                        )
                        .map_err(OrderError::Transaction)?;
                    }
                }
                StockEffect::None => {
                    // While cancelled the lines are not reserved, so an edit
                    // that stays cancelled must not touch stock.
                    if !prev_status.is_cancelled() && !next_status.is_cancelled() {
                        let deltas =
                            reconcile::diff(&line_pairs(&existing.lines), &draft_pairs(draft));
                        for d in deltas {
                            if d.delta > 0 {
                                stock::reserve(&conn, &d.key, d.delta, "edit", Some(order_id))
                                    .map_err(OrderError::Transaction)?;
                            } else {
                                stock::release(&conn, &d.key, -d.delta, "edit", Some(order_id))
                                    .map_err(OrderError::Transaction)?;
                            }
                        }
                    }
                }
            }

            conn.execute(
                "DELETE FROM order_lines WHERE order_id = ?1",
                params![order_id],
            )
            .map_err(|e| OrderError::Transaction(format!("delete old lines: {e}")))?;
            for line in &draft.lines {
                conn.execute(
                    "INSERT INTO order_lines (order_id, product_id, size, quantity, note)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![order_id, line.product_id, line.size, line.quantity, line.note],
                )
                .map_err(|e| OrderError::Transaction(format!("insert new line: {e}")))?;
            }

            conn.execute(
                "UPDATE orders SET first_name = ?1, last_name = ?2, phone = ?3, email = ?4,
                                   pickup_date = ?5, pickup_slot = ?6, note = ?7, status = ?8,
                                   updated_at = ?9
                 WHERE id = ?10",
                params![
                    draft.first_name,
                    draft.last_name,
                    draft.phone,
                    draft.email,
                    draft.pickup_date,
                    draft.pickup_slot,
                    draft.note,
                    next_status.as_code(),
                    Utc::now().to_rfc3339(),
                    order_id,
                ],
            )
            .map_err(|e| OrderError::Transaction(format!("update order header: {e}")))?;

            Ok((prev_status, next_status))
        })();

        match result {
            Ok(statuses) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| OrderError::Transaction(format!("commit: {e}")))?;
                statuses
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }
    };

    info!(
        order_id,
        from = %prev_status,
        to = %next_status,
        lines = draft.lines.len(),
        "Order edited"
    );

    if let Some(snapshot) = snapshot_for(db, order_id) {
        dispatch_after_commit(notifier, NotificationKind::Update, &snapshot);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Status change
// ---------------------------------------------------------------------------

/// Change an order's status, applying the cancellation stock rule against
/// its unchanged line set.
pub fn set_status(db: &DbState, order_id: i64, status_code: &str) -> Result<()> {
    let next_status = OrderStatus::parse(status_code)?;

    let prev_status = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| OrderError::Transaction(e.to_string()))?;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| OrderError::Transaction(format!("begin transaction: {e}")))?;

        let result = (|| -> Result<OrderStatus> {
            // Re-read under the held lock; two racing cancellations must
            // not both observe an active order and release stock twice.
            let existing = load_order(&conn, order_id)?;
            let prev_status = existing.status;

            match transition_effect(prev_status, next_status) {
                StockEffect::ReleaseAll => {
                    for line in &existing.lines {
                        stock::release(
                            &conn,
                            &line.variant_key(),
                            line.quantity,
                            "cancel",
                            Some(order_id),
                        )
                        .map_err(OrderError::Transaction)?;
                    }
                }
                StockEffect::ReserveAll => {
                    for line in &existing.lines {
                        stock::reserve(
                            &conn,
                            &line.variant_key(),
                            line.quantity,
                            "reactivate",
                            Some(order_id),
                        )
                        .map_err(OrderError::Transaction)?;
                    }
                }
                StockEffect::None => {}
            }

            conn.execute(
                "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![next_status.as_code(), Utc::now().to_rfc3339(), order_id],
            )
            .map_err(|e| OrderError::Transaction(format!("update status: {e}")))?;

            Ok(prev_status)
        })();

        match result {
            Ok(prev_status) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| OrderError::Transaction(format!("commit: {e}")))?;
                prev_status
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }
    };

    info!(order_id, from = %prev_status, to = %next_status, "Order status changed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Read projections
// ---------------------------------------------------------------------------

fn read_lines(conn: &Connection, order_id: i64) -> std::result::Result<Vec<OrderLine>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT ol.id, ol.product_id, COALESCE(p.name, ''), ol.size, ol.quantity, ol.note,
                    COALESCE(pv.price, 0)
             FROM order_lines ol
             LEFT JOIN products p ON p.id = ol.product_id
             LEFT JOIN product_variants pv
                 ON pv.product_id = ol.product_id AND pv.size = ol.size
             WHERE ol.order_id = ?1
             ORDER BY ol.id",
        )
        .map_err(|e| e.to_string())?;
    let lines = stmt
        .query_map(params![order_id], |row| {
            Ok(OrderLine {
                id: row.get(0)?,
                product_id: row.get(1)?,
                product_name: row.get(2)?,
                size: row.get(3)?,
                quantity: row.get(4)?,
                note: row.get(5)?,
                price: row.get(6)?,
            })
        })
        .map_err(|e| e.to_string())?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    Ok(lines)
}

/// Read one order on an already-held connection. `NotFound` for unknown
/// ids. Mutating operations call this inside their transaction bracket so
/// the state a transition is driven from cannot change underneath them.
fn load_order(conn: &Connection, order_id: i64) -> Result<Order> {
    let header = conn
        .query_row(
            "SELECT id, first_name, last_name, phone, email, pickup_date, pickup_slot,
                    note, status, created_at
             FROM orders WHERE id = ?1",
            params![order_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            },
        )
        .map_err(|_| OrderError::NotFound(order_id))?;

    let lines = read_lines(conn, order_id).map_err(OrderError::Transaction)?;

    Ok(Order {
        id: header.0,
        first_name: header.1,
        last_name: header.2,
        phone: header.3,
        email: header.4,
        pickup_date: header.5,
        pickup_slot: header.6,
        note: header.7,
        status: OrderStatus::parse(&header.8)?,
        created_at: header.9,
        lines,
    })
}

/// Load one order with its lines. `NotFound` for unknown ids.
pub fn get_order(db: &DbState, order_id: i64) -> Result<Order> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Transaction(e.to_string()))?;
    load_order(&conn, order_id)
}

/// Reload a committed order for the post-commit notification. A failure
/// here only costs the notification, never the committed operation.
fn snapshot_for(db: &DbState, order_id: i64) -> Option<OrderSnapshot> {
    match get_order(db, order_id) {
        Ok(order) => Some(OrderSnapshot::from_order(&order)),
        Err(e) => {
            warn!(
                order_id,
                error = %e,
                "Skipping notification: could not reload committed order"
            );
            None
        }
    }
}

/// List orders newest first, each with its lines and current variant price.
///
/// `search` matches the concatenated customer name (case-insensitive), a
/// phone substring, or an exact order id. Read-only, no side effects.
pub fn list_orders(db: &DbState, search: Option<&str>) -> Result<Vec<Order>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| OrderError::Transaction(e.to_string()))?;

    let base = "SELECT id, first_name, last_name, phone, email, pickup_date, pickup_slot,
                       note, status, created_at
                FROM orders";

    let mut headers: Vec<(i64, String, String, String, String, String, String, String, String, String)> =
        Vec::new();
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, String>(9)?,
        ))
    };

    match search.map(str::trim).filter(|s| !s.is_empty()) {
        Some(term) => {
            let pattern = format!("%{}%", term.to_lowercase());
            let id_term: i64 = term.parse().unwrap_or(0);
            let sql = format!(
                "{base}
                 WHERE LOWER(first_name || last_name) LIKE ?1
                    OR phone LIKE ?1
                    OR id = ?2
                 ORDER BY id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![pattern, id_term], map_row)?;
            for row in rows {
                headers.push(row?);
            }
        }
        None => {
            let sql = format!("{base} ORDER BY id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], map_row)?;
            for row in rows {
                headers.push(row?);
            }
        }
    }

    let mut orders = Vec::with_capacity(headers.len());
    for h in headers {
        let lines = read_lines(&conn, h.0).map_err(OrderError::Transaction)?;
        orders.push(Order {
            id: h.0,
            first_name: h.1,
            last_name: h.2,
            phone: h.3,
            email: h.4,
            pickup_date: h.5,
            pickup_slot: h.6,
            note: h.7,
            status: OrderStatus::parse(&h.8)?,
            created_at: h.9,
            lines,
        });
    }

    Ok(orders)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::db;
    use crate::model::LineDraft;
    use crate::notify::NotificationKind;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    /// Seed one product with one variant and return its key.
    fn seed_variant(db: &DbState, name: &str, size: &str, stock: i64) -> VariantKey {
        let id = catalog::add_product(db, name, None, None).unwrap();
        let key = VariantKey::new(id, size);
        catalog::add_variant(db, &key, 3000, stock).unwrap();
        key
    }

    fn line(key: &VariantKey, quantity: i64) -> LineDraft {
        LineDraft {
            product_id: key.product_id,
            size: key.size.clone(),
            quantity,
            note: String::new(),
        }
    }

    fn draft(lines: Vec<LineDraft>, status: Option<&str>) -> OrderDraft {
        OrderDraft {
            first_name: "Hana".into(),
            last_name: "Sato".into(),
            phone: "090-1234-5678".into(),
            email: "hana@example.com".into(),
            pickup_date: "2026-12-24".into(),
            pickup_slot: "14:00".into(),
            note: String::new(),
            status: status.map(String::from),
            lines,
        }
    }

    fn stock_of(db: &DbState, key: &VariantKey) -> i64 {
        let conn = db.conn.lock().unwrap();
        crate::stock::stock_of(&conn, key).expect("variant exists")
    }

    struct RecordingNotifier {
        seen: Mutex<Vec<(NotificationKind, i64)>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn dispatch(
            &self,
            kind: NotificationKind,
            snapshot: &OrderSnapshot,
        ) -> std::result::Result<(), String> {
            self.seen.lock().unwrap().push((kind, snapshot.order_id));
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn dispatch(
            &self,
            _: NotificationKind,
            _: &OrderSnapshot,
        ) -> std::result::Result<(), String> {
            Err("mail relay unreachable".into())
        }
    }

    // -- Create -------------------------------------------------------------

    #[test]
    fn test_create_reserves_stock() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);

        let id = create_order(&db, None, &draft(vec![line(&key, 3)], None)).unwrap();
        assert!(id > 0);
        assert_eq!(stock_of(&db, &key), 7);

        let order = get_order(&db, id).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 3);
        assert_eq!(order.receipt_number(), format!("{id:04}"));
    }

    #[test]
    fn test_create_rejects_empty_lines() {
        let db = test_db();
        let err = create_order(&db, None, &draft(vec![], None)).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn test_create_rejects_zero_quantity() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let err = create_order(&db, None, &draft(vec![line(&key, 0)], None)).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        assert_eq!(stock_of(&db, &key), 10);
    }

    #[test]
    fn test_create_rejects_unknown_variant() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let ghost = VariantKey::new(key.product_id, "XXL");
        let err = create_order(&db, None, &draft(vec![line(&ghost, 1)], None)).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
        // Rejected before any transaction: nothing written
        let conn = db.conn.lock().unwrap();
        let orders: i64 = conn
            .query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orders, 0);
    }

    #[test]
    fn test_create_rejects_cancelled_status() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let err =
            create_order(&db, None, &draft(vec![line(&key, 1)], Some("cancelled"))).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn test_create_with_unknown_status_code() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let err =
            create_order(&db, None, &draft(vec![line(&key, 1)], Some("shipped"))).unwrap_err();
        assert!(matches!(err, OrderError::InvalidStatus(_)));
    }

    // -- Lifecycle walkthroughs ---------------------------------------------

    #[test]
    fn test_edit_walkthrough_with_clamp() {
        // X starts at 5. Create 3xX -> 2. Edit to 5xX -> clamp to 0.
        // Edit to 1xX -> back to 4. Cancel -> 5.
        let db = test_db();
        let x = seed_variant(&db, "Gateau", "M", 5);

        let id = create_order(&db, None, &draft(vec![line(&x, 3)], None)).unwrap();
        assert_eq!(stock_of(&db, &x), 2);

        edit_order(&db, None, id, &draft(vec![line(&x, 5)], None)).unwrap();
        assert_eq!(stock_of(&db, &x), 0);

        edit_order(&db, None, id, &draft(vec![line(&x, 1)], None)).unwrap();
        assert_eq!(stock_of(&db, &x), 4);

        set_status(&db, id, "cancelled").unwrap();
        assert_eq!(stock_of(&db, &x), 5);
    }

    #[test]
    fn test_cancel_reactivate_round_trip() {
        // Y stock 10, order 2xY paid-online -> 8; cancel -> 10; back -> 8.
        let db = test_db();
        let y = seed_variant(&db, "Mont Blanc", "S", 10);

        let id = create_order(&db, None, &draft(vec![line(&y, 2)], Some("paid-online"))).unwrap();
        assert_eq!(stock_of(&db, &y), 8);
        assert_eq!(get_order(&db, id).unwrap().status, OrderStatus::PaidOnline);

        set_status(&db, id, "cancelled").unwrap();
        assert_eq!(stock_of(&db, &y), 10);

        set_status(&db, id, "paid-online").unwrap();
        assert_eq!(stock_of(&db, &y), 8);
    }

    #[test]
    fn test_combined_reactivation_edit_reserves_full_quantity() {
        // Cancelled order holds 2xZ (not reserved). Edit to 5xZ and
        // paid-online in one call: expected reserve(Z, 5), not reserve(Z, 3).
        let db = test_db();
        let z = seed_variant(&db, "Tarte", "L", 20);

        let id = create_order(&db, None, &draft(vec![line(&z, 2)], None)).unwrap();
        set_status(&db, id, "cancelled").unwrap();
        assert_eq!(stock_of(&db, &z), 20);

        edit_order(&db, None, id, &draft(vec![line(&z, 5)], Some("paid-online"))).unwrap();
        assert_eq!(stock_of(&db, &z), 15);
    }

    #[test]
    fn test_combined_cancellation_edit_releases_old_lines_only() {
        // Edit that cancels must release what was reserved (the old lines)
        // and must not reserve the incoming line set.
        let db = test_db();
        let a = seed_variant(&db, "Shortcake", "M", 10);
        let b = seed_variant(&db, "Gateau", "M", 10);

        let id = create_order(&db, None, &draft(vec![line(&a, 4)], None)).unwrap();
        assert_eq!(stock_of(&db, &a), 6);

        edit_order(&db, None, id, &draft(vec![line(&b, 7)], Some("cancelled"))).unwrap();
        assert_eq!(stock_of(&db, &a), 10);
        assert_eq!(stock_of(&db, &b), 10);

        // The new lines are stored on the cancelled order
        let order = get_order(&db, id).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.lines[0].quantity, 7);
    }

    #[test]
    fn test_edit_while_cancelled_touches_no_stock() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);

        let id = create_order(&db, None, &draft(vec![line(&key, 2)], None)).unwrap();
        set_status(&db, id, "cancelled").unwrap();
        assert_eq!(stock_of(&db, &key), 10);

        // Status omitted: stays cancelled; lines change but nothing reserves
        edit_order(&db, None, id, &draft(vec![line(&key, 8)], None)).unwrap();
        assert_eq!(stock_of(&db, &key), 10);

        // Reactivating later reserves the edited quantity
        set_status(&db, id, "pending").unwrap();
        assert_eq!(stock_of(&db, &key), 2);
    }

    #[test]
    fn test_noop_edit_produces_no_stock_movement() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);

        let id = create_order(&db, None, &draft(vec![line(&key, 3)], None)).unwrap();
        edit_order(&db, None, id, &draft(vec![line(&key, 3)], None)).unwrap();
        assert_eq!(stock_of(&db, &key), 7);

        let conn = db.conn.lock().unwrap();
        let edit_movements: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stock_movements WHERE reason = 'edit'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(edit_movements, 0);
    }

    #[test]
    fn test_net_effect_idempotence_over_lifecycle() {
        // Create -> Edit -> Edit -> cancel -> reactivate: final stock equals
        // initial minus the currently reserved quantities.
        let db = test_db();
        let x = seed_variant(&db, "Shortcake", "M", 30);
        let y = seed_variant(&db, "Gateau", "S", 30);

        let id = create_order(&db, None, &draft(vec![line(&x, 3)], None)).unwrap();
        edit_order(&db, None, id, &draft(vec![line(&x, 1), line(&y, 6)], None)).unwrap();
        edit_order(&db, None, id, &draft(vec![line(&y, 2)], None)).unwrap();
        set_status(&db, id, "cancelled").unwrap();
        set_status(&db, id, "paid-in-store").unwrap();
        // Another full cycle changes nothing
        set_status(&db, id, "cancelled").unwrap();
        set_status(&db, id, "fulfilled").unwrap();

        assert_eq!(stock_of(&db, &x), 30);
        assert_eq!(stock_of(&db, &y), 28);
    }

    #[test]
    fn test_multi_line_reconciliation() {
        let db = test_db();
        let a = seed_variant(&db, "Shortcake", "M", 10);
        let b = seed_variant(&db, "Gateau", "M", 10);
        let c = seed_variant(&db, "Mont Blanc", "S", 10);

        let id = create_order(&db, None, &draft(vec![line(&a, 2), line(&b, 3)], None)).unwrap();
        assert_eq!((stock_of(&db, &a), stock_of(&db, &b)), (8, 7));

        // a removed, b modified, c added — one diff pass
        edit_order(&db, None, id, &draft(vec![line(&b, 1), line(&c, 4)], None)).unwrap();
        assert_eq!(stock_of(&db, &a), 10);
        assert_eq!(stock_of(&db, &b), 9);
        assert_eq!(stock_of(&db, &c), 6);
    }

    // -- Errors -------------------------------------------------------------

    #[test]
    fn test_edit_unknown_order_is_not_found() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let err = edit_order(&db, None, 999, &draft(vec![line(&key, 1)], None)).unwrap_err();
        assert!(matches!(err, OrderError::NotFound(999)));
        assert_eq!(stock_of(&db, &key), 10);
    }

    #[test]
    fn test_set_status_unknown_order_is_not_found() {
        let db = test_db();
        let err = set_status(&db, 42, "fulfilled").unwrap_err();
        assert!(matches!(err, OrderError::NotFound(42)));
    }

    #[test]
    fn test_set_status_invalid_code() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let id = create_order(&db, None, &draft(vec![line(&key, 1)], None)).unwrap();
        let err = set_status(&db, id, "archived").unwrap_err();
        assert!(matches!(err, OrderError::InvalidStatus(_)));
        assert_eq!(get_order(&db, id).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn test_edit_rejects_unknown_variant_before_any_write() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let id = create_order(&db, None, &draft(vec![line(&key, 2)], None)).unwrap();

        let ghost = VariantKey::new(999, "M");
        let err = edit_order(&db, None, id, &draft(vec![line(&ghost, 1)], None)).unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));

        // Old lines and reservation untouched
        assert_eq!(stock_of(&db, &key), 8);
        assert_eq!(get_order(&db, id).unwrap().lines[0].quantity, 2);
    }

    // -- Atomicity and concurrency ------------------------------------------

    #[test]
    fn test_concurrent_cancellations_release_stock_once() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let id = create_order(&db, None, &draft(vec![line(&key, 3)], None)).unwrap();
        assert_eq!(stock_of(&db, &key), 7);

        let barrier = std::sync::Barrier::new(2);
        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    barrier.wait();
                    set_status(&db, id, "cancelled").unwrap();
                });
            }
        });

        // Whichever transition ran second saw an already cancelled order
        // and released nothing. Stock returns to the seeded level exactly.
        assert_eq!(stock_of(&db, &key), 10);
        let conn = db.conn.lock().unwrap();
        let releases: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stock_movements WHERE reason = 'cancel'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_failure_inside_transaction_rolls_back_everything() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let id = create_order(&db, None, &draft(vec![line(&key, 2)], None)).unwrap();
        assert_eq!(stock_of(&db, &key), 8);

        // Sabotage the audit table so the reservation fails after the stock
        // row has already been updated inside the transaction.
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch("DROP TABLE stock_movements").unwrap();
        }

        let mut changed = draft(vec![line(&key, 5)], None);
        changed.first_name = "Taro".into();
        let err = edit_order(&db, None, id, &changed).unwrap_err();
        assert!(matches!(err, OrderError::Transaction(_)));

        // Header, line set, and the partial stock update all rolled back.
        assert_eq!(stock_of(&db, &key), 8);
        let order = get_order(&db, id).unwrap();
        assert_eq!(order.first_name, "Hana");
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 2);
    }

    // -- Notifications ------------------------------------------------------

    #[test]
    fn test_notifications_fire_after_create_and_edit() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let notifier = RecordingNotifier::new();

        let id = create_order(&db, Some(&notifier), &draft(vec![line(&key, 1)], None)).unwrap();
        edit_order(&db, Some(&notifier), id, &draft(vec![line(&key, 2)], None)).unwrap();

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[
                (NotificationKind::Confirmation, id),
                (NotificationKind::Update, id)
            ]
        );
    }

    #[test]
    fn test_notification_failure_does_not_fail_the_operation() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);

        let id =
            create_order(&db, Some(&FailingNotifier), &draft(vec![line(&key, 2)], None)).unwrap();
        assert_eq!(stock_of(&db, &key), 8);
        assert!(get_order(&db, id).is_ok());
    }

    #[test]
    fn test_snapshot_reload_failure_yields_no_notification() {
        let db = test_db();
        // An order that cannot be reloaded produces no snapshot, so the
        // dispatch site is skipped instead of panicking.
        assert!(snapshot_for(&db, 999).is_none());
    }

    // -- Listing ------------------------------------------------------------

    #[test]
    fn test_list_orders_groups_lines_and_sorts_newest_first() {
        let db = test_db();
        let a = seed_variant(&db, "Shortcake", "M", 10);
        let b = seed_variant(&db, "Gateau", "S", 10);

        let first = create_order(&db, None, &draft(vec![line(&a, 1), line(&b, 2)], None)).unwrap();
        let second = create_order(&db, None, &draft(vec![line(&b, 1)], None)).unwrap();

        let orders = list_orders(&db, None).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, second);
        assert_eq!(orders[1].id, first);
        assert_eq!(orders[1].lines.len(), 2);
        assert_eq!(orders[1].lines[0].product_name, "Shortcake");
        assert_eq!(orders[1].lines[0].price, 3000);
    }

    #[test]
    fn test_list_orders_search() {
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);

        let mut d1 = draft(vec![line(&key, 1)], None);
        d1.first_name = "Hana".into();
        d1.last_name = "Sato".into();
        d1.phone = "090-1111-2222".into();
        let id1 = create_order(&db, None, &d1).unwrap();

        let mut d2 = draft(vec![line(&key, 1)], None);
        d2.first_name = "Ken".into();
        d2.last_name = "Arakaki".into();
        d2.phone = "098-3333-4444".into();
        let id2 = create_order(&db, None, &d2).unwrap();

        // Case-insensitive concatenated name
        let by_name = list_orders(&db, Some("hanasato")).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id, id1);

        // Phone substring
        let by_phone = list_orders(&db, Some("3333")).unwrap();
        assert_eq!(by_phone.len(), 1);
        assert_eq!(by_phone[0].id, id2);

        // Exact id
        let by_id = list_orders(&db, Some(&id1.to_string())).unwrap();
        assert!(by_id.iter().any(|o| o.id == id1));

        // No match
        assert!(list_orders(&db, Some("nobody")).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_orders_stay_listed() {
        // Cancellation is a soft delete; the order remains visible.
        let db = test_db();
        let key = seed_variant(&db, "Shortcake", "M", 10);
        let id = create_order(&db, None, &draft(vec![line(&key, 1)], None)).unwrap();
        set_status(&db, id, "cancelled").unwrap();

        let orders = list_orders(&db, None).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Cancelled);
    }
}
