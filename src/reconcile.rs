//! Line-set reconciliation: the stock deltas needed when an order is edited.
//!
//! One per-key delta pass over the union of variant keys covers every case —
//! a removed line is a delta down to zero, an added line a delta up from
//! zero, so there are no separate code paths for add/remove/modify. Keys map
//! to independent stock rows, so application order does not matter.

use std::collections::HashMap;

use crate::model::{StockDelta, VariantKey};

/// Compute the stock deltas that move reserved stock from reflecting
/// `old` to reflecting `new`.
///
/// Quantities for a key appearing on several lines are summed first; a key
/// absent from a set counts as zero. Positive deltas mean additional
/// reservation, negative mean release. Zero deltas are dropped.
pub fn diff(old: &[(VariantKey, i64)], new: &[(VariantKey, i64)]) -> Vec<StockDelta> {
    let old_map = sum_by_key(old);
    let new_map = sum_by_key(new);

    let mut keys: Vec<&VariantKey> = old_map.keys().chain(new_map.keys()).collect();
    keys.sort_by(|a, b| (a.product_id, &a.size).cmp(&(b.product_id, &b.size)));
    keys.dedup();

    let mut deltas = Vec::new();
    for key in keys {
        let old_qty = old_map.get(key).copied().unwrap_or(0);
        let new_qty = new_map.get(key).copied().unwrap_or(0);
        let delta = new_qty - old_qty;
        if delta != 0 {
            deltas.push(StockDelta {
                key: key.clone(),
                delta,
            });
        }
    }
    deltas
}

fn sum_by_key(lines: &[(VariantKey, i64)]) -> HashMap<VariantKey, i64> {
    let mut map: HashMap<VariantKey, i64> = HashMap::new();
    for (key, qty) in lines {
        *map.entry(key.clone()).or_insert(0) += qty;
    }
    map
}
