//! Product catalog: reference data for the order form.
//!
//! Products and their size variants are read-mostly; the only mutable field
//! is a variant's stock count, which the stock ledger owns during order
//! operations and `set_stock` corrects outside them.

use rusqlite::params;
use tracing::info;

use crate::db::DbState;
use crate::model::{Product, ProductVariant, VariantKey};
use crate::stock;

/// List every product with its size variants nested.
pub fn list_products(db: &DbState) -> Result<Vec<Product>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare("SELECT id, name, description, image_url FROM products ORDER BY id")
        .map_err(|e| e.to_string())?;
    let mut products: Vec<Product> = stmt
        .query_map([], |row| {
            Ok(Product {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                image_url: row.get(3)?,
                sizes: Vec::new(),
            })
        })
        .map_err(|e| e.to_string())?
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(
            "SELECT product_id, size, price, stock FROM product_variants
             ORDER BY product_id, size",
        )
        .map_err(|e| e.to_string())?;
    let variants: Vec<ProductVariant> = stmt
        .query_map([], |row| {
            Ok(ProductVariant {
                product_id: row.get(0)?,
                size: row.get(1)?,
                price: row.get(2)?,
                stock: row.get(3)?,
            })
        })
        .map_err(|e| e.to_string())?
        .collect::<Result<_, _>>()
        .map_err(|e| e.to_string())?;

    for variant in variants {
        if let Some(product) = products.iter_mut().find(|p| p.id == variant.product_id) {
            product.sizes.push(variant);
        }
    }

    Ok(products)
}

/// Look up one variant by its composite key.
pub fn find_variant(db: &DbState, key: &VariantKey) -> Result<Option<ProductVariant>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let variant = conn
        .query_row(
            "SELECT product_id, size, price, stock FROM product_variants
             WHERE product_id = ?1 AND size = ?2",
            params![key.product_id, key.size],
            |row| {
                Ok(ProductVariant {
                    product_id: row.get(0)?,
                    size: row.get(1)?,
                    price: row.get(2)?,
                    stock: row.get(3)?,
                })
            },
        )
        .ok();
    Ok(variant)
}

/// Insert a product, returning its id.
pub fn add_product(
    db: &DbState,
    name: &str,
    description: Option<&str>,
    image_url: Option<&str>,
) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO products (name, description, image_url) VALUES (?1, ?2, ?3)",
        params![name, description, image_url],
    )
    .map_err(|e| format!("insert product: {e}"))?;
    Ok(conn.last_insert_rowid())
}

/// Insert or update a size variant.
pub fn add_variant(db: &DbState, key: &VariantKey, price: i64, stock: i64) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO product_variants (product_id, size, price, stock)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(product_id, size) DO UPDATE SET
            price = excluded.price,
            stock = excluded.stock",
        params![key.product_id, key.size, price, stock],
    )
    .map_err(|e| format!("upsert variant: {e}"))?;
    Ok(())
}

/// Staff stock correction: set a variant's stock to an absolute count.
///
/// Recorded in the audit trail with reason `adjust` so corrections are
/// distinguishable from order-driven movements.
pub fn set_stock(db: &DbState, key: &VariantKey, new_stock: i64) -> Result<(), String> {
    if new_stock < 0 {
        return Err("stock cannot be negative".into());
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let current: i64 = conn
        .query_row(
            "SELECT stock FROM product_variants WHERE product_id = ?1 AND size = ?2",
            params![key.product_id, key.size],
            |row| row.get(0),
        )
        .map_err(|_| format!("variant not found: {}/{}", key.product_id, key.size))?;

    conn.execute(
        "UPDATE product_variants SET stock = ?1 WHERE product_id = ?2 AND size = ?3",
        params![new_stock, key.product_id, key.size],
    )
    .map_err(|e| format!("set stock: {e}"))?;
    stock::record_movement(&conn, key, new_stock - current, "adjust", None)?;

    info!(
        product_id = key.product_id,
        size = %key.size,
        from = current,
        to = new_stock,
        "Stock corrected"
    );
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
