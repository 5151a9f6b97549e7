//! Order intake and fulfillment backend for a retail bakery.
//!
//! Customers reserve cake variants for pickup; staff edit order contents and
//! move orders through their status lifecycle. Physical stock stays
//! consistent with outstanding reservations via the stock ledger, the edit
//! reconciliation pass, and the cancellation state machine — all executed
//! inside single SQLite transactions. The HTTP routing, email rendering, and
//! QR encoding around this engine live elsewhere; this crate is the engine
//! and the payload contracts it exposes.

use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod catalog;
pub mod db;
pub mod error;
pub mod model;
pub mod notify;
pub mod orders;
pub mod reconcile;
pub mod status;
pub mod stock;
pub mod timeslots;

pub use error::{OrderError, Result};
pub use model::{LineDraft, Order, OrderDraft, OrderLine, OrderSnapshot, StockDelta, VariantKey};
pub use status::OrderStatus;

/// Initialize structured logging (console + daily rolling file).
///
/// Returns the appender guard; dropping it flushes buffered log lines, so
/// the caller should hold it for the life of the process.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cake_orders=debug"));

    let file_appender = tracing_appender::rolling::daily(log_dir, "orders");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}
