//! Order status codes and the transition rule for stock side effects.
//!
//! `cancelled` is the only status whose entry or exit touches stock; every
//! other pairwise transition is a pure metadata change. The effect is
//! computed solely from the (previous, next) pair, so repeated
//! cancel/reactivate cycles behave the same every time.

use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// The five recognized order statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    /// Placed, not yet paid in person.
    Pending,
    PaidOnline,
    PaidInStore,
    Fulfilled,
    /// Soft-delete terminal state; stock fully restored while here.
    Cancelled,
}

impl OrderStatus {
    /// Wire/storage code for this status.
    pub fn as_code(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaidOnline => "paid-online",
            OrderStatus::PaidInStore => "paid-in-store",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a wire/storage code. Unknown codes are `InvalidStatus`.
    pub fn parse(code: &str) -> Result<Self, OrderError> {
        match code.trim() {
            "pending" => Ok(OrderStatus::Pending),
            "paid-online" => Ok(OrderStatus::PaidOnline),
            "paid-in-store" => Ok(OrderStatus::PaidInStore),
            "fulfilled" => Ok(OrderStatus::Fulfilled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::InvalidStatus(other.to_string())),
        }
    }

    pub fn is_cancelled(self) -> bool {
        self == OrderStatus::Cancelled
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Stock side effect of a status transition, applied to the order's full
/// current line set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// No endpoint is `cancelled` (or both are): metadata-only change.
    None,
    /// Entering `cancelled`: release every line quantity.
    ReleaseAll,
    /// Leaving `cancelled`: re-reserve every line quantity.
    ReserveAll,
}

/// Compute the stock effect of moving from `previous` to `next`.
pub fn transition_effect(previous: OrderStatus, next: OrderStatus) -> StockEffect {
    match (previous.is_cancelled(), next.is_cancelled()) {
        (false, true) => StockEffect::ReleaseAll,
        (true, false) => StockEffect::ReserveAll,
        _ => StockEffect::None,
    }
}
