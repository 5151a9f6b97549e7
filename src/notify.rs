//! Notification dispatcher boundary.
//!
//! The dispatcher service itself is external: it renders the confirmation
//! email and the pickup QR image from the snapshot we hand it. Our side is
//! the snapshot payload and the HTTP hand-off. Dispatch happens only after a
//! successful commit, and a dispatch failure is logged and otherwise
//! ignored — it never rolls back or fails the committed order.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{info, warn};

use crate::model::OrderSnapshot;

/// Timeout for dispatcher requests.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What the customer is being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// New order confirmation (with QR payload).
    Confirmation,
    /// An existing order was changed by staff.
    Update,
}

impl NotificationKind {
    fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Confirmation => "confirmation",
            NotificationKind::Update => "update",
        }
    }
}

/// Consumer of finalized order snapshots.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, kind: NotificationKind, snapshot: &OrderSnapshot) -> Result<(), String>;
}

/// Fire a post-commit notification, swallowing failures.
///
/// Called by the transaction coordinator after COMMIT; by contract nothing
/// that happens here may surface as an operation failure.
pub fn dispatch_after_commit(
    notifier: Option<&dyn Notifier>,
    kind: NotificationKind,
    snapshot: &OrderSnapshot,
) {
    let Some(notifier) = notifier else {
        return;
    };
    match notifier.dispatch(kind, snapshot) {
        Ok(()) => info!(
            order_id = snapshot.order_id,
            kind = kind.as_str(),
            "Notification dispatched"
        ),
        Err(e) => warn!(
            order_id = snapshot.order_id,
            kind = kind.as_str(),
            error = %e,
            "Notification dispatch failed (order remains committed)"
        ),
    }
}

// ---------------------------------------------------------------------------
// HTTP notifier
// ---------------------------------------------------------------------------

/// Notifier that POSTs the snapshot to the external dispatcher service.
pub struct HttpNotifier {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl HttpNotifier {
    /// `base_url` is the dispatcher service root, with or without scheme or
    /// trailing slashes.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            endpoint: format!("{}/api/notifications/order", normalize_base_url(base_url)),
            api_key: api_key.trim().to_string(),
            client,
        })
    }
}

impl Notifier for HttpNotifier {
    fn dispatch(&self, kind: NotificationKind, snapshot: &OrderSnapshot) -> Result<(), String> {
        let body = serde_json::json!({
            "kind": kind.as_str(),
            "order": snapshot,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-Bakery-API-Key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| friendly_error(&self.endpoint, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        Ok(())
    }
}

/// Normalise the dispatcher base URL:
/// - strip trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach notification dispatcher at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid dispatcher URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 | 403 => "Dispatcher rejected the API key".to_string(),
        404 => "Dispatcher endpoint not found".to_string(),
        s if s >= 500 => format!("Dispatcher server error (HTTP {s})"),
        s => format!("Unexpected response from dispatcher (HTTP {s})"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
