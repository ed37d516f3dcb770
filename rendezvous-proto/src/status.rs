//! JSON shape of the relay's `GET /status` report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded relay error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// When the error was recorded.
    #[serde(rename = "t")]
    pub time: DateTime<Utc>,
    /// Error description.
    #[serde(rename = "e")]
    pub error: String,
}

/// Operational snapshot served by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Seconds since the relay started.
    #[serde(rename = "upsec")]
    pub uptime_secs: f64,
    /// WebSocket connections currently bound to a client.
    #[serde(rename = "openws")]
    pub open_ws: usize,
    /// Successful WebSocket registrations since start.
    #[serde(rename = "totalws")]
    pub total_ws: u64,
    /// Errors reported over WebSocket connections since start.
    #[serde(rename = "wserrors")]
    pub ws_errors: u64,
    /// Failed one-shot HTTP requests since start.
    #[serde(rename = "httperrors")]
    pub http_errors: u64,
    /// Most recent errors, oldest first.
    #[serde(rename = "errlog")]
    pub error_log: Vec<ErrorEvent>,
}
