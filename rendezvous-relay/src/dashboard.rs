//! Operational counters and a fixed-size log of recent errors.
//!
//! Independently locked from the room table; [`Dashboard::report`] takes the
//! open connection count as an argument so the two locks are never nested.

use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rendezvous_proto::status::{ErrorEvent, StatusReport};

/// Number of error events retained.
pub const MAX_ERROR_LOG_LEN: usize = 128;

#[derive(Debug, Default)]
struct Counters {
    total_ws: u64,
    ws_errors: u64,
    http_errors: u64,
    /// Ring buffer; once full, `next` is both the write slot and the oldest entry.
    error_log: Vec<ErrorEvent>,
    next: usize,
}

impl Counters {
    fn push_error(&mut self, error: String) {
        let event = ErrorEvent {
            time: Utc::now(),
            error,
        };
        if self.error_log.len() < MAX_ERROR_LOG_LEN {
            self.error_log.push(event);
        } else {
            self.error_log[self.next] = event;
            self.next = (self.next + 1) % MAX_ERROR_LOG_LEN;
        }
    }

    /// Error log in chronological order regardless of the write position.
    fn chronological(&self) -> Vec<ErrorEvent> {
        let mut events = Vec::with_capacity(self.error_log.len());
        events.extend_from_slice(&self.error_log[self.next..]);
        events.extend_from_slice(&self.error_log[..self.next]);
        events
    }
}

/// Thread-safe accumulator backing `GET /status`.
#[derive(Debug)]
pub struct Dashboard {
    started: Instant,
    counters: Mutex<Counters>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters {
                error_log: Vec::with_capacity(MAX_ERROR_LOG_LEN),
                ..Counters::default()
            }),
        }
    }

    /// Counts a successful WebSocket registration.
    pub fn record_registration(&self) {
        self.counters.lock().total_ws += 1;
    }

    /// Counts an error reported over a WebSocket connection and logs it.
    pub fn record_ws_error(&self, error: impl Into<String>) {
        let mut counters = self.counters.lock();
        counters.ws_errors += 1;
        counters.push_error(error.into());
    }

    /// Counts a failed one-shot HTTP request and logs it.
    pub fn record_http_error(&self, error: impl Into<String>) {
        let mut counters = self.counters.lock();
        counters.http_errors += 1;
        counters.push_error(error.into());
    }

    /// Logs a relay-internal fault without touching the peer-facing counters.
    pub fn record_internal_error(&self, error: impl Into<String>) {
        self.counters.lock().push_error(error.into());
    }

    /// Builds a status snapshot.
    #[must_use]
    pub fn report(&self, open_ws: usize) -> StatusReport {
        let counters = self.counters.lock();
        StatusReport {
            uptime_secs: self.started.elapsed().as_secs_f64(),
            open_ws,
            total_ws: counters.total_ws,
            ws_errors: counters.ws_errors,
            http_errors: counters.http_errors,
            error_log: counters.chronological(),
        }
    }
}
