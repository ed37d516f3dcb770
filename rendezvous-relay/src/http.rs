//! One-shot HTTP interface.
//!
//! - `POST /{room_id}/{client_id}` with the message as raw body sends it on
//!   behalf of `client_id`, creating room and client if needed.
//! - `DELETE /{room_id}/{client_id}` removes the client and closes its
//!   connection. Always succeeds.
//! - `OPTIONS /{room_id}/{client_id}` answers the CORS preflight.
//! - `GET /status` returns the dashboard report.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::RelayError;
use crate::relay::RelayState;

const CLIENT_METHODS: &str = "POST, DELETE";
const STATUS_METHODS: &str = "GET";

/// Failures of a one-shot request.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The path is not `/{room_id}/{client_id}`.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    /// The method is not served on `/{room_id}/{client_id}`.
    #[error("Unsupported method: {0}")]
    MethodNotAllowed(String),
    /// The POST body is not UTF-8 text.
    #[error("Failed to read request body: {0}")]
    UnreadableBody(#[from] std::str::Utf8Error),
    /// The POST body is empty.
    #[error("Empty request body")]
    EmptyBody,
    /// The room table refused the message.
    #[error("Failed to send the message: {0}")]
    Send(#[from] RelayError),
}

impl HttpError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPath(_) | Self::UnreadableBody(_) | Self::EmptyBody => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Send(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the requester. Relay-internal faults are not described.
    fn body(&self) -> String {
        match self {
            Self::Send(e) if e.is_internal() => "Internal relay error\n".to_string(),
            other => format!("{other}\n"),
        }
    }
}

fn cors(methods: &'static str) -> [(header::HeaderName, &'static str); 2] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, methods),
    ]
}

/// Records the failure on the dashboard and renders it.
fn fail(state: &RelayState, err: &HttpError) -> Response {
    if let HttpError::Send(e) = err
        && e.is_internal()
    {
        tracing::error!(error = %e, "relay fault while handling http request");
    } else {
        tracing::warn!(error = %err, "http request failed");
    }
    state.dashboard.record_http_error(err.to_string());
    (err.status(), cors(CLIENT_METHODS), err.body()).into_response()
}

fn ok() -> Response {
    (StatusCode::OK, cors(CLIENT_METHODS), "OK\n").into_response()
}

/// `POST /{room_id}/{client_id}`: sends the body as a message from `client_id`.
pub async fn post_message(
    State(state): State<Arc<RelayState>>,
    Path((room_id, client_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    match send_body(&state, &room_id, &client_id, &body) {
        Ok(()) => ok(),
        Err(e) => fail(&state, &e),
    }
}

fn send_body(
    state: &RelayState,
    room_id: &str,
    client_id: &str,
    body: &[u8],
) -> Result<(), HttpError> {
    let msg = std::str::from_utf8(body)?;
    if msg.is_empty() {
        return Err(HttpError::EmptyBody);
    }
    state.table.send(room_id, client_id, msg.to_string())?;
    tracing::debug!(room_id = %room_id, client_id = %client_id, "message accepted over http");
    Ok(())
}

/// `DELETE /{room_id}/{client_id}`: removes the client and its queue.
pub async fn delete_client(
    State(state): State<Arc<RelayState>>,
    Path((room_id, client_id)): Path<(String, String)>,
) -> Response {
    state.table.remove(&room_id, &client_id);
    ok()
}

/// `OPTIONS /{room_id}/{client_id}`: CORS preflight for browser peers.
pub async fn preflight() -> Response {
    (StatusCode::OK, cors(CLIENT_METHODS)).into_response()
}

/// Any other method on `/{room_id}/{client_id}`.
pub async fn unsupported_method(
    State(state): State<Arc<RelayState>>,
    method: Method,
) -> Response {
    fail(&state, &HttpError::MethodNotAllowed(method.to_string()))
}

/// Any path that is not a known route.
pub async fn invalid_path(State(state): State<Arc<RelayState>>, uri: Uri) -> Response {
    fail(&state, &HttpError::InvalidPath(uri.path().to_string()))
}

/// `GET /status`: dashboard report as JSON.
pub async fn status(State(state): State<Arc<RelayState>>) -> Response {
    let open_ws = state.table.open_connection_count();
    let report = state.dashboard.report(open_ws);
    (cors(STATUS_METHODS), Json(report)).into_response()
}
