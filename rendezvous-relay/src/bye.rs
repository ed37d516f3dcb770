//! Best-effort "bye" notifications to the external room server.

use std::sync::Arc;

use crate::dashboard::Dashboard;

/// Receives a notification whenever a client is removed from a room.
///
/// Called while the room table lock is held, so implementations must not
/// block; the HTTP implementation spawns the request and returns.
pub trait ByeNotifier: Send + Sync {
    /// Reports that `client_id` left `room_id`.
    fn notify_bye(&self, room_id: &str, client_id: &str);
}

/// Posts `{base}/bye/{room_id}/{client_id}` with an empty body.
///
/// Failures are logged and recorded on the dashboard; there are no retries.
pub struct HttpByeNotifier {
    http: reqwest::Client,
    base_url: String,
    dashboard: Option<Arc<Dashboard>>,
}

impl HttpByeNotifier {
    #[must_use]
    pub fn new(base_url: &str, dashboard: Option<Arc<Dashboard>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dashboard,
        }
    }

    /// URL notified when `client_id` leaves `room_id`.
    #[must_use]
    pub fn bye_url(&self, room_id: &str, client_id: &str) -> String {
        format!("{}/bye/{room_id}/{client_id}", self.base_url)
    }
}

impl ByeNotifier for HttpByeNotifier {
    fn notify_bye(&self, room_id: &str, client_id: &str) {
        let url = self.bye_url(room_id, client_id);
        let request = self.http.post(&url).header("content-type", "text");
        let dashboard = self.dashboard.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(url = %url, "no runtime available, bye not sent");
            return;
        };
        runtime.spawn(async move {
            let result = request
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            match result {
                Ok(_) => tracing::debug!(url = %url, "bye delivered to room server"),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "failed to post bye to room server");
                    if let Some(dashboard) = dashboard {
                        dashboard.record_internal_error(format!(
                            "Failed to post BYE to room server {url}: {e}"
                        ));
                    }
                }
            }
        });
    }
}

/// Discards notifications. Used when no room server is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopByeNotifier;

impl ByeNotifier for NoopByeNotifier {
    fn notify_bye(&self, _room_id: &str, _client_id: &str) {}
}
