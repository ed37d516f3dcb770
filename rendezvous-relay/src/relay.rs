//! Relay server: shared state, router, and the WebSocket session.
//!
//! A WebSocket peer first sends `register` to bind its connection to a
//! (room, client) slot, then any number of `send` commands whose payloads are
//! relayed to the other client of the room or queued until it arrives.
//! Protocol violations are answered with an `{error}` frame and the
//! connection is closed; relay refusals such as a full room are reported but
//! the connection stays open.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::signal::{self, ClientMessage, ServerMessage};

use crate::bye::{ByeNotifier, HttpByeNotifier, NoopByeNotifier};
use crate::config::RelayConfig;
use crate::dashboard::Dashboard;
use crate::http;
use crate::sink::{self, Sink};
use crate::table::{RoomTable, TableConfig};

/// Default number of frames buffered per connection before delivery fails.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 2048;

/// How long a closing connection may take to flush its last frames.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared relay server state: the room table and the dashboard.
pub struct RelayState {
    /// Room/client registry.
    pub table: RoomTable,
    /// Counters and error log served by `GET /status`.
    pub dashboard: Arc<Dashboard>,
    /// Frames buffered per connection.
    outbound_buffer: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with default limits and no room server.
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(
            RoomTable::new(TableConfig::default(), Arc::new(NoopByeNotifier)),
            Arc::new(Dashboard::new()),
            DEFAULT_OUTBOUND_BUFFER,
        )
    }

    /// Creates a relay state from a resolved configuration. Bye notifications
    /// go to the configured room server, if any.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        let dashboard = Arc::new(Dashboard::new());
        let notifier: Arc<dyn ByeNotifier> = if config.room_server.is_empty() {
            Arc::new(NoopByeNotifier)
        } else {
            Arc::new(HttpByeNotifier::new(
                &config.room_server,
                Some(Arc::clone(&dashboard)),
            ))
        };
        let table = RoomTable::new(
            TableConfig {
                register_timeout: Duration::from_secs(config.register_timeout_secs),
                max_queued: config.max_queue_size,
            },
            notifier,
        );
        Self::with_table(table, dashboard, config.outbound_buffer)
    }

    /// Creates a relay state around an existing table and dashboard.
    #[must_use]
    pub const fn with_table(
        table: RoomTable,
        dashboard: Arc<Dashboard>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            table,
            dashboard,
            outbound_buffer,
        }
    }
}

/// The (room, client) slot a connection registered for.
#[derive(Debug, Clone)]
struct Binding {
    room_id: String,
    client_id: String,
}

/// Protocol state of one WebSocket connection.
struct Session {
    sink: Sink,
    state: Arc<RelayState>,
    binding: Option<Binding>,
}

impl Session {
    const fn new(sink: Sink, state: Arc<RelayState>) -> Self {
        Self {
            sink,
            state,
            binding: None,
        }
    }

    /// Reads frames until the peer disconnects or violates the protocol.
    async fn run(
        &mut self,
        receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    ) {
        while let Some(frame) = receiver.next().await {
            let flow = match frame {
                Ok(Message::Text(text)) => self.handle_text(text.as_str()),
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.handle_text(text),
                    Err(_) => self.fatal("Invalid message: frame is not UTF-8"),
                },
                Ok(Message::Close(_)) => ControlFlow::Break(()),
                Ok(Message::Ping(_) | Message::Pong(_)) => ControlFlow::Continue(()),
                Err(e) => {
                    tracing::warn!(error = %e, "websocket receive error");
                    self.state
                        .dashboard
                        .record_ws_error(format!("websocket receive error: {e}"));
                    ControlFlow::Break(())
                }
            };
            if flow.is_break() {
                break;
            }
        }
    }

    fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let msg = match signal::decode_client(text) {
            Ok(msg) => msg,
            Err(e) => return self.fatal(&e.to_string()),
        };

        match msg {
            ClientMessage::Register { room_id, client_id } => {
                if self.binding.is_some() {
                    return self.fatal("Duplicated register request");
                }
                if let Err(e) = self
                    .state
                    .table
                    .register(&room_id, &client_id, self.sink.clone())
                {
                    return self.fatal(&e.to_string());
                }
                tracing::info!(room_id = %room_id, client_id = %client_id, "websocket registered");
                self.state.dashboard.record_registration();
                self.binding = Some(Binding { room_id, client_id });
            }
            ClientMessage::Send { msg } => {
                let Some(binding) = &self.binding else {
                    return self.fatal("Client not registered");
                };
                if let Err(e) = self
                    .state
                    .table
                    .send(&binding.room_id, &binding.client_id, msg)
                {
                    if e.is_internal() {
                        tracing::error!(
                            room_id = %binding.room_id,
                            client_id = %binding.client_id,
                            error = %e,
                            "relay fault while routing message"
                        );
                        self.state.dashboard.record_internal_error(e.to_string());
                    } else {
                        self.report(&format!("Failed to send the message: {e}"));
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Sends an error frame to the peer and counts it.
    fn report(&self, error: &str) {
        tracing::warn!(error = %error, "reporting error to websocket peer");
        self.state.dashboard.record_ws_error(error);
        if let Err(e) = self.sink.deliver(ServerMessage::Error(error.to_string())) {
            tracing::debug!(error = %e, "could not deliver error frame");
        }
    }

    /// Reports `error` and ends the session.
    fn fatal(&self, error: &str) -> ControlFlow<()> {
        self.report(error);
        ControlFlow::Break(())
    }

    /// Unbinds the connection from its client, if it is still the bound one,
    /// and asks the writer to close the socket.
    fn finish(&self) {
        if let Some(binding) = &self.binding {
            self.state
                .table
                .deregister_sink(&binding.room_id, &binding.client_id, self.sink.id());
        }
        self.sink.close();
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// A writer task drains the connection's [`Sink`] onto the socket while the
/// session reads commands. The connection ends when the peer disconnects,
/// violates the protocol, or the relay closes the sink (explicit removal).
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (sink, mut frames) = sink::channel(state.outbound_buffer);

    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match signal::encode_server(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode server frame");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::warn!(error = %e, "websocket write failed");
                return;
            }
        }
        if let Err(e) = ws_sender.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "websocket close frame not sent");
        }
    });

    let mut session = Session::new(sink, state);
    let writer_done = tokio::select! {
        () = session.run(&mut ws_receiver) => false,
        _ = &mut write_task => true,
    };

    session.finish();
    if !writer_done
        && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut write_task)
            .await
            .is_err()
    {
        write_task.abort();
    }
    tracing::debug!("websocket connection closed");
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops accepting connections once `shutdown`
/// resolves. The returned handle completes when in-flight requests finish.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Builds the relay's routes.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/status", axum::routing::get(http::status))
        .route(
            "/{room_id}/{client_id}",
            axum::routing::post(http::post_message)
                .delete(http::delete_client)
                .options(http::preflight)
                .fallback(http::unsupported_method),
        )
        .fallback(http::invalid_path)
        .with_state(state)
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
