// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end signaling through a running relay.
//!
//! Peers connect over WebSocket (`/ws`) or post one-shot messages over HTTP
//! (`/{room_id}/{client_id}`); both surfaces share the same room table.
//!
//! Verification command: `cargo test --test signaling`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rendezvous_proto::signal::{self, ClientMessage, ServerMessage};
use rendezvous_relay::relay::{RelayState, start_server_with_state};
use tokio_tungstenite::tungstenite;

// =============================================================================
// Helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a relay on a random port and returns its address and state.
async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test relay");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send_cmd(ws: &mut WsStream, msg: &ClientMessage) {
    let text = signal::encode_client(msg).unwrap();
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

async fn send_raw(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

fn register(room_id: &str, client_id: &str) -> ClientMessage {
    ClientMessage::Register {
        room_id: room_id.to_string(),
        client_id: client_id.to_string(),
    }
}

/// Connects and registers, then waits until the relay has bound the socket.
async fn connect_and_register(
    addr: std::net::SocketAddr,
    state: &RelayState,
    room_id: &str,
    client_id: &str,
) -> WsStream {
    let before = state.table.open_connection_count();
    let mut ws = connect(addr).await;
    send_cmd(&mut ws, &register(room_id, client_id)).await;
    wait_until(|| state.table.open_connection_count() > before).await;
    ws
}

/// Receives the next server frame, skipping control frames.
async fn recv(ws: &mut WsStream) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .unwrap();
        match frame {
            tungstenite::Message::Text(text) => return signal::decode_server(text.as_str()).unwrap(),
            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Asserts the relay closes the connection without sending anything else.
async fn expect_closed(ws: &mut WsStream) {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("close timed out");
    match frame {
        None | Some(Err(_) | Ok(tungstenite::Message::Close(_))) => {}
        Some(Ok(other)) => panic!("expected close, got {other:?}"),
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn url(addr: std::net::SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

// =============================================================================
// WebSocket relaying
// =============================================================================

#[tokio::test]
async fn websocket_peers_relay_to_each_other() {
    let (addr, state) = start_relay().await;
    let mut alice = connect_and_register(addr, &state, "abc", "1").await;
    let mut bob = connect_and_register(addr, &state, "abc", "2").await;

    send_cmd(
        &mut alice,
        &ClientMessage::Send {
            msg: "offer".to_string(),
        },
    )
    .await;
    assert_eq!(recv(&mut bob).await, ServerMessage::Relay("offer".to_string()));

    send_cmd(
        &mut bob,
        &ClientMessage::Send {
            msg: "answer".to_string(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::Relay("answer".to_string())
    );
}

#[tokio::test]
async fn messages_sent_before_peer_arrives_are_flushed_in_order() {
    let (addr, state) = start_relay().await;
    let mut alice = connect_and_register(addr, &state, "abc", "1").await;

    for msg in ["one", "two", "three"] {
        send_cmd(
            &mut alice,
            &ClientMessage::Send {
                msg: msg.to_string(),
            },
        )
        .await;
    }
    wait_until(|| {
        state
            .table
            .room_snapshot("abc")
            .is_some_and(|room| room.clients.iter().any(|c| c.queued == 3))
    })
    .await;

    let mut bob = connect_and_register(addr, &state, "abc", "2").await;
    for expected in ["one", "two", "three"] {
        assert_eq!(
            recv(&mut bob).await,
            ServerMessage::Relay(expected.to_string())
        );
    }
}

#[tokio::test]
async fn duplicate_register_is_rejected_and_closed() {
    let (addr, state) = start_relay().await;
    let mut ws = connect_and_register(addr, &state, "abc", "1").await;

    send_cmd(&mut ws, &register("abc", "1")).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Error("Duplicated register request".to_string())
    );
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn second_connection_for_bound_client_is_rejected() {
    let (addr, state) = start_relay().await;
    let _first = connect_and_register(addr, &state, "abc", "1").await;

    let mut second = connect(addr).await;
    send_cmd(&mut second, &register("abc", "1")).await;
    assert_eq!(
        recv(&mut second).await,
        ServerMessage::Error("Duplicated registration".to_string())
    );
    expect_closed(&mut second).await;
    assert_eq!(state.table.open_connection_count(), 1);
}

#[tokio::test]
async fn send_before_register_is_rejected_and_closed() {
    let (addr, _state) = start_relay().await;
    let mut ws = connect(addr).await;

    send_raw(&mut ws, r#"{"cmd":"send","msg":"hi"}"#).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Error("Client not registered".to_string())
    );
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn register_without_ids_is_rejected_and_closed() {
    let (addr, state) = start_relay().await;
    let mut ws = connect(addr).await;

    send_raw(&mut ws, r#"{"cmd":"register","roomid":"abc"}"#).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Error(
            "Invalid register request: missing 'clientid' or 'roomid'".to_string()
        )
    );
    expect_closed(&mut ws).await;
    assert_eq!(state.table.room_count(), 0);
}

#[tokio::test]
async fn register_into_full_room_is_rejected_and_closed() {
    let (addr, state) = start_relay().await;
    let _alice = connect_and_register(addr, &state, "abc", "1").await;
    let _bob = connect_and_register(addr, &state, "abc", "2").await;

    let mut carol = connect(addr).await;
    send_cmd(&mut carol, &register("abc", "3")).await;
    assert_eq!(
        recv(&mut carol).await,
        ServerMessage::Error("Max room capacity reached".to_string())
    );
    expect_closed(&mut carol).await;
    assert_eq!(state.table.room_snapshot("abc").unwrap().clients.len(), 2);
}

#[tokio::test]
async fn empty_send_is_rejected_and_closed() {
    let (addr, state) = start_relay().await;
    let mut ws = connect_and_register(addr, &state, "abc", "1").await;

    send_raw(&mut ws, r#"{"cmd":"send","msg":""}"#).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Error("Invalid send request: missing 'msg'".to_string())
    );
    expect_closed(&mut ws).await;
    wait_until(|| state.table.open_connection_count() == 0).await;
}

// =============================================================================
// HTTP one-shot interface
// =============================================================================

#[tokio::test]
async fn http_post_reaches_registered_peer() {
    let (addr, state) = start_relay().await;
    let mut ws = connect_and_register(addr, &state, "abc", "123").await;

    let resp = reqwest::Client::new()
        .post(url(addr, "/abc/456"))
        .body("hello!")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(resp.text().await.unwrap(), "OK\n");

    assert_eq!(recv(&mut ws).await, ServerMessage::Relay("hello!".to_string()));
}

#[tokio::test]
async fn http_post_is_cached_until_peer_registers() {
    let (addr, state) = start_relay().await;

    let resp = reqwest::Client::new()
        .post(url(addr, "/abc/456"))
        .body("hello!")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let room = state.table.room_snapshot("abc").unwrap();
    assert_eq!(room.clients.len(), 1);
    assert_eq!(room.clients[0].id, "456");
    assert_eq!(room.clients[0].queued, 1);

    let mut ws = connect_and_register(addr, &state, "abc", "123").await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Relay("hello!".to_string()));

    let room = state.table.room_snapshot("abc").unwrap();
    let sender = room.clients.iter().find(|c| c.id == "456").unwrap();
    assert_eq!(sender.queued, 0);
}

#[tokio::test]
async fn delete_closes_connection_and_removes_room() {
    let (addr, state) = start_relay().await;
    let mut ws = connect_and_register(addr, &state, "abc", "1").await;

    let resp = reqwest::Client::new()
        .delete(url(addr, "/abc/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "OK\n");

    expect_closed(&mut ws).await;
    assert_eq!(state.table.room_count(), 0);
}

#[tokio::test]
async fn delete_of_unknown_client_succeeds() {
    let (addr, state) = start_relay().await;

    let resp = reqwest::Client::new()
        .delete(url(addr, "/nowhere/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(state.table.room_count(), 0);
}

#[tokio::test]
async fn third_http_client_is_refused() {
    let (addr, state) = start_relay().await;
    let http = reqwest::Client::new();

    for client in ["1", "2"] {
        let resp = http
            .post(url(addr, &format!("/abc/{client}")))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    let resp = http.post(url(addr, "/abc/3")).body("x").send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        resp.text().await.unwrap(),
        "Failed to send the message: Max room capacity reached\n"
    );
    assert_eq!(state.table.room_snapshot("abc").unwrap().clients.len(), 2);
}

#[tokio::test]
async fn empty_body_is_bad_request() {
    let (addr, state) = start_relay().await;

    let resp = reqwest::Client::new()
        .post(url(addr, "/abc/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(state.table.room_count(), 0);
    assert_eq!(state.dashboard.report(0).http_errors, 1);
}

#[tokio::test]
async fn malformed_paths_are_bad_requests() {
    let (addr, state) = start_relay().await;
    let http = reqwest::Client::new();

    for path in ["/abc", "/a/b/c"] {
        let resp = http.post(url(addr, path)).body("x").send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST, "path {path}");
        assert!(resp.text().await.unwrap().starts_with("Invalid path"));
    }
    assert_eq!(state.table.room_count(), 0);
    assert_eq!(state.dashboard.report(0).http_errors, 2);
}

#[tokio::test]
async fn preflight_is_answered_with_cors_headers() {
    let (addr, state) = start_relay().await;

    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, url(addr, "/abc/1"))
        .header("origin", "https://app.example")
        .header("access-control-request-method", "DELETE")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(
        resp.headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("POST, DELETE")
    );
    assert_eq!(state.table.room_count(), 0);
    assert_eq!(state.dashboard.report(0).http_errors, 0);
}

#[tokio::test]
async fn unsupported_method_is_counted_as_http_error() {
    let (addr, state) = start_relay().await;

    let resp = reqwest::get(url(addr, "/abc/1")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(resp.text().await.unwrap(), "Unsupported method: GET\n");
    assert_eq!(state.dashboard.report(0).http_errors, 1);
    assert_eq!(state.table.room_count(), 0);
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test]
async fn status_reports_connections_and_errors() {
    let (addr, state) = start_relay().await;
    let _ws = connect_and_register(addr, &state, "abc", "1").await;

    let http = reqwest::Client::new();
    let resp = http.post(url(addr, "/abc/2")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = http.get(url(addr, "/status")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("GET")
    );

    let report: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(report["openws"], 1);
    assert_eq!(report["totalws"], 1);
    assert_eq!(report["wserrors"], 0);
    assert_eq!(report["httperrors"], 1);
    assert!(report["upsec"].is_number());

    let errlog = report["errlog"].as_array().unwrap();
    assert_eq!(errlog.len(), 1);
    assert_eq!(errlog[0]["e"], "Empty request body");
    assert!(errlog[0]["t"].is_string());
}

// =============================================================================
// Server lifecycle
// =============================================================================

#[tokio::test]
async fn default_server_serves_status() {
    let (addr, _handle) = rendezvous_relay::relay::start_server("127.0.0.1:0")
        .await
        .unwrap();

    let resp = reqwest::get(url(addr, "/status")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let report: rendezvous_proto::status::StatusReport =
        serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(report.open_ws, 0);
    assert!(report.error_log.is_empty());
}

#[tokio::test]
async fn shutdown_signal_stops_the_server() {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let (addr, handle) = rendezvous_relay::relay::start_server_with_shutdown(
        "127.0.0.1:0",
        Arc::new(RelayState::new()),
        async move {
            let _ = rx.await;
        },
    )
    .await
    .unwrap();

    let resp = reqwest::get(url(addr, "/status")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}
