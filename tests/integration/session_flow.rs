//! End-to-end tests for the room join/leave lifecycle over real WebSockets.
//!
//! Covers the greeting, room creation, the peer-joined fan-out, departure
//! notifications with promotion, and the observability side-channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts the server in-process on an OS-assigned port.
async fn start_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    matchpoint_server::relay::start_server("127.0.0.1:0")
        .await
        .expect("failed to start server")
}

/// Connects a WebSocket client and consumes the `connected` greeting.
async fn connect(addr: std::net::SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let greeting = recv_json(&mut ws).await;
    assert_eq!(greeting["type"], "connected");
    ws
}

async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

async fn recv_text(ws: &mut WsClient) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .expect("connection closed")
        .unwrap();
    msg.into_text().unwrap().to_string()
}

async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    serde_json::from_str(&recv_text(ws).await).unwrap()
}

/// Joins a room and returns the server's first response.
async fn join(ws: &mut WsClient, code: &str) -> serde_json::Value {
    send_text(ws, &format!(r#"{{"type":"join","code":"{code}"}}"#)).await;
    recv_json(ws).await
}

#[tokio::test]
async fn greeting_is_sent_once_on_connect() {
    let (addr, _handle) = start_server().await;

    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let greeting = recv_json(&mut ws).await;
    assert_eq!(greeting, serde_json::json!({"type": "connected"}));
}

#[tokio::test]
async fn create_then_join_with_peer_joined_fanout() {
    let (addr, _handle) = start_server().await;

    let mut alice = connect(addr).await;
    let created = join(&mut alice, "ABC123").await;
    assert_eq!(created["type"], "room-created");
    assert_eq!(created["code"], "ABC123");
    assert_eq!(created["role"], "primary");

    let mut bob = connect(addr).await;
    let joined = join(&mut bob, "ABC123").await;
    assert_eq!(joined["type"], "room-joined");
    assert_eq!(joined["code"], "ABC123");
    assert_eq!(joined["role"], "secondary");

    // Both sides learn the room is now full.
    assert_eq!(recv_json(&mut bob).await["type"], "peer-joined");
    assert_eq!(recv_json(&mut alice).await["type"], "peer-joined");
}

#[tokio::test]
async fn third_join_is_rejected_with_room_full() {
    let (addr, _handle) = start_server().await;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "FULL01").await;
    join(&mut bob, "FULL01").await;

    let mut carol = connect(addr).await;
    let response = join(&mut carol, "FULL01").await;
    assert_eq!(response["type"], "error");
    assert_eq!(response["message"], "room is full");
}

#[tokio::test]
async fn wrong_length_code_is_rejected() {
    let (addr, _handle) = start_server().await;

    let mut alice = connect(addr).await;
    let response = join(&mut alice, "ABC").await;
    assert_eq!(response["type"], "error");
    assert!(
        response["message"]
            .as_str()
            .unwrap()
            .contains("6 characters")
    );
}

#[tokio::test]
async fn disconnect_notifies_peer_and_promotes() {
    let (addr, _handle) = start_server().await;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "XYZ789").await;
    join(&mut bob, "XYZ789").await;
    let _ = recv_json(&mut alice).await; // peer-joined
    let _ = recv_json(&mut bob).await; // peer-joined

    // The primary departs; the secondary is promoted and keeps the code.
    alice.close(None).await.unwrap();
    assert_eq!(recv_json(&mut bob).await["type"], "peer-left");

    // A newcomer fills the secondary slot of the surviving room.
    let mut carol = connect(addr).await;
    let joined = join(&mut carol, "XYZ789").await;
    assert_eq!(joined["type"], "room-joined");
    assert_eq!(joined["role"], "secondary");
}

#[tokio::test]
async fn lone_primary_disconnect_frees_the_code() {
    let (addr, _handle) = start_server().await;

    let mut alice = connect(addr).await;
    join(&mut alice, "GONE42").await;
    alice.close(None).await.unwrap();

    // Give the server a moment to process the close.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut bob = connect(addr).await;
    let response = join(&mut bob, "GONE42").await;
    assert_eq!(response["type"], "room-created");
    assert_eq!(response["role"], "primary");
}

/// Issues a plain HTTP GET against the server and returns the response body.
async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let (_headers, body) = response.split_once("\r\n\r\n").unwrap();
    body.to_string()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (addr, _handle) = start_server().await;

    let body = http_get(addr, "/healthz").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn stats_reflect_rooms_and_sessions() {
    let (addr, _handle) = start_server().await;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "STAT01").await;
    join(&mut bob, "STAT01").await;

    let body = http_get(addr, "/stats").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["rooms"], 1);
    assert_eq!(json["sessions"], 2);
    assert_eq!(json["connections"], 2);
}
