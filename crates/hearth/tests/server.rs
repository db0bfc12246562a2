//! Integration tests for the full server: builder, transport, sessions,
//! rooms and shutdown.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hearth::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Test room and authenticator
// =========================================================================

/// Relays every message to all members, prefixed with the sender's name.
struct Chat;

impl RoomLogic for Chat {
    fn on_player_connected(
        &mut self,
        ctx: &RoomContext,
        player: &Arc<PlayerSession>,
        reconnect: bool,
    ) -> Result<(), RoomFault> {
        if !reconnect {
            ctx.broadcast(format!("joined {}", player.name()));
        }
        Ok(())
    }

    fn on_message(
        &mut self,
        ctx: &RoomContext,
        player: &Arc<PlayerSession>,
        bytes: Bytes,
    ) -> Result<(), RoomFault> {
        let text = String::from_utf8_lossy(&bytes);
        ctx.broadcast(format!("{}: {text}", player.name()));
        Ok(())
    }
}

/// The payload is the player's name and uid.
struct NameAuth;

impl Authenticator for NameAuth {
    async fn authenticate(&self, payload: &[u8]) -> Result<Identity, SessionError> {
        let name = std::str::from_utf8(payload)
            .map_err(|_| SessionError::AuthFailed("name must be UTF-8".into()))?;
        if name.is_empty() {
            return Err(SessionError::AuthFailed("empty name".into()));
        }
        Ok(Identity::new(name).with_name(name))
    }
}

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn start() -> (String, ShutdownHandle, tokio::task::JoinHandle<Result<(), HearthError>>) {
    let server = HearthServer::<NameAuth>::builder()
        .bind("127.0.0.1:0")
        .transport_config(TransportConfig {
            poll_interval: Duration::from_millis(10),
            ..TransportConfig::default()
        })
        .room(
            "chat",
            RoomConfig {
                wait_for_min_players: false,
                ..RoomConfig::default()
            },
            || Chat,
        )
        .default_kind("chat")
        .build(NameAuth)
        .await
        .unwrap();
    let addr = server.local_addr().to_string();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());
    (addr, shutdown, task)
}

async fn ws(addr: &str, name: &str) -> Ws {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    ws.send(Message::text(name)).await.unwrap();
    ws
}

async fn recv_text(ws: &mut Ws) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("websocket error");
    String::from_utf8(msg.into_data().to_vec()).unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_players_meet_in_default_room() {
    let (addr, _shutdown, _task) = start().await;

    let mut alice = ws(&addr, "alice").await;
    assert_eq!(recv_text(&mut alice).await, "joined alice");

    let mut bob = ws(&addr, "bob").await;
    assert_eq!(recv_text(&mut bob).await, "joined bob");
    assert_eq!(recv_text(&mut alice).await, "joined bob");

    bob.send(Message::text("hi")).await.unwrap();
    assert_eq!(recv_text(&mut alice).await, "bob: hi");
    assert_eq!(recv_text(&mut bob).await, "bob: hi");
}

#[tokio::test]
async fn test_status_endpoint_lists_rooms() {
    let (addr, _shutdown, _task) = start().await;

    let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
    stream
        .write_all(b"GET /rooms HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();

    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    let rooms: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(rooms.as_array().unwrap().len(), 1);
    assert_eq!(rooms[0]["kind"], "chat");
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_returns() {
    let (addr, shutdown, task) = start().await;

    let mut alice = ws(&addr, "alice").await;
    assert_eq!(recv_text(&mut alice).await, "joined alice");

    shutdown.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());

    let next = tokio::time::timeout(Duration::from_secs(5), alice.next())
        .await
        .expect("client should see the close");
    assert!(!matches!(next, Some(Ok(Message::Binary(_)))));

    assert!(tokio::net::TcpStream::connect(&addr).await.is_err());
}

#[tokio::test]
async fn test_build_fails_for_unknown_default_kind() {
    let result = HearthServer::<NameAuth>::builder()
        .bind("127.0.0.1:0")
        .default_kind("missing")
        .build(NameAuth)
        .await;
    assert!(matches!(result, Err(HearthError::Room(_))));
}

#[tokio::test]
async fn test_build_fails_for_bad_address() {
    let result = HearthServer::<NameAuth>::builder()
        .bind("not an address")
        .build(NameAuth)
        .await;
    assert!(matches!(result, Err(HearthError::Transport(_))));
}
