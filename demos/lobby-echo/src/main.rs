use std::time::Duration;

use hearth::prelude::*;

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// Echoes each message back to its sender. `/who` lists the members and
/// `/all <text>` broadcasts to everyone.
#[derive(Default)]
struct Lobby {
    ticks: u64,
}

impl RoomLogic for Lobby {
    fn on_player_connected(
        &mut self,
        _ctx: &RoomContext,
        player: &Arc<PlayerSession>,
        reconnect: bool,
    ) -> Result<(), RoomFault> {
        let greeting = if reconnect { "welcome back" } else { "welcome" };
        player.send(format!("{greeting}, {}", player.name()));
        Ok(())
    }

    fn on_tick(&mut self, ctx: &RoomContext, _elapsed_secs: f64) -> Result<(), RoomFault> {
        self.ticks += 1;
        ctx.set_status(format!("{} online", ctx.members().len()));
        Ok(())
    }

    fn on_message(
        &mut self,
        ctx: &RoomContext,
        player: &Arc<PlayerSession>,
        bytes: Bytes,
    ) -> Result<(), RoomFault> {
        let text = String::from_utf8_lossy(&bytes);
        if text == "/who" {
            let names: Vec<String> = ctx.members().iter().map(|p| p.name().to_owned()).collect();
            player.send(names.join(","));
        } else if let Some(rest) = text.strip_prefix("/all ") {
            ctx.broadcast(format!("{}: {rest}", player.name()));
        } else {
            player.send(bytes);
        }
        Ok(())
    }

    fn on_server_command(&mut self, ctx: &RoomContext, text: &str) -> Result<(), RoomFault> {
        ctx.broadcast(format!("server: {text}"));
        Ok(())
    }

    fn on_stop(&mut self, ctx: &RoomContext) -> Result<(), RoomFault> {
        tracing::info!(room_id = %ctx.id(), ticks = self.ticks, "lobby closed");
        Ok(())
    }
}

fn lobby_config() -> RoomConfig {
    RoomConfig {
        tick_interval: Duration::from_secs(1),
        max_players: 1000,
        wait_for_min_players: false,
        status: "open".into(),
        ..RoomConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Development authenticator: the first message is the player's uid.
struct UidAuth;

impl Authenticator for UidAuth {
    async fn authenticate(&self, payload: &[u8]) -> Result<Identity, SessionError> {
        let uid = std::str::from_utf8(payload)
            .map_err(|_| SessionError::AuthFailed("uid must be UTF-8".into()))?
            .trim();
        if uid.is_empty() {
            return Err(SessionError::AuthFailed("empty uid".into()));
        }
        Ok(Identity::new(uid).with_name(uid))
    }
}

async fn build(addr: &str, tls: Option<TlsSettings>) -> Result<HearthServer<UidAuth>, HearthError> {
    let mut builder = HearthServer::<UidAuth>::builder()
        .bind(addr)
        .room("lobby", lobby_config(), Lobby::default)
        .default_kind("lobby");
    if let Some(tls) = tls {
        builder = builder.tls(tls);
    }
    builder.build(UidAuth).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    hearth::init_tracing();

    let addr = std::env::var("HEARTH_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let tls = match std::env::var("HEARTH_TLS").as_deref() {
        Ok("self-signed") => Some(TlsSettings::self_signed(&["localhost"])?),
        _ => None,
    };

    let server = build(&addr, tls).await?;
    tracing::info!(addr = %server.local_addr(), "lobby-echo listening");

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
        }
        shutdown.shutdown();
    });

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn start() -> String {
        let server = build("127.0.0.1:0", None).await.unwrap();
        let addr = server.local_addr().to_string();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn join(addr: &str, uid: &str) -> Ws {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        ws.send(Message::text(uid)).await.unwrap();
        ws
    }

    async fn recv(ws: &mut Ws) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        String::from_utf8(msg.into_data().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_welcome_and_echo() {
        let addr = start().await;
        let mut ws = join(&addr, "ada").await;
        assert_eq!(recv(&mut ws).await, "welcome, ada");

        ws.send(Message::text("ping")).await.unwrap();
        assert_eq!(recv(&mut ws).await, "ping");
    }

    #[tokio::test]
    async fn test_who_and_broadcast() {
        let addr = start().await;
        let mut ada = join(&addr, "ada").await;
        assert_eq!(recv(&mut ada).await, "welcome, ada");
        let mut bo = join(&addr, "bo").await;
        assert_eq!(recv(&mut bo).await, "welcome, bo");

        bo.send(Message::text("/who")).await.unwrap();
        assert_eq!(recv(&mut bo).await, "ada,bo");

        ada.send(Message::text("/all hello")).await.unwrap();
        assert_eq!(recv(&mut ada).await, "ada: hello");
        assert_eq!(recv(&mut bo).await, "ada: hello");
    }

    #[tokio::test]
    async fn test_reconnect_is_welcomed_back() {
        let addr = start().await;
        let mut first = join(&addr, "cy").await;
        assert_eq!(recv(&mut first).await, "welcome, cy");
        drop(first);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut second = join(&addr, "cy").await;
        assert_eq!(recv(&mut second).await, "welcome back, cy");
    }
}
