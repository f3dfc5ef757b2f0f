use std::collections::HashMap;
use std::sync::Arc;

use chiphub::prelude::*;

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Registered players must present their token. Anyone else joins as a
/// guest under whatever name they pick.
struct RosterAuth {
    tokens: HashMap<String, String>,
}

impl RosterAuth {
    fn new(roster: &[(&str, &str)]) -> Self {
        let tokens = roster
            .iter()
            .map(|(name, token)| (name.to_lowercase(), token.to_string()))
            .collect();
        Self { tokens }
    }
}

impl Authenticator for RosterAuth {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        let identity = NameAuthenticator.authenticate(credentials).await?;
        match self.tokens.get(&identity.name.to_lowercase()) {
            Some(token) if credentials.token.as_deref() != Some(token.as_str()) => {
                Err(AuthError::Rejected(format!("{} is registered", identity.name)))
            }
            _ => Ok(identity),
        }
    }
}

const ROSTER: &[(&str, &str)] = &[("alice", "ace"), ("bob", "king")];

fn roster_users() -> Vec<UserRecord> {
    ROSTER
        .iter()
        .map(|(name, _)| UserRecord {
            id: name.to_string(),
            username: name.to_string(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

/// Starts the primary hub, plus a second bridged instance sharing the same
/// rooms when `CHIPHUB_PEER_BIND` is set.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    chiphub::init_tracing();

    let bind = std::env::var("CHIPHUB_BIND").unwrap_or_else(|_| "127.0.0.1:8080".into());
    let peer_bind = std::env::var("CHIPHUB_PEER_BIND").ok();

    let rooms = Arc::new(MemoryRoomRepository::new());
    let users = Arc::new(MemoryUserRepository::with_users(roster_users()));
    let broker = Arc::new(LocalBroker::new());

    let primary = HubServerBuilder::new()
        .bind(&bind)
        .build_bridged(
            RosterAuth::new(ROSTER),
            Arc::clone(&rooms),
            Arc::clone(&users),
            Arc::clone(&broker),
        )
        .await?;
    tracing::info!(addr = %primary.local_addr()?, "chip table open");

    if let Some(peer_bind) = peer_bind {
        let peer = HubServerBuilder::new()
            .bind(&peer_bind)
            .build_bridged(RosterAuth::new(ROSTER), rooms, users, broker)
            .await?;
        tracing::info!(addr = %peer.local_addr()?, "peer instance open");
        tokio::spawn(async move {
            if let Err(e) = peer.run().await {
                tracing::error!(error = %e, "peer instance stopped");
            }
        });
    }

    primary.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    fn creds(name: &str, token: Option<&str>) -> Credentials {
        Credentials {
            connection: ConnectionId::new(1),
            name: Some(name.into()),
            token: token.map(str::to_owned),
        }
    }

    /// Two bridged instances over one broker and one room store.
    async fn start_pair() -> (String, String) {
        let rooms = Arc::new(MemoryRoomRepository::new());
        let users = Arc::new(MemoryUserRepository::with_users(roster_users()));
        let broker = Arc::new(LocalBroker::new());

        let mut addrs = Vec::new();
        for _ in 0..2 {
            let server = HubServerBuilder::new()
                .bind("127.0.0.1:0")
                .build_bridged(
                    RosterAuth::new(ROSTER),
                    Arc::clone(&rooms),
                    Arc::clone(&users),
                    Arc::clone(&broker),
                )
                .await
                .unwrap();
            addrs.push(server.local_addr().unwrap().to_string());
            tokio::spawn(async move {
                let _ = server.run().await;
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = addrs.pop().unwrap();
        let first = addrs.pop().unwrap();
        (first, second)
    }

    async fn ws(addr: &str, query: &str) -> Ws {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/?{query}"))
            .await
            .unwrap();
        ws
    }

    async fn recv_action(ws: &mut Ws, action: &str) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let Message::Text(text) = ws.next().await.unwrap().unwrap() else {
                    continue;
                };
                for line in text.as_str().lines() {
                    let value: serde_json::Value = serde_json::from_str(line).unwrap();
                    if value["action"] == action {
                        return value;
                    }
                }
            }
        })
        .await
        .expect("timeout")
    }

    #[tokio::test]
    async fn test_registered_player_needs_token() {
        let auth = RosterAuth::new(ROSTER);
        assert!(auth.authenticate(&creds("alice", Some("ace"))).await.is_ok());
        assert!(auth.authenticate(&creds("Alice", Some("ace"))).await.is_ok());

        let err = auth.authenticate(&creds("alice", None)).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        let err = auth.authenticate(&creds("bob", Some("ace"))).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_guests_need_no_token() {
        let auth = RosterAuth::new(ROSTER);
        let identity = auth.authenticate(&creds("carol", None)).await.unwrap();
        assert_eq!(identity.name, "carol");
    }

    #[tokio::test]
    async fn test_chat_crosses_instances() {
        let (first, second) = start_pair().await;

        let mut alice = ws(&first, "name=alice&token=ace&room=lobby").await;
        recv_action(&mut alice, "room-joined").await;
        let mut carol = ws(&second, "name=carol&room=lobby").await;
        recv_action(&mut carol, "room-joined").await;

        let joined = recv_action(&mut alice, "user-join").await;
        assert_eq!(joined["message"], "carol");

        let chat = serde_json::json!({
            "action": "send-message",
            "message": "deal me in",
            "target": {"name": "lobby"},
        });
        carol.send(Message::text(chat.to_string())).await.unwrap();

        let got = recv_action(&mut alice, "send-message").await;
        assert_eq!(got["message"], "deal me in");
        assert_eq!(got["sender"]["name"], "carol");
    }
}
