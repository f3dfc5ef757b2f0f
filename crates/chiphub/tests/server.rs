//! Integration tests for the hub: real sockets, real clients.

use std::sync::Arc;
use std::time::Duration;

use chiphub::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestHub {
    addr: String,
    rooms: Arc<MemoryRoomRepository>,
    registry: Registry,
}

/// Starts a hub on a random port.
async fn start_hub(config: HubConfig) -> TestHub {
    let rooms = Arc::new(MemoryRoomRepository::new());
    let server = HubServerBuilder::new()
        .config(config)
        .bind("127.0.0.1:0")
        .build(
            NameAuthenticator,
            Arc::clone(&rooms),
            Arc::new(MemoryUserRepository::new()),
        )
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let registry = server.registry();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestHub {
        addr,
        rooms,
        registry,
    }
}

async fn start_default() -> TestHub {
    start_hub(HubConfig::default()).await
}

async fn connect(addr: &str, query: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?{query}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, value: serde_json::Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("send");
}

/// Reads until an event with `action` arrives. Frames may carry several
/// newline-separated events.
async fn expect_action(ws: &mut ClientWs, action: Action) -> Event {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let msg = ws.next().await.expect("stream open").expect("recv");
            let Message::Text(text) = msg else { continue };
            for line in text.as_str().lines() {
                let event: Event = serde_json::from_str(line).expect("decode");
                if event.action == action {
                    return event;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {action} event arrived"))
}

/// Every event that arrives within `window`.
async fn collect_for(ws: &mut ClientWs, window: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                for line in text.as_str().lines() {
                    events.push(serde_json::from_str(line).expect("decode"));
                }
            }
        }
    })
    .await;
    events
}

/// Waits for the server to close the socket.
async fn expect_closed(ws: &mut ClientWs) {
    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection should have been closed");
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_joins_requested_room() {
    let hub = start_default().await;
    let mut ws = connect(&hub.addr, "name=alice&room=lobby").await;

    let joined = expect_action(&mut ws, Action::RoomJoined).await;
    assert_eq!(joined.target_name(), Some("lobby"));
    assert_eq!(joined.pot, Some(0));
    assert_eq!(joined.balance, Some(1000));
}

#[tokio::test]
async fn test_handshake_without_name_is_refused() {
    let hub = start_default().await;
    let mut ws = connect(&hub.addr, "room=lobby").await;

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("close should arrive")
        .expect("stream open")
        .expect("recv");
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
    assert!(hub.registry.list_rooms().await.unwrap().is_empty());
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_chat_is_broadcast_to_room() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice&room=lobby").await;
    expect_action(&mut alice, Action::RoomJoined).await;
    let mut bob = connect(&hub.addr, "name=bob&room=lobby").await;
    expect_action(&mut bob, Action::RoomJoined).await;

    let announced = expect_action(&mut alice, Action::SendMessage).await;
    assert_eq!(announced.message, "bob joined the room");

    send(
        &mut bob,
        json!({"action": "send-message", "message": "hi alice", "target": {"name": "lobby"}}),
    )
    .await;

    let chat = expect_action(&mut alice, Action::SendMessage).await;
    assert_eq!(chat.message, "hi alice");
    let sender = chat.sender.expect("sender stamped");
    assert_eq!(sender.name, "bob");
}

#[tokio::test]
async fn test_sender_field_is_overwritten() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice&room=lobby").await;
    expect_action(&mut alice, Action::RoomJoined).await;

    send(
        &mut alice,
        json!({"action": "send-message", "message": "hello", "sender": {"id": 999, "name": "mallory"}}),
    )
    .await;

    let chat = expect_action(&mut alice, Action::SendMessage).await;
    assert_eq!(chat.sender.map(|s| s.name), Some("alice".to_string()));
}

#[tokio::test]
async fn test_chat_ledger_fields_are_stripped() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice&room=lobby").await;
    expect_action(&mut alice, Action::RoomJoined).await;
    let mut bob = connect(&hub.addr, "name=bob&room=lobby").await;
    expect_action(&mut bob, Action::RoomJoined).await;
    let announced = expect_action(&mut alice, Action::SendMessage).await;
    assert_eq!(announced.message, "bob joined the room");

    send(
        &mut bob,
        json!({"action": "send-message", "message": "trust me", "pot": 999999, "balance": 424242}),
    )
    .await;

    let chat = expect_action(&mut alice, Action::SendMessage).await;
    assert_eq!(chat.message, "trust me");
    assert_eq!(chat.pot, None);
    assert_eq!(chat.balance, None);
}

#[tokio::test]
async fn test_join_and_leave_by_message() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice").await;
    let mut bob = connect(&hub.addr, "name=bob").await;

    send(&mut alice, json!({"action": "join-room", "message": "Poker"})).await;
    let joined = expect_action(&mut alice, Action::RoomJoined).await;
    assert_eq!(joined.target_name(), Some("poker"));

    send(&mut bob, json!({"action": "join-room", "message": "poker"})).await;
    expect_action(&mut bob, Action::RoomJoined).await;
    expect_action(&mut alice, Action::UserJoin).await;

    send(&mut bob, json!({"action": "leave-room", "message": "poker"})).await;
    let left = expect_action(&mut alice, Action::UserLeft).await;
    assert_eq!(left.message, "bob");
    assert_eq!(left.target_name(), Some("poker"));
}

#[tokio::test]
async fn test_pot_operations_update_everyone() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice&room=table").await;
    expect_action(&mut alice, Action::RoomJoined).await;
    let mut bob = connect(&hub.addr, "name=bob&room=table").await;
    expect_action(&mut bob, Action::RoomJoined).await;

    send(&mut alice, json!({"action": "add-pot", "pot": 300})).await;
    for ws in [&mut alice, &mut bob] {
        let update = expect_action(ws, Action::UpdatePot).await;
        assert_eq!(update.pot, Some(300));
        assert_eq!(update.balance, Some(700));
    }

    send(
        &mut alice,
        json!({"action": "retrieve-pot", "pot": 100, "target": {"name": "table"}}),
    )
    .await;
    let update = expect_action(&mut bob, Action::UpdatePot).await;
    assert_eq!(update.pot, Some(200));
    assert_eq!(update.balance, Some(800));

    let room = hub.registry.find_by_name("table").await.unwrap().unwrap();
    let stored = hub.rooms.get(room.room_id()).await.unwrap();
    assert_eq!(stored.pot, 200);
    assert_eq!(stored.balances.get("alice"), Some(&800));
}

#[tokio::test]
async fn test_overdraft_is_rejected() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice&room=table").await;
    expect_action(&mut alice, Action::RoomJoined).await;

    send(&mut alice, json!({"action": "add-pot", "pot": 1500})).await;
    let rejected = expect_action(&mut alice, Action::PotRejected).await;
    assert_eq!(rejected.balance, Some(1000));
    assert_eq!(rejected.pot, Some(0));

    send(&mut alice, json!({"action": "retrieve-pot", "pot": -5})).await;
    expect_action(&mut alice, Action::PotRejected).await;
}

#[tokio::test]
async fn test_pot_without_room_is_rejected() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice").await;

    send(&mut alice, json!({"action": "add-pot", "pot": 10})).await;
    let rejected = expect_action(&mut alice, Action::PotRejected).await;
    assert!(rejected.message.contains("room"));
}

#[tokio::test]
async fn test_private_room_between_two_users() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice").await;
    let mut bob = connect(&hub.addr, "name=bob").await;
    expect_action(&mut alice, Action::UserJoin).await;

    send(&mut alice, json!({"action": "join-room-private", "message": "bob"})).await;
    let joined = expect_action(&mut bob, Action::RoomJoined).await;
    let target = joined.target.expect("target");
    assert!(target.private);

    send(
        &mut bob,
        json!({"action": "send-message", "message": "psst", "target": {"name": target.name}}),
    )
    .await;
    let chat = expect_action(&mut alice, Action::SendMessage).await;
    assert_eq!(chat.message, "psst");
}

#[tokio::test]
async fn test_presence_announces_connect_and_disconnect() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice").await;
    let mut bob = connect(&hub.addr, "name=bob").await;

    let online = expect_action(&mut bob, Action::UserJoin).await;
    assert_eq!(online.message, "alice");
    let joined = expect_action(&mut alice, Action::UserJoin).await;
    assert_eq!(joined.message, "bob");

    bob.close(None).await.unwrap();
    let left = expect_action(&mut alice, Action::UserLeft).await;
    assert_eq!(left.message, "bob");
}

#[tokio::test]
async fn test_burst_of_messages_all_arrive() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice&room=lobby").await;
    expect_action(&mut alice, Action::RoomJoined).await;

    for i in 0..20 {
        send(&mut alice, json!({"action": "send-message", "message": format!("m{i}")})).await;
    }

    let events = collect_for(&mut alice, Duration::from_millis(500)).await;
    let chats: Vec<_> = events
        .iter()
        .filter(|e| e.action == Action::SendMessage)
        .map(|e| e.message.as_str())
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    assert_eq!(chats, expected);
}

// =========================================================================
// Robustness
// =========================================================================

#[tokio::test]
async fn test_malformed_json_keeps_connection_open() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice").await;

    alice.send(Message::text("{not json")).await.unwrap();
    send(&mut alice, json!({"action": "no-such-thing"})).await;
    send(&mut alice, json!({"action": "update-pot", "pot": 1000000})).await;
    send(&mut alice, json!({"action": "join-room", "message": "lobby"})).await;

    let joined = expect_action(&mut alice, Action::RoomJoined).await;
    assert_eq!(joined.pot, Some(0));
}

#[tokio::test]
async fn test_multiline_frame_is_normalized() {
    let hub = start_default().await;
    let mut alice = connect(&hub.addr, "name=alice").await;

    alice
        .send(Message::text("{\"action\":\"join-room\",\r\n\"message\":\"lobby\"}\n"))
        .await
        .unwrap();
    let joined = expect_action(&mut alice, Action::RoomJoined).await;
    assert_eq!(joined.target_name(), Some("lobby"));
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let mut config = HubConfig::default();
    config.transport.max_message_size = 256;
    let hub = start_hub(config).await;
    let mut alice = connect(&hub.addr, "name=alice&room=lobby").await;
    expect_action(&mut alice, Action::RoomJoined).await;

    let huge = json!({"action": "send-message", "message": "x".repeat(1024)});
    let _ = alice.send(Message::text(huge.to_string())).await;

    expect_closed(&mut alice).await;

    // The room emptied and was torn down.
    for _ in 0..100 {
        if hub.registry.find_by_name("lobby").await.unwrap().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room should have been removed");
}

#[tokio::test]
async fn test_idle_socket_does_not_block_other_handshakes() {
    let hub = start_default().await;
    // Opens TCP and never sends the upgrade request.
    let _idle = tokio::net::TcpStream::connect(hub.addr.as_str()).await.expect("tcp connect");

    let joined = tokio::time::timeout(Duration::from_secs(3), async {
        let mut ws = connect(&hub.addr, "name=alice&room=lobby").await;
        expect_action(&mut ws, Action::RoomJoined).await
    })
    .await
    .expect("handshake should not wait on the idle socket");
    assert_eq!(joined.target_name(), Some("lobby"));
}

#[tokio::test]
async fn test_silent_client_is_dropped_after_pong_wait() {
    let mut config = HubConfig::default();
    config.connection = ConnectionConfig::with_pong_wait(Duration::from_millis(200));
    let hub = start_hub(config).await;
    let mut alice = connect(&hub.addr, "name=alice").await;

    // Not reading means tungstenite never answers the server's pings.
    tokio::time::sleep(Duration::from_millis(600)).await;
    expect_closed(&mut alice).await;
}

#[tokio::test]
async fn test_responsive_client_survives_pings() {
    let mut config = HubConfig::default();
    config.connection = ConnectionConfig::with_pong_wait(Duration::from_millis(500));
    let hub = start_hub(config).await;
    let mut alice = connect(&hub.addr, "name=alice").await;

    // Reading lets the client answer every ping.
    collect_for(&mut alice, Duration::from_millis(1200)).await;

    send(&mut alice, json!({"action": "join-room", "message": "lobby"})).await;
    expect_action(&mut alice, Action::RoomJoined).await;
}
