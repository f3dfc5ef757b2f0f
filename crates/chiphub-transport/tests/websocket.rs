//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and a real `tokio-tungstenite` client so
//! frames actually cross a socket.

#[cfg(feature = "websocket")]
mod websocket {
    use chiphub_transport::{
        Connection, Frame, FrameReader, FrameWriter, Pending, Transport,
        TransportConfig, TransportError, WebSocketConnection,
        WebSocketTransport,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds on a random port, connects one client to `path`, and returns
    /// both ends.
    async fn pair(
        config: TransportConfig,
        path: &str,
    ) -> (WebSocketConnection, ClientWs) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0", config)
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let pending = transport.accept().await.expect("should accept");
            pending.upgrade().await.expect("should upgrade")
        });

        let (client, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
                .await
                .expect("client should connect");
        let conn = server.await.expect("task should complete");
        (conn, client)
    }

    #[tokio::test]
    async fn test_accept_records_upgrade_request() {
        let (conn, _client) =
            pair(TransportConfig::default(), "/ws?name=alice&room=lobby").await;

        assert!(conn.id().into_inner() > 0);
        assert_eq!(conn.request().path, "/ws");
        assert_eq!(conn.request().param("name"), Some("alice"));
        assert_eq!(conn.request().param("room"), Some("lobby"));
    }

    #[tokio::test]
    async fn test_split_halves_send_and_receive() {
        let (conn, mut client) = pair(TransportConfig::default(), "/").await;
        let (mut reader, mut writer) = conn.split();

        writer
            .send_text("hello from server".to_string())
            .await
            .expect("send should succeed");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), "hello from server");

        client
            .send(Message::text("hello from client"))
            .await
            .unwrap();
        let frame = reader.recv().await.expect("recv").expect("frame");
        assert_eq!(frame, Frame::Text("hello from client".into()));
    }

    #[tokio::test]
    async fn test_pong_is_surfaced_to_reader() {
        let (conn, mut client) = pair(TransportConfig::default(), "/").await;
        let (mut reader, _writer) = conn.split();

        client.send(Message::Pong(Vec::new().into())).await.unwrap();
        let frame = reader.recv().await.expect("recv").expect("frame");
        assert_eq!(frame, Frame::Pong);
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (conn, mut client) = pair(TransportConfig::default(), "/").await;
        let (mut reader, _writer) = conn.split();

        client.send(Message::Close(None)).await.unwrap();

        let result = reader.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let config = TransportConfig {
            max_message_size: 64,
            ..TransportConfig::default()
        };
        let (conn, mut client) = pair(config, "/").await;
        let (mut reader, _writer) = conn.split();

        client.send(Message::text("x".repeat(1024))).await.unwrap();

        let err = reader.recv().await.expect_err("should exceed the limit");
        assert!(matches!(err, TransportError::FrameTooLarge(_)), "{err}");
    }

    #[tokio::test]
    async fn test_writer_close_sends_close_frame() {
        let (conn, mut client) = pair(TransportConfig::default(), "/").await;
        let (_reader, mut writer) = conn.split();

        writer.close().await.expect("close should succeed");

        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_close());
    }

    #[tokio::test]
    async fn test_reject_sends_policy_close() {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

        let (conn, mut client) = pair(TransportConfig::default(), "/").await;
        let (_reader, mut writer) = conn.split();

        writer.reject("unknown user").await.expect("reject should succeed");

        match client.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Policy);
                assert_eq!(frame.reason.as_str(), "unknown user");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        use std::time::Duration;

        let config = TransportConfig {
            handshake_timeout: Duration::from_millis(100),
            ..TransportConfig::default()
        };
        let mut transport = WebSocketTransport::bind("127.0.0.1:0", config)
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        // Opens the TCP socket and never says anything.
        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();

        let pending = transport.accept().await.expect("should accept");
        let err = pending.upgrade().await.expect_err("should time out");
        assert!(matches!(err, TransportError::HandshakeTimeout(_)), "{err}");
    }

    #[tokio::test]
    async fn test_accept_returns_before_the_upgrade() {
        use std::time::Duration;

        let mut transport =
            WebSocketTransport::bind("127.0.0.1:0", TransportConfig::default())
                .await
                .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), transport.accept())
            .await
            .expect("accept should not wait for a handshake")
            .expect("should accept");
        assert_eq!(first.peer_addr().ip(), addr.ip());

        let client = tokio::spawn(async move {
            tokio_tungstenite::connect_async(format!("ws://{addr}/?name=bob"))
                .await
                .expect("client should connect")
        });
        let second = transport.accept().await.expect("should accept");
        let conn = second.upgrade().await.expect("should upgrade");
        assert_eq!(conn.request().param("name"), Some("bob"));
        drop(client.await.unwrap());
    }
}
