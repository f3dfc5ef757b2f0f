//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::{
    Connection, ConnectionId, Frame, FrameReader, FrameWriter, Pending,
    Transport, TransportConfig, TransportError, UpgradeRequest,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: TransportConfig,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(
        addr: &str,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener, config })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.config.max_message_size);
        config.max_frame_size = Some(self.config.max_message_size);
        config
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingWebSocket;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Pending, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        Ok(PendingWebSocket {
            stream,
            addr,
            ws_config: self.ws_config(),
            write_wait: self.config.write_wait,
            handshake_timeout: self.config.handshake_timeout,
        })
    }
}

/// A TCP socket taken off the listener, not yet upgraded.
pub struct PendingWebSocket {
    stream: TcpStream,
    addr: SocketAddr,
    ws_config: WebSocketConfig,
    write_wait: Duration,
    handshake_timeout: Duration,
}

impl PendingWebSocket {
    /// The remote address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Pending for PendingWebSocket {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn upgrade(self) -> Result<Self::Connection, Self::Error> {
        let Self {
            stream,
            addr,
            ws_config,
            write_wait,
            handshake_timeout,
        } = self;

        // The callback runs during the upgrade; it only records the
        // request target so the handshake can read the query string.
        let (target_tx, target_rx) = oneshot::channel::<String>();
        let callback = move |req: &Request,
                             resp: Response|
              -> Result<Response, ErrorResponse> {
            let _ = target_tx.send(req.uri().to_string());
            Ok(resp)
        };

        let upgrade = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(ws_config),
        );
        let ws = match tokio::time::timeout(handshake_timeout, upgrade).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                return Err(TransportError::UpgradeFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                )));
            }
            Err(_) => {
                tracing::debug!(%addr, "peer never finished the upgrade");
                return Err(TransportError::HandshakeTimeout(handshake_timeout));
            }
        };

        let target = target_rx.await.unwrap_or_default();
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, %target, "accepted WebSocket connection");

        Ok(WebSocketConnection {
            id,
            request: UpgradeRequest::from_target(&target),
            ws,
            write_wait,
        })
    }
}

/// A single upgraded WebSocket connection.
#[derive(Debug)]
pub struct WebSocketConnection {
    id: ConnectionId,
    request: UpgradeRequest,
    ws: WsStream,
    write_wait: Duration,
}

impl Connection for WebSocketConnection {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    fn split(self) -> (WsReader, WsWriter) {
        let (sink, stream) = self.ws.split();
        (
            WsReader {
                id: self.id,
                stream,
            },
            WsWriter {
                id: self.id,
                sink,
                write_wait: self.write_wait,
            },
        )
    }
}

/// Read half of a WebSocket connection.
pub struct WsReader {
    id: ConnectionId,
    stream: SplitStream<WsStream>,
}

impl FrameReader for WsReader {
    type Error = TransportError;

    async fn recv(&mut self) -> Result<Option<Frame>, Self::Error> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Text(
                        String::from_utf8_lossy(&data).into_owned(),
                    )));
                }
                Some(Ok(Message::Pong(_))) => return Ok(Some(Frame::Pong)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::Capacity(e))) => {
                    tracing::warn!(id = %self.id, error = %e, "inbound frame over limit");
                    return Err(TransportError::FrameTooLarge(e.to_string()));
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }
}

/// Write half of a WebSocket connection.
pub struct WsWriter {
    id: ConnectionId,
    sink: SplitSink<WsStream, Message>,
    write_wait: Duration,
}

impl WsWriter {
    async fn write(&mut self, msg: Message) -> Result<(), TransportError> {
        match tokio::time::timeout(self.write_wait, self.sink.send(msg)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
            Err(_) => Err(TransportError::WriteTimeout(self.write_wait)),
        }
    }
}

impl FrameWriter for WsWriter {
    type Error = TransportError;

    async fn send_text(&mut self, text: String) -> Result<(), Self::Error> {
        self.write(Message::text(text)).await
    }

    async fn ping(&mut self) -> Result<(), Self::Error> {
        self.write(Message::Ping(Vec::new().into())).await
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        match tokio::time::timeout(self.write_wait, self.sink.close()).await {
            Ok(Ok(()))
            | Ok(Err(tungstenite::Error::ConnectionClosed))
            | Ok(Err(tungstenite::Error::AlreadyClosed)) => {
                tracing::trace!(id = %self.id, "socket closed");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
            Err(_) => Err(TransportError::WriteTimeout(self.write_wait)),
        }
    }

    async fn reject(&mut self, reason: &str) -> Result<(), Self::Error> {
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: reason.to_owned().into(),
        };
        self.write(Message::Close(Some(frame))).await?;
        self.close().await
    }
}
