//! `HubServer` builder and accept loop.
//!
//! This is the entry point for running a hub. It ties the layers together:
//! transport → connection loops → registry → rooms, plus the optional
//! bridge to other instances.

use std::sync::Arc;

use chiphub_bridge::{Bridge, Broker};
use chiphub_protocol::{InstanceId, JsonCodec};
use chiphub_room::{
    Registry, RegistryConfig, RoomRepository, UserRepository,
};
use chiphub_transport::{
    Pending, Transport, TransportConfig, WebSocketTransport,
};
use tokio::sync::mpsc;

use crate::connection::handle_connection;
use crate::{Authenticator, ConnectionConfig, HubConfig, HubError};

/// Shared state handed to every connection task.
pub(crate) struct HubState<A: Authenticator> {
    pub(crate) registry: Registry,
    pub(crate) auth: A,
    pub(crate) config: ConnectionConfig,
    pub(crate) codec: JsonCodec,
}

/// Builder for configuring and starting a hub.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use chiphub::prelude::*;
///
/// # async fn start() -> Result<(), HubError> {
/// let server = HubServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(
///         NameAuthenticator,
///         Arc::new(MemoryRoomRepository::new()),
///         Arc::new(MemoryUserRepository::new()),
///     )
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HubServerBuilder {
    config: HubConfig,
}

impl HubServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    pub fn transport(mut self, config: TransportConfig) -> Self {
        self.config.transport = config;
        self
    }

    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.config.connection = config;
        self
    }

    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.config.registry = config;
        self
    }

    /// Binds the listener and starts a standalone hub.
    pub async fn build<A, R, U>(
        self,
        auth: A,
        rooms: Arc<R>,
        users: Arc<U>,
    ) -> Result<HubServer<A>, HubError>
    where
        A: Authenticator,
        R: RoomRepository,
        U: UserRepository,
    {
        let transport =
            WebSocketTransport::bind(&self.config.bind, self.config.transport.clone())
                .await?;
        let registry =
            Registry::spawn(self.config.registry.clone(), rooms, users, None);
        Ok(self.finish(transport, registry, auth, None))
    }

    /// Binds the listener and starts a hub that shares its rooms with
    /// every other instance on `broker`.
    pub async fn build_bridged<A, R, U, B>(
        self,
        auth: A,
        rooms: Arc<R>,
        users: Arc<U>,
        broker: Arc<B>,
    ) -> Result<HubServer<A>, HubError>
    where
        A: Authenticator,
        R: RoomRepository,
        U: UserRepository,
        B: Broker,
    {
        let transport =
            WebSocketTransport::bind(&self.config.bind, self.config.transport.clone())
                .await?;
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let registry = Registry::spawn(
            self.config.registry.clone(),
            rooms,
            users,
            Some(relay_tx),
        );
        let bridge = Bridge::spawn(broker, registry.clone(), relay_rx).await?;
        Ok(self.finish(transport, registry, auth, Some(bridge)))
    }

    fn finish<A: Authenticator>(
        self,
        transport: WebSocketTransport,
        registry: Registry,
        auth: A,
        bridge: Option<Bridge>,
    ) -> HubServer<A> {
        let state = Arc::new(HubState {
            registry,
            auth,
            config: self.config.connection,
            codec: JsonCodec,
        });
        HubServer {
            transport,
            state,
            bridge,
        }
    }
}

/// A hub bound to its listener.
///
/// Built by [`HubServerBuilder`]. Call [`run()`](Self::run) to start
/// accepting connections.
pub struct HubServer<A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<HubState<A>>,
    bridge: Option<Bridge>,
}

impl<A: Authenticator> HubServer<A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle to this hub's registry, for inspection and administration.
    pub fn registry(&self) -> Registry {
        self.state.registry.clone()
    }

    /// This instance's id on the bridge, if bridged.
    pub fn instance(&self) -> Option<InstanceId> {
        self.bridge.as_ref().map(Bridge::instance)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(mut self) -> Result<(), HubError> {
        tracing::info!(instance = ?self.instance(), "hub running");

        loop {
            match self.transport.accept().await {
                Ok(pending) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let peer = pending.peer_addr();
                        let conn = match pending.upgrade().await {
                            Ok(conn) => conn,
                            Err(e) => {
                                tracing::debug!(%peer, error = %e, "upgrade failed");
                                return;
                            }
                        };
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
