//! WebSocket front door.
//!
//! ```text
//!   TcpListener ──accept──► handshake (identity from query) ──► run_session
//!                                                                   │
//!                                        Hub (one task) ◄───────────┘
//!                                          │
//!                                          └── Engine (shared)
//! ```
//!
//! Clients connect to `ws://host:port/?userId=7&username=alice&permission=editor`.
//! A handshake without a usable identity gets a single `error` frame and is
//! closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tandem_ot::{Engine, EngineConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

use crate::hub::{Hub, HubConfig, HubHandle};
use crate::protocol::Envelope;
use crate::session::{run_session, Identity, SessionConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    pub hub: HubConfig,
    pub engine: EngineConfig,
    /// Ping interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Largest accepted inbound frame, in bytes
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            hub: HubConfig::default(),
            engine: EngineConfig::default(),
            heartbeat_interval_secs: 45,
            max_frame_size: 64 * 1024,
        }
    }
}

/// Messages this many times over `max_frame_size` are refused by the
/// transport itself; smaller oversized ones get an `error` frame.
const TRANSPORT_LIMIT_FACTOR: usize = 4;

impl ServerConfig {
    fn websocket(&self) -> WebSocketConfig {
        let limit = self.max_frame_size.saturating_mul(TRANSPORT_LIMIT_FACTOR);
        WebSocketConfig::default()
            .max_message_size(Some(limit))
            .max_frame_size(Some(limit))
    }

    fn session(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            max_frame_size: self.max_frame_size,
            outbound_capacity: self.hub.outbound_capacity,
        }
    }
}

/// The collaboration server.
pub struct CollabServer {
    config: ServerConfig,
    engine: Arc<Engine>,
}

impl CollabServer {
    pub fn new(config: ServerConfig) -> Self {
        let engine = Arc::new(Engine::new(config.engine.clone()));
        Self { config, engine }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared transform engine.
    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    /// Bind `bind_addr` and serve until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (hub, handle) = Hub::new(self.engine.clone(), self.config.hub.clone());
        let hub_task = hub.spawn();
        log::info!("Collaboration server listening on {}", listener.local_addr()?);

        let session = self.config.session();
        let websocket = self.config.websocket();
        let result = loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => break Err(e),
            };
            log::debug!("New TCP connection from {addr}");

            let hub = handle.clone();
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, session, websocket).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        };

        let _ = handle.shutdown();
        let _ = hub_task.await;
        result.map_err(Into::into)
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    session: SessionConfig,
    websocket: WebSocketConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut query = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        query = request.uri().query().map(str::to_owned);
        Ok(response)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(websocket)).await?;

    let identity = match Identity::from_query(query.as_deref().unwrap_or_default()) {
        Ok(identity) => identity,
        Err(e) => {
            log::warn!("Rejecting connection from {addr}: {e}");
            ws.send(Message::text(Envelope::error(e.to_string()).encode()?)).await?;
            ws.close(None).await?;
            return Ok(());
        }
    };

    log::info!("WebSocket connection from {addr} as user {}", identity.user_id);
    run_session(ws, identity, hub, session).await;
    Ok(())
}
