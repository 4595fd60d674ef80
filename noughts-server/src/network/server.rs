//! WebSocket Game Server
//!
//! Async WebSocket server for two-player sessions.
//! Assigns participant ids, validates client input and routes events to
//! the [`SessionNotifier`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::ORIGIN, StatusCode};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::state::ParticipantId;
use crate::network::notifier::{Outbox, SessionNotifier};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};

/// How long a closing connection may spend flushing queued messages.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Required `Origin` header for upgrades. `None` accepts any origin.
    pub allowed_origin: Option<String>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            allowed_origin: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `NOUGHTS_BIND_ADDR`, `NOUGHTS_MAX_CONNECTIONS`, `CORS_ORIGIN`.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GameServerError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("NOUGHTS_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|_| {
                GameServerError::Config(format!("invalid NOUGHTS_BIND_ADDR: {addr}"))
            })?;
        }
        if let Some(max) = lookup("NOUGHTS_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse::<usize>()
                .ok()
                .filter(|&limit| limit <= Semaphore::MAX_PERMITS)
                .ok_or_else(|| {
                    GameServerError::Config(format!("invalid NOUGHTS_MAX_CONNECTIONS: {max}"))
                })?;
        }
        config.allowed_origin = lookup("CORS_ORIGIN").filter(|origin| !origin.is_empty());

        Ok(config)
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Handshake callback refusing upgrades from other origins.
fn origin_check(
    allowed: Option<String>,
) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
    move |request: &Request, response: Response| {
        let Some(allowed) = allowed else {
            return Ok(response);
        };
        let origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok());
        if origin == Some(allowed.as_str()) {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("Origin not allowed".to_string()));
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            Err(rejection)
        }
    }
}

fn server_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Matchmaking, sessions and fan-out.
    notifier: Arc<SessionNotifier>,
    /// One permit per accepted connection, held from accept until cleanup.
    connection_slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            notifier: Arc::new(SessionNotifier::new()),
            connection_slots,
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = self.connection_slots.clone().try_acquire_owned()
                            else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        // Give connection tasks a chance to deliver the shutdown notice.
        let deadline = tokio::time::Instant::now() + FLUSH_TIMEOUT;
        while self.connection_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    ///
    /// `permit` is held until the connection is cleaned up.
    fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let notifier = self.notifier.clone();
        let allowed_origin = self.config.allowed_origin.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let ws_stream = match accept_hdr_async(stream, origin_check(allowed_origin)).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let participant = ParticipantId::new(Uuid::new_v4().to_string());
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            debug!("Client {} is participant {}", addr, participant);
            // A fresh id is never waiting or in a session.
            let _ = notifier.connect(participant.clone(), msg_tx.clone()).await;

            // Handle incoming messages
            let mut server_closing = false;
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::handle_text(&participant, &text, &notifier, &msg_tx).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                ));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        server_closing = true;
                        break;
                    }
                }
            }

            // Exactly one departure per connection. A server shutdown is
            // not a forfeit.
            if server_closing {
                notifier.release(&participant).await;
            } else {
                notifier.disconnect(&participant).await;
            }

            // Let queued messages flush, then close.
            drop(msg_tx);
            let abort = sender_task.abort_handle();
            if tokio::time::timeout(FLUSH_TIMEOUT, sender_task).await.is_err() {
                abort.abort();
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Parse a text frame and dispatch it.
    async fn handle_text(
        participant: &ParticipantId,
        text: &str,
        notifier: &SessionNotifier,
        sender: &Outbox,
    ) {
        match ClientMessage::from_json(text) {
            Ok(msg) => Self::handle_client_message(participant, msg, notifier, sender).await,
            Err(e) => {
                debug!("Invalid message from {}: {}", participant, e);
                let _ = sender.send(ServerMessage::error(
                    ErrorCode::InvalidInput,
                    "Invalid message format",
                ));
            }
        }
    }

    /// Handle a client message.
    async fn handle_client_message(
        participant: &ParticipantId,
        msg: ClientMessage,
        notifier: &SessionNotifier,
        sender: &Outbox,
    ) {
        match msg {
            ClientMessage::Move(req) => match req.cell() {
                Ok(index) => {
                    // Rejections are reported by the notifier.
                    let _ = notifier.submit_move(participant, index).await;
                }
                Err(e) => {
                    debug!("Invalid move from {}: {}", participant, e);
                    let _ =
                        sender.send(ServerMessage::error(ErrorCode::InvalidInput, e.to_string()));
                }
            },
            ClientMessage::Join => {
                let _ = notifier.rejoin(participant).await;
            }
            ClientMessage::Leave => {
                notifier.leave(participant).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: server_time_millis(),
                });
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get active connection count, handshakes in progress included.
    pub fn connection_count(&self) -> usize {
        self.config.max_connections - self.connection_slots.available_permits()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.notifier.stats().await.sessions
    }

    /// Get number of participants waiting for an opponent.
    pub async fn waiting_count(&self) -> usize {
        self.notifier.stats().await.waiting
    }
}
