use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bind::{bind_with_retry, BindError};
use super::events::NetworkEvent;
use super::identity::PeerIdentity;
use super::protocol::{self, Message, MessageKind, ProtocolError};
use super::NetworkConfig;

/// Unique identifier for a chat session
pub type SessionId = Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Outbound queue is full")]
    QueueFull,

    #[error("Message of {size} bytes exceeds the {max} byte frame limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),

    #[error("Bind error: {0}")]
    BindError(#[from] BindError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Which end of the TCP connection this session is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Server,
    Client,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Server => write!(f, "server"),
            SessionRole::Client => write!(f, "client"),
        }
    }
}

/// Lifecycle of a chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Server bound and waiting for the peer to connect
    Listening,
    /// Client configured but not yet connected
    Configured,
    Connected,
    Closed,
}

enum Endpoint {
    Listener(TcpListener),
    Remote(SocketAddr),
}

/// One point-to-point chat connection with a single peer
///
/// Created unconnected by [`ChatSession::create_server`] or
/// [`ChatSession::create_client`]; [`ChatSession::run`] establishes the
/// connection and then carries messages until either side closes it.
pub struct ChatSession {
    id: SessionId,
    role: SessionRole,
    local: PeerIdentity,
    peer: PeerIdentity,
    endpoint: Option<Endpoint>,
    local_port: Option<u16>,
    remote: Option<SocketAddr>,
    connect_timeout: Duration,
    max_frame_length: usize,
    events: mpsc::Sender<NetworkEvent>,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: mpsc::Receiver<Bytes>,
    state_tx: watch::Sender<SessionState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Cloneable handle for sending on and closing a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    role: SessionRole,
    local: PeerIdentity,
    peer: PeerIdentity,
    local_port: Option<u16>,
    max_frame_length: usize,
    outbound: mpsc::Sender<Bytes>,
    state: watch::Receiver<SessionState>,
    shutdown: Arc<watch::Sender<bool>>,
}

fn bind_chat_listener(addr: Ipv4Addr, port: u16) -> io::Result<std::net::TcpListener> {
    let listener = std::net::TcpListener::bind(SocketAddr::new(IpAddr::V4(addr), port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl ChatSession {
    /// Bind a listening socket for `peer` to connect to
    ///
    /// Uses the chat bind-retry policy when the preferred port is taken.
    /// Must be called from within a tokio runtime.
    pub fn create_server(
        config: &NetworkConfig,
        local: PeerIdentity,
        peer: PeerIdentity,
        events: mpsc::Sender<NetworkEvent>,
    ) -> Result<Self, SessionError> {
        let retry = config.chat_retry();
        let (std_listener, _) = bind_with_retry(&retry, &mut rand::thread_rng(), |port| {
            bind_chat_listener(config.chat_bind_addr, port)
        })?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_port = listener.local_addr()?.port();

        info!("Chat server for {} listening on port {}", peer, local_port);

        Ok(Self::with_endpoint(
            config,
            local,
            peer,
            events,
            Endpoint::Listener(listener),
            Some(local_port),
        ))
    }

    /// Configure a session that will connect to `addr`
    pub fn create_client(
        config: &NetworkConfig,
        local: PeerIdentity,
        peer: PeerIdentity,
        addr: SocketAddr,
        events: mpsc::Sender<NetworkEvent>,
    ) -> Self {
        Self::with_endpoint(config, local, peer, events, Endpoint::Remote(addr), None)
    }

    fn with_endpoint(
        config: &NetworkConfig,
        local: PeerIdentity,
        peer: PeerIdentity,
        events: mpsc::Sender<NetworkEvent>,
        endpoint: Endpoint,
        local_port: Option<u16>,
    ) -> Self {
        let (role, state, remote) = match &endpoint {
            Endpoint::Listener(_) => (SessionRole::Server, SessionState::Listening, None),
            Endpoint::Remote(addr) => (SessionRole::Client, SessionState::Configured, Some(*addr)),
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        let (state_tx, _) = watch::channel(state);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            role,
            local,
            peer,
            endpoint: Some(endpoint),
            local_port,
            remote,
            connect_timeout: config.connect_timeout,
            max_frame_length: config.max_frame_length,
            events,
            outbound_tx,
            outbound_rx,
            state_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Port a server session is listening on
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Address of the remote end, once known
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            role: self.role,
            local: self.local.clone(),
            peer: self.peer.clone(),
            local_port: self.local_port,
            max_frame_length: self.max_frame_length,
            outbound: self.outbound_tx.clone(),
            state: self.state_tx.subscribe(),
            shutdown: self.shutdown_tx.clone(),
        }
    }

    /// Connect, then carry messages until the connection ends
    ///
    /// Raises `SessionOpened` once connected, `MessageReceived` per complete
    /// frame, and finally exactly one of `SessionClosed` or `SessionFailed`.
    pub async fn run(mut self) {
        let stream = match self.establish().await {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                debug!("Session with {} closed before connecting", self.peer);
                self.finish(NetworkEvent::SessionClosed {
                    peer: self.peer.clone(),
                    session: self.id,
                })
                .await;
                return;
            }
            Err(e) => {
                warn!("Chat session with {} failed: {}", self.peer, e);
                self.finish(NetworkEvent::SessionFailed {
                    peer: self.peer.clone(),
                    session: self.id,
                    reason: e.to_string(),
                })
                .await;
                return;
            }
        };

        self.state_tx.send_replace(SessionState::Connected);
        info!(
            "Chat session {} with {} connected ({})",
            self.id, self.peer, self.role
        );
        self.emit(NetworkEvent::SessionOpened {
            peer: self.peer.clone(),
            session: self.id,
            role: self.role,
        })
        .await;

        let mut framed = Framed::new(stream, protocol::stream_codec(self.max_frame_length));

        loop {
            tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => self.deliver(&frame).await,
                    Some(Err(e)) => {
                        debug!("Read from {} failed: {}", self.peer, e);
                        break;
                    }
                    None => {
                        debug!("{} closed the connection", self.peer);
                        break;
                    }
                },
                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = framed.send(frame).await {
                        warn!("Could not send chat message to {}: {}", self.peer, e);
                    }
                }
                _ = shutdown_requested(&mut self.shutdown_rx) => {
                    debug!("Session with {} closed locally", self.peer);
                    break;
                }
            }
        }

        drop(framed);
        self.finish(NetworkEvent::SessionClosed {
            peer: self.peer.clone(),
            session: self.id,
        })
        .await;
    }

    /// Accept or connect; `None` when closed before that happened
    async fn establish(&mut self) -> Result<Option<TcpStream>, SessionError> {
        let Some(endpoint) = self.endpoint.take() else {
            return Err(SessionError::NotConnected);
        };

        match endpoint {
            Endpoint::Listener(listener) => {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, addr) = accepted?;
                        debug!("Got a chat connection from {}", addr);
                        self.remote = Some(addr);
                        Ok(Some(stream))
                    }
                    _ = shutdown_requested(&mut self.shutdown_rx) => Ok(None),
                }
            }
            Endpoint::Remote(addr) => {
                debug!("Connecting to {} at {}", self.peer, addr);
                tokio::select! {
                    connected = time::timeout(self.connect_timeout, TcpStream::connect(addr)) => {
                        let stream = connected.map_err(|_| SessionError::ConnectTimeout(addr))??;
                        Ok(Some(stream))
                    }
                    _ = shutdown_requested(&mut self.shutdown_rx) => Ok(None),
                }
            }
        }
    }

    async fn deliver(&self, frame: &[u8]) {
        match protocol::decode(frame) {
            Ok(message) if message.kind == MessageKind::Chat => {
                self.emit(NetworkEvent::MessageReceived {
                    peer: self.peer.clone(),
                    session: self.id,
                    message,
                })
                .await;
            }
            Ok(message) => debug!("Ignoring {} message on chat session", message.kind),
            Err(e) => warn!("Dropping chat frame from {}: {}", self.peer, e),
        }
    }

    async fn emit(&self, event: NetworkEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver for session {} dropped", self.id);
        }
    }

    /// Mark the session closed before reporting it, so no send can slip in
    async fn finish(&self, event: NetworkEvent) {
        self.state_tx.send_replace(SessionState::Closed);
        self.emit(event).await;
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("local_port", &self.local_port)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Queue a chat message for the peer
    ///
    /// Fails with `NotConnected` unless the session is connected, and with
    /// `MessageTooLarge` when the encoded message would not fit in one frame.
    /// Never waits for the socket.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let message = Message::new(&self.local, MessageKind::Chat, text);
        let frame = protocol::encode(&message)?;
        if frame.len() > self.max_frame_length {
            return Err(SessionError::MessageTooLarge {
                size: frame.len(),
                max: self.max_frame_length,
            });
        }

        self.outbound.try_send(Bytes::from(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::NotConnected,
        })
    }

    /// Ask the session to close its connection
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait until the session reaches `target` or closes
    pub async fn wait_for(&self, target: SessionState) -> SessionState {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current == target || current == SessionState::Closed {
                return current;
            }
            if state.changed().await.is_err() {
                return *state.borrow();
            }
        }
    }
}
