use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::bind::{bind_with_retry, BindError};
use super::events::NetworkEvent;
use super::protocol::{self, ClientInvite, Message, MessageKind, ProtocolError};
use super::NetworkConfig;

/// Max UDP payload size
const MAX_DATAGRAM_SIZE: usize = 65536;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Bind error: {0}")]
    BindError(#[from] BindError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Receives presence and control datagrams and turns them into events
#[derive(Debug)]
pub struct PresenceListener {
    socket: Arc<UdpSocket>,
    local_user: String,
    events: mpsc::Sender<NetworkEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

fn bind_presence_socket(addr: Ipv4Addr, port: u16) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SocketProtocol::UDP))?;
    // Several peers on one host share the presence port
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&SocketAddr::new(IpAddr::V4(addr), port).into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

impl PresenceListener {
    /// Bind the presence socket
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        config: &NetworkConfig,
        local_user: impl Into<String>,
        events: mpsc::Sender<NetworkEvent>,
    ) -> Result<Self, ListenerError> {
        let retry = config.presence_retry();
        let (std_socket, port) = bind_with_retry(&retry, &mut rand::thread_rng(), |port| {
            bind_presence_socket(config.listen_addr, port)
        })?;

        let socket = UdpSocket::from_std(std_socket)?;
        info!("Presence listener bound to {}:{}", config.listen_addr, port);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            socket: Arc::new(socket),
            local_user: local_user.into(),
            events,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn the receive loop on its own task
    pub fn start(&self) -> JoinHandle<()> {
        tokio::spawn(receive_loop(
            self.socket.clone(),
            self.local_user.clone(),
            self.events.clone(),
            self.shutdown_rx.clone(),
        ))
    }

    /// Run the receive loop on the current task until `stop` is called
    pub async fn run(&self) {
        receive_loop(
            self.socket.clone(),
            self.local_user.clone(),
            self.events.clone(),
            self.shutdown_rx.clone(),
        )
        .await
    }

    /// Ask the receive loop to exit
    ///
    /// The loop waits on the socket and the shutdown signal together, so it
    /// exits without waiting for another datagram.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    local_user: String,
    events: mpsc::Sender<NetworkEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, source)) => {
                    trace!("Received {} bytes from {}", len, source);
                    let Some(event) = handle_datagram(&local_user, &buf[..len], source) else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        debug!("Event receiver dropped");
                        break;
                    }
                }
                Err(e) => warn!("Failed to receive presence datagram: {}", e),
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("Presence listener stopped");
}

fn handle_datagram(local_user: &str, data: &[u8], source: SocketAddr) -> Option<NetworkEvent> {
    match protocol::decode(data) {
        Ok(message) => dispatch(local_user, message, source.ip()),
        Err(ProtocolError::UnknownKind(kind)) => {
            debug!("Ignoring message of unknown kind {} from {}", kind, source);
            None
        }
        Err(e) => {
            warn!("Dropping datagram from {}: {}", source, e);
            None
        }
    }
}

/// Map a decoded presence message to the event it raises, if any
///
/// Messages sent by `local_user` are dropped: broadcasts loop back to the
/// sender on the same segment.
pub fn dispatch(local_user: &str, message: Message, source: IpAddr) -> Option<NetworkEvent> {
    if message.sender_user == local_user {
        trace!("Ignoring own {} message", message.kind);
        return None;
    }

    let peer = message.sender();

    match message.kind {
        MessageKind::Ehlo => {
            debug!("Presence from {}", peer);
            Some(NetworkEvent::UserSeen(peer))
        }
        MessageKind::StartChatServer => {
            debug!("{} asks {} to start a chat server", peer, message.payload);
            Some(NetworkEvent::ChatServerRequested {
                peer,
                target: message.payload,
            })
        }
        MessageKind::StartChatClient => match ClientInvite::parse(&message.payload) {
            Ok(invite) if invite.target_user == local_user => {
                debug!("{} has a chat server waiting on port {}", peer, invite.port);
                Some(NetworkEvent::ChatClientRequested {
                    peer,
                    source,
                    port: invite.port,
                })
            }
            Ok(invite) => {
                trace!("Chat invite from {} is for {}", peer, invite.target_user);
                None
            }
            Err(e) => {
                warn!("Bad chat invite from {}: {}", peer, e);
                None
            }
        },
        MessageKind::Chat => {
            warn!("Chat message from {} on the presence port, ignoring", peer);
            None
        }
    }
}
