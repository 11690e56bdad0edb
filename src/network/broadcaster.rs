use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::identity::PeerIdentity;
use super::protocol::{self, Message, MessageKind};
use super::NetworkConfig;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast queue is full")]
    QueueFull,

    #[error("Broadcaster has shut down")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Sends queued presence and control messages by UDP broadcast
///
/// Delivery is best effort: a failed transmission is logged and the next
/// queued message is sent as usual.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    queue: mpsc::Receiver<Message>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Cloneable handle used to queue announcements
#[derive(Debug, Clone)]
pub struct Announcer {
    identity: PeerIdentity,
    queue: mpsc::Sender<Message>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl PresenceBroadcaster {
    /// Bind the sending socket and create the announcement queue
    pub async fn bind(
        config: &NetworkConfig,
        identity: PeerIdentity,
    ) -> Result<(Self, Announcer), BroadcastError> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(config.listen_addr), 0)).await?;
        socket.set_broadcast(true)?;

        let target = SocketAddr::new(IpAddr::V4(config.broadcast_addr), config.broadcast_port);
        debug!(
            "Presence broadcaster bound to {}, sending to {}",
            socket.local_addr()?,
            target
        );

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broadcaster = Self {
            socket,
            target,
            queue: rx,
            shutdown_rx,
        };
        let announcer = Announcer {
            identity,
            queue: tx,
            shutdown_tx: Arc::new(shutdown_tx),
        };

        Ok((broadcaster, announcer))
    }

    /// Drain the queue until shutdown
    ///
    /// Waits on the queue when it is empty, so an idle broadcaster costs
    /// nothing.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                message = self.queue.recv() => match message {
                    Some(message) => self.transmit(&message).await,
                    None => break,
                },
            }
        }

        info!("Presence broadcaster stopped");
    }

    async fn transmit(&self, message: &Message) {
        let data = match protocol::encode(message) {
            Ok(data) => data,
            Err(e) => {
                warn!("Could not encode {} message: {}", message.kind, e);
                return;
            }
        };

        match self.socket.send_to(&data, self.target).await {
            Ok(sent) => debug!("Sent {} ({} bytes) to {}", message.kind, sent, self.target),
            Err(e) => warn!("Could not send {} to {}: {}", message.kind, self.target, e),
        }
    }
}

impl Announcer {
    /// Identity stamped on every announcement
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Queue a message built from the local identity
    pub fn announce(
        &self,
        kind: MessageKind,
        payload: impl Into<String>,
    ) -> Result<(), BroadcastError> {
        let message = Message::new(&self.identity, kind, payload);
        self.queue.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BroadcastError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => BroadcastError::Closed,
        })
    }

    /// Queue a presence announcement
    pub fn ehlo(&self) -> Result<(), BroadcastError> {
        self.announce(MessageKind::Ehlo, "")
    }

    /// Announce presence now and then every `period` until shutdown
    pub fn spawn_refresh(&self, period: Duration) -> JoinHandle<()> {
        let announcer = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = time::interval(period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = announcer.ehlo() {
                            warn!("Could not queue presence announcement: {}", e);
                            if matches!(e, BroadcastError::Closed) {
                                break;
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Presence refresh timer stopped");
        })
    }

    /// Ask the broadcaster and refresh timer to exit
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
