use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use super::broadcaster::{Announcer, BroadcastError, PresenceBroadcaster};
use super::coordinator::{CoordinatorError, SessionCoordinator};
use super::events::NetworkEvent;
use super::identity::{IdentityError, PeerIdentity};
use super::listener::{ListenerError, PresenceListener};
use super::session::SessionHandle;
use super::NetworkConfig;

/// How long `shutdown` waits for each background task
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid identity: {0}")]
    IdentityError(#[from] IdentityError),

    #[error("Listener error: {0}")]
    ListenerError(#[from] ListenerError),

    #[error("Broadcast error: {0}")]
    BroadcastError(#[from] BroadcastError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A running chat peer: presence broadcaster and listener, session
/// coordinator, and the presence refresh timer
///
/// Front ends issue commands through the methods here and read every
/// network event from the receiver returned by [`ChatNode::start`].
#[derive(Debug)]
pub struct ChatNode {
    identity: PeerIdentity,
    coordinator: SessionCoordinator,
    announcer: Announcer,
    listener: PresenceListener,
    presence_addr: SocketAddr,
    refresh_interval: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatNode {
    /// Bind all sockets, start every background task and announce presence
    pub async fn start(
        config: NetworkConfig,
        identity: PeerIdentity,
    ) -> Result<(Self, mpsc::Receiver<NetworkEvent>), NodeError> {
        identity.validate()?;

        let (broadcaster, announcer) = PresenceBroadcaster::bind(&config, identity.clone()).await?;
        let (coordinator, inbox) = SessionCoordinator::new(config.clone(), announcer.clone());
        let listener = PresenceListener::bind(&config, identity.user.clone(), coordinator.inbox())?;
        let presence_addr = listener.local_addr()?;

        let (front_end_tx, front_end_rx) = mpsc::channel(config.queue_capacity);

        let runner = coordinator.clone();
        let tasks = vec![
            tokio::spawn(broadcaster.run()),
            listener.start(),
            tokio::spawn(async move { runner.run(inbox, front_end_tx).await }),
            announcer.spawn_refresh(config.refresh_interval),
        ];

        info!("{} is online, presence on {}", identity, presence_addr);

        let node = Self {
            identity,
            coordinator,
            announcer,
            listener,
            presence_addr,
            refresh_interval: config.refresh_interval,
            tasks,
        };

        Ok((node, front_end_rx))
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Address the presence listener is bound to
    pub fn presence_addr(&self) -> SocketAddr {
        self.presence_addr
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Open a chat server for `peer` and invite it to connect
    pub async fn request_chat(&self, peer: PeerIdentity) -> Result<u16, CoordinatorError> {
        self.coordinator.request_chat(peer).await
    }

    /// Ask `peer` to open a chat server for us
    pub async fn request_remote_server(&self, peer: PeerIdentity) -> Result<(), CoordinatorError> {
        self.coordinator.request_remote_server(peer).await
    }

    pub async fn send_chat_message(
        &self,
        peer: &PeerIdentity,
        text: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        self.coordinator.send_chat_message(peer, text).await
    }

    pub async fn end_chat(&self, peer: &PeerIdentity) -> Result<(), CoordinatorError> {
        self.coordinator.end_chat(peer).await
    }

    pub fn refresh_presence(&self) -> Result<(), CoordinatorError> {
        self.coordinator.refresh_presence()
    }

    pub async fn sessions(&self) -> Vec<SessionHandle> {
        self.coordinator.sessions().await
    }

    /// Stop every task and close every session
    pub async fn shutdown(self) {
        self.listener.stop();
        self.announcer.stop();
        self.coordinator.shutdown().await;

        for task in self.tasks {
            match time::timeout(TASK_SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task failed: {}", e),
                Err(_) => warn!("Background task did not stop in time"),
            }
        }

        info!("{} is offline", self.identity);
    }
}
