use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::broadcaster::{Announcer, BroadcastError};
use super::events::NetworkEvent;
use super::identity::PeerIdentity;
use super::protocol::{ClientInvite, MessageKind};
use super::session::{ChatSession, SessionError, SessionHandle, SessionId};
use super::NetworkConfig;

/// How long `shutdown` waits for each session task to finish
const SESSION_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("A session with {0} is already open")]
    SessionExists(PeerIdentity),

    #[error("No session with {0}")]
    NoSession(PeerIdentity),

    #[error("Coordinator is shutting down")]
    ShuttingDown,

    #[error("Session with {0} is not listening")]
    NotListening(PeerIdentity),

    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),

    #[error("Broadcast error: {0}")]
    BroadcastError(#[from] BroadcastError),
}

#[derive(Debug)]
struct SessionEntry {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

/// Owns the table of chat sessions, one per peer, and negotiates new ones
///
/// Cloning is cheap; all clones share the same table.
#[derive(Debug, Clone)]
pub struct SessionCoordinator {
    config: NetworkConfig,
    local: PeerIdentity,
    announcer: Announcer,
    sessions: Arc<Mutex<HashMap<PeerIdentity, SessionEntry>>>,
    inbox: mpsc::Sender<NetworkEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SessionCoordinator {
    /// Create a coordinator and the inbox its run loop consumes
    pub fn new(config: NetworkConfig, announcer: Announcer) -> (Self, mpsc::Receiver<NetworkEvent>) {
        let (inbox, inbox_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let coordinator = Self {
            local: announcer.identity().clone(),
            config,
            announcer,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            inbox,
            shutdown_tx: Arc::new(shutdown_tx),
        };

        (coordinator, inbox_rx)
    }

    /// Sender the presence listener raises its events on
    pub fn inbox(&self) -> mpsc::Sender<NetworkEvent> {
        self.inbox.clone()
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    /// Open a chat server for `peer` and invite it to connect
    ///
    /// Returns the port the server listens on.
    pub async fn request_chat(&self, peer: PeerIdentity) -> Result<u16, CoordinatorError> {
        let handle = {
            let mut sessions = self.sessions.lock().await;
            if self.is_shutting_down() {
                return Err(CoordinatorError::ShuttingDown);
            }
            if sessions.contains_key(&peer) {
                return Err(CoordinatorError::SessionExists(peer));
            }

            let session = ChatSession::create_server(
                &self.config,
                self.local.clone(),
                peer.clone(),
                self.inbox.clone(),
            )?;
            spawn_session(&mut sessions, session)
        };

        let Some(port) = handle.local_port() else {
            self.discard(&peer, handle.id()).await;
            return Err(CoordinatorError::NotListening(peer));
        };

        let invite = ClientInvite::new(peer.user.clone(), port);
        if let Err(e) = self
            .announcer
            .announce(MessageKind::StartChatClient, invite.to_payload())
        {
            self.discard(&peer, handle.id()).await;
            return Err(e.into());
        }

        info!("Invited {} to chat on port {}", peer, port);
        Ok(port)
    }

    /// Ask `peer` to open the listening end instead
    pub async fn request_remote_server(&self, peer: PeerIdentity) -> Result<(), CoordinatorError> {
        if self.sessions.lock().await.contains_key(&peer) {
            return Err(CoordinatorError::SessionExists(peer));
        }

        self.announcer
            .announce(MessageKind::StartChatServer, peer.user.clone())?;
        info!("Asked {} to start a chat server", peer);
        Ok(())
    }

    /// Connect to a chat server `peer` opened for us
    pub async fn accept_invite(
        &self,
        peer: PeerIdentity,
        addr: SocketAddr,
    ) -> Result<SessionId, CoordinatorError> {
        let mut sessions = self.sessions.lock().await;
        if self.is_shutting_down() {
            return Err(CoordinatorError::ShuttingDown);
        }
        if sessions.contains_key(&peer) {
            return Err(CoordinatorError::SessionExists(peer));
        }

        let session = ChatSession::create_client(
            &self.config,
            self.local.clone(),
            peer,
            addr,
            self.inbox.clone(),
        );
        Ok(spawn_session(&mut sessions, session).id())
    }

    /// Queue a chat message on the session with `peer`
    pub async fn send_chat_message(
        &self,
        peer: &PeerIdentity,
        text: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let sessions = self.sessions.lock().await;
        let entry = sessions
            .get(peer)
            .ok_or_else(|| CoordinatorError::NoSession(peer.clone()))?;
        entry.handle.send(text)?;
        Ok(())
    }

    /// Close the session with `peer` and forget it
    pub async fn end_chat(&self, peer: &PeerIdentity) -> Result<(), CoordinatorError> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(peer)
            .ok_or_else(|| CoordinatorError::NoSession(peer.clone()))?;

        info!("Closing chat session with {}", peer);
        entry.handle.close();
        Ok(())
    }

    /// Announce our presence now
    pub fn refresh_presence(&self) -> Result<(), CoordinatorError> {
        self.announcer.ehlo()?;
        Ok(())
    }

    /// Snapshot of the session table, ordered by peer
    pub async fn sessions(&self) -> Vec<SessionHandle> {
        let sessions = self.sessions.lock().await;
        let mut handles: Vec<SessionHandle> =
            sessions.values().map(|entry| entry.handle.clone()).collect();
        handles.sort_by(|a, b| a.peer().cmp(b.peer()));
        handles
    }

    /// Act on network events and forward each one to the front end
    ///
    /// Runs until `shutdown` is called.
    pub async fn run(
        &self,
        mut inbox: mpsc::Receiver<NetworkEvent>,
        front_end: mpsc::Sender<NetworkEvent>,
    ) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => {
                        self.handle_event(&event).await;
                        tokio::select! {
                            sent = front_end.send(event) => {
                                if sent.is_err() {
                                    debug!("Front end dropped its event receiver");
                                }
                            }
                            _ = shutdown_rx.wait_for(|stop| *stop) => break,
                        }
                    }
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Session coordinator stopped");
    }

    async fn handle_event(&self, event: &NetworkEvent) {
        match event {
            NetworkEvent::ChatServerRequested { peer, target } => {
                if *target != self.local.user {
                    debug!("{} wants a chat server from {}, not us", peer, target);
                    return;
                }
                if let Err(e) = self.request_chat(peer.clone()).await {
                    warn!("Could not open chat server for {}: {}", peer, e);
                }
            }
            NetworkEvent::ChatClientRequested { peer, source, port } => {
                let addr = SocketAddr::new(*source, *port);
                if let Err(e) = self.accept_invite(peer.clone(), addr).await {
                    warn!("Could not connect to {} at {}: {}", peer, addr, e);
                }
            }
            NetworkEvent::SessionClosed { peer, session }
            | NetworkEvent::SessionFailed { peer, session, .. } => {
                self.discard(peer, *session).await;
            }
            NetworkEvent::UserSeen(_)
            | NetworkEvent::SessionOpened { .. }
            | NetworkEvent::MessageReceived { .. } => {}
        }
    }

    /// Close and remove the entry for `peer` if it still belongs to `session`
    async fn discard(&self, peer: &PeerIdentity, session: SessionId) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(peer)
            .is_some_and(|entry| entry.handle.id() == session)
        {
            if let Some(entry) = sessions.remove(peer) {
                entry.handle.close();
                debug!("Removed session {} with {}", session, peer);
            }
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Close every session and stop the run loop
    ///
    /// The flag is raised before the table is drained; new sessions are
    /// refused under the table lock once it is set.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let entries: Vec<SessionEntry> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, entry)| entry)
            .collect();

        for entry in &entries {
            entry.handle.close();
        }
        for entry in entries {
            if time::timeout(SESSION_SHUTDOWN_GRACE, entry.task).await.is_err() {
                warn!("Session with {} did not stop in time", entry.handle.peer());
            }
        }
    }
}

fn spawn_session(
    sessions: &mut HashMap<PeerIdentity, SessionEntry>,
    session: ChatSession,
) -> SessionHandle {
    let handle = session.handle();
    let task = tokio::spawn(session.run());
    sessions.insert(
        handle.peer().clone(),
        SessionEntry {
            handle: handle.clone(),
            task,
        },
    );
    handle
}
