use std::net::IpAddr;

use super::identity::PeerIdentity;
use super::protocol::Message;
use super::session::{SessionId, SessionRole};

/// Events raised by the network layer
///
/// Listener and sessions send these to the coordinator, which acts on the
/// negotiation events and forwards everything to the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A presence announcement arrived from a peer
    UserSeen(PeerIdentity),
    /// A peer asked `target` to open a chat server for it
    ChatServerRequested { peer: PeerIdentity, target: String },
    /// A peer opened a chat server for the local user on `port`
    ///
    /// `source` is the address the announcement came from.
    ChatClientRequested {
        peer: PeerIdentity,
        source: IpAddr,
        port: u16,
    },
    /// A chat session finished connecting
    SessionOpened {
        peer: PeerIdentity,
        session: SessionId,
        role: SessionRole,
    },
    /// One complete chat message arrived on a session
    MessageReceived {
        peer: PeerIdentity,
        session: SessionId,
        message: Message,
    },
    /// A connected or listening session ended
    SessionClosed {
        peer: PeerIdentity,
        session: SessionId,
    },
    /// A session could not be established
    SessionFailed {
        peer: PeerIdentity,
        session: SessionId,
        reason: String,
    },
}

impl NetworkEvent {
    /// Session the event belongs to, if any
    pub fn session(&self) -> Option<SessionId> {
        match self {
            NetworkEvent::SessionOpened { session, .. }
            | NetworkEvent::MessageReceived { session, .. }
            | NetworkEvent::SessionClosed { session, .. }
            | NetworkEvent::SessionFailed { session, .. } => Some(*session),
            NetworkEvent::UserSeen(_)
            | NetworkEvent::ChatServerRequested { .. }
            | NetworkEvent::ChatClientRequested { .. } => None,
        }
    }
}
