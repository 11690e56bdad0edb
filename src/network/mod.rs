mod bind;
mod broadcaster;
mod coordinator;
mod events;
mod identity;
mod listener;
mod node;
mod protocol;
mod session;

use std::net::Ipv4Addr;
use std::time::Duration;

pub use bind::{bind_with_retry, candidate_port, BindError, BindRetry};
pub use broadcaster::{Announcer, BroadcastError, PresenceBroadcaster};
pub use coordinator::{CoordinatorError, SessionCoordinator};
pub use events::NetworkEvent;
pub use identity::{IdentityError, PeerIdentity};
pub use listener::{dispatch, ListenerError, PresenceListener};
pub use node::{ChatNode, NodeError};
pub use protocol::{
    decode, encode, ClientInvite, Message, MessageKind, ProtocolError, INVITE_SEPARATOR,
    PROTOCOL_VERSION,
};
pub use session::{ChatSession, SessionError, SessionHandle, SessionId, SessionRole, SessionState};

/// Configuration for the network module
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address the presence listener binds to
    pub listen_addr: Ipv4Addr,
    /// Port the presence listener binds to
    pub listen_port: u16,
    /// Destination address for presence broadcasts
    pub broadcast_addr: Ipv4Addr,
    /// Destination port for presence broadcasts
    pub broadcast_port: u16,
    /// Address chat servers bind to
    pub chat_bind_addr: Ipv4Addr,
    /// Preferred port for chat servers
    pub chat_port: u16,
    /// Maximum number of ports tried before giving up on a bind
    pub bind_attempts: u32,
    /// Largest step below the preferred presence port on a bind conflict
    pub listen_port_backoff: u16,
    /// Largest step below the preferred chat port on a bind conflict
    pub chat_port_backoff: u16,
    /// Interval between presence announcements
    pub refresh_interval: Duration,
    /// Upper bound on establishing an outgoing chat connection
    pub connect_timeout: Duration,
    /// Largest chat frame accepted from a peer
    pub max_frame_length: usize,
    /// Capacity of the outbound and event queues
    pub queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: Ipv4Addr::UNSPECIFIED,
            listen_port: 10002,
            broadcast_addr: Ipv4Addr::BROADCAST,
            broadcast_port: 10002,
            chat_bind_addr: Ipv4Addr::UNSPECIFIED,
            chat_port: 5000,
            bind_attempts: 100,
            listen_port_backoff: 50,
            chat_port_backoff: 100,
            refresh_interval: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            max_frame_length: 64 * 1024,
            queue_capacity: 100,
        }
    }
}

impl NetworkConfig {
    /// Configuration confined to the loopback interface with ephemeral ports.
    ///
    /// Presence datagrams are sent to `127.0.0.1:broadcast_port`, so callers
    /// point `broadcast_port` at the listener they want to reach.
    pub fn loopback() -> Self {
        Self {
            listen_addr: Ipv4Addr::LOCALHOST,
            listen_port: 0,
            broadcast_addr: Ipv4Addr::LOCALHOST,
            chat_bind_addr: Ipv4Addr::LOCALHOST,
            chat_port: 0,
            connect_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }

    pub(crate) fn presence_retry(&self) -> BindRetry {
        BindRetry::new(self.listen_port, self.listen_port_backoff, self.bind_attempts)
    }

    pub(crate) fn chat_retry(&self) -> BindRetry {
        BindRetry::new(self.chat_port, self.chat_port_backoff, self.bind_attempts)
    }
}
