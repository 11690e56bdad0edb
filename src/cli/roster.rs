use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::network::{NetworkEvent, PeerIdentity};

/// Peers seen on the network, with the time each was last heard from
///
/// A peer that has not been heard from within `ttl` is dropped by `prune`.
#[derive(Debug, Clone)]
pub struct Roster {
    peers: HashMap<PeerIdentity, Instant>,
    ttl: Duration,
}

impl Roster {
    pub fn new(ttl: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            ttl,
        }
    }

    /// Record the peer behind `event`; true if it was not known before
    pub fn observe(&mut self, event: &NetworkEvent, now: Instant) -> bool {
        let peer = match event {
            NetworkEvent::UserSeen(peer)
            | NetworkEvent::ChatServerRequested { peer, .. }
            | NetworkEvent::ChatClientRequested { peer, .. }
            | NetworkEvent::SessionOpened { peer, .. }
            | NetworkEvent::MessageReceived { peer, .. } => peer,
            NetworkEvent::SessionClosed { .. } | NetworkEvent::SessionFailed { .. } => {
                return false;
            }
        };

        self.peers.insert(peer.clone(), now).is_none()
    }

    /// Drop expired peers and return them
    pub fn prune(&mut self, now: Instant) -> Vec<PeerIdentity> {
        let ttl = self.ttl;
        let mut expired: Vec<PeerIdentity> = self
            .peers
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > ttl)
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in &expired {
            self.peers.remove(peer);
        }
        expired.sort();
        expired
    }

    /// Known peers with the time since each was last seen, ordered by peer
    pub fn peers(&self, now: Instant) -> Vec<(PeerIdentity, Duration)> {
        let mut peers: Vec<(PeerIdentity, Duration)> = self
            .peers
            .iter()
            .map(|(peer, seen)| (peer.clone(), now.saturating_duration_since(*seen)))
            .collect();
        peers.sort();
        peers
    }

    /// Known peers running as `user`, on any host
    pub fn by_user(&self, user: &str) -> Vec<PeerIdentity> {
        let mut found: Vec<PeerIdentity> = self
            .peers
            .keys()
            .filter(|peer| peer.user == user)
            .cloned()
            .collect();
        found.sort();
        found
    }

    pub fn contains(&self, peer: &PeerIdentity) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
