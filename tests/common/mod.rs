//! Shared fixtures for the integration tests
//!
//! Real broadcasts do not reach several listeners on one loopback host, so
//! `Lan` stands in for the network segment: every datagram sent to it is
//! copied to each joined presence listener.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use lanchat::network::{ChatNode, NetworkConfig, NetworkEvent, PeerIdentity};

pub const WAIT: Duration = Duration::from_secs(3);

pub struct Lan {
    addr: SocketAddr,
    members: Arc<Mutex<Vec<SocketAddr>>>,
    relay: JoinHandle<()>,
}

impl Lan {
    pub async fn start() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let members: Arc<Mutex<Vec<SocketAddr>>> = Arc::new(Mutex::new(Vec::new()));

        let targets = members.clone();
        let relay = tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            while let Ok((len, _)) = socket.recv_from(&mut buf).await {
                let members: Vec<SocketAddr> = targets.lock().map(|m| m.clone()).unwrap_or_default();
                for member in members {
                    let _ = socket.send_to(&buf[..len], member).await;
                }
            }
        });

        Ok(Self {
            addr,
            members,
            relay,
        })
    }

    /// Loopback configuration whose presence traffic goes through this relay
    pub fn config(&self) -> NetworkConfig {
        NetworkConfig {
            broadcast_port: self.addr.port(),
            refresh_interval: Duration::from_secs(3600),
            ..NetworkConfig::loopback()
        }
    }

    pub fn join(&self, listener: SocketAddr) {
        if let Ok(mut members) = self.members.lock() {
            members.push(listener);
        }
    }

    /// Start a node on this segment and announce it once everyone can hear
    pub async fn node(&self, user: &str) -> Result<(ChatNode, mpsc::Receiver<NetworkEvent>)> {
        let identity = PeerIdentity::new(user, format!("host-{}", user));
        let (node, events) = ChatNode::start(self.config(), identity).await?;
        self.join(node.presence_addr());
        Ok((node, events))
    }
}

impl Drop for Lan {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

pub fn peer(user: &str) -> PeerIdentity {
    PeerIdentity::new(user, format!("host-{}", user))
}

/// Wait for the first event matching `wanted`, skipping the others
pub async fn expect_event<F>(events: &mut mpsc::Receiver<NetworkEvent>, mut wanted: F) -> Result<NetworkEvent>
where
    F: FnMut(&NetworkEvent) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let event = time::timeout_at(deadline, events.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for event"))?
            .ok_or_else(|| anyhow!("event channel closed"))?;
        if wanted(&event) {
            return Ok(event);
        }
    }
}

/// Fail if an event matching `unwanted` arrives within `window`
pub async fn expect_none<F>(
    events: &mut mpsc::Receiver<NetworkEvent>,
    window: Duration,
    mut unwanted: F,
) -> Result<()>
where
    F: FnMut(&NetworkEvent) -> bool,
{
    let deadline = Instant::now() + window;
    loop {
        match time::timeout_at(deadline, events.recv()).await {
            Err(_) | Ok(None) => return Ok(()),
            Ok(Some(event)) if unwanted(&event) => {
                return Err(anyhow!("unexpected event {:?}", event));
            }
            Ok(Some(_)) => {}
        }
    }
}
