use std::time::Duration;

use crate::network::{NetworkEvent, PeerIdentity, SessionHandle};

pub const HELP: &str = "\
Commands:
  /users                   list peers seen on the network
  /chat user@host          open a chat server and invite the peer
  /invite user@host        ask the peer to open a chat server for you
  /msg user@host text      send a message to a peer
  /sessions                list chat sessions
  /close user@host         end the chat with a peer
  /refresh                 announce presence now
  /help                    show this help
  /quit                    leave
Text without a leading slash goes to the current chat.";

/// One line describing `event`, or `None` if it is not worth printing
pub fn render_event(event: &NetworkEvent) -> Option<String> {
    let line = match event {
        NetworkEvent::UserSeen(_) => return None,
        NetworkEvent::ChatServerRequested { peer, target } => {
            format!("* {} asked {} to start a chat", peer, target)
        }
        NetworkEvent::ChatClientRequested { peer, source, port } => {
            format!("* {} invited you to chat at {}:{}", peer, source, port)
        }
        NetworkEvent::SessionOpened { peer, role, .. } => {
            format!("* Chat with {} opened ({})", peer, role)
        }
        NetworkEvent::MessageReceived { peer, message, .. } => {
            format!("<{}> {}", peer, message.payload)
        }
        NetworkEvent::SessionClosed { peer, .. } => format!("* Chat with {} closed", peer),
        NetworkEvent::SessionFailed { peer, reason, .. } => {
            format!("* Chat with {} failed: {}", peer, reason)
        }
    };
    Some(line)
}

pub fn render_new_peer(peer: &PeerIdentity) -> String {
    format!("* {} is online", peer)
}

pub fn render_peers(peers: &[(PeerIdentity, Duration)]) -> String {
    if peers.is_empty() {
        return "No peers seen yet".to_string();
    }

    let mut out = String::from("Peers:");
    for (peer, age) in peers {
        out.push_str(&format!("\n  - {} (seen {}s ago)", peer, age.as_secs()));
    }
    out
}

pub fn render_sessions(sessions: &[SessionHandle]) -> String {
    if sessions.is_empty() {
        return "No chat sessions".to_string();
    }

    let mut out = String::from("Sessions:");
    for session in sessions {
        let port = session
            .local_port()
            .map(|port| format!(" port {}", port))
            .unwrap_or_default();
        out.push_str(&format!(
            "\n  - {} [{} {:?}{}]",
            session.peer(),
            session.role(),
            session.state(),
            port
        ));
    }
    out
}
