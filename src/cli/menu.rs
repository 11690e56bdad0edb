use anyhow::Result;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time;
use tracing::debug;

use crate::cli::roster::Roster;
use crate::cli::ui;
use crate::network::{ChatNode, NetworkEvent, PeerIdentity};

/// A parsed line of operator input
///
/// Peer arguments are kept as typed; they may be `user@host` or a bare user
/// name resolved against the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Users,
    Chat(String),
    Invite(String),
    Msg(String, String),
    Say(String),
    Sessions,
    Close(String),
    Refresh,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let peer_arg = |usage: &str| -> Result<String, String> {
        match args.split_whitespace().collect::<Vec<_>>().as_slice() {
            [peer] => Ok(peer.to_string()),
            _ => Err(format!("Usage: {}", usage)),
        }
    };

    let command = match name {
        "users" => Command::Users,
        "chat" => Command::Chat(peer_arg("/chat user@host")?),
        "invite" => Command::Invite(peer_arg("/invite user@host")?),
        "msg" => match args.split_once(char::is_whitespace) {
            Some((peer, text)) if !text.trim().is_empty() => {
                Command::Msg(peer.to_string(), text.trim().to_string())
            }
            _ => return Err("Usage: /msg user@host text".to_string()),
        },
        "sessions" => Command::Sessions,
        "close" => Command::Close(peer_arg("/close user@host")?),
        "refresh" => Command::Refresh,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command /{} (try /help)", other)),
    };

    Ok(Some(command))
}

pub struct InteractiveMenu {
    node: ChatNode,
    events: mpsc::Receiver<NetworkEvent>,
    roster: Roster,
    current: Option<PeerIdentity>,
}

impl InteractiveMenu {
    pub fn new(node: ChatNode, events: mpsc::Receiver<NetworkEvent>, roster: Roster) -> Self {
        Self {
            node,
            events,
            roster,
            current: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        println!(
            "Signed on as {}. Type /help for commands.",
            self.node.identity()
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut prune = time::interval(self.node.refresh_interval());
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.execute(&line).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.events.recv() => self.show(event),
                _ = prune.tick() => {
                    for peer in self.roster.prune(Instant::now()) {
                        println!("* {} went quiet", peer);
                    }
                }
                _ = &mut ctrl_c => break,
            }
        }

        println!("Signing off");
        self.node.shutdown().await;
        Ok(())
    }

    /// Handle one line of input; false once the operator asked to quit
    async fn execute(&mut self, line: &str) -> bool {
        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return true,
            Err(e) => {
                println!("{}", e);
                return true;
            }
        };
        debug!("Command: {:?}", command);

        let outcome = match command {
            Command::Quit => return false,
            Command::Help => {
                println!("{}", ui::HELP);
                Ok(())
            }
            Command::Users => {
                println!("{}", ui::render_peers(&self.roster.peers(Instant::now())));
                Ok(())
            }
            Command::Sessions => {
                println!("{}", ui::render_sessions(&self.node.sessions().await));
                Ok(())
            }
            Command::Refresh => self.node.refresh_presence().map_err(|e| e.to_string()),
            Command::Chat(target) => self.chat(&target).await,
            Command::Invite(target) => self.invite(&target).await,
            Command::Msg(target, text) => self.message(&target, text).await,
            Command::Say(text) => match self.current.clone() {
                Some(peer) => self
                    .node
                    .send_chat_message(&peer, text)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("No current chat; use /chat or /msg".to_string()),
            },
            Command::Close(target) => self.close(&target).await,
        };

        if let Err(e) = outcome {
            println!("{}", e);
        }
        true
    }

    async fn chat(&mut self, target: &str) -> Result<(), String> {
        let peer = self.resolve(target)?;
        let port = self
            .node
            .request_chat(peer.clone())
            .await
            .map_err(|e| e.to_string())?;
        println!("* Waiting for {} on port {}", peer, port);
        self.current = Some(peer);
        Ok(())
    }

    async fn invite(&mut self, target: &str) -> Result<(), String> {
        let peer = self.resolve(target)?;
        self.node
            .request_remote_server(peer.clone())
            .await
            .map_err(|e| e.to_string())?;
        println!("* Asked {} to start a chat", peer);
        Ok(())
    }

    async fn message(&mut self, target: &str, text: String) -> Result<(), String> {
        let peer = self.resolve(target)?;
        self.node
            .send_chat_message(&peer, text)
            .await
            .map_err(|e| e.to_string())?;
        self.current = Some(peer);
        Ok(())
    }

    async fn close(&mut self, target: &str) -> Result<(), String> {
        let peer = self.resolve(target)?;
        self.node.end_chat(&peer).await.map_err(|e| e.to_string())?;
        if self.current.as_ref() == Some(&peer) {
            self.current = None;
        }
        Ok(())
    }

    /// Turn a typed peer into an identity, using the roster for bare user names
    fn resolve(&self, target: &str) -> Result<PeerIdentity, String> {
        if target.contains('@') {
            return target.parse().map_err(|e| format!("{}", e));
        }

        match self.roster.by_user(target).as_slice() {
            [peer] => Ok(peer.clone()),
            [] => Err(format!("No peer named {} has been seen", target)),
            _ => Err(format!("{} is on several hosts; use user@host", target)),
        }
    }

    fn show(&mut self, event: NetworkEvent) {
        if self.roster.observe(&event, Instant::now()) {
            if let NetworkEvent::UserSeen(peer) = &event {
                println!("{}", ui::render_new_peer(peer));
            }
        }

        match &event {
            NetworkEvent::SessionOpened { peer, .. } if self.current.is_none() => {
                self.current = Some(peer.clone());
            }
            NetworkEvent::SessionClosed { peer, .. } | NetworkEvent::SessionFailed { peer, .. }
                if self.current.as_ref() == Some(peer) =>
            {
                self.current = None;
            }
            _ => {}
        }

        if let Some(line) = ui::render_event(&event) {
            println!("{}", line);
        }
    }
}
