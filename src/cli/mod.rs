use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::Level;

use crate::network::{NetworkConfig, PeerIdentity};

pub mod commands;
pub mod menu;
pub mod roster;
pub mod ui;

pub use commands::handle_command;
pub use menu::InteractiveMenu;
pub use roster::Roster;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serverless chat between peers on a LAN", long_about = None)]
pub struct Cli {
    /// User name announced to other peers
    #[arg(long, env = "USER")]
    pub user: String,

    /// Host name announced to other peers [default: the OS host name]
    #[arg(long)]
    pub hostname: Option<String>,

    /// Address presence announcements are broadcast to
    #[arg(long, default_value_t = Ipv4Addr::BROADCAST)]
    pub broadcast_addr: Ipv4Addr,

    /// UDP port used for presence announcements
    #[arg(long, default_value_t = 10002)]
    pub port: u16,

    /// Preferred TCP port for chat servers
    #[arg(long, default_value_t = 5000)]
    pub chat_port: u16,

    /// Seconds between presence announcements
    #[arg(long, default_value_t = 20)]
    pub refresh_secs: u64,

    /// Log level written to stderr
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Chat interactively (the default)
    Interactive,
    /// Listen for presence announcements and list the peers seen
    ListPeers {
        /// Seconds to listen before printing the list
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },
}

impl Cli {
    pub fn config(&self) -> NetworkConfig {
        NetworkConfig {
            listen_port: self.port,
            broadcast_addr: self.broadcast_addr,
            broadcast_port: self.port,
            chat_port: self.chat_port,
            refresh_interval: Duration::from_secs(self.refresh_secs.max(1)),
            ..NetworkConfig::default()
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        let host = self
            .hostname
            .clone()
            .or_else(sysinfo::System::host_name)
            .unwrap_or_else(|| "localhost".to_string());
        PeerIdentity::new(self.user.clone(), host)
    }
}
