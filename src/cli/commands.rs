use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;
use tracing::info;

use crate::cli::roster::Roster;
use crate::cli::ui;
use crate::cli::{Cli, Commands, InteractiveMenu};
use crate::network::{ChatNode, NetworkEvent};

/// Peers are forgotten after this many silent refresh intervals
const PEER_EXPIRY_INTERVALS: u32 = 3;

pub async fn handle_command(cli: Cli) -> Result<()> {
    let config = cli.config();
    let identity = cli.identity();
    let roster = Roster::new(config.refresh_interval * PEER_EXPIRY_INTERVALS);

    let (node, events) = ChatNode::start(config, identity).await?;

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Interactive => InteractiveMenu::new(node, events, roster).run().await,
        Commands::ListPeers { wait } => {
            list_peers(node, events, roster, Duration::from_secs(wait)).await
        }
    }
}

async fn list_peers(
    node: ChatNode,
    mut events: mpsc::Receiver<NetworkEvent>,
    mut roster: Roster,
    wait: Duration,
) -> Result<()> {
    info!("Listening for peers for {}s", wait.as_secs());

    let deadline = time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                roster.observe(&event, Instant::now());
            }
            _ = &mut deadline => break,
        }
    }

    println!("{}", ui::render_peers(&roster.peers(Instant::now())));
    node.shutdown().await;
    Ok(())
}
