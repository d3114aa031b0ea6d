//! strand node binary.

mod cli;
mod echo;

use bytes::Bytes;
use clap::Parser;
use eyre::WrapErr;
use strand_swarm::{PeerId, Swarm, SwarmHandle};
use tracing::{info, warn};

use crate::cli::StrandCli;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = StrandCli::parse();
    strand_observability::init_logging(&cli.logs)?;

    let keypair = cli.network.keypair()?;
    let peers = cli.network.startup_peers()?;
    let (handle, task) = Swarm::spawn(cli.network.swarm_config(), keypair).await?;

    info!(
        peer_id = %handle.local_peer_id(),
        listen_addr = %handle.local_node().listen_address(),
        "Node started"
    );
    let _echo = echo::serve(&handle)?;

    for (peer_id, address) in peers {
        tokio::spawn(greet(handle.clone(), peer_id, address, cli.network.message.clone()));
    }

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for ctrl-c")?;
    info!("Shutting down");
    handle.shutdown();
    task.await.wrap_err("swarm task failed")?;
    Ok(())
}

/// Connects to a startup peer and, if asked to, sends it one echo request.
async fn greet(handle: SwarmHandle, peer_id: PeerId, address: String, message: Option<String>) {
    if let Err(error) = handle.connect_to(peer_id, address.as_str()).await {
        warn!(%peer_id, %address, %error, "Failed to connect");
        return;
    }
    info!(%peer_id, %address, "Connected");

    let Some(message) = message else {
        return;
    };
    let request_id = format!("{:016x}", rand::random::<u64>());
    match handle
        .send_message(peer_id, echo::ECHO_PROTOCOL, request_id, Bytes::from(message))
        .await
    {
        Ok(response) => {
            info!(%peer_id, response = %String::from_utf8_lossy(&response), "Echo response");
        }
        Err(error) => warn!(%peer_id, %error, "Echo request failed"),
    }
}
