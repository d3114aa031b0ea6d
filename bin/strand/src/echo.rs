//! `/strand/echo/1`: answers every request with its own body.

use strand_swarm::{DemuxError, InboundRequest, SwarmHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const ECHO_PROTOCOL: &str = "/strand/echo/1";

const QUEUE_SIZE: usize = 64;

/// Registers the echo handler and spawns the task answering it.
pub fn serve(handle: &SwarmHandle) -> Result<JoinHandle<()>, DemuxError> {
    let (tx, mut rx) = mpsc::channel::<InboundRequest>(QUEUE_SIZE);
    handle.demuxer().register_protocol_handler(ECHO_PROTOCOL, tx)?;

    let handle = handle.clone();
    Ok(tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            info!(
                peer_id = %request.peer_id,
                request_id = %request.request_id,
                message = %String::from_utf8_lossy(&request.body),
                "Echo request"
            );
            if let Err(error) = handle
                .respond(request.peer_id, request.protocol, request.request_id, request.body)
                .await
            {
                debug!(%error, "Failed to answer echo request");
            }
        }
    }))
}
