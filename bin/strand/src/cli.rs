//! Command line interface.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser};
use eyre::{Result, WrapErr, bail, eyre};
use libp2p::multiaddr::Protocol;
use serde::{Deserialize, Serialize};
use strand_observability::LogArgs;
use strand_swarm::{
    DEFAULT_MAX_DIAL_ATTEMPTS, Keypair, Multiaddr, PeerId, SwarmConfig,
};

/// strand - encrypted request/response transport between peers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct StrandCli {
    /// Logging configuration.
    #[command(flatten)]
    pub logs: LogArgs,

    /// Networking configuration.
    #[command(flatten)]
    pub network: NetworkArgs,
}

/// Parameters for configuring the network
#[derive(Debug, Clone, Args, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Networking")]
pub struct NetworkArgs {
    /// Address to accept connections on.
    #[arg(long, default_value = "0.0.0.0:7513")]
    pub listen: SocketAddr,

    /// Hex-encoded 32-byte ed25519 secret key. A fresh identity is
    /// generated when omitted.
    #[arg(long = "identity.secret", value_name = "HEX")]
    pub identity_secret: Option<String>,

    /// Peer to connect to on startup, as `<peer id>@<address>` or a
    /// multiaddr ending in `/p2p/<peer id>`. May be repeated.
    #[arg(long = "peer", value_name = "PEER")]
    pub peers: Vec<String>,

    /// Message sent to every startup peer over the echo protocol.
    #[arg(long)]
    pub message: Option<String>,

    /// Seconds to wait for a response before a request fails.
    #[arg(long = "request.timeout", default_value_t = 30, value_name = "SECS")]
    pub request_timeout: u64,

    /// Dial attempts before a peer is reported unreachable.
    #[arg(long = "dial.attempts", default_value_t = DEFAULT_MAX_DIAL_ATTEMPTS)]
    pub dial_attempts: u32,
}

impl NetworkArgs {
    pub fn swarm_config(&self) -> SwarmConfig {
        let mut config = SwarmConfig::default()
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .with_max_dial_attempts(self.dial_attempts);
        config.transport = config.transport.with_listen_addr(self.listen);
        config
    }

    pub fn keypair(&self) -> Result<Keypair> {
        let Some(secret) = &self.identity_secret else {
            return Ok(Keypair::generate_ed25519());
        };
        let mut bytes = hex::decode(secret.trim_start_matches("0x"))
            .wrap_err("identity secret is not valid hex")?;
        if bytes.len() != 32 {
            bail!("identity secret must be 32 bytes, got {}", bytes.len());
        }
        Keypair::ed25519_from_bytes(&mut bytes).wrap_err("invalid identity secret")
    }

    pub fn startup_peers(&self) -> Result<Vec<(PeerId, String)>> {
        self.peers.iter().map(|peer| parse_peer(peer)).collect()
    }
}

/// Parses `<peer id>@<address>` or `<multiaddr>/p2p/<peer id>`.
fn parse_peer(value: &str) -> Result<(PeerId, String)> {
    if let Some((peer_id, address)) = value.split_once('@') {
        let peer_id = peer_id
            .parse()
            .wrap_err_with(|| format!("invalid peer id in {value:?}"))?;
        return Ok((peer_id, address.to_owned()));
    }

    let address: Multiaddr = value
        .parse()
        .wrap_err_with(|| format!("invalid peer {value:?}"))?;
    let peer_id = address
        .iter()
        .find_map(|protocol| match protocol {
            Protocol::P2p(peer_id) => Some(peer_id),
            _ => None,
        })
        .ok_or_else(|| eyre!("peer {value:?} has no /p2p/ component"))?;
    Ok((peer_id, value.to_owned()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parse(args: &[&str]) -> StrandCli {
        StrandCli::parse_from(std::iter::once("strand").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.network.listen, "0.0.0.0:7513".parse::<SocketAddr>().unwrap());
        assert!(cli.network.peers.is_empty());

        let config = cli.network.swarm_config();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_dial_attempts, DEFAULT_MAX_DIAL_ATTEMPTS);
    }

    #[test]
    fn test_peer_forms() {
        let peer = PeerId::random();
        let cli = parse(&[
            "--peer",
            &format!("{peer}@127.0.0.1:7000"),
            "--peer",
            &format!("/ip4/10.0.0.1/tcp/7001/p2p/{peer}"),
        ]);
        let peers = cli.network.startup_peers().unwrap();
        assert_eq!(peers[0], (peer, "127.0.0.1:7000".to_owned()));
        assert_eq!(peers[1].0, peer);
    }

    #[test]
    fn test_peer_without_id_is_rejected() {
        let cli = parse(&["--peer", "/ip4/10.0.0.1/tcp/7001"]);
        assert_matches!(cli.network.startup_peers(), Err(_));
    }

    #[test]
    fn test_identity_secret_is_stable() {
        let secret = hex::encode([7u8; 32]);
        let cli = parse(&["--identity.secret", &secret]);
        let a = cli.network.keypair().unwrap();
        let b = cli.network.keypair().unwrap();
        assert_eq!(a.public().to_peer_id(), b.public().to_peer_id());

        let cli = parse(&["--identity.secret", "abcd"]);
        assert_matches!(cli.network.keypair(), Err(_));
    }
}
