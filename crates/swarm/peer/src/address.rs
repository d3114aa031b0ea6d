//! Conversions between user supplied addresses, multiaddrs and socket addresses.

use std::net::{IpAddr, SocketAddr};

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};

use crate::RemoteNodeError;

/// Parses either a multiaddr (`/ip4/10.0.0.1/tcp/7513`) or a plain socket
/// address (`10.0.0.1:7513`).
pub fn parse_address(address: &str) -> Result<Multiaddr, RemoteNodeError> {
    let malformed = |reason: String| RemoteNodeError::Malformed {
        address: address.to_owned(),
        reason,
    };

    if address.starts_with('/') {
        address.parse().map_err(|e: libp2p::multiaddr::Error| malformed(e.to_string()))
    } else {
        address
            .parse::<SocketAddr>()
            .map(socket_to_multiaddr)
            .map_err(|e| malformed(e.to_string()))
    }
}

pub fn socket_to_multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::from(addr.ip()))
        .with(Protocol::Tcp(addr.port()))
}

/// Resolves the socket address to dial for `peer_id` at `addr`.
///
/// A trailing `/p2p/<id>` component is accepted only when it names `peer_id`.
pub fn dial_target(peer_id: &PeerId, addr: &Multiaddr) -> Result<SocketAddr, RemoteNodeError> {
    let mut ip: Option<IpAddr> = None;
    let mut port = None;

    for protocol in addr.iter() {
        match protocol {
            Protocol::Ip4(v4) => ip = Some(v4.into()),
            Protocol::Ip6(v6) => ip = Some(v6.into()),
            Protocol::Tcp(p) => port = Some(p),
            Protocol::P2p(found) => {
                if found != *peer_id {
                    return Err(RemoteNodeError::PeerIdMismatch {
                        expected: *peer_id,
                        found,
                    });
                }
            }
            other => return Err(RemoteNodeError::UnsupportedProtocol(other.to_string())),
        }
    }

    match (ip, port) {
        (Some(ip), Some(port)) => Ok(SocketAddr::new(ip, port)),
        _ => Err(RemoteNodeError::NotDialable(addr.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_multiaddr_and_socket_forms() {
        let peer = PeerId::random();
        let from_multiaddr = parse_address("/ip4/10.0.0.1/tcp/7513").unwrap();
        let from_socket = parse_address("10.0.0.1:7513").unwrap();
        assert_eq!(from_multiaddr, from_socket);
        assert_eq!(
            dial_target(&peer, &from_socket).unwrap(),
            "10.0.0.1:7513".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_ipv6() {
        let peer = PeerId::random();
        let addr = parse_address("[::1]:9000").unwrap();
        assert_eq!(addr.to_string(), "/ip6/::1/tcp/9000");
        assert_eq!(dial_target(&peer, &addr).unwrap().port(), 9000);
    }

    #[test]
    fn test_malformed_addresses_are_rejected() {
        assert_matches!(parse_address("not an address"), Err(RemoteNodeError::Malformed { .. }));
        assert_matches!(parse_address("/ip4/999.0.0.1/tcp/1"), Err(RemoteNodeError::Malformed { .. }));
        assert_matches!(parse_address(""), Err(RemoteNodeError::Malformed { .. }));
    }

    #[test]
    fn test_dial_target_requires_ip_and_port() {
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/10.0.0.1".parse().unwrap();
        assert_matches!(dial_target(&peer, &addr), Err(RemoteNodeError::NotDialable(_)));

        let addr: Multiaddr = "/dns4/example.com/tcp/1".parse().unwrap();
        assert_matches!(
            dial_target(&peer, &addr),
            Err(RemoteNodeError::UnsupportedProtocol(_))
        );
    }

    #[test]
    fn test_dial_target_checks_p2p_suffix() {
        let peer = PeerId::random();
        let good = socket_to_multiaddr("127.0.0.1:1".parse().unwrap()).with(Protocol::P2p(peer));
        assert!(dial_target(&peer, &good).is_ok());

        let other = PeerId::random();
        let bad = socket_to_multiaddr("127.0.0.1:1".parse().unwrap()).with(Protocol::P2p(other));
        assert_matches!(
            dial_target(&peer, &bad),
            Err(RemoteNodeError::PeerIdMismatch { .. })
        );
    }
}
