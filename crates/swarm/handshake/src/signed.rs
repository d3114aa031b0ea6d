//! Signed ephemeral Diffie-Hellman handshake.
//!
//! ```text
//! initiator                                   responder
//!   Init { sid, pk_i, e_i, addr_i, sig_i } -->
//!                                          <-- Response { sid, pk_r, e_r, addr_r, sig_r }
//!   Confirm { sid, pk_i, e_i, addr_i, sig_c } -->
//! ```
//!
//! `sig_i` covers `(init, sid, e_i, addr_i)`; `sig_r` additionally covers
//! `e_i`, tying the response to this particular initiation, and `sig_c`
//! covers `(confirm, sid, e_i, addr_i, e_r)`. The responder picks `e_r`
//! fresh for every initiation, so only a live initiator can confirm; until
//! then it holds no session. Both sides derive the session key as
//! `BLAKE2b-256(label || X25519(e_i, e_r) || sid || e_i || e_r)`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use curve25519_dalek::MontgomeryPoint;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use strand_net_proto::{EPHEMERAL_KEY_LEN, HandshakeData, HandshakeKind, SessionId};
use strand_swarm_peer::{LocalNode, RemoteNode, SESSION_KEY_LEN, Session, SessionKey, dial_target};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{HandshakeError, HandshakeOutcome, HandshakeProtocol};

/// Version string both sides must agree on.
pub const PROTOCOL_VERSION: &str = "strand/1";

const TRANSCRIPT_LABEL: &[u8] = b"strand/handshake/v1";
const KDF_LABEL: &[u8] = b"strand/session/v1";

type Blake2b256 = Blake2b<U32>;

#[derive(Zeroize, ZeroizeOnDrop)]
struct EphemeralSecret([u8; 32]);

impl EphemeralSecret {
    fn random() -> Self {
        Self(rand::random())
    }

    fn public_key(&self) -> [u8; EPHEMERAL_KEY_LEN] {
        MontgomeryPoint::mul_base_clamped(self.0).to_bytes()
    }

    fn agree(
        &self,
        theirs: &[u8; EPHEMERAL_KEY_LEN],
    ) -> Result<Zeroizing<[u8; 32]>, HandshakeError> {
        let shared = Zeroizing::new(MontgomeryPoint(*theirs).mul_clamped(self.0).to_bytes());
        if shared.iter().all(|b| *b == 0) {
            return Err(HandshakeError::WeakKey);
        }
        Ok(shared)
    }
}

/// An initiation we sent and the secret needed to finish it.
struct Outstanding {
    peer_id: PeerId,
    secret: EphemeralSecret,
    ephemeral: [u8; EPHEMERAL_KEY_LEN],
}

/// An initiation we answered that its sender has not confirmed yet.
struct Unconfirmed {
    peer_id: PeerId,
    initiator_ephemeral: [u8; EPHEMERAL_KEY_LEN],
    ephemeral: [u8; EPHEMERAL_KEY_LEN],
    address: Multiaddr,
    key: SessionKey,
}

/// Default [`HandshakeProtocol`].
pub struct SignedHandshake {
    local: Arc<LocalNode>,
    outstanding: HashMap<SessionId, Outstanding>,
    unconfirmed: HashMap<SessionId, Unconfirmed>,
}

impl SignedHandshake {
    pub fn new(local: Arc<LocalNode>) -> Self {
        Self {
            local,
            outstanding: HashMap::new(),
            unconfirmed: HashMap::new(),
        }
    }

    /// Number of initiations still waiting for a response.
    pub fn in_progress(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of answered initiations still waiting for a confirmation.
    pub fn awaiting_confirmation(&self) -> usize {
        self.unconfirmed.len()
    }

    fn sign(&self, transcript: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        self.local
            .sign(transcript)
            .map_err(|e| HandshakeError::Signing(e.to_string()))
    }

    /// Checks `data.signature` over the transcript built from the given
    /// ephemerals rather than whatever the message claims.
    fn verify(
        data: &HandshakeData,
        ephemeral: &[u8; EPHEMERAL_KEY_LEN],
        peer_ephemeral: Option<&[u8; EPHEMERAL_KEY_LEN]>,
    ) -> Result<(), HandshakeError> {
        let message = transcript(
            data.kind,
            &data.session_id,
            ephemeral,
            &data.listen_address,
            peer_ephemeral,
        );
        if data.public_key.verify(&message, &data.signature) {
            Ok(())
        } else {
            Err(HandshakeError::InvalidSignature(data.peer_id()))
        }
    }

    fn accept(
        &mut self,
        data: HandshakeData,
        peer_id: PeerId,
        observed: SocketAddr,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        Self::verify(&data, &data.ephemeral_key, None)?;

        let session_id = data.session_id;
        if self.unconfirmed.contains_key(&session_id)
            || self.outstanding.contains_key(&session_id)
        {
            return Err(HandshakeError::DuplicateSession(session_id));
        }

        let address = dialable_address(&data.listen_address, observed);
        dial_target(&peer_id, &address)?;

        let secret = EphemeralSecret::random();
        let ephemeral = secret.public_key();
        let shared = secret.agree(&data.ephemeral_key)?;
        let key = derive_key(&shared, &session_id, &data.ephemeral_key, &ephemeral);

        let listen_address = self.local.listen_address().clone();
        let signature = self.sign(&transcript(
            HandshakeKind::Response,
            &session_id,
            &ephemeral,
            &listen_address,
            Some(&data.ephemeral_key),
        ))?;

        self.unconfirmed.insert(
            session_id,
            Unconfirmed {
                peer_id,
                initiator_ephemeral: data.ephemeral_key,
                ephemeral,
                address,
                key,
            },
        );
        trace!(%peer_id, %session_id, "Answered handshake");

        Ok(HandshakeOutcome::Accepted {
            peer_id,
            session_id,
            reply: HandshakeData {
                kind: HandshakeKind::Response,
                session_id,
                public_key: self.local.public_key(),
                ephemeral_key: ephemeral,
                listen_address,
                signature,
                protocol_version: PROTOCOL_VERSION.to_owned(),
            },
        })
    }

    fn complete(
        &mut self,
        data: HandshakeData,
        peer_id: PeerId,
        observed: SocketAddr,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let outstanding = self
            .outstanding
            .remove(&data.session_id)
            .ok_or(HandshakeError::UnknownSession(data.session_id))?;

        if outstanding.peer_id != peer_id {
            return Err(HandshakeError::PeerMismatch {
                expected: outstanding.peer_id,
                found: peer_id,
            });
        }

        Self::verify(&data, &data.ephemeral_key, Some(&outstanding.ephemeral))?;

        let shared = outstanding.secret.agree(&data.ephemeral_key)?;
        let key = derive_key(
            &shared,
            &data.session_id,
            &outstanding.ephemeral,
            &data.ephemeral_key,
        );

        let listen_address = self.local.listen_address().clone();
        let signature = self.sign(&transcript(
            HandshakeKind::Confirm,
            &data.session_id,
            &outstanding.ephemeral,
            &listen_address,
            Some(&data.ephemeral_key),
        ))?;

        let mut session = Session::new(data.session_id, key);
        session.authenticate();

        debug!(%peer_id, session_id = %data.session_id, "Handshake established");

        Ok(HandshakeOutcome::Established {
            peer_id,
            address: dialable_address(&data.listen_address, observed),
            session,
            confirm: HandshakeData {
                kind: HandshakeKind::Confirm,
                session_id: data.session_id,
                public_key: self.local.public_key(),
                ephemeral_key: outstanding.ephemeral,
                listen_address,
                signature,
                protocol_version: PROTOCOL_VERSION.to_owned(),
            },
        })
    }

    fn confirm(
        &mut self,
        data: HandshakeData,
        peer_id: PeerId,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let unconfirmed = self
            .unconfirmed
            .remove(&data.session_id)
            .ok_or(HandshakeError::UnknownSession(data.session_id))?;

        if unconfirmed.peer_id != peer_id {
            return Err(HandshakeError::PeerMismatch {
                expected: unconfirmed.peer_id,
                found: peer_id,
            });
        }

        Self::verify(
            &data,
            &unconfirmed.initiator_ephemeral,
            Some(&unconfirmed.ephemeral),
        )?;

        let Unconfirmed { address, key, .. } = unconfirmed;
        let mut session = Session::new(data.session_id, key);
        session.authenticate();

        debug!(%peer_id, session_id = %data.session_id, %address, "Handshake confirmed");

        Ok(HandshakeOutcome::Confirmed {
            peer_id,
            address,
            session,
        })
    }
}

impl HandshakeProtocol for SignedHandshake {
    fn initiate(&mut self, remote: &RemoteNode) -> Result<HandshakeData, HandshakeError> {
        let peer_id = remote.peer_id();
        if peer_id == self.local.peer_id() {
            return Err(HandshakeError::SelfConnection);
        }

        let session_id = SessionId::random();
        let secret = EphemeralSecret::random();
        let ephemeral = secret.public_key();
        let listen_address = self.local.listen_address().clone();
        let signature = self.sign(&transcript(
            HandshakeKind::Init,
            &session_id,
            &ephemeral,
            &listen_address,
            None,
        ))?;

        self.outstanding.insert(
            session_id,
            Outstanding {
                peer_id,
                secret,
                ephemeral,
            },
        );
        trace!(%peer_id, %session_id, "Initiating handshake");

        Ok(HandshakeData {
            kind: HandshakeKind::Init,
            session_id,
            public_key: self.local.public_key(),
            ephemeral_key: ephemeral,
            listen_address,
            signature,
            protocol_version: PROTOCOL_VERSION.to_owned(),
        })
    }

    fn on_message(
        &mut self,
        data: HandshakeData,
        observed: SocketAddr,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        if data.protocol_version != PROTOCOL_VERSION {
            return Err(HandshakeError::VersionMismatch {
                ours: PROTOCOL_VERSION,
                theirs: data.protocol_version,
            });
        }

        let peer_id = data.peer_id();
        if peer_id == self.local.peer_id() {
            return Err(HandshakeError::SelfConnection);
        }

        match data.kind {
            HandshakeKind::Init => self.accept(data, peer_id, observed),
            HandshakeKind::Response => self.complete(data, peer_id, observed),
            HandshakeKind::Confirm => self.confirm(data, peer_id),
        }
    }

    fn abandon(&mut self, peer_id: &PeerId) {
        self.outstanding.retain(|_, o| o.peer_id != *peer_id);
    }

    fn cancel(&mut self, session_id: &SessionId) {
        self.unconfirmed.remove(session_id);
    }
}

fn transcript(
    kind: HandshakeKind,
    session_id: &SessionId,
    ephemeral: &[u8; EPHEMERAL_KEY_LEN],
    listen_address: &Multiaddr,
    peer_ephemeral: Option<&[u8; EPHEMERAL_KEY_LEN]>,
) -> Vec<u8> {
    let address = listen_address.to_vec();
    let mut out = Vec::with_capacity(
        TRANSCRIPT_LABEL.len() + 1 + 16 + 2 * EPHEMERAL_KEY_LEN + 4 + address.len(),
    );
    out.extend_from_slice(TRANSCRIPT_LABEL);
    out.push(kind.as_byte());
    out.extend_from_slice(session_id.as_bytes());
    out.extend_from_slice(ephemeral);
    if let Some(peer_ephemeral) = peer_ephemeral {
        out.extend_from_slice(peer_ephemeral);
    }
    out.extend_from_slice(&(address.len() as u32).to_be_bytes());
    out.extend_from_slice(&address);
    out
}

fn derive_key(
    shared: &[u8; 32],
    session_id: &SessionId,
    initiator_ephemeral: &[u8; EPHEMERAL_KEY_LEN],
    responder_ephemeral: &[u8; EPHEMERAL_KEY_LEN],
) -> SessionKey {
    let mut hasher = Blake2b256::new();
    hasher.update(KDF_LABEL);
    hasher.update(shared);
    hasher.update(session_id.as_bytes());
    hasher.update(initiator_ephemeral);
    hasher.update(responder_ephemeral);
    let digest = hasher.finalize();

    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&digest);
    let session_key = SessionKey::from_bytes(key);
    key.zeroize();
    session_key
}

/// Replaces an unspecified advertised ip (`0.0.0.0`, `::`) with the ip the
/// message was observed from.
fn dialable_address(advertised: &Multiaddr, observed: SocketAddr) -> Multiaddr {
    advertised
        .iter()
        .map(|protocol| match protocol {
            Protocol::Ip4(ip) if ip.is_unspecified() => Protocol::from(observed.ip()),
            Protocol::Ip6(ip) if ip.is_unspecified() => Protocol::from(observed.ip()),
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct Side {
        node: Arc<LocalNode>,
        handshake: SignedHandshake,
    }

    fn side(listen: &str) -> Side {
        let node = Arc::new(LocalNode::generate(listen.parse().unwrap()));
        Side {
            handshake: SignedHandshake::new(node.clone()),
            node,
        }
    }

    fn remote_of(side: &Side) -> RemoteNode {
        RemoteNode::from_multiaddr(side.node.peer_id(), side.node.listen_address().clone()).unwrap()
    }

    fn observed() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn answer(responder: &mut Side, init: HandshakeData) -> HandshakeData {
        let HandshakeOutcome::Accepted { reply, .. } =
            responder.handshake.on_message(init, observed()).unwrap()
        else {
            panic!("expected accepted outcome");
        };
        reply
    }

    fn establish(initiator: &mut Side, reply: HandshakeData) -> (Session, HandshakeData) {
        let HandshakeOutcome::Established {
            session, confirm, ..
        } = initiator.handshake.on_message(reply, observed()).unwrap()
        else {
            panic!("expected established outcome");
        };
        (session, confirm)
    }

    #[test]
    fn test_both_sides_derive_the_same_session() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");

        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        assert_eq!(a.handshake.in_progress(), 1);

        let HandshakeOutcome::Accepted {
            peer_id,
            session_id,
            reply,
        } = b.handshake.on_message(init, observed()).unwrap()
        else {
            panic!("expected accepted outcome");
        };
        assert_eq!(peer_id, a.node.peer_id());
        assert_eq!(session_id, reply.session_id);
        assert_eq!(b.handshake.awaiting_confirmation(), 1);

        let HandshakeOutcome::Established {
            peer_id,
            session: a_session,
            confirm,
            ..
        } = a.handshake.on_message(reply, observed()).unwrap()
        else {
            panic!("expected established outcome");
        };
        assert_eq!(peer_id, b.node.peer_id());
        assert_eq!(a.handshake.in_progress(), 0);

        let HandshakeOutcome::Confirmed {
            peer_id,
            address,
            session: b_session,
        } = b.handshake.on_message(confirm, observed()).unwrap()
        else {
            panic!("expected confirmed outcome");
        };
        assert_eq!(peer_id, a.node.peer_id());
        assert_eq!(&address, a.node.listen_address());
        assert_eq!(b.handshake.awaiting_confirmation(), 0);

        assert!(a_session.is_authenticated());
        assert!(b_session.is_authenticated());
        assert_eq!(a_session.id(), b_session.id());

        let ciphertext = a_session.encrypt(b"over the wire").unwrap();
        assert_eq!(b_session.decrypt(&ciphertext).unwrap(), b"over the wire");
    }

    #[test]
    fn test_replayed_init_cannot_be_confirmed() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");

        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        let reply = answer(&mut b, init.clone());
        let (_, confirm) = establish(&mut a, reply);
        assert_matches!(
            b.handshake.on_message(confirm.clone(), observed()),
            Ok(HandshakeOutcome::Confirmed { .. })
        );

        // A recorded initiation is answered with a fresh ephemeral, which
        // the recorded confirmation does not cover.
        let _ = answer(&mut b, init);
        assert_eq!(b.handshake.awaiting_confirmation(), 1);
        assert_matches!(
            b.handshake.on_message(confirm, observed()),
            Err(HandshakeError::InvalidSignature(_))
        );
        assert_eq!(b.handshake.awaiting_confirmation(), 0);
    }

    #[test]
    fn test_confirm_from_other_identity_is_rejected() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");
        let mut c = side("127.0.0.1:7003");

        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        let reply = answer(&mut b, init);

        // C signs a confirmation for A's session with its own key.
        let (_, mut confirm) = establish(&mut a, reply);
        let forged = c.handshake.initiate(&remote_of(&b)).unwrap();
        confirm.public_key = forged.public_key;
        assert_matches!(
            b.handshake.on_message(confirm, observed()),
            Err(HandshakeError::PeerMismatch { .. })
        );
    }

    #[test]
    fn test_initiation_pending_confirmation_is_not_reopened() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");

        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        let session_id = init.session_id;
        let _ = answer(&mut b, init.clone());
        assert_matches!(
            b.handshake.on_message(init.clone(), observed()),
            Err(HandshakeError::DuplicateSession(id)) if id == session_id
        );

        b.handshake.cancel(&session_id);
        assert_eq!(b.handshake.awaiting_confirmation(), 0);
        assert_matches!(
            b.handshake.on_message(init, observed()),
            Ok(HandshakeOutcome::Accepted { .. })
        );
    }

    #[test]
    fn test_tampered_init_is_rejected() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");

        let mut init = a.handshake.initiate(&remote_of(&b)).unwrap();
        init.listen_address = "/ip4/10.0.0.66/tcp/1".parse().unwrap();

        assert_matches!(
            b.handshake.on_message(init, observed()),
            Err(HandshakeError::InvalidSignature(_))
        );
        assert_eq!(b.handshake.awaiting_confirmation(), 0);
    }

    #[test]
    fn test_response_from_wrong_peer_is_rejected() {
        let mut a = side("127.0.0.1:7001");
        let b = side("127.0.0.1:7002");
        let mut c = side("127.0.0.1:7003");

        // A believes it is talking to B, but C answers.
        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        let reply = answer(&mut c, init);

        assert_matches!(
            a.handshake.on_message(reply, observed()),
            Err(HandshakeError::PeerMismatch { .. })
        );
    }

    #[test]
    fn test_response_replayed_into_other_initiation_fails() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");

        let first = a.handshake.initiate(&remote_of(&b)).unwrap();
        let second = a.handshake.initiate(&remote_of(&b)).unwrap();

        let mut reply = answer(&mut b, first);
        reply.session_id = second.session_id;

        assert_matches!(
            a.handshake.on_message(reply, observed()),
            Err(HandshakeError::InvalidSignature(_))
        );
    }

    #[test]
    fn test_abandon_forgets_initiation() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");

        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        let session_id = init.session_id;
        a.handshake.abandon(&b.node.peer_id());
        assert_eq!(a.handshake.in_progress(), 0);

        let reply = answer(&mut b, init);
        assert_matches!(
            a.handshake.on_message(reply, observed()),
            Err(HandshakeError::UnknownSession(id)) if id == session_id
        );
    }

    #[test]
    fn test_self_connection_is_refused() {
        let mut a = side("127.0.0.1:7001");
        let own = remote_of(&a);
        assert_matches!(a.handshake.initiate(&own), Err(HandshakeError::SelfConnection));
    }

    #[test]
    fn test_version_mismatch_is_refused() {
        let mut a = side("127.0.0.1:7001");
        let mut b = side("127.0.0.1:7002");
        let mut init = a.handshake.initiate(&remote_of(&b)).unwrap();
        init.protocol_version = "strand/0".into();
        assert_matches!(
            b.handshake.on_message(init, observed()),
            Err(HandshakeError::VersionMismatch { .. })
        );
    }

    #[test]
    fn test_unspecified_listen_address_uses_observed_ip() {
        let mut a = side("0.0.0.0:7001");
        let mut b = side("127.0.0.1:7002");

        let init = a.handshake.initiate(&remote_of(&b)).unwrap();
        let HandshakeOutcome::Accepted { reply, .. } = b
            .handshake
            .on_message(init, "192.168.1.20:51234".parse().unwrap())
            .unwrap()
        else {
            panic!("expected accepted outcome");
        };
        let (_, confirm) = establish(&mut a, reply);
        let HandshakeOutcome::Confirmed { address, .. } =
            b.handshake.on_message(confirm, observed()).unwrap()
        else {
            panic!("expected confirmed outcome");
        };
        assert_eq!(address.to_string(), "/ip4/192.168.1.20/tcp/7001");
    }
}
