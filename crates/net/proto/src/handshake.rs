//! Handshake payload carried by envelopes with an empty data payload.

use libp2p::{Multiaddr, PeerId, identity::PublicKey};
use strand_net_codec::{CodecError, ProtoMessage};

use crate::SessionId;
use crate::proto::wire;

/// Length of an X25519 ephemeral public key.
pub const EPHEMERAL_KEY_LEN: usize = 32;

/// Which leg of the exchange a handshake message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum HandshakeKind {
    Init,
    Response,
    /// Initiator's proof that it took part in this exchange.
    Confirm,
}

impl HandshakeKind {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Response => 1,
            Self::Confirm => 2,
        }
    }
}

/// One handshake message.
///
/// The signature covers fields chosen by the handshake implementation; this
/// type only guarantees that every field is present and well formed.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeData {
    pub kind: HandshakeKind,
    pub session_id: SessionId,
    /// Long-term identity key of the sender.
    pub public_key: PublicKey,
    pub ephemeral_key: [u8; EPHEMERAL_KEY_LEN],
    /// Address the sender accepts connections on.
    pub listen_address: Multiaddr,
    pub signature: Vec<u8>,
    pub protocol_version: String,
}

impl HandshakeData {
    /// Peer id derived from the sender's identity key.
    pub fn peer_id(&self) -> PeerId {
        self.public_key.to_peer_id()
    }
}

impl ProtoMessage for HandshakeData {
    type Proto = wire::HandshakeData;

    fn into_proto(self) -> Self::Proto {
        wire::HandshakeData {
            kind: i32::from(self.kind.as_byte()),
            session_id: self.session_id.as_bytes().to_vec(),
            node_public_key: self.public_key.encode_protobuf(),
            ephemeral_key: self.ephemeral_key.to_vec(),
            listen_address: self.listen_address.to_vec(),
            signature: self.signature,
            protocol_version: self.protocol_version,
        }
    }

    fn from_proto(proto: Self::Proto) -> Result<Self, CodecError> {
        let kind = match proto.kind {
            0 => HandshakeKind::Init,
            1 => HandshakeKind::Response,
            2 => HandshakeKind::Confirm,
            other => {
                return Err(CodecError::invalid("kind", format!("unknown kind {other}")));
            }
        };

        if proto.node_public_key.is_empty() {
            return Err(CodecError::MissingField("node_public_key"));
        }
        let public_key = PublicKey::try_decode_protobuf(&proto.node_public_key)
            .map_err(|e| CodecError::invalid("node_public_key", e.to_string()))?;

        let ephemeral_key = <[u8; EPHEMERAL_KEY_LEN]>::try_from(proto.ephemeral_key.as_slice())
            .map_err(|_| {
                CodecError::invalid(
                    "ephemeral_key",
                    format!(
                        "expected {EPHEMERAL_KEY_LEN} bytes, got {}",
                        proto.ephemeral_key.len()
                    ),
                )
            })?;

        if proto.listen_address.is_empty() {
            return Err(CodecError::MissingField("listen_address"));
        }
        let listen_address = Multiaddr::try_from(proto.listen_address)
            .map_err(|e| CodecError::invalid("listen_address", e.to_string()))?;

        if proto.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        if proto.protocol_version.is_empty() {
            return Err(CodecError::MissingField("protocol_version"));
        }

        Ok(Self {
            kind,
            session_id: SessionId::parse("session_id", &proto.session_id)?,
            public_key,
            ephemeral_key,
            listen_address,
            signature: proto.signature,
            protocol_version: proto.protocol_version,
        })
    }
}
