//! The outer message of every frame.

use bytes::Bytes;
use strand_net_codec::{CodecError, ProtoMessage};

use crate::proto::wire;
use crate::{HandshakeData, SessionId};

/// Encrypted payload addressed to an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEnvelope {
    pub session_id: SessionId,
    /// Ciphertext of an encoded [`ProtocolMessage`](crate::ProtocolMessage).
    pub payload: Bytes,
}

/// A decoded frame.
///
/// Which variant a frame decodes to is decided by the payload field alone:
/// an empty payload always means handshake traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Handshake(HandshakeData),
    Data(DataEnvelope),
}

impl Envelope {
    pub fn data(session_id: SessionId, payload: impl Into<Bytes>) -> Self {
        Self::Data(DataEnvelope {
            session_id,
            payload: payload.into(),
        })
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake(_))
    }
}

impl From<HandshakeData> for Envelope {
    fn from(value: HandshakeData) -> Self {
        Self::Handshake(value)
    }
}

impl ProtoMessage for Envelope {
    type Proto = wire::Envelope;

    fn into_proto(self) -> Self::Proto {
        match self {
            Self::Handshake(handshake) => wire::Envelope {
                handshake: Some(handshake.into_proto()),
                ..Default::default()
            },
            Self::Data(data) => wire::Envelope {
                session_id: data.session_id.as_bytes().to_vec(),
                payload: data.payload.to_vec(),
                handshake: None,
            },
        }
    }

    fn from_proto(proto: Self::Proto) -> Result<Self, CodecError> {
        if proto.payload.is_empty() {
            let handshake = proto
                .handshake
                .ok_or(CodecError::MissingField("handshake"))?;
            return Ok(Self::Handshake(HandshakeData::from_proto(handshake)?));
        }

        if proto.handshake.is_some() {
            return Err(CodecError::invalid(
                "handshake",
                "data envelope carries a handshake",
            ));
        }

        Ok(Self::Data(DataEnvelope {
            session_id: SessionId::parse("session_id", &proto.session_id)?,
            payload: Bytes::from(proto.payload),
        }))
    }
}
