//! Typed protocol message carried inside an encrypted envelope payload.

use bytes::Bytes;
use strand_net_codec::{CodecError, ProtoMessage};

use crate::SessionId;
use crate::proto::wire;

/// Whether a protocol message opens an exchange or answers one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn to_wire(self) -> i32 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
        }
    }

    fn from_wire(value: i32) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            other => Err(CodecError::invalid("kind", format!("unknown kind {other}"))),
        }
    }
}

/// A decrypted application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    /// Protocol id the message belongs to, e.g. `/strand/echo/1`.
    pub protocol: String,
    /// Correlation id chosen by the requester.
    pub request_id: String,
    /// Session the message was produced under.
    pub session_id: SessionId,
    pub body: Bytes,
    pub kind: MessageKind,
}

impl ProtocolMessage {
    pub fn request(
        protocol: impl Into<String>,
        request_id: impl Into<String>,
        session_id: SessionId,
        body: Bytes,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            request_id: request_id.into(),
            session_id,
            body,
            kind: MessageKind::Request,
        }
    }

    pub fn response(
        protocol: impl Into<String>,
        request_id: impl Into<String>,
        session_id: SessionId,
        body: Bytes,
    ) -> Self {
        Self {
            kind: MessageKind::Response,
            ..Self::request(protocol, request_id, session_id, body)
        }
    }
}

impl ProtoMessage for ProtocolMessage {
    type Proto = wire::ProtocolMessage;

    fn into_proto(self) -> Self::Proto {
        wire::ProtocolMessage {
            protocol: self.protocol,
            request_id: self.request_id,
            session_id: self.session_id.as_bytes().to_vec(),
            body: self.body.to_vec(),
            kind: self.kind.to_wire(),
        }
    }

    fn from_proto(proto: Self::Proto) -> Result<Self, CodecError> {
        if proto.protocol.is_empty() {
            return Err(CodecError::MissingField("protocol"));
        }
        if proto.request_id.is_empty() {
            return Err(CodecError::MissingField("request_id"));
        }

        Ok(Self {
            session_id: SessionId::parse("session_id", &proto.session_id)?,
            kind: MessageKind::from_wire(proto.kind)?,
            protocol: proto.protocol,
            request_id: proto.request_id,
            body: Bytes::from(proto.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_response_survives_encoding() {
        let id = SessionId::random();
        let message =
            ProtocolMessage::response("/strand/echo/1", "req-1", id, Bytes::from_static(b"pong"));

        let bytes = message.clone().encode_to_bytes().unwrap();
        let decoded = ProtocolMessage::decode_from_bytes(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.kind, MessageKind::Response);
    }

    #[test]
    fn test_empty_body_is_allowed() {
        let message = ProtocolMessage::request("/p", "r", SessionId::random(), Bytes::new());
        let bytes = message.clone().encode_to_bytes().unwrap();
        assert_eq!(ProtocolMessage::decode_from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn test_missing_protocol_is_rejected() {
        let proto = wire::ProtocolMessage {
            request_id: "req".into(),
            session_id: vec![0; 16],
            ..Default::default()
        };
        assert_matches!(
            ProtocolMessage::from_proto(proto),
            Err(CodecError::MissingField("protocol"))
        );
    }

    #[test]
    fn test_missing_request_id_is_rejected() {
        let proto = wire::ProtocolMessage {
            protocol: "/p".into(),
            session_id: vec![0; 16],
            ..Default::default()
        };
        assert_matches!(
            ProtocolMessage::from_proto(proto),
            Err(CodecError::MissingField("request_id"))
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let proto = wire::ProtocolMessage {
            protocol: "/p".into(),
            request_id: "req".into(),
            session_id: vec![0; 16],
            kind: 9,
            ..Default::default()
        };
        assert_matches!(
            ProtocolMessage::from_proto(proto),
            Err(CodecError::InvalidField { field: "kind", .. })
        );
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        assert!(ProtocolMessage::decode_from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
