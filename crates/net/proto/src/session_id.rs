use std::fmt;

use strand_net_codec::CodecError;

/// Length of a session identifier in bytes.
pub const SESSION_ID_LEN: usize = 16;

/// Identifier chosen by the handshake initiator for one session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    pub(crate) fn parse(field: &'static str, bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::MissingField(field));
        }
        Self::try_from(bytes).map_err(|_| {
            CodecError::invalid(
                field,
                format!("expected {SESSION_ID_LEN} bytes, got {}", bytes.len()),
            )
        })
    }
}

impl TryFrom<&[u8]> for SessionId {
    type Error = std::array::TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(value.try_into()?))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(SessionId::random(), SessionId::random());
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(SessionId::parse("session_id", &[1, 2, 3]).is_err());
        assert!(matches!(
            SessionId::parse("session_id", &[]),
            Err(CodecError::MissingField("session_id"))
        ));
        let id = SessionId::parse("session_id", &[7u8; SESSION_ID_LEN]).unwrap();
        assert_eq!(id.as_bytes(), &[7u8; SESSION_ID_LEN]);
    }

    #[test]
    fn test_display_is_hex() {
        let id = SessionId::from_bytes([0xab; SESSION_ID_LEN]);
        assert_eq!(id.to_string(), "ab".repeat(SESSION_ID_LEN));
    }
}
