//! Wire types exchanged between strand nodes.
//!
//! Every frame on a connection carries one [`Envelope`]. An envelope with an
//! empty payload is a handshake message; anything else is an encrypted
//! [`ProtocolMessage`] bound to an established session.

mod proto {
    include!(concat!(env!("OUT_DIR"), "/proto/mod.rs"));
}

mod envelope;
mod handshake;
mod message;
mod session_id;

pub use envelope::{DataEnvelope, Envelope};
pub use handshake::{EPHEMERAL_KEY_LEN, HandshakeData, HandshakeKind};
pub use message::{MessageKind, ProtocolMessage};
pub use session_id::{SESSION_ID_LEN, SessionId};

pub use strand_net_codec::{CodecError, ProtoMessage};
