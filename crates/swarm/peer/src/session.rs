//! Session keys and authenticated encryption.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use strand_net_proto::SessionId;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::SessionError;

/// Length of the symmetric session key.
pub const SESSION_KEY_LEN: usize = 32;

/// Length of the random nonce prefixed to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Symmetric key material, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Cryptographic state shared with one peer.
///
/// A session starts unauthenticated while the handshake is still deciding
/// whether to trust the peer, and refuses to encrypt or decrypt until
/// [`authenticate`](Self::authenticate) is called.
///
/// Ciphertext layout: `nonce (12 bytes) || AES-256-GCM(body) || tag`, with
/// the session id bound as associated data.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    key: SessionKey,
    authenticated: bool,
}

impl Session {
    pub fn new(id: SessionId, key: SessionKey) -> Self {
        Self {
            id,
            key,
            authenticated: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn authenticate(&mut self) {
        self.authenticated = true;
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.ensure_authenticated()?;

        let nonce: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .key
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: self.id.as_bytes().as_slice(),
                },
            )
            .map_err(|_| SessionError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.ensure_authenticated()?;

        let (nonce, ciphertext) = data
            .split_at_checked(NONCE_LEN)
            .ok_or(SessionError::Truncated)?;

        self.key
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: self.id.as_bytes().as_slice(),
                },
            )
            .map_err(|_| SessionError::Decrypt)
    }

    fn ensure_authenticated(&self) -> Result<(), SessionError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(SessionError::NotAuthenticated)
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}
