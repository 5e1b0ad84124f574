//! Token format v1.
//!
//! V1 Token Format:
//! ```text
//! VERSION (1) | FLAGS (1) | BODY_LEN (4, BE) | NONCE (24) | BODY (BODY_LEN)
//! ```
//!
//! `BODY` is the XChaCha20-Poly1305 ciphertext of one chunk followed by its
//! 16-byte tag. Bit 0 of `FLAGS` marks the final chunk; the other bits are
//! reserved and must be zero.
//!
//! The associated data bound into each tag is
//! `VERSION || FLAGS || BODY_LEN || CHUNK_INDEX (8, BE)`, so a token only
//! authenticates at its own position and with its own framing.

use std::io::Read;

use super::read_exact;
use crate::crypto::{NONCE_LEN, TAG_LEN};
use crate::error::CryptoError;
use crate::stream::MAX_CHUNK_SIZE;

/// Token format version.
pub const VERSION_V1: u8 = 1;
/// Flag bit marking the last token of a container.
pub const FLAG_FINAL: u8 = 0b0000_0001;

const VER_LEN: usize = 1;
const FLAGS_LEN: usize = 1;
const BODY_LEN_LEN: usize = 4;
const INDEX_LEN: usize = 8;

/// Bytes preceding the body.
pub const HEADER_LEN: usize = VER_LEN + FLAGS_LEN + BODY_LEN_LEN + NONCE_LEN;
/// Fixed size difference between a plaintext chunk and its token.
pub const OVERHEAD: usize = HEADER_LEN + TAG_LEN;
/// Length of the associated data authenticated with each chunk.
pub const AAD_LEN: usize = VER_LEN + FLAGS_LEN + BODY_LEN_LEN + INDEX_LEN;

const MAX_BODY_LEN: usize = MAX_CHUNK_SIZE + TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    is_final: bool,
    body_len: u32,
    nonce: [u8; NONCE_LEN],
}

impl TokenHeader {
    pub fn new(
        is_final: bool,
        plaintext_len: usize,
        nonce: [u8; NONCE_LEN],
    ) -> Result<Self, CryptoError> {
        if plaintext_len > MAX_CHUNK_SIZE {
            return Err(CryptoError::Input(format!(
                "chunk of {plaintext_len} bytes exceeds maximum of {MAX_CHUNK_SIZE}"
            )));
        }
        Ok(Self {
            is_final,
            body_len: (plaintext_len + TAG_LEN) as u32,
            nonce,
        })
    }

    pub fn version(&self) -> u8 {
        VERSION_V1
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn body_len(&self) -> usize {
        self.body_len as usize
    }

    pub fn plaintext_len(&self) -> usize {
        self.body_len() - TAG_LEN
    }

    /// Total size of the token on disk.
    pub fn token_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    fn flags(&self) -> u8 {
        if self.is_final { FLAG_FINAL } else { 0 }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = VERSION_V1;
        buf[1] = self.flags();
        buf[2..6].copy_from_slice(&self.body_len.to_be_bytes());
        buf[6..].copy_from_slice(&self.nonce);
        buf
    }

    pub fn aad(&self, index: u64) -> [u8; AAD_LEN] {
        let mut aad = [0u8; AAD_LEN];
        aad[0] = VERSION_V1;
        aad[1] = self.flags();
        aad[2..6].copy_from_slice(&self.body_len.to_be_bytes());
        aad[6..].copy_from_slice(&index.to_be_bytes());
        aad
    }

    /// Parses the rest of a v1 header once the version byte was consumed.
    pub(super) fn read_after_version<R: Read>(reader: &mut R) -> Result<Self, CryptoError> {
        let mut buf = [0u8; HEADER_LEN - VER_LEN];
        read_exact(reader, &mut buf)?;

        let flags = buf[0];
        if flags & !FLAG_FINAL != 0 {
            return Err(CryptoError::Authentication("reserved token flags set"));
        }

        let body_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if (body_len as usize) < TAG_LEN || body_len as usize > MAX_BODY_LEN {
            return Err(CryptoError::Authentication("token length out of range"));
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[5..]);

        Ok(Self {
            is_final: flags & FLAG_FINAL != 0,
            body_len,
            nonce,
        })
    }
}
