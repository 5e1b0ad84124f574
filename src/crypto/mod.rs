//! Cryptographic primitives: key derivation and randomness.
//!
//! Chunk framing lives in [`crate::format`] and the per-chunk AEAD in
//! [`crate::stream`].

pub mod aead;
pub mod kdf;

pub use aead::{generate_nonce, generate_salt, secure_random};
pub use kdf::{DerivedKey, KdfParams, derive_key};

/// Length of the salt (32 bytes).
pub const SALT_LEN: usize = 32;
/// Length of the nonce (24 bytes for XChaCha20-Poly1305).
pub const NONCE_LEN: usize = 24;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;
