//! Password-based file encryption whose KDF salt lives inside a carrier image.
//!
//! Encrypting derives a key from the password and a fresh random salt,
//! rewrites the file as a sequence of authenticated chunk tokens, and hides
//! the salt in the least significant bits of a lossless image. Decrypting
//! needs both the password and that image.
//!
//! ```text
//! encrypt: Idle -> DeriveKeyAndSalt -> StreamEncrypt -> EmbedSalt -> Done
//! decrypt: Idle -> ExtractSalt -> DeriveKey -> StreamDecrypt -> Done
//! ```

pub mod crypto;
pub mod error;
pub mod format;
pub mod stego;
mod storage;
pub mod stream;

use std::path::Path;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub use crate::crypto::{DerivedKey, KdfParams, SALT_LEN, derive_key, generate_salt};
pub use crate::error::{CryptoError, Error, ErrorKind, StegoError};
pub use crate::format::{ContainerSummary, inspect};
pub use crate::stego::{Carrier, LsbCodec, SaltCodec, embed_salt, extract_salt};
pub use crate::stream::{ChunkCipher, DEFAULT_CHUNK_SIZE, Progress, StreamStats};

/// Encrypts the file at `path` in place with `key`.
pub fn encrypt_file(
    path: &Path,
    key: &DerivedKey,
    progress: Progress<'_>,
) -> Result<(), CryptoError> {
    ChunkCipher::new(key).encrypt_file(path, progress)?;
    Ok(())
}

/// Decrypts the file at `path` in place with `key`.
///
/// Fails with [`CryptoError::Authentication`] on a wrong key or corrupted
/// data, leaving the file unmodified.
pub fn decrypt_file(
    path: &Path,
    key: &DerivedKey,
    progress: Progress<'_>,
) -> Result<(), CryptoError> {
    ChunkCipher::new(key).decrypt_file(path, progress)?;
    Ok(())
}

/// Result of a successful encryption.
#[must_use = "a lost salt leaves the file undecryptable"]
#[derive(Debug)]
pub enum EncryptOutcome {
    /// File encrypted and salt hidden in the carrier.
    Sealed,
    /// The file was encrypted but the salt could not be written to the
    /// carrier. Without it the file cannot be decrypted.
    SaltNotEmbedded(StegoError),
}

/// Drives key derivation, chunk encryption and salt embedding together.
///
/// Holds configuration only; the password and paths are passed per call.
#[derive(Debug, Clone)]
pub struct Pipeline<C = LsbCodec> {
    kdf: KdfParams,
    chunk_size: usize,
    codec: C,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

impl Pipeline {
    pub fn new(kdf: KdfParams) -> Self {
        Self::with_codec(kdf, LsbCodec)
    }
}

impl<C: SaltCodec> Pipeline<C> {
    pub fn with_codec(kdf: KdfParams, codec: C) -> Self {
        Self {
            kdf,
            chunk_size: DEFAULT_CHUNK_SIZE,
            codec,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    fn cipher(&self, key: &DerivedKey) -> Result<ChunkCipher, CryptoError> {
        ChunkCipher::with_chunk_size(key, self.chunk_size)
    }

    /// Encrypts `file` in place and hides the new salt in `carrier_path`.
    ///
    /// The carrier is loaded and checked for capacity before anything is
    /// written. If the file was encrypted but the carrier could not be
    /// updated, the call still succeeds with
    /// [`EncryptOutcome::SaltNotEmbedded`].
    pub fn encrypt(
        &self,
        password: &str,
        file: &Path,
        carrier_path: &Path,
        progress: Progress<'_>,
    ) -> Result<EncryptOutcome, Error> {
        let mut carrier = Carrier::open(carrier_path)?;
        let payload_len = stego::encode_salt_payload(&[0u8; SALT_LEN], Some(self.kdf)).len();
        let capacity = self.codec.capacity(&carrier);
        if payload_len > capacity {
            return Err(StegoError::CapacityExceeded {
                needed: payload_len * 8,
                available: capacity * 8,
            }
            .into());
        }

        debug!(kdf = %self.kdf, "deriving key");
        let salt = Zeroizing::new(generate_salt()?);
        let key = derive_key(password, salt.as_slice(), self.kdf)?;

        let stats = self.cipher(&key)?.encrypt_file(file, progress)?;
        drop(key);

        let embedded =
            stego::embed_salt_with(&self.codec, &mut carrier, salt.as_slice(), Some(self.kdf))
                .and_then(|()| carrier.save(carrier_path));

        match embedded {
            Ok(()) => {
                info!(
                    file = %file.display(),
                    carrier = %carrier_path.display(),
                    chunks = stats.chunks,
                    "encrypted and salt embedded"
                );
                Ok(EncryptOutcome::Sealed)
            }
            Err(e) => {
                warn!(
                    file = %file.display(),
                    carrier = %carrier_path.display(),
                    error = %e,
                    "file encrypted but salt was not embedded"
                );
                Ok(EncryptOutcome::SaltNotEmbedded(e))
            }
        }
    }

    /// Recovers the salt from `carrier_path` and decrypts `file` in place.
    ///
    /// The key derivation recorded in the carrier is used when present;
    /// the pipeline's own [`KdfParams`] only apply to carriers holding a
    /// bare salt.
    pub fn decrypt(
        &self,
        password: &str,
        file: &Path,
        carrier_path: &Path,
        progress: Progress<'_>,
    ) -> Result<(), Error> {
        let carrier = Carrier::open(carrier_path)?;
        let hidden = stego::extract_salt_with(&self.codec, &carrier)?;
        if hidden.salt.len() != SALT_LEN {
            return Err(StegoError::NotFound.into());
        }

        let kdf = hidden.kdf.unwrap_or(self.kdf);
        debug!(%kdf, recorded = hidden.kdf.is_some(), "deriving key");
        let key = derive_key(password, &hidden.salt, kdf)?;

        let stats = self.cipher(&key)?.decrypt_file(file, progress)?;
        info!(file = %file.display(), chunks = stats.chunks, "decrypted");
        Ok(())
    }
}
