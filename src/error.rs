//! Error types for key derivation, chunk encryption and salt embedding.

use std::io;

use thiserror::Error;

/// Coarse classification shared by every error the crate returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or unreadable file or image, empty password, bad parameters.
    Input,
    /// The salt payload does not fit in the carrier image.
    CapacityExceeded,
    /// No hidden payload could be found in the carrier image.
    NotFound,
    /// Ciphertext failed its integrity check.
    Authentication,
    /// Filesystem failure while reading, writing or renaming, or an
    /// internal failure not caused by the caller.
    Io,
}

/// Errors from key derivation and the chunked cipher.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("Invalid password or corrupted data ({0})")]
    Authentication(&'static str),

    #[error("unsupported token version: {0}")]
    UnsupportedVersion(u8),

    /// The cipher refused to seal a chunk. Not caused by the caller's data.
    #[error("chunk encryption failed")]
    Encryption,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::Authentication(_) | Self::UnsupportedVersion(_) => ErrorKind::Authentication,
            Self::Encryption | Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Errors from the carrier image and the salt codec.
#[derive(Debug, Error)]
pub enum StegoError {
    #[error("invalid carrier image: {0}")]
    Input(String),

    #[error("payload too large for carrier: need {needed} bits, image has {available}")]
    CapacityExceeded { needed: usize, available: usize },

    #[error("no hidden salt found in the carrier image")]
    NotFound,

    #[error("failed to encode carrier image: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StegoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::NotFound => ErrorKind::NotFound,
            Self::Image(_) | Self::Io(_) => ErrorKind::Io,
        }
    }
}

/// Error returned by [`crate::Pipeline`], which drives both layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Stego(#[from] StegoError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Crypto(e) => e.kind(),
            Self::Stego(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_version_counts_as_authentication_failure() {
        assert_eq!(
            CryptoError::UnsupportedVersion(9).kind(),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn encryption_failure_is_not_blamed_on_input() {
        assert_eq!(CryptoError::Encryption.kind(), ErrorKind::Io);
        assert_eq!(Error::from(CryptoError::Encryption).kind(), ErrorKind::Io);
    }

    #[test]
    fn pipeline_error_delegates_kind() {
        let err = Error::from(StegoError::NotFound);
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::from(CryptoError::Input("empty password".into()));
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn authentication_message_mentions_password() {
        let msg = CryptoError::Authentication("tag mismatch").to_string();
        assert!(msg.contains("Invalid password or corrupted data"));
    }
}
