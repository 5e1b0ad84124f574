//! On-disk container format for encrypted files.
//!
//! An encrypted file is nothing but its tokens concatenated in stream order,
//! one token per plaintext chunk. Each token begins with a version byte, so a
//! reader dispatches per token and a later layout can coexist with v1.

use std::io::{self, Read};

use serde::Serialize;

use crate::error::CryptoError;

pub mod v1;

pub use v1::TokenHeader;

/// Latest token format version
pub const CURRENT_VERSION: u8 = v1::VERSION_V1;

/// Reads the next token header.
///
/// Returns `Ok(None)` on a clean end of stream at a token boundary.
///
/// # Errors
///
/// Returns an error if:
/// - The stream ends inside a header
/// - The version is unsupported
/// - The header fields are malformed
pub fn read_header<R: Read>(reader: &mut R) -> Result<Option<TokenHeader>, CryptoError> {
    let Some(version) = read_byte(reader)? else {
        return Ok(None);
    };

    match version {
        v1::VERSION_V1 => TokenHeader::read_after_version(reader).map(Some),
        v => Err(CryptoError::UnsupportedVersion(v)),
    }
}

/// Reads a single byte, or `None` at end of stream.
pub(crate) fn read_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, CryptoError> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// `read_exact` that reports a short read as a truncated token.
pub(crate) fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CryptoError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CryptoError::Authentication("truncated token"),
        _ => CryptoError::Io(e),
    })
}

/// Structural summary of an encrypted file, readable without the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub version: u8,
    pub chunks: u64,
    pub plaintext_len: u64,
    pub container_len: u64,
    /// Whether a final token was seen. `false` means the file is truncated.
    pub complete: bool,
}

/// Walks the token headers of a container, skipping over bodies.
///
/// Nothing is authenticated here; a summary only shows that the framing is
/// well formed.
pub fn inspect<R: Read>(mut reader: R) -> Result<ContainerSummary, CryptoError> {
    let mut summary = ContainerSummary {
        version: CURRENT_VERSION,
        chunks: 0,
        plaintext_len: 0,
        container_len: 0,
        complete: false,
    };

    while let Some(header) = read_header(&mut reader)? {
        if summary.complete {
            return Err(CryptoError::Authentication("data after final token"));
        }

        let skipped = io::copy(
            &mut (&mut reader).take(header.body_len() as u64),
            &mut io::sink(),
        )?;
        if skipped != header.body_len() as u64 {
            return Err(CryptoError::Authentication("truncated token"));
        }

        summary.version = header.version();
        summary.chunks += 1;
        summary.plaintext_len += header.plaintext_len() as u64;
        summary.container_len += header.token_len() as u64;
        summary.complete = header.is_final();
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{NONCE_LEN, TAG_LEN};

    fn token(is_final: bool, plaintext_len: usize) -> Vec<u8> {
        let header = TokenHeader::new(is_final, plaintext_len, [1u8; NONCE_LEN]).unwrap();
        let mut buf = header.to_bytes().to_vec();
        buf.resize(header.token_len(), 0xEE);
        buf
    }

    #[test]
    fn empty_stream_has_no_header() {
        assert!(read_header(&mut io::empty()).unwrap().is_none());
    }

    #[test]
    fn unsupported_version_fails() {
        let data = [99u8; v1::HEADER_LEN];
        assert!(matches!(
            read_header(&mut &data[..]),
            Err(CryptoError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn inspect_counts_chunks() {
        let mut data = token(false, 1024);
        data.extend(token(false, 1024));
        data.extend(token(true, 10));

        let summary = inspect(&data[..]).unwrap();

        assert_eq!(summary.version, v1::VERSION_V1);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.plaintext_len, 2058);
        assert_eq!(summary.container_len, data.len() as u64);
        assert!(summary.complete);
    }

    #[test]
    fn inspect_reports_missing_final_token() {
        let data = token(false, 64);

        let summary = inspect(&data[..]).unwrap();
        assert!(!summary.complete);
    }

    #[test]
    fn inspect_rejects_truncated_body() {
        let data = token(true, 64);
        assert!(inspect(&data[..data.len() - 1]).is_err());
    }

    #[test]
    fn inspect_rejects_trailing_token() {
        let mut data = token(true, 8);
        data.extend(token(true, 8));
        assert!(inspect(&data[..]).is_err());
    }

    #[test]
    fn summary_serializes_to_json() {
        let data = token(true, TAG_LEN);
        let summary = inspect(&data[..]).unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["chunks"], 1);
        assert_eq!(json["complete"], true);
    }
}
