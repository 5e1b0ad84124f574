//! Hiding the key-derivation salt inside a carrier image.
//!
//! The salt travels as base64 ASCII so the hidden payload stays in a
//! printable 7-bit alphabet. The pipeline prefixes it with the KDF
//! descriptor, so a carrier also says how to stretch the password.
//!
//! A [`SaltCodec`] decides where the bits go; the default [`LsbCodec`]
//! overwrites least significant bits of color samples.

mod carrier;
mod lsb;

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;
use zeroize::Zeroizing;

pub use carrier::Carrier;
pub use lsb::LsbCodec;

use crate::crypto::KdfParams;
use crate::error::StegoError;

/// A reversible embedding strategy for a small payload.
///
/// `extract` must be the exact left-inverse of `embed` on a carrier that was
/// not modified in between.
pub trait SaltCodec {
    /// Largest payload, in bytes, that `embed` accepts for this carrier.
    fn capacity(&self, carrier: &Carrier) -> usize;

    /// Hides `payload`, replacing any payload embedded earlier.
    fn embed(&self, carrier: &mut Carrier, payload: &[u8]) -> Result<(), StegoError>;

    /// Recovers the payload, or [`StegoError::NotFound`].
    fn extract(&self, carrier: &Carrier) -> Result<Vec<u8>, StegoError>;
}

/// Separates the KDF descriptor from the base64 salt. Outside the base64
/// alphabet, so a bare salt never contains it.
const KDF_SEPARATOR: char = '$';

/// A salt recovered from a carrier, with the key derivation recorded next
/// to it when the carrier was written by [`crate::Pipeline`].
#[derive(Debug)]
pub struct HiddenSalt {
    pub salt: Zeroizing<Vec<u8>>,
    pub kdf: Option<KdfParams>,
}

/// Payload form of a salt: base64 text, optionally prefixed with the
/// printable KDF descriptor and [`KDF_SEPARATOR`].
pub fn encode_salt_payload(salt: &[u8], kdf: Option<KdfParams>) -> Zeroizing<Vec<u8>> {
    let encoded = STANDARD.encode(salt);
    let text = match kdf {
        Some(kdf) => format!("{kdf}{KDF_SEPARATOR}{encoded}"),
        None => encoded,
    };
    Zeroizing::new(text.into_bytes())
}

/// Inverse of [`encode_salt_payload`]. A payload that does not parse is
/// treated as a corrupt marker.
pub fn decode_salt_payload(payload: &[u8]) -> Result<HiddenSalt, StegoError> {
    let text = std::str::from_utf8(payload).map_err(|_| StegoError::NotFound)?;
    let (kdf, encoded) = match text.rsplit_once(KDF_SEPARATOR) {
        Some((descriptor, encoded)) => {
            let kdf = descriptor.parse::<KdfParams>().map_err(|e| {
                debug!(error = %e, "hidden kdf descriptor rejected");
                StegoError::NotFound
            })?;
            (Some(kdf), encoded)
        }
        None => (None, text),
    };
    let salt = STANDARD
        .decode(encoded)
        .map(Zeroizing::new)
        .map_err(|_| StegoError::NotFound)?;
    Ok(HiddenSalt { salt, kdf })
}

/// Embeds `salt`, and `kdf` if given, into an already loaded carrier.
pub fn embed_salt_with<C: SaltCodec + ?Sized>(
    codec: &C,
    carrier: &mut Carrier,
    salt: &[u8],
    kdf: Option<KdfParams>,
) -> Result<(), StegoError> {
    let payload = encode_salt_payload(salt, kdf);
    codec.embed(carrier, &payload)
}

/// Extracts a salt from an already loaded carrier using `codec`.
pub fn extract_salt_with<C: SaltCodec + ?Sized>(
    codec: &C,
    carrier: &Carrier,
) -> Result<HiddenSalt, StegoError> {
    let payload = Zeroizing::new(codec.extract(carrier)?);
    decode_salt_payload(&payload)
}

/// Hides `salt` in the image at `image_path` and replaces the file atomically.
pub fn embed_salt(image_path: &Path, salt: &[u8]) -> Result<(), StegoError> {
    let mut carrier = Carrier::open(image_path)?;
    embed_salt_with(&LsbCodec, &mut carrier, salt, None)?;
    carrier.save(image_path)?;
    debug!(path = %image_path.display(), "salt embedded");
    Ok(())
}

/// Recovers the salt hidden in the image at `image_path`.
pub fn extract_salt(image_path: &Path) -> Result<Vec<u8>, StegoError> {
    let carrier = Carrier::open(image_path)?;
    let hidden = extract_salt_with(&LsbCodec, &carrier)?;
    Ok(hidden.salt.to_vec())
}
