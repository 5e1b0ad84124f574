use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use ring::pbkdf2;
use zeroize::{Zeroize, Zeroizing};

use super::{KEY_LEN, SALT_LEN};
use crate::error::CryptoError;

/// PBKDF2 iteration count for interactive use.
pub const DEFAULT_ITERATIONS: u32 = 100_000;
/// PBKDF2 iteration count for the slow offline-only variant.
pub const OFFLINE_ITERATIONS: u32 = 10_000_000;
/// Lowest PBKDF2 iteration count accepted.
pub const MIN_ITERATIONS: u32 = 1_000;
/// Highest PBKDF2 iteration count accepted.
pub const MAX_ITERATIONS: u32 = 100_000_000;
/// Highest Argon2 memory cost accepted, in KiB (4 GiB).
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
/// Highest Argon2 time cost accepted.
pub const MAX_TIME_COST: u32 = 1_000;
/// Highest Argon2 lane count accepted.
pub const MAX_PARALLELISM: u32 = 64;

/// Key derivation algorithm and its cost parameters.
///
/// Both flows derive through the same [`derive_key`], so the cost factor is
/// tuned here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfParams {
    /// PBKDF2-HMAC-SHA512.
    Pbkdf2Sha512 { iterations: u32 },
    /// Argon2id (memory-hard).
    Argon2id {
        mem_cost_kib: u32,
        time_cost: u32,
        parallelism: u32,
    },
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::Pbkdf2Sha512 {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn pbkdf2(iterations: u32) -> Result<Self, CryptoError> {
        let params = Self::Pbkdf2Sha512 { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn argon2id(
        mem_cost_kib: u32,
        time_cost: u32,
        parallelism: u32,
    ) -> Result<Self, CryptoError> {
        let params = Self::Argon2id {
            mem_cost_kib,
            time_cost,
            parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    /// Short algorithm label, safe to log.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pbkdf2Sha512 { .. } => "pbkdf2-sha512",
            Self::Argon2id { .. } => "argon2id",
        }
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        match *self {
            Self::Pbkdf2Sha512 { iterations } => {
                if iterations < MIN_ITERATIONS {
                    return Err(invalid(format!(
                        "pbkdf2 iterations must be >= {MIN_ITERATIONS}"
                    )));
                }
                if iterations > MAX_ITERATIONS {
                    return Err(invalid(format!(
                        "pbkdf2 iterations must be <= {MAX_ITERATIONS}"
                    )));
                }
            }
            Self::Argon2id {
                mem_cost_kib,
                time_cost,
                parallelism,
            } => {
                if mem_cost_kib < 8 {
                    return Err(invalid("argon2 memory cost too low"));
                }
                if time_cost < 1 {
                    return Err(invalid("argon2 time cost must be >= 1"));
                }
                if parallelism < 1 {
                    return Err(invalid("argon2 parallelism must be >= 1"));
                }
                if mem_cost_kib > MAX_MEM_COST_KIB
                    || time_cost > MAX_TIME_COST
                    || parallelism > MAX_PARALLELISM
                {
                    return Err(invalid(format!(
                        "argon2 cost exceeds m={MAX_MEM_COST_KIB},t={MAX_TIME_COST},\
                         p={MAX_PARALLELISM}"
                    )));
                }
                if mem_cost_kib < 8 * parallelism {
                    return Err(invalid("argon2 memory cost must be at least 8 * parallelism"));
                }
            }
        }
        Ok(())
    }
}

/// Compact printable form recorded next to the salt, e.g.
/// `pbkdf2-sha512:i=100000` or `argon2id:m=65536,t=3,p=1`.
impl fmt::Display for KdfParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Pbkdf2Sha512 { iterations } => write!(f, "{}:i={iterations}", self.name()),
            Self::Argon2id {
                mem_cost_kib,
                time_cost,
                parallelism,
            } => write!(
                f,
                "{}:m={mem_cost_kib},t={time_cost},p={parallelism}",
                self.name()
            ),
        }
    }
}

impl FromStr for KdfParams {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, costs) = s
            .split_once(':')
            .ok_or_else(|| invalid(format!("malformed kdf descriptor {s:?}")))?;

        let mut values = costs.split(',').map(|field| {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed kdf field {field:?}")))?;
            let value = value
                .parse::<u32>()
                .map_err(|_| invalid(format!("malformed kdf value {field:?}")))?;
            Ok::<_, CryptoError>((key, value))
        });
        let mut field = |expected: &str| match values.next() {
            Some(Ok((key, value))) if key == expected => Ok(value),
            Some(Err(e)) => Err(e),
            _ => Err(invalid(format!("kdf descriptor {s:?} lacks {expected}="))),
        };

        let params = match name {
            "pbkdf2-sha512" => Self::pbkdf2(field("i")?)?,
            "argon2id" => Self::argon2id(field("m")?, field("t")?, field("p")?)?,
            other => return Err(invalid(format!("unknown kdf {other:?}"))),
        };
        if values.next().is_some() {
            return Err(invalid(format!("trailing fields in kdf descriptor {s:?}")));
        }
        Ok(params)
    }
}

fn invalid(msg: impl Into<String>) -> CryptoError {
    CryptoError::Input(msg.into())
}

/// A 256-bit key derived from a password and salt.
///
/// Zeroized on drop; never printed.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// URL-safe base64 form of the key.
    pub fn encoded(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(self.bytes))
    }

    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            URL_SAFE
                .decode(encoded.trim())
                .map_err(|_| invalid("key is not valid url-safe base64"))?,
        );
        let bytes: [u8; KEY_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("key must decode to {KEY_LEN} bytes")))?;
        Ok(Self { bytes })
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the file encryption key from a password and a 32-byte salt.
pub fn derive_key(password: &str, salt: &[u8], kdf: KdfParams) -> Result<DerivedKey, CryptoError> {
    if password.is_empty() {
        return Err(invalid("password cannot be empty"));
    }
    if salt.len() != SALT_LEN {
        return Err(invalid(format!(
            "salt must be {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    kdf.validate()?;

    let mut key = DerivedKey::from_bytes([0u8; KEY_LEN]);

    match kdf {
        KdfParams::Pbkdf2Sha512 { iterations } => {
            let iterations = NonZeroU32::new(iterations)
                .ok_or_else(|| invalid("pbkdf2 iterations must be non-zero"))?;
            pbkdf2::derive(
                pbkdf2::PBKDF2_HMAC_SHA512,
                iterations,
                salt,
                password.as_bytes(),
                &mut key.bytes,
            );
        }
        KdfParams::Argon2id {
            mem_cost_kib,
            time_cost,
            parallelism,
        } => {
            let params = Params::new(mem_cost_kib, time_cost, parallelism, Some(KEY_LEN))
                .map_err(|e| invalid(format!("failed to construct Argon2 params: {e}")))?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password_into(password.as_bytes(), salt, &mut key.bytes)
                .map_err(|e| invalid(format!("argon2 key derivation failed: {e}")))?;
        }
    }

    Ok(key)
}
