use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{CEK_LEN, FMK_LEN, HMAC_LEN, KEK_LEN, secure_random};
use crate::error::{Cdoc2Error, Result};

type HmacSha256 = Hmac<Sha256>;

const FMK_SALT: &[u8] = b"CDOC2salt";
const CEK_INFO: &[u8] = b"CDOC2cek";
const HHK_INFO: &[u8] = b"CDOC2hmac";
pub(crate) const KEK_INFO: &[u8] = b"CDOC2kek";
pub(crate) const KEK_PREMASTER_SALT: &[u8] = b"CDOC2kekpremaster";

/// File Master Key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Fmk([u8; FMK_LEN]);

impl Fmk {
    pub fn from_bytes(bytes: [u8; FMK_LEN]) -> Self {
        Self(bytes)
    }

    /// All-zero key to be filled in place.
    pub(crate) fn zeroed() -> Self {
        Self([0u8; FMK_LEN])
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; FMK_LEN] {
        &mut self.0
    }

    pub fn as_bytes(&self) -> &[u8; FMK_LEN] {
        &self.0
    }
}

impl PartialEq for Fmk {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Fmk {}

impl fmt::Debug for Fmk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fmk([hidden])")
    }
}

/// Key Encryption Key, single use per recipient record. Zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Kek([u8; KEK_LEN]);

impl Kek {
    pub fn from_bytes(bytes: [u8; KEK_LEN]) -> Self {
        Self(bytes)
    }

    /// All-zero key to be filled in place.
    pub(crate) fn zeroed() -> Self {
        Self([0u8; KEK_LEN])
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; KEK_LEN] {
        &mut self.0
    }

    pub fn as_bytes(&self) -> &[u8; KEK_LEN] {
        &self.0
    }
}

impl PartialEq for Kek {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for Kek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Kek([hidden])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pbkdf2Params {
    iterations: u32,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            // NIST recommendation for PBKDF2-HMAC-SHA256
            iterations: Self::DEFAULT_ITERATIONS,
        }
    }
}

impl Pbkdf2Params {
    pub const DEFAULT_ITERATIONS: u32 = 600_000;
    pub const MIN_ITERATIONS: u32 = 1_000;
    pub const MAX_ITERATIONS: u32 = 10_000_000;

    pub fn new(iterations: u32) -> Result<Self> {
        let params = Self { iterations };
        params.validate()?;
        Ok(params)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations < Self::MIN_ITERATIONS {
            return Err(Cdoc2Error::kdf(format!(
                "pbkdf2 iterations must be >= {}",
                Self::MIN_ITERATIONS
            )));
        }
        if self.iterations > Self::MAX_ITERATIONS {
            return Err(Cdoc2Error::kdf(format!(
                "pbkdf2 iterations must be <= {}",
                Self::MAX_ITERATIONS
            )));
        }
        Ok(())
    }
}

/// Stretch a password with PBKDF2-HMAC-SHA256.
pub fn derive_password_key(
    password: &str,
    salt: &[u8],
    params: Pbkdf2Params,
) -> Result<Zeroizing<[u8; KEK_LEN]>> {
    params.validate()?;

    let mut key = Zeroizing::new([0u8; KEK_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, key.as_mut());
    Ok(key)
}

/// HKDF-Extract with `salt` followed by HKDF-Expand over the concatenated `info` parts.
pub fn derive_kek(salt: &[u8], ikm: &[u8], info: &[&[u8]]) -> Result<Kek> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut kek = Kek::zeroed();
    hk.expand_multi_info(info, kek.as_mut_bytes())
        .map_err(|e| Cdoc2Error::kdf(format!("HKDF expand failed: {e}")))?;
    Ok(kek)
}

/// Generate a fresh File Master Key: HKDF-Extract over 32 random bytes.
pub fn generate_fmk() -> Result<Fmk> {
    let mut ikm = Zeroizing::new([0u8; FMK_LEN]);
    secure_random(ikm.as_mut())?;

    let (mut prk, _) = Hkdf::<Sha256>::extract(Some(FMK_SALT), ikm.as_ref());
    let mut fmk = Fmk::zeroed();
    fmk.as_mut_bytes().copy_from_slice(&prk);
    prk.as_mut_slice().zeroize();
    Ok(fmk)
}

fn expand_fmk(fmk: &Fmk, info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::from_prk(fmk.as_bytes())
        .map_err(|e| Cdoc2Error::kdf(format!("invalid FMK: {e}")))?;
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, okm.as_mut())
        .map_err(|e| Cdoc2Error::kdf(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Content encryption key for the payload.
pub fn derive_cek(fmk: &Fmk) -> Result<Zeroizing<[u8; CEK_LEN]>> {
    expand_fmk(fmk, CEK_INFO)
}

/// HMAC-SHA256 of the serialized header under the header HMAC key.
pub fn header_hmac(fmk: &Fmk, header: &[u8]) -> Result<[u8; HMAC_LEN]> {
    let hhk = expand_fmk(fmk, HHK_INFO)?;
    let mut mac = HmacSha256::new_from_slice(hhk.as_ref())
        .map_err(|e| Cdoc2Error::kdf(format!("HMAC key rejected: {e}")))?;
    mac.update(header);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check that `tag` authenticates `header` under `fmk`.
pub fn verify_header_hmac(fmk: &Fmk, header: &[u8], tag: &[u8]) -> bool {
    let Ok(hhk) = expand_fmk(fmk, HHK_INFO) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(hhk.as_ref()) else {
        return false;
    };
    mac.update(header);
    mac.verify_slice(tag).is_ok()
}
