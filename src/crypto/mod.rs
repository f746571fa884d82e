//! Cryptographic primitives for CDOC2 containers.
//!
//! Provides secure randomness, HKDF/PBKDF2 key derivation, P-256 ECDH,
//! RSA-OAEP and payload encryption. Higher level modules combine these into
//! per-recipient key encryption keys.

pub mod aead;
pub mod ec;
pub mod kdf;
pub mod oaep;

pub use aead::{decrypt_payload, encrypt_payload, generate_salt, secure_random};
pub use kdf::{Fmk, Kek, Pbkdf2Params, derive_cek, generate_fmk, header_hmac, verify_header_hmac};

/// Length of the File Master Key (32 bytes / 256 bits).
pub const FMK_LEN: usize = 32;
/// Length of a Key Encryption Key; equal to `FMK_LEN` for XOR wrapping.
pub const KEK_LEN: usize = FMK_LEN;
/// Length of every salt stored in recipient records.
pub const SALT_LEN: usize = 32;
/// Length of the payload nonce (12 bytes for ChaCha20-Poly1305).
pub const NONCE_LEN: usize = 12;
/// Length of the content encryption key.
pub const CEK_LEN: usize = 32;
/// Length of the header HMAC-SHA256 tag.
pub const HMAC_LEN: usize = 32;
