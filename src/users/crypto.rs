//! Crypto primitives for the user store: PBKDF2 password envelopes, the
//! snapshot key derivation, and the AES-256-GCM sealing used for both the
//! snapshot body and individual WAL records.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use thiserror::Error;

/// Iterations for the snapshot/WAL key derivation.
pub const STORE_KEY_ITERATIONS: u32 = 200_000;
/// Iterations for password envelopes.
pub const PASSWORD_ITERATIONS: u32 = 200_000;
/// AES-256 key length.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;
/// Salt length for both the store salt file and password envelopes.
pub const SALT_LEN: usize = 32;

const ENVELOPE_PREFIX: &str = "$pbkdf2-sha256$";

/// Errors from sealing/opening encrypted blobs.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The blob is shorter than nonce + tag.
    #[error("ciphertext truncated")]
    Truncated,
    /// Authentication failed; wrong key or corrupted data.
    #[error("decryption failed")]
    BadSeal,
    /// The system RNG refused to produce bytes.
    #[error("random generator failure")]
    Rng,
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new().fill(buf).map_err(|_| CryptoError::Rng)
}

/// Derive the 32-byte store key from the configured secret and the salt
/// file contents (PBKDF2-HMAC-SHA256, 200 000 iterations).
pub fn derive_store_key(secret: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let iterations = NonZeroU32::new(STORE_KEY_ITERATIONS).expect("nonzero constant");
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, salt, secret.as_bytes(), &mut key);
    key
}

/// Hash a plaintext password into an opaque envelope:
/// `$pbkdf2-sha256$i=<iterations>$<salt hex>$<key hex>`.
pub fn hash_password(plain: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    // Password hashing happens on operator request; an RNG failure here is
    // unrecoverable anyway.
    SystemRandom::new().fill(&mut salt).expect("system rng");
    let mut key = [0u8; KEY_LEN];
    let iterations = NonZeroU32::new(PASSWORD_ITERATIONS).expect("nonzero constant");
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, plain.as_bytes(), &mut key);
    format!(
        "{}i={}${}${}",
        ENVELOPE_PREFIX,
        PASSWORD_ITERATIONS,
        hex_encode(&salt),
        hex_encode(&key)
    )
}

/// Verify a plaintext password against an envelope produced by
/// [`hash_password`]. Unparseable envelopes never verify.
pub fn verify_password(plain: &str, envelope: &str) -> bool {
    let Some(rest) = envelope.strip_prefix(ENVELOPE_PREFIX) else {
        return false;
    };
    let mut parts = rest.split('$');
    let (Some(iter_part), Some(salt_hex), Some(key_hex)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Some(iterations) = iter_part
        .strip_prefix("i=")
        .and_then(|v| v.parse::<u32>().ok())
        .and_then(NonZeroU32::new)
    else {
        return false;
    };
    let (Some(salt), Some(key)) = (hex_decode(salt_hex), hex_decode(key_hex)) else {
        return false;
    };
    pbkdf2::verify(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, plain.as_bytes(), &key).is_ok()
}

/// Encrypt `plaintext` with a fresh random nonce. Output layout:
/// `nonce || ciphertext || tag`. `aad` is authenticated but not stored.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    let mut nonce = [0u8; NONCE_LEN];
    random_bytes(&mut nonce)?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::BadSeal)?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a blob produced by [`seal`] with the same key and aad.
pub fn open(key: &[u8; KEY_LEN], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN + 16 {
        return Err(CryptoError::Truncated);
    }
    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
        .map_err(|_| CryptoError::BadSeal)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_envelope_roundtrip() {
        let envelope = hash_password("hunter2");
        assert!(envelope.starts_with("$pbkdf2-sha256$i="));
        assert!(verify_password("hunter2", &envelope));
        assert!(!verify_password("hunter3", &envelope));
    }

    #[test]
    fn garbage_envelopes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "plaintext"));
        assert!(!verify_password("x", "$pbkdf2-sha256$i=abc$00$00"));
        assert!(!verify_password("x", "$pbkdf2-sha256$i=1000$zz$00"));
    }

    #[test]
    fn seal_open_roundtrip() {
        let mut salt = [0u8; SALT_LEN];
        random_bytes(&mut salt).unwrap();
        let key = derive_store_key("secret", &salt);
        let blob = seal(&key, b"payload", b"aad").unwrap();
        assert_eq!(open(&key, &blob, b"aad").unwrap(), b"payload");
    }

    #[test]
    fn open_rejects_wrong_key_and_aad() {
        let salt = [7u8; SALT_LEN];
        let key = derive_store_key("secret", &salt);
        let blob = seal(&key, b"payload", b"aad").unwrap();
        let other = derive_store_key("other", &salt);
        assert!(matches!(open(&other, &blob, b"aad"), Err(CryptoError::BadSeal)));
        assert!(matches!(open(&key, &blob, b"mismatch"), Err(CryptoError::BadSeal)));
        assert!(matches!(open(&key, &blob[..10], b"aad"), Err(CryptoError::Truncated)));
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let salt = [1u8; SALT_LEN];
        assert_eq!(derive_store_key("s", &salt), derive_store_key("s", &salt));
        assert_ne!(derive_store_key("s", &salt), derive_store_key("t", &salt));
    }

    #[test]
    fn hex_roundtrip() {
        let bytes = [0u8, 1, 0xab, 0xff];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
        assert!(hex_decode("abc").is_none());
    }
}
