//! Authenticated encryption of session payloads.
//!
//! Token layout, every part base64url without padding:
//!
//! ```text
//! v1.<salt>.<nonce>.<ciphertext + tag>
//! ```
//!
//! The AES-256-GCM key is derived from the password with HKDF-SHA256 and a
//! fresh random salt per token. The cookie name is bound in as associated
//! data, so a token cannot be replayed under another cookie.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::error::Error;

const VERSION: &str = "v1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const INFO: &[u8] = b"kite/session";

/// Encrypts `plaintext` into a cookie-safe token.
pub(crate) fn seal(password: &str, aad: &str, plaintext: &[u8]) -> Result<String, Error> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let cipher = cipher(password, &salt).ok_or_else(|| Error::Seal("key derivation failed".into()))?;
    let payload = Payload { msg: plaintext, aad: aad.as_bytes() };
    let sealed = cipher
        .encrypt(GenericArray::from_slice(nonce.as_slice()), payload)
        .map_err(|_| Error::Seal("encryption failed".into()))?;

    Ok(format!(
        "{VERSION}.{}.{}.{}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(nonce),
        URL_SAFE_NO_PAD.encode(sealed),
    ))
}

/// Decrypts a token produced by [`seal`]. The error is a short reason for
/// logs; callers treat every failure the same way.
pub(crate) fn unseal(password: &str, aad: &str, token: &str) -> Result<Vec<u8>, &'static str> {
    let mut parts = token.split('.');
    let (Some(VERSION), Some(salt), Some(nonce), Some(sealed), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err("malformed token");
    };

    let decode = |part: &str| URL_SAFE_NO_PAD.decode(part).map_err(|_| "invalid encoding");
    let salt = decode(salt)?;
    let nonce = decode(nonce)?;
    let sealed = decode(sealed)?;
    if salt.len() != SALT_LEN || nonce.len() != NONCE_LEN {
        return Err("malformed token");
    }

    let cipher = cipher(password, &salt).ok_or("key derivation failed")?;
    let payload = Payload { msg: &sealed, aad: aad.as_bytes() };
    cipher
        .decrypt(GenericArray::from_slice(nonce.as_slice()), payload)
        .map_err(|_| "authentication failed")
}

fn cipher(password: &str, salt: &[u8]) -> Option<Aes256Gcm> {
    let mut key = [0u8; 32];
    Hkdf::<Sha256>::new(Some(salt), password.as_bytes())
        .expand(INFO, &mut key)
        .ok()?;
    Aes256Gcm::new_from_slice(&key).ok()
}
