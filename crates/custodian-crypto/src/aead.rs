//! Authenticated symmetric encryption (§4.1 `encrypt_gcm`/`decrypt_gcm`).
//!
//! A 96-bit IV and 128-bit tag, as the spec requires; the symmetric key is
//! derived from the caller's password with Argon2id plus a random salt
//! (SPEC_FULL.md §12 resolves the spec's "digest or KDF" choice in favor of
//! a KDF, consistent with the reference crate's zeroize-everything-secret
//! posture for key material).

use argon2::password_hash::SaltString;
use argon2::Argon2;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

const IV_LEN: usize = 12; // 96 bits
const KEY_LEN: usize = 32; // 256 bits

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,
    #[error("malformed ciphertext envelope")]
    MalformedEnvelope,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// `encrypt_gcm(plaintext, password) -> base64(salt‖iv‖ct‖tag)`.
pub fn encrypt_gcm(plaintext: &[u8], password: &str) -> Result<String, AeadError> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let key = derive_key(password, salt.as_str().as_bytes())?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = ChaCha20Poly1305::new((&*key).into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| AeadError::KeyDerivation("encryption failed".to_string()))?;

    let mut envelope = Vec::with_capacity(salt.as_str().len() + IV_LEN + ciphertext.len() + 1);
    envelope.push(salt.as_str().len() as u8);
    envelope.extend_from_slice(salt.as_str().as_bytes());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(envelope))
}

/// Inverts `encrypt_gcm`; an authentication-tag mismatch is reported as a
/// distinct `AuthenticationFailed` kind, per §4.1.
pub fn decrypt_gcm(envelope_b64: &str, password: &str) -> Result<Vec<u8>, AeadError> {
    let envelope = base64::engine::general_purpose::STANDARD
        .decode(envelope_b64)
        .map_err(|_| AeadError::MalformedEnvelope)?;

    if envelope.is_empty() {
        return Err(AeadError::MalformedEnvelope);
    }
    let salt_len = envelope[0] as usize;
    if envelope.len() < 1 + salt_len + IV_LEN {
        return Err(AeadError::MalformedEnvelope);
    }
    let salt_bytes = &envelope[1..1 + salt_len];
    let iv = &envelope[1 + salt_len..1 + salt_len + IV_LEN];
    let ciphertext = &envelope[1 + salt_len + IV_LEN..];

    let key = derive_key(password, salt_bytes)?;
    let cipher = ChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| AeadError::AuthenticationFailed)
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, AeadError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut *key)
        .map_err(|e| AeadError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let ct = encrypt_gcm(b"secret payload", "correct horse battery staple").unwrap();
        let pt = decrypt_gcm(&ct, "correct horse battery staple").unwrap();
        assert_eq!(pt, b"secret payload");
    }

    #[test]
    fn wrong_password_fails_authentication() {
        let ct = encrypt_gcm(b"secret payload", "right password").unwrap();
        let err = decrypt_gcm(&ct, "wrong password").unwrap_err();
        assert!(matches!(err, AeadError::AuthenticationFailed));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let ct = encrypt_gcm(b"secret payload", "pw").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(decrypt_gcm(&tampered, "pw").is_err());
    }
}
