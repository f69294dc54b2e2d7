use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _};
use zeroize::Zeroizing;

use custodian_core::types::{PublicKey, Signature};

use crate::dilithium::{self, SignatureError};

/// A signing keypair: ML-DSA-87-equivalent public + secret key material.
///
/// The secret key is held in a `Zeroizing<Vec<u8>>` and wiped on drop,
/// following the reference crate's own `KeyPair` posture.
pub struct KeyPair {
    pub public_key: PublicKey,
    secret_key: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium5::keypair();
        Self {
            public_key: PublicKey(dilithium::public_key_to_string(pk.as_bytes())),
            secret_key: Zeroizing::new(sk.as_bytes().to_vec()),
        }
    }

    /// Restore a keypair from raw secret-key bytes and its base64 public key.
    pub fn from_raw(public_key: PublicKey, secret_key_bytes: Vec<u8>) -> Self {
        Self {
            public_key,
            secret_key: Zeroizing::new(secret_key_bytes),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<Signature, SignatureError> {
        dilithium::sign(&self.secret_key, message)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ public_key: {:?} }}", self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_signs_and_verifies() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"hello").unwrap();
        assert!(dilithium::verify(&kp.public_key, b"hello", &sig).is_ok());
    }
}
