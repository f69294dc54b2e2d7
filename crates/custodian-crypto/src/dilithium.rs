//! Signing primitives (§4.1). Reference scheme: ML-DSA-87 (NIST FIPS 204).
//! The closest parameter set offered by `pqcrypto-dilithium` is `dilithium5`
//! (256-bit security); `dilithium2`, weaker, is never used here (see
//! SPEC_FULL.md §12).

use base64::Engine as _;
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey as _, SecretKey as _};
use thiserror::Error;

use custodian_core::types::{PublicKey, Signature};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed base64 encoding: {0}")]
    MalformedEncoding(String),
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Sign `message` with a raw ML-DSA-87-equivalent secret key, returning the
/// base64-encoded detached signature carried on a `Block`.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<Signature, SignatureError> {
    let sk = dilithium5::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSignature)?;
    let sig = dilithium5::detached_sign(message, &sk);
    Ok(Signature(b64().encode(sig.as_bytes())))
}

/// Verify a base64-encoded detached signature against a base64-encoded,
/// X.509 SPKI-wrapped public key (§4.1 `verify(pk, bytes, sig) -> bool`).
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
    let pk_bytes = string_to_public_key(public_key.as_str())?;
    let sig_bytes = b64()
        .decode(signature.as_str())
        .map_err(|e| SignatureError::MalformedEncoding(e.to_string()))?;

    let pk = dilithium5::PublicKey::from_bytes(&pk_bytes).map_err(|_| SignatureError::MalformedPublicKey)?;
    let sig = dilithium5::DetachedSignature::from_bytes(&sig_bytes)
        .map_err(|_| SignatureError::InvalidSignature)?;

    dilithium5::verify_detached_signature(&sig, message, &pk).map_err(|_| SignatureError::InvalidSignature)
}

/// `public_key_to_string`: base64 over the X.509 SubjectPublicKeyInfo DER
/// encoding of the raw public-key bytes (§4.1, §3 Data Model).
pub fn public_key_to_string(pk_bytes: &[u8]) -> String {
    b64().encode(spki::wrap(pk_bytes))
}

/// Inverse of `public_key_to_string`: base64-decodes, then unwraps the
/// SubjectPublicKeyInfo DER envelope to recover the raw key bytes `sign`/
/// `verify` operate on.
pub fn string_to_public_key(s: &str) -> Result<Vec<u8>, SignatureError> {
    let der = b64().decode(s).map_err(|e| SignatureError::MalformedEncoding(e.to_string()))?;
    spki::unwrap(&der).ok_or(SignatureError::MalformedPublicKey)
}

/// Minimal hand-rolled ASN.1 DER encoder/decoder for the one structure this
/// crate needs: `SubjectPublicKeyInfo { algorithm AlgorithmIdentifier,
/// subjectPublicKey BIT STRING }` with no algorithm parameters. No
/// off-the-shelf `pkcs8`/`x509` crate carries an OID for the ML-DSA
/// parameter sets yet, so the envelope is built by hand rather than pulled
/// in as a dependency for a single fixed shape.
mod spki {
    /// `id-ml-dsa-87`, 2.16.840.1.101.3.4.3.19, DER-encoded (NIST's
    /// assigned arc for this parameter set, by analogy with id-sha256's
    /// 2.16.840.1.101.3.4.2.1 under the same NIST algorithms arc).
    const ALGORITHM_OID: &[u8] = &[0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x03, 0x13];

    fn encode_len(len: usize, out: &mut Vec<u8>) {
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = len.to_be_bytes();
            let significant: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
            out.push(0x80 | significant.len() as u8);
            out.extend_from_slice(&significant);
        }
    }

    fn read_len(der: &[u8], pos: &mut usize) -> Option<usize> {
        let first = *der.get(*pos)?;
        *pos += 1;
        if first < 0x80 {
            return Some(first as usize);
        }
        let n = (first & 0x7f) as usize;
        let mut len = 0usize;
        for _ in 0..n {
            len = (len << 8) | (*der.get(*pos)? as usize);
            *pos += 1;
        }
        Some(len)
    }

    pub fn wrap(pk_bytes: &[u8]) -> Vec<u8> {
        let mut algorithm = Vec::new();
        algorithm.extend_from_slice(ALGORITHM_OID);
        let mut algorithm_seq = vec![0x30];
        encode_len(algorithm.len(), &mut algorithm_seq);
        algorithm_seq.extend_from_slice(&algorithm);

        let mut bit_string = vec![0x03];
        encode_len(pk_bytes.len() + 1, &mut bit_string);
        bit_string.push(0x00); // no unused bits
        bit_string.extend_from_slice(pk_bytes);

        let mut body = Vec::new();
        body.extend_from_slice(&algorithm_seq);
        body.extend_from_slice(&bit_string);

        let mut out = vec![0x30];
        encode_len(body.len(), &mut out);
        out.extend_from_slice(&body);
        out
    }

    pub fn unwrap(der: &[u8]) -> Option<Vec<u8>> {
        let mut pos = 0usize;
        if *der.first()? != 0x30 {
            return None;
        }
        pos += 1;
        let _outer_len = read_len(der, &mut pos)?;

        if *der.get(pos)? != 0x30 {
            return None;
        }
        pos += 1;
        let algorithm_len = read_len(der, &mut pos)?;
        let algorithm_bytes = der.get(pos..pos + algorithm_len)?;
        if algorithm_bytes != ALGORITHM_OID {
            return None;
        }
        pos += algorithm_len;

        if *der.get(pos)? != 0x03 {
            return None;
        }
        pos += 1;
        let bit_string_len = read_len(der, &mut pos)?;
        if bit_string_len == 0 {
            return None;
        }
        let unused_bits = *der.get(pos)?;
        if unused_bits != 0 {
            return None;
        }
        pos += 1;
        let key_bytes = der.get(pos..pos + bit_string_len - 1)?;
        Some(key_bytes.to_vec())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn wrap_unwrap_round_trip() {
            let raw = vec![7u8; 2592]; // dilithium5 public key length
            let der = wrap(&raw);
            assert_eq!(unwrap(&der), Some(raw));
        }

        #[test]
        fn unwrap_rejects_foreign_algorithm_oid() {
            let mut der = wrap(&[1, 2, 3]);
            let oid_pos = der
                .windows(ALGORITHM_OID.len())
                .position(|w| w == ALGORITHM_OID)
                .expect("OID present in wrapped output");
            der[oid_pos + 2] ^= 0xff; // corrupt a byte inside the OID
            assert_eq!(unwrap(&der), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (dilithium5::PublicKey, dilithium5::SecretKey) {
        dilithium5::keypair()
    }

    #[test]
    fn sign_verify_round_trip() {
        let (pk, sk) = keypair();
        let pk_str = PublicKey(public_key_to_string(pk.as_bytes()));
        let message = b"a signed block preimage";

        let sig = sign(sk.as_bytes(), message).unwrap();
        assert!(verify(&pk_str, message, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let (pk, sk) = keypair();
        let pk_str = PublicKey(public_key_to_string(pk.as_bytes()));
        let sig = sign(sk.as_bytes(), b"original").unwrap();
        assert!(verify(&pk_str, b"tampered", &sig).is_err());
    }

    #[test]
    fn foreign_public_key_bytes_are_rejected() {
        let pk_str = PublicKey(public_key_to_string(b"not a real dilithium key"));
        let sig = Signature(b64().encode(b"not a real signature"));
        assert!(verify(&pk_str, b"message", &sig).is_err());
    }
}
